//! Message content screening and selective at-rest encryption.
//!
//! Validation and warnings are advisory checks run before persistence;
//! sensitivity classification decides whether the content is stored as an
//! AES-256-GCM envelope instead of plaintext.
//!
//! ## Envelope format
//!
//! Encrypted rows store three base64 columns:
//! - `content` : ciphertext (without the GCM tag)
//! - `content_iv` : 12-byte random nonce, fresh per message
//! - `content_tag` : 16-byte authentication tag

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::MessageKind;

pub const MAX_CONTENT_CHARS: usize = 2000;
const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

// Content matching any of these is encrypted at rest. Patterns run against
// the raw text; classification must not mutate the message.
static SENSITIVE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        // Card numbers: 13-16 digits in groups of four, optional space/dash
        Regex::new(r"\b\d{4}[\s-]?\d{4}[\s-]?\d{4}[\s-]?\d{1,4}\b")
            .expect("card regex pattern is valid"),
        // Phone numbers (local formats)
        Regex::new(r"\b\d{3}[-.\s]?\d{3}[-.\s]?\d{4}\b").expect("phone regex pattern is valid"),
        // Phone numbers (international)
        Regex::new(r"\+\d{1,3}[-.\s]?\d{6,12}\b").expect("intl phone regex pattern is valid"),
        // Credential keywords
        Regex::new(r"(?i)\b(password|passwd|pwd|passphrase|pin|cvv|cvc|otp)\b")
            .expect("credential regex pattern is valid"),
    ]
});

// Advisory only; these never block a send.
static WARNING_PATTERNS: Lazy<Vec<(Regex, &str)>> = Lazy::new(|| {
    vec![
        (
            Regex::new(r"https?://[^\s]+").expect("url regex pattern is valid"),
            "contains_link",
        ),
        (
            Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b")
                .expect("email regex pattern is valid"),
            "contact_share",
        ),
        (
            Regex::new(r"[!?]{4,}").expect("punctuation regex pattern is valid"),
            "excessive_punctuation",
        ),
    ]
});

#[derive(Debug, Clone, Default)]
pub struct Validation {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// IV and tag of an encrypted message, base64-encoded for TEXT columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub iv: String,
    pub tag: String,
}

pub struct ContentGuard {
    cipher: Aes256Gcm,
}

impl ContentGuard {
    pub fn new(master_key: &[u8; 32]) -> Self {
        let key = aes_gcm::Key::<Aes256Gcm>::from_slice(master_key);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// Pre-persistence checks. Errors block the send; warnings ride along in
    /// the response and never block.
    pub fn validate(&self, sender_id: Uuid, content: &str, kind: MessageKind) -> Validation {
        let mut result = Validation::default();

        if sender_id.is_nil() {
            result.errors.push("sender is required".into());
        }
        let trimmed = content.trim();
        if trimmed.is_empty() && kind == MessageKind::Text {
            result.errors.push("message content is required".into());
        }
        if content.chars().count() > MAX_CONTENT_CHARS {
            result.errors.push(format!(
                "message content exceeds {} characters",
                MAX_CONTENT_CHARS
            ));
        }

        for (pattern, label) in WARNING_PATTERNS.iter() {
            if pattern.is_match(content) {
                result.warnings.push((*label).to_string());
            }
        }
        if has_repeated_chars(content) {
            result.warnings.push("repeated_characters".into());
        }
        if has_excessive_caps(content) {
            result.warnings.push("excessive_capitalization".into());
        }

        result
    }

    /// True when the content matches a pattern that must not be stored in
    /// plaintext.
    pub fn is_sensitive(&self, content: &str) -> bool {
        SENSITIVE_PATTERNS.iter().any(|p| p.is_match(content))
    }

    /// Encrypt unconditionally. Returns base64 ciphertext and its envelope.
    pub fn encrypt(&self, plaintext: &str) -> Result<(String, Envelope), AppError> {
        let mut rng = rand::thread_rng();
        let nonce_bytes: [u8; IV_LEN] = rng.gen();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let mut sealed = self
            .cipher
            .encrypt(nonce, Payload::from(plaintext.as_bytes()))
            .map_err(|e| AppError::Encryption(format!("AES-GCM encrypt failed: {}", e)))?;

        // aes-gcm appends the tag to the ciphertext; store it separately.
        if sealed.len() < TAG_LEN {
            return Err(AppError::Encryption("ciphertext shorter than tag".into()));
        }
        let tag = sealed.split_off(sealed.len() - TAG_LEN);

        Ok((
            STANDARD.encode(&sealed),
            Envelope {
                iv: STANDARD.encode(nonce_bytes),
                tag: STANDARD.encode(tag),
            },
        ))
    }

    /// Encrypt only when the content classifies as sensitive; `None` means
    /// the content is safe to store in plaintext.
    pub fn encrypt_if_sensitive(
        &self,
        content: &str,
    ) -> Result<Option<(String, Envelope)>, AppError> {
        if self.is_sensitive(content) {
            self.encrypt(content).map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn decrypt(&self, ciphertext_b64: &str, envelope: &Envelope) -> Result<String, AppError> {
        let iv = STANDARD
            .decode(&envelope.iv)
            .map_err(|e| AppError::Encryption(format!("invalid iv: {}", e)))?;
        if iv.len() != IV_LEN {
            return Err(AppError::Encryption(format!(
                "iv must be {} bytes, got {}",
                IV_LEN,
                iv.len()
            )));
        }
        let tag = STANDARD
            .decode(&envelope.tag)
            .map_err(|e| AppError::Encryption(format!("invalid tag: {}", e)))?;
        if tag.len() != TAG_LEN {
            return Err(AppError::Encryption(format!(
                "tag must be {} bytes, got {}",
                TAG_LEN,
                tag.len()
            )));
        }
        let mut ciphertext = STANDARD
            .decode(ciphertext_b64)
            .map_err(|e| AppError::Encryption(format!("invalid ciphertext: {}", e)))?;
        ciphertext.extend_from_slice(&tag);

        let nonce = Nonce::from_slice(&iv);
        let plaintext = self
            .cipher
            .decrypt(nonce, Payload::from(ciphertext.as_slice()))
            .map_err(|e| AppError::Encryption(format!("AES-GCM decrypt failed: {}", e)))?;

        String::from_utf8(plaintext)
            .map_err(|e| AppError::Encryption(format!("invalid utf-8: {}", e)))
    }

    /// Decrypt for reads. A corrupt envelope degrades to the stored form
    /// instead of failing the whole fetch.
    pub fn reveal(&self, stored: &str, envelope: Option<&Envelope>) -> String {
        match envelope {
            Some(env) => match self.decrypt(stored, env) {
                Ok(plaintext) => plaintext,
                Err(e) => {
                    tracing::warn!(error = %e, "message decryption failed, returning stored content");
                    stored.to_string()
                }
            },
            None => stored.to_string(),
        }
    }
}

fn has_repeated_chars(text: &str) -> bool {
    let mut run = 1usize;
    let mut prev: Option<char> = None;
    for c in text.chars() {
        if prev == Some(c) {
            run += 1;
            if run >= 5 {
                return true;
            }
        } else {
            run = 1;
            prev = Some(c);
        }
    }
    false
}

fn has_excessive_caps(text: &str) -> bool {
    let letters: Vec<char> = text.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.len() < 10 {
        return false;
    }
    let caps = letters.iter().filter(|c| c.is_uppercase()).count();
    caps as f32 / letters.len() as f32 > 0.7
}

/// Generate a random 256-bit master key encoded in base64. Handy for
/// provisioning MESSAGE_ENCRYPTION_MASTER_KEY.
pub fn generate_master_key() -> String {
    let mut rng = rand::thread_rng();
    let key_bytes: [u8; 32] = rng.gen();
    STANDARD.encode(key_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> ContentGuard {
        ContentGuard::new(&[7u8; 32])
    }

    #[test]
    fn card_numbers_are_sensitive() {
        let g = guard();
        assert!(g.is_sensitive("my card is 4111 1111 1111 1111"));
        assert!(g.is_sensitive("4111-1111-1111-1111"));
        assert!(g.is_sensitive("4111111111111111"));
    }

    #[test]
    fn phone_numbers_are_sensitive() {
        let g = guard();
        assert!(g.is_sensitive("call me at 555-123-4567"));
        assert!(g.is_sensitive("call me at 5551234567"));
        assert!(g.is_sensitive("whatsapp +49 151234567"));
    }

    #[test]
    fn credential_keywords_are_sensitive() {
        let g = guard();
        assert!(g.is_sensitive("the password is hunter2"));
        assert!(g.is_sensitive("PIN 1234"));
        assert!(g.is_sensitive("your OTP: 82913"));
    }

    #[test]
    fn ordinary_text_is_not_sensitive() {
        let g = guard();
        assert!(!g.is_sensitive("is the bike still available?"));
        assert!(!g.is_sensitive("I can offer 1500 for it"));
        assert!(!g.is_sensitive("see you tomorrow at 10"));
    }

    #[test]
    fn encrypt_round_trips() {
        let g = guard();
        let (ciphertext, env) = g.encrypt("meet at +49 151234567").unwrap();
        assert_ne!(ciphertext, "meet at +49 151234567");
        assert_eq!(g.decrypt(&ciphertext, &env).unwrap(), "meet at +49 151234567");
    }

    #[test]
    fn encrypt_uses_fresh_iv_per_message() {
        let g = guard();
        let (c1, e1) = g.encrypt("same text").unwrap();
        let (c2, e2) = g.encrypt("same text").unwrap();
        assert_ne!(e1.iv, e2.iv);
        assert_ne!(c1, c2);
    }

    #[test]
    fn tampered_ciphertext_fails_decryption() {
        let g = guard();
        let (ciphertext, env) = g.encrypt("secret").unwrap();
        let mut bytes = STANDARD.decode(&ciphertext).unwrap();
        bytes[0] ^= 0xff;
        let tampered = STANDARD.encode(&bytes);
        assert!(g.decrypt(&tampered, &env).is_err());
    }

    #[test]
    fn wrong_key_fails_decryption() {
        let g = guard();
        let other = ContentGuard::new(&[9u8; 32]);
        let (ciphertext, env) = g.encrypt("secret").unwrap();
        assert!(other.decrypt(&ciphertext, &env).is_err());
    }

    #[test]
    fn reveal_degrades_to_stored_content_on_corrupt_envelope() {
        let g = guard();
        let (ciphertext, env) = g.encrypt("secret").unwrap();
        let corrupt = Envelope {
            iv: "not base64!!".into(),
            tag: env.tag,
        };
        assert_eq!(g.reveal(&ciphertext, Some(&corrupt)), ciphertext);
    }

    #[test]
    fn reveal_passes_plaintext_through() {
        let g = guard();
        assert_eq!(g.reveal("hello", None), "hello");
    }

    #[test]
    fn encrypt_if_sensitive_skips_safe_content() {
        let g = guard();
        assert!(g.encrypt_if_sensitive("plain offer").unwrap().is_none());
        assert!(g
            .encrypt_if_sensitive("password is hunter2")
            .unwrap()
            .is_some());
    }

    #[test]
    fn validate_rejects_empty_text() {
        let g = guard();
        let v = g.validate(Uuid::new_v4(), "   ", MessageKind::Text);
        assert!(!v.is_valid());
    }

    #[test]
    fn validate_allows_empty_caption_for_attachments() {
        let g = guard();
        let v = g.validate(Uuid::new_v4(), "", MessageKind::Image);
        assert!(v.is_valid());
    }

    #[test]
    fn validate_rejects_nil_sender() {
        let g = guard();
        let v = g.validate(Uuid::nil(), "hello", MessageKind::Text);
        assert!(!v.is_valid());
    }

    #[test]
    fn validate_rejects_oversized_content() {
        let g = guard();
        let long = "x".repeat(MAX_CONTENT_CHARS + 1);
        let v = g.validate(Uuid::new_v4(), &long, MessageKind::Text);
        assert!(!v.is_valid());
    }

    #[test]
    fn warnings_do_not_block() {
        let g = guard();
        let v = g.validate(
            Uuid::new_v4(),
            "check https://example.com NOW!!!!",
            MessageKind::Text,
        );
        assert!(v.is_valid());
        assert!(v.warnings.contains(&"contains_link".to_string()));
        assert!(v.warnings.contains(&"excessive_punctuation".to_string()));
    }

    #[test]
    fn repeated_characters_warn() {
        let g = guard();
        let v = g.validate(Uuid::new_v4(), "helloooooo", MessageKind::Text);
        assert!(v.warnings.contains(&"repeated_characters".to_string()));
    }

    #[test]
    fn classification_not_affected_by_validation() {
        let g = guard();
        let content = "my password is hunter2";
        let v = g.validate(Uuid::new_v4(), content, MessageKind::Text);
        assert!(v.is_valid());
        assert!(g.is_sensitive(content));
    }

    #[test]
    fn generated_key_is_32_bytes() {
        let key = generate_master_key();
        assert_eq!(STANDARD.decode(key).unwrap().len(), 32);
    }
}
