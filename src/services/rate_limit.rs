//! Fixed-window request limiting, scoped per identifier and route class.
//!
//! Counters are process-local and injected through [`crate::state::AppState`];
//! nothing here is a global. A window starts on the first request after the
//! previous window expired and never slides.

use dashmap::DashMap;
use std::env;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteClass {
    /// Reads and sends into existing conversations.
    Api,
    /// Attachment messages.
    Upload,
    /// Requests that may create a conversation.
    ConversationStart,
}

impl RouteClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteClass::Api => "api",
            RouteClass::Upload => "upload",
            RouteClass::ConversationStart => "conversation_start",
        }
    }

    fn parse_prefix(value: &str) -> Option<Self> {
        match value {
            "api" => Some(RouteClass::Api),
            "upload" => Some(RouteClass::Upload),
            "conversation_start" => Some(RouteClass::ConversationStart),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Budget {
    pub max_requests: u32,
    pub window: Duration,
}

#[derive(Debug, Clone)]
pub struct RateLimitBudgets {
    pub api: Budget,
    pub upload: Budget,
    pub conversation_start: Budget,
    pub enabled: bool,
}

impl Default for RateLimitBudgets {
    fn default() -> Self {
        Self {
            api: Budget {
                max_requests: 120,
                window: Duration::from_secs(60),
            },
            upload: Budget {
                max_requests: 20,
                window: Duration::from_secs(60),
            },
            conversation_start: Budget {
                max_requests: 10,
                window: Duration::from_secs(60),
            },
            enabled: true,
        }
    }
}

impl RateLimitBudgets {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api: Budget {
                max_requests: env_u32("RATE_LIMIT_API_MAX", defaults.api.max_requests),
                window: Duration::from_secs(env_u64("RATE_LIMIT_API_WINDOW_SECS", 60)),
            },
            upload: Budget {
                max_requests: env_u32("RATE_LIMIT_UPLOAD_MAX", defaults.upload.max_requests),
                window: Duration::from_secs(env_u64("RATE_LIMIT_UPLOAD_WINDOW_SECS", 60)),
            },
            conversation_start: Budget {
                max_requests: env_u32(
                    "RATE_LIMIT_CONVERSATION_MAX",
                    defaults.conversation_start.max_requests,
                ),
                window: Duration::from_secs(env_u64("RATE_LIMIT_CONVERSATION_WINDOW_SECS", 60)),
            },
            enabled: env::var("RATE_LIMIT_ENABLED")
                .map(|v| !v.eq_ignore_ascii_case("false"))
                .unwrap_or(true),
        }
    }
}

fn env_u32(name: &str, default: u32) -> u32 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug)]
struct Window {
    count: u32,
    started_at: Instant,
}

pub struct RateLimiter {
    budgets: RateLimitBudgets,
    windows: DashMap<String, Window>,
}

impl RateLimiter {
    pub fn new(budgets: RateLimitBudgets) -> Self {
        Self {
            budgets,
            windows: DashMap::new(),
        }
    }

    /// Limiter that admits everything. For tests and local tooling.
    pub fn disabled() -> Self {
        Self::new(RateLimitBudgets {
            enabled: false,
            ..RateLimitBudgets::default()
        })
    }

    fn budget_for(&self, class: RouteClass) -> Budget {
        match class {
            RouteClass::Api => self.budgets.api,
            RouteClass::Upload => self.budgets.upload,
            RouteClass::ConversationStart => self.budgets.conversation_start,
        }
    }

    /// Count one request against `identifier` in `class`. Over-budget
    /// requests fail with a retry hint and are not counted.
    pub fn admit(&self, identifier: &str, class: RouteClass) -> Result<(), AppError> {
        if !self.budgets.enabled {
            return Ok(());
        }
        let budget = self.budget_for(class);
        let key = format!("{}:{}", class.as_str(), identifier);
        let now = Instant::now();

        // The entry guard holds the shard lock, so check-and-increment is atomic.
        let mut entry = self.windows.entry(key).or_insert_with(|| Window {
            count: 0,
            started_at: now,
        });
        if now.duration_since(entry.started_at) >= budget.window {
            entry.count = 0;
            entry.started_at = now;
        }
        if entry.count >= budget.max_requests {
            let elapsed = now.duration_since(entry.started_at);
            let retry_after_secs = budget
                .window
                .checked_sub(elapsed)
                .unwrap_or_default()
                .as_secs()
                .max(1);
            return Err(AppError::RateLimited { retry_after_secs });
        }
        entry.count += 1;
        Ok(())
    }

    pub fn admit_user(&self, user_id: Uuid, class: RouteClass) -> Result<(), AppError> {
        self.admit(&user_id.to_string(), class)
    }

    /// Drop windows that have expired so idle identifiers do not accumulate.
    pub fn sweep(&self) {
        let now = Instant::now();
        self.windows.retain(|key, window| {
            let class = key
                .split(':')
                .next()
                .and_then(RouteClass::parse_prefix)
                .unwrap_or(RouteClass::Api);
            now.duration_since(window.started_at) < self.budget_for(class).window
        });
    }

    #[cfg(test)]
    fn tracked_windows(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_budgets(max: u32, window_ms: u64) -> RateLimitBudgets {
        let budget = Budget {
            max_requests: max,
            window: Duration::from_millis(window_ms),
        };
        RateLimitBudgets {
            api: budget,
            upload: budget,
            conversation_start: budget,
            enabled: true,
        }
    }

    #[test]
    fn admits_up_to_budget_then_rejects() {
        let limiter = RateLimiter::new(tiny_budgets(5, 60_000));
        for _ in 0..5 {
            assert!(limiter.admit("alice", RouteClass::Api).is_ok());
        }
        let err = limiter.admit("alice", RouteClass::Api).unwrap_err();
        assert_eq!(err.status_code(), 429);
    }

    #[test]
    fn rejection_carries_retry_hint_within_window() {
        let limiter = RateLimiter::new(tiny_budgets(1, 30_000));
        limiter.admit("alice", RouteClass::Api).unwrap();
        match limiter.admit("alice", RouteClass::Api).unwrap_err() {
            AppError::RateLimited { retry_after_secs } => {
                assert!(retry_after_secs >= 1 && retry_after_secs <= 30);
            }
            other => panic!("expected RateLimited, got {:?}", other),
        }
    }

    #[test]
    fn window_resets_after_expiry() {
        let limiter = RateLimiter::new(tiny_budgets(2, 100));
        limiter.admit("alice", RouteClass::Api).unwrap();
        limiter.admit("alice", RouteClass::Api).unwrap();
        assert!(limiter.admit("alice", RouteClass::Api).is_err());

        std::thread::sleep(Duration::from_millis(150));
        assert!(limiter.admit("alice", RouteClass::Api).is_ok());
    }

    #[test]
    fn identifiers_are_isolated() {
        let limiter = RateLimiter::new(tiny_budgets(1, 60_000));
        limiter.admit("alice", RouteClass::Api).unwrap();
        assert!(limiter.admit("alice", RouteClass::Api).is_err());
        assert!(limiter.admit("bob", RouteClass::Api).is_ok());
    }

    #[test]
    fn route_classes_are_isolated() {
        let limiter = RateLimiter::new(tiny_budgets(1, 60_000));
        limiter.admit("alice", RouteClass::Api).unwrap();
        assert!(limiter.admit("alice", RouteClass::Upload).is_ok());
        assert!(limiter
            .admit("alice", RouteClass::ConversationStart)
            .is_ok());
    }

    #[test]
    fn rejected_requests_are_not_counted() {
        let limiter = RateLimiter::new(tiny_budgets(1, 100));
        limiter.admit("alice", RouteClass::Api).unwrap();
        for _ in 0..10 {
            assert!(limiter.admit("alice", RouteClass::Api).is_err());
        }
        std::thread::sleep(Duration::from_millis(150));
        // A fresh window admits again even after a burst of rejections.
        assert!(limiter.admit("alice", RouteClass::Api).is_ok());
    }

    #[test]
    fn disabled_limiter_admits_everything() {
        let limiter = RateLimiter::disabled();
        for _ in 0..1000 {
            assert!(limiter.admit("alice", RouteClass::Api).is_ok());
        }
    }

    #[test]
    fn sweep_drops_expired_windows() {
        let limiter = RateLimiter::new(tiny_budgets(5, 50));
        limiter.admit("alice", RouteClass::Api).unwrap();
        limiter.admit("bob", RouteClass::Upload).unwrap();
        assert_eq!(limiter.tracked_windows(), 2);

        std::thread::sleep(Duration::from_millis(80));
        limiter.sweep();
        assert_eq!(limiter.tracked_windows(), 0);
    }

    #[test]
    fn admit_user_keys_by_uuid() {
        let limiter = RateLimiter::new(tiny_budgets(1, 60_000));
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        limiter.admit_user(alice, RouteClass::Api).unwrap();
        assert!(limiter.admit_user(alice, RouteClass::Api).is_err());
        assert!(limiter.admit_user(bob, RouteClass::Api).is_ok());
    }
}
