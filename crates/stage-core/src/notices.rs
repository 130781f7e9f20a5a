//! Operator notices and the per-code throttle for transient server errors.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    /// Shown briefly; the session carries on.
    Transient,
    /// Stays until the operator acts (retry, new start).
    Persistent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    /// Server error code, when the notice came from one.
    pub code: Option<String>,
    pub message: String,
    pub at: DateTime<Local>,
}

impl Notice {
    pub fn new(level: NoticeLevel, code: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            level,
            code: code.map(str::to_string),
            message: message.into(),
            at: Local::now(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Info, None, message)
    }

    pub fn transient(code: &str, message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Transient, Some(code), message)
    }

    pub fn persistent(code: &str, message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Persistent, Some(code), message)
    }
}

/// Lets each error code through at most once per window.
#[derive(Debug, Clone)]
pub struct ErrorThrottle {
    window: Duration,
    last_seen: HashMap<String, Instant>,
}

impl ErrorThrottle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_seen: HashMap::new(),
        }
    }

    /// True if `code` should be logged and surfaced now.
    /// Codes whose window has passed are forgotten.
    pub fn admit(&mut self, code: &str, now: Instant) -> bool {
        let window = self.window;
        self.last_seen
            .retain(|_, seen| now.saturating_duration_since(*seen) < window);
        if self.last_seen.contains_key(code) {
            return false;
        }
        self.last_seen.insert(code.to_string(), now);
        true
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.last_seen.len()
    }

    pub fn clear(&mut self) {
        self.last_seen.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttle_per_code_and_window() {
        let start = Instant::now();
        let mut throttle = ErrorThrottle::new(Duration::from_secs(30));

        assert!(throttle.admit("RATE_LIMITED", start));
        assert!(!throttle.admit("RATE_LIMITED", start + Duration::from_secs(29)));
        assert!(throttle.admit("UPSTREAM_TIMEOUT", start + Duration::from_secs(1)));
        assert!(throttle.admit("RATE_LIMITED", start + Duration::from_secs(30)));

        throttle.clear();
        assert!(throttle.admit("RATE_LIMITED", start + Duration::from_secs(31)));
    }

    #[test]
    fn test_throttle_forgets_expired_codes() {
        let start = Instant::now();
        let mut throttle = ErrorThrottle::new(Duration::from_secs(30));
        for n in 0..50 {
            assert!(throttle.admit(&format!("UPSTREAM_{}", n), start));
        }
        assert_eq!(throttle.tracked(), 50);

        assert!(throttle.admit("RATE_LIMITED", start + Duration::from_secs(31)));
        assert_eq!(throttle.tracked(), 1);
        assert!(!throttle.admit("RATE_LIMITED", start + Duration::from_secs(32)));
    }

    #[test]
    fn test_notice_constructors() {
        let notice = Notice::persistent("EMPTY_SETLIST", "setlist is empty");
        assert_eq!(notice.level, NoticeLevel::Persistent);
        assert_eq!(notice.code.as_deref(), Some("EMPTY_SETLIST"));
        assert_eq!(Notice::info("connected").code, None);
    }
}
