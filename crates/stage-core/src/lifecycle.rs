//! Session lifecycle: `Idle → Starting → Active → {Error, Idle}`.
//!
//! Transitions come from protocol events and operator actions.  The
//! connect-then-start timer lives in the core; this module only records its
//! outcome through [`Lifecycle::start_abandoned`].

use std::fmt;

use serde::Serialize;
use stage_proto::protocol::{severity_of, ErrorSeverity};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
#[serde(tag = "phase", content = "code", rename_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    Idle,
    Starting,
    Active,
    /// Halted on a fatal server code until the operator retries.
    Error(String),
}

impl SessionPhase {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Active => "active",
            Self::Error(_) => "error",
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(code) => write!(f, "error ({})", code),
            other => f.write_str(other.label()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("session is already {0}")]
    Busy(SessionPhase),
    #[error("session halted on {0}; retry first")]
    AwaitingRetry(String),
    #[error("no session to stop")]
    NotActive,
    #[error("nothing to retry")]
    NothingToRetry,
}

/// What the core should do about a server `ERROR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDisposition {
    /// `NO_ACTIVE_SESSION`.  `ended_session` is true when an active session
    /// was dropped back to idle.
    Benign { ended_session: bool },
    /// Fatal code.  `escalated` is false when it arrived in a phase that
    /// cannot enter `Error`.
    Fatal { escalated: bool },
    Transient,
}

/// Which operator controls make sense right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub struct ControlAvailability {
    pub can_start: bool,
    pub can_stop: bool,
    pub can_navigate: bool,
    pub can_retry: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Lifecycle {
    phase: SessionPhase,
    /// Phase to return to if the current start attempt is abandoned.
    before_start: Option<SessionPhase>,
    /// Set when a start attempt timed out.
    retry_available: bool,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> &SessionPhase {
        &self.phase
    }

    pub fn is_active(&self) -> bool {
        self.phase == SessionPhase::Active
    }

    pub fn is_starting(&self) -> bool {
        self.phase == SessionPhase::Starting
    }

    pub fn retry_available(&self) -> bool {
        self.retry_available || matches!(self.phase, SessionPhase::Error(_))
    }

    pub fn request_start(&mut self) -> Result<(), LifecycleError> {
        match &self.phase {
            SessionPhase::Idle => {
                self.before_start = Some(self.phase.clone());
                self.retry_available = false;
                self.set(SessionPhase::Starting);
                Ok(())
            }
            SessionPhase::Error(code) => Err(LifecycleError::AwaitingRetry(code.clone())),
            busy => Err(LifecycleError::Busy(busy.clone())),
        }
    }

    /// Clear a halt or a timed-out attempt and start again.
    pub fn retry(&mut self) -> Result<(), LifecycleError> {
        if !self.retry_available() {
            return Err(LifecycleError::NothingToRetry);
        }
        self.retry_available = false;
        self.set(SessionPhase::Idle);
        self.request_start()
    }

    /// `SESSION_STARTED`.  The server is authoritative, so this is accepted
    /// from any phase.
    pub fn session_started(&mut self) {
        self.before_start = None;
        self.retry_available = false;
        self.set(SessionPhase::Active);
    }

    /// `SESSION_ENDED`.  Returns true if a session or attempt was dropped.
    pub fn session_ended(&mut self) -> bool {
        match self.phase {
            SessionPhase::Active | SessionPhase::Starting => {
                self.before_start = None;
                self.set(SessionPhase::Idle);
                true
            }
            _ => false,
        }
    }

    /// The connect-then-start attempt gave up.
    pub fn start_abandoned(&mut self) -> bool {
        if !self.is_starting() {
            return false;
        }
        let previous = self.before_start.take().unwrap_or_default();
        self.retry_available = true;
        self.set(previous);
        true
    }

    pub fn request_stop(&mut self) -> Result<(), LifecycleError> {
        match self.phase {
            SessionPhase::Active | SessionPhase::Starting => {
                self.before_start = None;
                self.set(SessionPhase::Idle);
                Ok(())
            }
            _ => Err(LifecycleError::NotActive),
        }
    }

    pub fn on_error(&mut self, code: &str) -> ErrorDisposition {
        match severity_of(code) {
            ErrorSeverity::Benign => {
                let ended_session = self.is_active();
                if ended_session {
                    self.set(SessionPhase::Idle);
                }
                ErrorDisposition::Benign { ended_session }
            }
            ErrorSeverity::Fatal => match self.phase {
                SessionPhase::Starting | SessionPhase::Active => {
                    self.before_start = None;
                    self.set(SessionPhase::Error(code.to_string()));
                    ErrorDisposition::Fatal { escalated: true }
                }
                _ => ErrorDisposition::Fatal { escalated: false },
            },
            ErrorSeverity::Transient => ErrorDisposition::Transient,
        }
    }

    pub fn controls(&self, connected: bool) -> ControlAvailability {
        ControlAvailability {
            can_start: self.phase == SessionPhase::Idle,
            can_stop: matches!(self.phase, SessionPhase::Active | SessionPhase::Starting),
            can_navigate: connected && self.is_active(),
            can_retry: self.retry_available(),
        }
    }

    fn set(&mut self, phase: SessionPhase) {
        if self.phase != phase {
            info!("session: {} → {}", self.phase, phase);
            self.phase = phase;
        }
    }
}
