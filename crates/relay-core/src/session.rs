//! Session identity and lifecycle states.

use std::fmt;

use crate::error::{DomainError, DomainResult};

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Unique identifier for one client connection.
///
/// Assigned by the listener at accept time from a monotonically increasing
/// counter. Opaque to everything except logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Creates a session identifier from a connection number.
    pub const fn new(n: u64) -> Self {
        Self(n)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

// ============================================================================
// Session Lifecycle
// ============================================================================

/// Lifecycle state of a client session.
///
/// ```text
/// Connecting ──▶ AwaitName ──▶ Active
///      │             │  ▲        │
///      │             └──┘        │
///      │          (name taken)   │
///      └───────────┬─────────────┘
///                  ▼
///               Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    /// Connection accepted, streams not yet set up
    #[default]
    Connecting,
    /// Prompting for a display name
    AwaitName,
    /// Name accepted, relaying chat lines
    Active,
    /// Torn down (terminal)
    Closed,
}

impl SessionState {
    /// Returns true if `next` is a legal successor of this state.
    ///
    /// `AwaitName -> AwaitName` is legal: a taken name re-prompts in place.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Connecting, AwaitName)
                | (AwaitName, AwaitName)
                | (AwaitName, Active)
                | (Connecting | AwaitName | Active, Closed)
        )
    }

    /// Moves to `next`, rejecting transitions the lifecycle does not allow.
    pub fn transition(self, next: SessionState) -> DomainResult<SessionState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(DomainError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    /// Returns true once the session has been torn down.
    pub fn is_closed(self) -> bool {
        self == SessionState::Closed
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Connecting => "connecting",
            Self::AwaitName => "await_name",
            Self::Active => "active",
            Self::Closed => "closed",
        };
        f.write_str(label)
    }
}
