//! Errors raised by domain types.

use crate::SessionState;
use thiserror::Error;

/// Errors that can occur in domain operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A session tried to move between states the lifecycle does not allow
    #[error("Invalid session transition: {from} -> {to}")]
    InvalidTransition { from: SessionState, to: SessionState },
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
