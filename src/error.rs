//! Error types for the rampart crate.

use thiserror::Error;

/// Top-level rampart error.
#[derive(Debug, Error)]
pub enum RampartError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("incident error: {0}")]
    Incident(#[from] IncidentError),
    #[error("quarantine error: {0}")]
    Quarantine(#[from] QuarantineError),
    #[error("playbook error: {0}")]
    Playbook(#[from] PlaybookError),
    #[error("remediation error: {0}")]
    Remediation(#[from] RemediationError),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("{0}")]
    Other(String),
}

/// Errors from the shared store adapter.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("wrong type for key '{key}': expected {expected}")]
    WrongType { key: String, expected: &'static str },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Errors from the incident ledger.
#[derive(Debug, Error)]
pub enum IncidentError {
    #[error("incident '{0}' not found")]
    NotFound(String),
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors from the quarantine service.
#[derive(Debug, Error)]
pub enum QuarantineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("malformed quarantine entry for '{key}': {message}")]
    MalformedEntry { key: String, message: String },
}

/// Errors from playbook definition and registration.
#[derive(Debug, Error)]
pub enum PlaybookError {
    #[error("invalid condition '{condition}': {message}")]
    InvalidCondition { condition: String, message: String },
    #[error("duplicate step order {order} in playbook '{playbook}'")]
    DuplicateStepOrder { playbook: String, order: u32 },
    #[error("playbook '{0}' has no steps")]
    EmptyPlaybook(String),
}

/// Errors from remediation execution.
#[derive(Debug, Error)]
pub enum RemediationError {
    #[error("no handler registered for action '{0}'")]
    UnknownAction(String),
    #[error("incident error: {0}")]
    Incident(#[from] IncidentError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors from individual action handlers.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("missing parameter '{0}'")]
    MissingParameter(&'static str),
    #[error("invalid parameter '{name}': {message}")]
    InvalidParameter { name: &'static str, message: String },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("incident error: {0}")]
    Incident(#[from] IncidentError),
    #[error("quarantine error: {0}")]
    Quarantine(#[from] QuarantineError),
    #[error("{0}")]
    Other(String),
}
