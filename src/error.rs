//! Error types for Mailflow.
//!
//! Expected, frequent outcomes (admission rejection, rewrite loops, "no
//! recipient matched") are result variants on their own types, not errors —
//! see [`crate::limiter::Admission`], [`crate::resolver::Resolution`] and
//! [`crate::pipeline::MatchResult`]. The enums here cover genuine failures.

/// Top-level error type for the core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Address error: {0}")]
    Address(#[from] AddressError),

    #[error("Repository error: {0}")]
    Store(#[from] StoreError),

    #[error("Action error: {0}")]
    Action(#[from] ActionError),
}

/// Configuration failures. These are fatal at build time, never a
/// per-message runtime condition.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Unknown stage: {0}")]
    UnknownStage(String),

    #[error("Duplicate stage: {0}")]
    DuplicateStage(String),

    #[error("No matcher registered under name {0}")]
    UnknownMatcher(String),

    #[error("No action registered under name {0}")]
    UnknownAction(String),

    #[error("Missing required parameter {key} for {component}")]
    MissingParameter { component: String, key: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Mail address parse failures.
#[derive(Debug, thiserror::Error)]
pub enum AddressError {
    #[error("Address {0:?} is missing the @ separator")]
    MissingSeparator(String),

    #[error("Address {0:?} has an empty local part or domain")]
    EmptyPart(String),
}

/// Keyed-store and registry failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("No store protocol registered for {protocol:?}")]
    UnknownProtocol { protocol: String },

    #[error("Invalid repository address {0:?}: expected protocol://path")]
    InvalidAddress(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Action failures, isolated per matched subset by the pipeline driver.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("Action {action} failed: {reason}")]
    Failed { action: String, reason: String },

    #[error("Repository error: {0}")]
    Store(#[from] StoreError),
}

impl ActionError {
    /// Shorthand for a named action failure.
    pub fn failed(action: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Failed {
            action: action.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for the core.
pub type Result<T> = std::result::Result<T, Error>;
