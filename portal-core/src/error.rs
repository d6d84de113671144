//! Error types for PORTAL operations

use std::time::Duration;
use thiserror::Error;

/// Resolution errors raised while producing a manifest.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("No resolver for item type: {item_type}")]
    NoResolver { item_type: String },

    #[error("Resolver for {item_type} failed: {reason}")]
    ResolverFailed { item_type: String, reason: String },

    #[error("Resolver for {item_type} panicked")]
    ResolverPanicked { item_type: String },

    #[error("Resolver for item type {item_type} returned no access manifest")]
    EmptyManifest { item_type: String },

    #[error("Resolution budget of {budget_ms}ms exceeded")]
    BudgetExceeded { budget_ms: u64 },
}

impl ResolveError {
    /// Budget-exceeded error for the given budget.
    pub fn budget_exceeded(budget: Duration) -> Self {
        Self::BudgetExceeded {
            budget_ms: budget.as_millis() as u64,
        }
    }
}

/// Manifest shape errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// External-URL policy errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("{field} points at internal host {host}")]
    InternalHost { field: String, host: String },

    #[error("{field} is not a parseable URL")]
    UnparseableUrl { field: String },
}

/// Cache backend errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("Backend {backend} unavailable: {reason}")]
    Unavailable { backend: String, reason: String },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Lock poisoned: {resource}")]
    LockPoisoned { resource: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Incompatible options: {option_a} and {option_b}")]
    IncompatibleOptions { option_a: String, option_b: String },
}

/// Master error type for all PORTAL errors.
///
/// `Clone` so that a single failed resolution can be handed to every
/// coalesced waiter.
#[derive(Debug, Clone, Error)]
pub enum PortalError {
    #[error("{0}")]
    Resolve(#[from] ResolveError),

    #[error("Manifest validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Policy violation: {0}")]
    Policy(#[from] PolicyError),

    #[error("Cache backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl PortalError {
    /// True for failures of the shared cache store.
    pub fn is_backend(&self) -> bool {
        matches!(self, Self::Backend(_))
    }

    /// Shorthand for an unavailable backend.
    pub fn unavailable(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Backend(BackendError::Unavailable {
            backend: backend.into(),
            reason: reason.into(),
        })
    }
}

/// Result type alias for PORTAL operations.
pub type PortalResult<T> = Result<T, PortalError>;

// =============================================================================
// TESTS
// =============================================================================
