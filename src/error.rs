//! Error types for custos.
//!
//! Every error variant is a distinct failure mode of the service. Error
//! messages are intentionally minimal. They signal *what* failed without
//! revealing which roles exist, which token was presented, or any secret
//! content.

use std::fmt;

/// The single error type for all custos operations.
#[derive(Debug)]
pub enum CustosError {
    /// The credential was missing, unknown, or its role is not permitted to
    /// perform the requested operation. These three cases are deliberately
    /// indistinguishable.
    Unauthorized,

    /// Secret retrieval was refused because the lock flag is set.
    Locked,

    /// No secret is stored under the given identifier.
    NotFound(String),

    /// A wipe was requested without the exact confirmation sentinel.
    ConfirmationRequired,

    /// The request was malformed (missing body field, empty identifier, ...).
    InvalidRequest(String),

    /// Reading or durably writing persisted state failed.
    Storage(String),

    /// The provisioning configuration is missing or malformed.
    Config(String),

    /// Provisioning was attempted over an existing configuration.
    AlreadyProvisioned,

    /// The system's random number generator failed to produce bytes.
    RandomnessFailure,
}

impl CustosError {
    pub(crate) fn storage(context: &str, err: impl fmt::Display) -> Self {
        Self::Storage(format!("{context}: {err}"))
    }
}

impl fmt::Display for CustosError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthorized => write!(f, "unauthorized"),
            Self::Locked => write!(f, "service is locked"),
            Self::NotFound(id) => write!(f, "data not found: {}", id),
            Self::ConfirmationRequired => write!(f, "confirmation required"),
            Self::InvalidRequest(reason) => write!(f, "invalid request: {}", reason),
            Self::Storage(reason) => write!(f, "storage failure: {}", reason),
            Self::Config(reason) => write!(f, "configuration error: {}", reason),
            Self::AlreadyProvisioned => write!(f, "server already configured"),
            Self::RandomnessFailure => write!(f, "randomness source failed"),
        }
    }
}

impl std::error::Error for CustosError {}

impl From<std::io::Error> for CustosError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}
