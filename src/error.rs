use thiserror::Error;

/// Application level error type used throughout the crate.
#[derive(Error, Debug)]
pub enum IncidentError {
    /// I/O related failure
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),

    /// Error while parsing YAML configuration files
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Incident or address could not be resolved
    #[error("Incident not found: {0}")]
    NotFound(String),

    /// Request is not valid for the incident's current state
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A request parameter failed validation before any mutation
    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    /// A correlated monitoring-station request expired before a response arrived
    #[error("Monitoring request timed out: {0}")]
    Timeout(String),

    /// Failure in the incident store
    #[error("Store error: {0}")]
    Store(String),

    /// Failure delivering a message on the platform bus
    #[error("Bus error: {0}")]
    Bus(String),
}

/// Convenient alias over [`Result`] using [`IncidentError`]
pub type Result<T> = std::result::Result<T, IncidentError>;
