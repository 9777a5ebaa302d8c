// for error definitions
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MeshError {
    /// The registry has no healthy instance of the requested service
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    /// The breaker for the destination is open; the operation was not invoked
    #[error("Circuit open for service '{service}', retry after {retry_after:?}")]
    CircuitOpen {
        service: String,
        retry_after: Duration,
    },

    /// Transient transport fault, eligible for retry
    #[error("Transport error: {0}")]
    Transport(TransportError),

    /// Client error status that is never retried
    #[error("Non-retryable HTTP status {status} from service '{service}'")]
    NonRetryableStatus { service: String, status: u16 },

    /// Every configured attempt failed with a retryable outcome
    #[error("Retries exhausted for service '{service}' after {attempts} attempts: {last}")]
    RetriesExhausted {
        service: String,
        attempts: usize,
        last: Box<MeshError>,
    },

    /// The response body did not match the expected shape
    #[error("Decode error: {0}")]
    Decode(String),

    /// The registry backend refused or could not accept a registration
    #[error("Registration error: {0}")]
    Registration(String),

    /// The registry backend failed during lookup or deregistration
    #[error("Registry error: {0}")]
    Registry(String),

    /// The caller cancelled the call
    #[error("Call cancelled by caller")]
    Cancelled,

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unexpected or internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Transport-level faults
#[derive(Error, Debug)]
pub enum TransportError {
    /// Could not reach the remote instance
    #[error("connection failed: {0}")]
    Connect(String),

    /// The remote instance did not answer in time
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The remote instance answered with a retryable status (5xx, 408, 429)
    #[error("retryable status {0}")]
    Status(u16),

    /// Any other I/O or protocol failure
    #[error("{0}")]
    Other(String),
}

impl MeshError {
    /// Whether the retry policy may re-attempt after this outcome
    pub fn is_retryable(&self) -> bool {
        matches!(self, MeshError::Transport(_))
    }

    /// Whether this outcome is a failure of the dependency itself.
    ///
    /// Cancellation is the caller's choice and a decode failure is a contract
    /// mismatch, so neither may trip a breaker.
    pub fn counts_against_breaker(&self) -> bool {
        !matches!(
            self,
            MeshError::Cancelled
                | MeshError::Decode(_)
                | MeshError::CircuitOpen { .. }
                | MeshError::ServiceNotFound(_)
        )
    }

    /// Last HTTP status observed, if any
    pub fn last_status(&self) -> Option<u16> {
        match self {
            MeshError::Transport(TransportError::Status(status)) => Some(*status),
            MeshError::NonRetryableStatus { status, .. } => Some(*status),
            MeshError::RetriesExhausted { last, .. } => last.last_status(),
            _ => None,
        }
    }

    /// Dependency the failure belongs to, if the error names one
    pub fn service(&self) -> Option<&str> {
        match self {
            MeshError::ServiceNotFound(service)
            | MeshError::CircuitOpen { service, .. }
            | MeshError::NonRetryableStatus { service, .. }
            | MeshError::RetriesExhausted { service, .. } => Some(service.as_str()),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for MeshError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            // reqwest does not expose the configured deadline
            MeshError::Transport(TransportError::Timeout(Duration::ZERO))
        } else if err.is_connect() {
            MeshError::Transport(TransportError::Connect(err.to_string()))
        } else if err.is_decode() {
            MeshError::Decode(err.to_string())
        } else {
            MeshError::Transport(TransportError::Other(err.to_string()))
        }
    }
}

// implement conversions from serde_json::Error to MeshError
impl From<serde_json::Error> for MeshError {
    fn from(err: serde_json::Error) -> Self {
        MeshError::Decode(err.to_string())
    }
}

// define a Result type alias for convenience
pub type Result<T> = std::result::Result<T, MeshError>;
