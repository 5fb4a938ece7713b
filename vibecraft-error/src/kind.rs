//! Error kinds for vibecraft operations

use std::fmt;

/// The kind of error that occurred.
///
/// Callers match on `ErrorKind` to decide how a failure is surfaced: a
/// `ToolFailed` error becomes text for the agent, a `ProvisioningFailed`
/// error ends the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // =========================================================================
    // General errors
    // =========================================================================
    /// An unexpected error occurred - catch-all for unhandled cases
    Unexpected,

    /// Invalid configuration or parameters
    ConfigInvalid,

    /// Invalid argument passed to function
    InvalidArgument,

    // =========================================================================
    // Sandbox errors
    // =========================================================================
    /// Sandbox could not be created (service unavailable, quota exhausted)
    ProvisioningFailed,

    /// No sandbox exists for the given id
    SandboxNotFound,

    /// A sandbox-backed tool operation failed
    ToolFailed,

    // =========================================================================
    // Durable step errors
    // =========================================================================
    /// A durable step failed after its retry policy gave up
    StepFailed,

    /// Storage operation failed
    StorageFailed,

    /// Serialization/deserialization failed
    SerializationFailed,

    // =========================================================================
    // Persistence errors
    // =========================================================================
    /// Writing or reading messages/fragments failed
    PersistenceFailed,

    /// The caller has no generation points left in the current window
    QuotaExceeded,

    // =========================================================================
    // Inference/LLM errors
    // =========================================================================
    /// LLM inference failed
    InferenceFailed,

    /// Provider not available
    ProviderUnavailable,

    /// Rate limit exceeded
    RateLimited,

    // =========================================================================
    // IO errors
    // =========================================================================
    /// File not found
    FileNotFound,

    /// Permission denied
    PermissionDenied,

    /// IO operation failed
    IoFailed,

    /// Network error
    NetworkFailed,

    /// Failed to parse input
    ParseFailed,
}

impl ErrorKind {
    /// Returns the error kind as a static string
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Unexpected => "Unexpected",
            ErrorKind::ConfigInvalid => "ConfigInvalid",
            ErrorKind::InvalidArgument => "InvalidArgument",

            ErrorKind::ProvisioningFailed => "ProvisioningFailed",
            ErrorKind::SandboxNotFound => "SandboxNotFound",
            ErrorKind::ToolFailed => "ToolFailed",

            ErrorKind::StepFailed => "StepFailed",
            ErrorKind::StorageFailed => "StorageFailed",
            ErrorKind::SerializationFailed => "SerializationFailed",

            ErrorKind::PersistenceFailed => "PersistenceFailed",
            ErrorKind::QuotaExceeded => "QuotaExceeded",

            ErrorKind::InferenceFailed => "InferenceFailed",
            ErrorKind::ProviderUnavailable => "ProviderUnavailable",
            ErrorKind::RateLimited => "RateLimited",

            ErrorKind::FileNotFound => "FileNotFound",
            ErrorKind::PermissionDenied => "PermissionDenied",
            ErrorKind::IoFailed => "IoFailed",
            ErrorKind::NetworkFailed => "NetworkFailed",
            ErrorKind::ParseFailed => "ParseFailed",
        }
    }

    /// Check if this error kind is retryable by default
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::InferenceFailed
                | ErrorKind::NetworkFailed
                | ErrorKind::RateLimited
                | ErrorKind::ProviderUnavailable
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
