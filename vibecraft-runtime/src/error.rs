//! Runtime error helpers
//!
//! Re-exports vibecraft-error and adds the constructors the runtime uses
//! when wrapping storage, sandbox and serialization failures.

pub use vibecraft_error::{Error, ErrorKind, ErrorStatus, Result};

pub fn io_error(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::IoFailed, message)
}

pub fn serialization_error(message: impl Into<String>) -> Error {
    Error::serialization_failed(message)
}

pub fn storage_failed(message: impl Into<String>) -> Error {
    Error::storage_failed(message)
}

/// A path handed to a sandbox that resolves outside of it
pub fn path_escapes_sandbox(path: impl Into<String>) -> Error {
    let path = path.into();
    Error::new(ErrorKind::PermissionDenied, format!("path '{}' escapes the sandbox root", path))
        .with_context("path", path)
}

pub fn http_status(operation: &'static str, status: u16, body: impl Into<String>) -> Error {
    let kind = match status {
        429 => ErrorKind::RateLimited,
        502..=504 => ErrorKind::ProviderUnavailable,
        _ => ErrorKind::Unexpected,
    };
    Error::new(kind, body)
        .with_operation(operation)
        .with_context("status", status.to_string())
}
