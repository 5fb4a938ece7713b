//! # vibecraft-error
//!
//! Unified error handling for vibecraft.
//!
//! ## Design Philosophy
//!
//! - **ErrorKind**: Know what error occurred (e.g., ProvisioningFailed, PersistenceFailed)
//! - **ErrorStatus**: Decide how to handle it (Permanent, Temporary, Persistent)
//! - **Error Context**: Assist in locating the cause with rich context
//! - **Error Source**: Wrap underlying errors without leaking raw types
//!
//! ## Usage
//!
//! ```rust
//! use vibecraft_error::{Error, ErrorKind};
//!
//! fn example() -> Result<(), Error> {
//!     Err(Error::new(ErrorKind::SandboxNotFound, "sandbox 'sbx_42' is gone")
//!         .with_operation("sandbox::connect")
//!         .with_context("sandbox_id", "sbx_42"))
//! }
//! ```
//!
//! ## Principles
//!
//! - All functions return `Result<T, vibecraft_error::Error>`
//! - External errors are wrapped with `set_source(err)`
//! - Same error handled once, subsequent ops only append context
//! - Don't abuse `From<OtherError>` to prevent raw error leakage

mod error;
mod kind;
mod status;

pub use error::Error;
pub use kind::ErrorKind;
pub use status::ErrorStatus;

/// Result type alias using vibecraft Error
pub type Result<T> = std::result::Result<T, Error>;
