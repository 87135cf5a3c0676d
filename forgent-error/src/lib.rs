//! # forgent-error
//!
//! Unified error handling for forgent.
//!
//! ## Design Philosophy
//!
//! - **ErrorKind**: Know what error occurred (e.g., InterfaceNotFound, InferenceFailed)
//! - **ErrorStatus**: Decide how to handle it (Permanent, Temporary)
//! - **Error Context**: Assist in locating the cause with rich context
//! - **Error Source**: Wrap underlying errors without leaking raw types
//!
//! ## Usage
//!
//! ```rust
//! use forgent_error::{Error, ErrorKind};
//!
//! fn example() -> Result<(), Error> {
//!     Err(Error::new(ErrorKind::ConfigInvalid, "missing LiteLLMModel section")
//!         .with_operation("config::load_settings")
//!         .with_context("path", "settings.yaml"))
//! }
//! ```
//!
//! ## Principles
//!
//! - All functions return `Result<T, forgent_error::Error>`
//! - External errors are wrapped with `set_source(err)`
//! - Same error handled once, subsequent ops only append context
//! - Don't abuse `From<OtherError>` to prevent raw error leakage

mod error;
mod kind;
mod status;

pub use error::Error;
pub use kind::ErrorKind;
pub use status::ErrorStatus;

/// Result type alias using forgent Error
pub type Result<T> = std::result::Result<T, Error>;
