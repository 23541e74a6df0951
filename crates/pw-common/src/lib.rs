//! pcapwatch common types, IDs, and errors.
//!
//! This crate provides foundational types shared across pw-core modules:
//! - Session and run identity types
//! - Common error types with stable codes

pub mod error;
pub mod id;

pub use error::{Error, ErrorCategory, Result, StructuredError, SuggestedAction};
pub use id::{RunId, SessionId};
