//! # fwbench common
//!
//! Error types and core domain types shared by every fwbench crate.

pub mod errors;
pub mod types;

// Re-export commonly used items
pub use errors::{Error, ProcessError, ProcessResult, Result, ResultExt, TupleError};
pub use types::{FrameworkName, Variant};
