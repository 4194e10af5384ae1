//! Error types for fwbench.
//!
//! Three layers:
//! - [`Error`]: general failures (filesystem, JSON) raised while
//!   discovering frameworks and writing results.
//! - [`ProcessError`]: failures of the low-level process and port primitives.
//! - [`TupleError`]: the per-(framework, variant) taxonomy. Every variant is
//!   recovered locally by the campaign driver and recorded, never propagated
//!   as a fatal status.

use thiserror::Error;

/// Result type alias for general fwbench operations.
pub type Result<T> = std::result::Result<T, Error>;

/// General error type.
#[derive(Debug, Error)]
pub enum Error {
    /// A requested resource was not found.
    #[error("Not found: {resource}")]
    NotFound { resource: String },

    /// I/O error (wraps std::io::Error).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context.
    #[error("{message}: {source}")]
    WithContext {
        message: String,
        source: Box<Error>,
    },
}

impl Error {
    /// Creates a NotFound error.
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Adds context to an error.
    ///
    /// # Example
    /// ```
    /// use fwbench_common::{Error, Result};
    ///
    /// fn inner() -> Result<()> {
    ///     Err(Error::not_found("frameworks"))
    /// }
    ///
    /// fn outer() -> Result<()> {
    ///     inner().map_err(|e| e.context("Failed to scan frameworks"))
    /// }
    /// ```
    pub fn context(self, message: impl Into<String>) -> Self {
        Self::WithContext {
            message: message.into(),
            source: Box::new(self),
        }
    }
}

/// Convenience methods for Result types
pub trait ResultExt<T> {
    /// Adds context to an error result.
    fn context(self, message: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(message))
    }
}

// ==============================================================================
// Process Errors
// ==============================================================================

/// Errors raised by the process and port primitives.
#[derive(Error, Debug, Clone)]
pub enum ProcessError {
    #[error("Process not found: {id}")]
    NotFound { id: String },

    #[error("A supervised process is already active: {id} (pid {pid})")]
    AlreadyActive { id: String, pid: u32 },

    #[error("Process spawn failed: {id} - {reason}")]
    SpawnFailed { id: String, reason: String },

    #[error("Process stop failed: {id} - {reason}")]
    StopFailed { id: String, reason: String },

    #[error("Process timeout: {id} - {operation}")]
    Timeout { id: String, operation: String },

    #[error("Process state error: {id} - expected {expected}, got {actual}")]
    InvalidState {
        id: String,
        expected: String,
        actual: String,
    },

    #[error("Process configuration error: {id} - {reason}")]
    Configuration { id: String, reason: String },
}

impl ProcessError {
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    pub fn already_active(id: impl Into<String>, pid: u32) -> Self {
        Self::AlreadyActive { id: id.into(), pid }
    }

    pub fn spawn_failed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SpawnFailed {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn stop_failed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StopFailed {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn timeout(id: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Timeout {
            id: id.into(),
            operation: operation.into(),
        }
    }

    pub fn invalid_state(
        id: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::InvalidState {
            id: id.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn configuration(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for process operations.
pub type ProcessResult<T> = std::result::Result<T, ProcessError>;

// ==============================================================================
// Tuple Errors
// ==============================================================================

/// Why a single (framework, variant) tuple did not complete.
#[derive(Error, Debug, Clone)]
pub enum TupleError {
    /// No recognized lockfile, or the package manager exited non-zero.
    #[error("Dependency install failed for {framework}: {reason}")]
    DependencyInstall { framework: String, reason: String },

    /// No usable start strategy was found. Nothing was spawned.
    #[error("No start strategy for {framework}: {reason}")]
    StartResolution { framework: String, reason: String },

    /// The OS refused to launch the start command.
    #[error("Failed to spawn {framework}: {source}")]
    Spawn {
        framework: String,
        #[source]
        source: ProcessError,
    },

    /// The process was alive but the port was not listening after settling.
    #[error("{framework} did not listen on port {port} in time")]
    ReadinessTimeout { framework: String, port: u16 },

    /// The process exited before the readiness check.
    #[error("{framework} exited before becoming ready on port {port}")]
    CrashedBeforeReady { framework: String, port: u16 },

    /// The external load generator failed.
    #[error("Load generator failed for {framework}: {reason}")]
    LoadGenerator { framework: String, reason: String },
}

impl TupleError {
    pub fn dependency_install(framework: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DependencyInstall {
            framework: framework.into(),
            reason: reason.into(),
        }
    }

    pub fn start_resolution(framework: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StartResolution {
            framework: framework.into(),
            reason: reason.into(),
        }
    }

    pub fn load_generator(framework: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::LoadGenerator {
            framework: framework.into(),
            reason: reason.into(),
        }
    }

    /// True for failures that happened before or during startup.
    pub fn is_start_failure(&self) -> bool {
        matches!(
            self,
            TupleError::Spawn { .. }
                | TupleError::ReadinessTimeout { .. }
                | TupleError::CrashedBeforeReady { .. }
        )
    }
}
