//! # fwbench process
//!
//! Process lifecycle and port coordination primitives:
//! - Process existence checks and forced termination
//! - Port probing and forced port release
//! - Supervised spawning with captured output
//! - Single-shot readiness detection

pub mod capture;
pub mod check;
pub mod port;
pub mod readiness;
pub mod supervisor;
pub mod terminate;

// Re-export main types
pub use capture::{OutputCapture, StreamType};
pub use check::*;
pub use port::PortProbe;
pub use readiness::{ReadinessDetector, ReadinessResult};
pub use supervisor::{LaunchSpec, PortLease, ProcessSupervisor, RunningProcess};
pub use terminate::*;
