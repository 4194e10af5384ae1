//! # fwbench campaign
//!
//! Everything above the process primitives: configuration, framework
//! discovery, port and start-command resolution, dependency installation,
//! the external load generator, the per-tuple [`FrameworkRunner`], the
//! [`CampaignDriver`], and the [`SignalGuard`].

pub mod config;
pub mod discovery;
pub mod driver;
pub mod framework;
pub mod guard;
pub mod install;
pub mod loadgen;
pub mod resolve;
pub mod runner;

pub use config::{CampaignConfig, LoadProfile, SourcePattern};
pub use discovery::{list_framework_dirs, plan_tuples, DiscoveryOptions, TuplePlan};
pub use driver::{CampaignDriver, CampaignReport, CampaignResult, TupleStatus};
pub use framework::{FrameworkSpec, Manifest, PackageManager, StartStrategy};
pub use guard::{ShutdownSignal, SignalGuard};
pub use install::{DependencyInstaller, PackageManagerInstaller};
pub use loadgen::{LoadGenerator, LoadRequest, OhaLoadGenerator};
pub use resolve::{PortContext, PortResolver, PortResolverChain, PortSource};
pub use runner::FrameworkRunner;
