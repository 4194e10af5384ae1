//! Framework specs as discovered on disk.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use fwbench_common::{Error, FrameworkName, Result, Variant};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::discovery::TuplePlan;
use crate::resolve::{resolve_start_strategies, PortContext, PortResolverChain, PortSource};

pub const MANIFEST_FILE: &str = "package.json";

/// The parts of `package.json` the campaign cares about.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Manifest {
    pub name: Option<String>,
    pub main: Option<String>,
    pub scripts: BTreeMap<String, String>,
    /// Free-form `config` block; only `config.port` is read.
    pub config: Option<Value>,
    pub port: Option<Value>,
}

impl Manifest {
    /// Load `package.json` from `dir`. A missing manifest is an empty one.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        match std::fs::read_to_string(&path) {
            Ok(content) => Self::parse(&content)
                .map_err(|e| e.context(format!("Invalid manifest {}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(Error::from(e).context(format!("Failed to read {}", path.display()))),
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// `scripts.start`, when present and non-blank.
    pub fn start_script(&self) -> Option<&str> {
        self.scripts
            .get("start")
            .map(String::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    /// Numeric `config.port`, falling back to a top-level `port`.
    pub fn config_port(&self) -> Option<u16> {
        self.config
            .as_ref()
            .and_then(|config| config.get("port"))
            .and_then(port_value)
            .or_else(|| self.port.as_ref().and_then(port_value))
    }
}

/// Accepts `3000` and `"3000"`.
fn port_value(value: &Value) -> Option<u16> {
    let port = match value {
        Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        Value::String(s) => s.trim().parse::<u16>().ok(),
        _ => None,
    }?;
    (port > 0).then_some(port)
}

/// Package manager selected by the lockfile in a framework directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    Bun,
    Npm,
}

impl PackageManager {
    /// Bun's lockfile wins when both kinds are present.
    pub fn detect(dir: &Path) -> Option<Self> {
        [PackageManager::Bun, PackageManager::Npm]
            .into_iter()
            .find(|pm| pm.lockfiles().iter().any(|lock| dir.join(lock).is_file()))
    }

    pub fn lockfiles(&self) -> &'static [&'static str] {
        match self {
            PackageManager::Bun => &["bun.lockb", "bun.lock"],
            PackageManager::Npm => &["package-lock.json"],
        }
    }

    pub fn program(&self) -> &'static str {
        match self {
            PackageManager::Bun => "bun",
            PackageManager::Npm => "npm",
        }
    }
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program())
    }
}

/// One way of starting a framework server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StartStrategy {
    /// `<pm> run start`
    Script { package_manager: PackageManager },
    /// `<runtime> <file>`, e.g. `node main.js`
    EntryFile { runtime: String, file: String },
}

impl StartStrategy {
    pub fn program_and_args(&self) -> (String, Vec<String>) {
        match self {
            StartStrategy::Script { package_manager } => (
                package_manager.program().to_string(),
                vec!["run".to_string(), "start".to_string()],
            ),
            StartStrategy::EntryFile { runtime, file } => (runtime.clone(), vec![file.clone()]),
        }
    }

    pub fn describe(&self) -> String {
        let (program, args) = self.program_and_args();
        std::iter::once(program).chain(args).collect::<Vec<_>>().join(" ")
    }
}

/// A (framework, variant) tuple with everything needed to run it.
#[derive(Debug, Clone)]
pub struct FrameworkSpec {
    /// Base name, used for artifact names.
    pub name: FrameworkName,
    /// Directory the variant is served from (`foo` or `foo-schema`).
    pub directory: FrameworkName,
    pub dir: PathBuf,
    pub variant: Variant,
    pub manifest: Manifest,
    pub package_manager: Option<PackageManager>,
    /// In declared order; the first one is used.
    pub start_strategies: Vec<StartStrategy>,
    pub port: u16,
    pub port_source: PortSource,
}

impl FrameworkSpec {
    /// Inspect `<root>/<plan.directory>` and resolve its package manager,
    /// start strategies, and port.
    pub fn load(root: &Path, plan: &TuplePlan, ports: &PortResolverChain) -> Result<Self> {
        let dir = root.join(plan.directory.as_str());
        if !dir.is_dir() {
            return Err(Error::not_found(dir.display().to_string()));
        }

        let manifest = Manifest::load(&dir)?;
        let package_manager = PackageManager::detect(&dir);
        let start_strategies = resolve_start_strategies(&dir, &manifest, package_manager);

        let (port, port_source) = ports.resolve(&PortContext {
            family: plan.directory.family(),
            dir: &dir,
            manifest: &manifest,
        });

        Ok(Self {
            name: plan.base.clone(),
            directory: plan.directory.clone(),
            dir,
            variant: plan.variant,
            manifest,
            package_manager,
            start_strategies,
            port,
            port_source,
        })
    }

    pub fn family(&self) -> &str {
        self.directory.family()
    }

    /// `<name>_<variant>`, e.g. `express_no_schema`.
    pub fn tuple_id(&self) -> String {
        format!("{}_{}", self.name, self.variant.tag())
    }

    pub fn artifact_name(&self) -> String {
        format!("{}.json", self.tuple_id())
    }

    pub fn log_name(&self) -> String {
        format!("{}.log", self.tuple_id())
    }

    pub fn start_strategy(&self) -> Option<&StartStrategy> {
        self.start_strategies.first()
    }
}
