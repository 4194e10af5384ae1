//! Port and start-command resolution.
//!
//! Ports come from an ordered chain of [`PortResolver`]s; the first one that
//! answers wins and the configured default covers the rest.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::CampaignConfig;
use crate::framework::{Manifest, PackageManager, StartStrategy};

/// Entry files tried, in order, when the manifest has no start script.
pub const FALLBACK_ENTRY_FILES: [&str; 6] =
    ["main.js", "index.js", "server.js", "src/index.ts", "index.ts", "src/index.js"];

/// Which resolver produced a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortSource {
    FamilyDefault,
    SourceScrape,
    StartScript,
    ManifestConfig,
    Default,
}

impl fmt::Display for PortSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PortSource::FamilyDefault => "family default",
            PortSource::SourceScrape => "source file",
            PortSource::StartScript => "start script",
            PortSource::ManifestConfig => "package.json",
            PortSource::Default => "default",
        };
        f.write_str(s)
    }
}

/// What a resolver gets to look at.
#[derive(Debug, Clone, Copy)]
pub struct PortContext<'a> {
    pub family: &'a str,
    pub dir: &'a Path,
    pub manifest: &'a Manifest,
}

pub trait PortResolver: Send + Sync {
    fn source(&self) -> PortSource;

    fn resolve(&self, ctx: &PortContext<'_>) -> Option<u16>;
}

fn parse_port(s: &str) -> Option<u16> {
    s.parse::<u16>().ok().filter(|port| *port > 0)
}

/// Fixed ports for families that ignore `$PORT`.
pub struct FamilyDefaultResolver {
    ports: BTreeMap<String, u16>,
}

impl FamilyDefaultResolver {
    pub fn new(ports: BTreeMap<String, u16>) -> Self {
        Self { ports }
    }
}

impl PortResolver for FamilyDefaultResolver {
    fn source(&self) -> PortSource {
        PortSource::FamilyDefault
    }

    fn resolve(&self, ctx: &PortContext<'_>) -> Option<u16> {
        self.ports.get(ctx.family).copied()
    }
}

/// Scrapes a port literal out of one of a family's source files.
pub struct SourceScrapeResolver {
    family: String,
    files: Vec<String>,
    pattern: Regex,
}

impl SourceScrapeResolver {
    pub fn new(family: impl Into<String>, files: Vec<String>, pattern: &str) -> Result<Self> {
        Ok(Self {
            family: family.into(),
            files,
            pattern: Regex::new(pattern).with_context(|| format!("Invalid port pattern: {}", pattern))?,
        })
    }
}

impl PortResolver for SourceScrapeResolver {
    fn source(&self) -> PortSource {
        PortSource::SourceScrape
    }

    fn resolve(&self, ctx: &PortContext<'_>) -> Option<u16> {
        if ctx.family != self.family {
            return None;
        }

        self.files.iter().find_map(|file| {
            let content = std::fs::read_to_string(ctx.dir.join(file)).ok()?;
            let port = parse_port(self.pattern.captures(&content)?.get(1)?.as_str())?;
            debug!("Found port {} in {}/{}", port, ctx.dir.display(), file);
            Some(port)
        })
    }
}

/// `PORT=<n>` inside `scripts.start`.
pub struct StartScriptResolver {
    pattern: Regex,
}

impl StartScriptResolver {
    pub fn new() -> Result<Self> {
        Ok(Self {
            pattern: Regex::new(r"\bPORT=(\d+)")?,
        })
    }
}

impl PortResolver for StartScriptResolver {
    fn source(&self) -> PortSource {
        PortSource::StartScript
    }

    fn resolve(&self, ctx: &PortContext<'_>) -> Option<u16> {
        let script = ctx.manifest.start_script()?;
        parse_port(self.pattern.captures(script)?.get(1)?.as_str())
    }
}

/// `config.port` or top-level `port` in `package.json`.
pub struct ManifestConfigResolver;

impl PortResolver for ManifestConfigResolver {
    fn source(&self) -> PortSource {
        PortSource::ManifestConfig
    }

    fn resolve(&self, ctx: &PortContext<'_>) -> Option<u16> {
        ctx.manifest.config_port()
    }
}

/// Ordered resolvers plus the fallback port.
pub struct PortResolverChain {
    resolvers: Vec<Box<dyn PortResolver>>,
    default_port: u16,
}

impl PortResolverChain {
    pub fn new(default_port: u16) -> Self {
        Self {
            resolvers: Vec::new(),
            default_port,
        }
    }

    pub fn with(mut self, resolver: impl PortResolver + 'static) -> Self {
        self.resolvers.push(Box::new(resolver));
        self
    }

    /// Family defaults, source scrapes, start script, manifest, default.
    pub fn from_config(config: &CampaignConfig) -> Result<Self> {
        let mut chain = Self::new(config.default_port).with(FamilyDefaultResolver::new(config.family_ports.clone()));

        for pattern in &config.source_patterns {
            chain = chain.with(SourceScrapeResolver::new(
                pattern.family.clone(),
                pattern.files.clone(),
                &pattern.pattern,
            )?);
        }

        Ok(chain.with(StartScriptResolver::new()?).with(ManifestConfigResolver))
    }

    pub fn resolve(&self, ctx: &PortContext<'_>) -> (u16, PortSource) {
        self.resolvers
            .iter()
            .find_map(|resolver| resolver.resolve(ctx).map(|port| (port, resolver.source())))
            .unwrap_or((self.default_port, PortSource::Default))
    }
}

/// Start strategies for a framework directory, in the order they are tried:
/// the manifest's start script, then the first fallback entry file present.
pub fn resolve_start_strategies(
    dir: &Path,
    manifest: &Manifest,
    package_manager: Option<PackageManager>,
) -> Vec<StartStrategy> {
    let mut strategies = Vec::new();

    if manifest.start_script().is_some() {
        strategies.push(StartStrategy::Script {
            package_manager: package_manager.unwrap_or(PackageManager::Npm),
        });
    }

    if let Some(file) = FALLBACK_ENTRY_FILES.iter().find(|file| dir.join(file).is_file()) {
        let runtime = if file.ends_with(".ts") || package_manager == Some(PackageManager::Bun) {
            "bun"
        } else {
            "node"
        };
        strategies.push(StartStrategy::EntryFile {
            runtime: runtime.to_string(),
            file: file.to_string(),
        });
    }

    strategies
}
