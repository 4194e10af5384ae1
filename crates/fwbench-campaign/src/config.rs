use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level campaign configuration.
///
/// Every field has a default, so an empty YAML document is a valid config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CampaignConfig {
    /// One subdirectory per framework variant.
    pub frameworks_dir: PathBuf,
    /// Receives `<name>_<variant>.json`, `logs/`, and `summary.json`.
    pub results_dir: PathBuf,

    /// Pause between spawn and the single readiness check.
    #[serde(with = "duration_serde")]
    pub settle_delay: Duration,
    /// Pause after killing port owners.
    #[serde(with = "duration_serde")]
    pub free_delay: Duration,
    /// Bound on waiting for a killed server to exit.
    #[serde(with = "duration_serde")]
    pub stop_timeout: Duration,
    /// Overall bound on spawn-to-ready per tuple.
    #[serde(with = "duration_serde")]
    pub readiness_budget: Duration,

    /// Port used when no resolver matches.
    pub default_port: u16,
    /// Fixed ports for families that ignore `$PORT`.
    pub family_ports: BTreeMap<String, u16>,
    /// Source files scraped for a port literal, per family.
    pub source_patterns: Vec<SourcePattern>,
    /// Extra environment for every server.
    pub server_env: BTreeMap<String, String>,

    pub load: LoadProfile,

    /// Treat versioned directories such as `fastify-v5` as base frameworks.
    pub include_versioned: bool,
    /// Restrict the campaign to these base frameworks. Empty means all.
    pub only: Vec<String>,
    /// Exit non-zero when any tuple failed to start or failed under load.
    pub fail_on_tuple_failure: bool,
}

/// Where to look for a hard-coded port in a family's sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePattern {
    pub family: String,
    /// Candidate files relative to the framework directory, in order.
    pub files: Vec<String>,
    /// Regex whose first capture group is the port.
    pub pattern: String,
}

impl SourcePattern {
    fn new(family: &str, files: &[&str], pattern: &str) -> Self {
        Self {
            family: family.to_string(),
            files: files.iter().map(|f| f.to_string()).collect(),
            pattern: pattern.to_string(),
        }
    }
}

/// Fixed load-test profile handed to the load generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadProfile {
    /// Load generator executable.
    pub program: String,
    pub concurrency: u32,
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    pub method: String,
    pub path: String,
    pub body: Option<String>,
    /// Appended verbatim before the target URL.
    pub extra_args: Vec<String>,
}

impl Default for LoadProfile {
    fn default() -> Self {
        Self {
            program: "oha".to_string(),
            concurrency: 100,
            duration: Duration::from_secs(10),
            method: "POST".to_string(),
            path: "/".to_string(),
            body: Some(r#"{"name":"bench","age":42,"email":"bench@example.com"}"#.to_string()),
            extra_args: Vec::new(),
        }
    }
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            frameworks_dir: PathBuf::from("frameworks"),
            results_dir: PathBuf::from("results"),
            settle_delay: Duration::from_secs(2),
            free_delay: Duration::from_secs(2),
            stop_timeout: Duration::from_secs(5),
            readiness_budget: Duration::from_secs(30),
            default_port: 3000,
            family_ports: BTreeMap::from([("encore".to_string(), 4000)]),
            source_patterns: default_source_patterns(),
            server_env: BTreeMap::from([("NODE_ENV".to_string(), "production".to_string())]),
            load: LoadProfile::default(),
            include_versioned: false,
            only: Vec::new(),
            fail_on_tuple_failure: false,
        }
    }
}

fn default_source_patterns() -> Vec<SourcePattern> {
    vec![
        SourcePattern::new("express", &["main.js", "index.js"], r"port.*?(\d{2,5})"),
        SourcePattern::new("fastify", &["main.js", "index.js", "server.js"], r"port:\s*(\d{2,5})"),
        SourcePattern::new("hono", &["src/index.ts", "index.ts"], r"port:\s*(\d{2,5})"),
        SourcePattern::new("elysia", &["src/index.ts", "index.ts"], r"port:\s*(\d{2,5})"),
        SourcePattern::new("bun", &["src/index.ts", "index.ts"], r"port:\s*(\d{2,5})"),
    ]
}

impl CampaignConfig {
    /// Load configuration from a YAML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        Self::load_from_string(&content)
    }

    /// Load configuration from a YAML string
    pub fn load_from_string(content: &str) -> Result<Self> {
        // An empty document deserializes to unit, not to a struct.
        let config: CampaignConfig = if content.trim().is_empty() {
            CampaignConfig::default()
        } else {
            serde_yaml::from_str(content).context("Failed to parse YAML configuration")?
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.default_port == 0 {
            return Err(anyhow!("default_port must be between 1 and 65535"));
        }

        for (family, port) in &self.family_ports {
            if *port == 0 {
                return Err(anyhow!("family_ports.{} must be between 1 and 65535", family));
            }
        }

        if self.readiness_budget <= self.settle_delay {
            return Err(anyhow!(
                "readiness_budget ({:?}) must exceed settle_delay ({:?})",
                self.readiness_budget,
                self.settle_delay
            ));
        }

        if self.stop_timeout.is_zero() {
            return Err(anyhow!("stop_timeout must be greater than 0"));
        }

        for pattern in &self.source_patterns {
            let regex = regex::Regex::new(&pattern.pattern)
                .with_context(|| format!("Invalid source pattern for {}: {}", pattern.family, pattern.pattern))?;
            if regex.captures_len() < 2 {
                return Err(anyhow!(
                    "Source pattern for {} needs a capture group for the port: {}",
                    pattern.family,
                    pattern.pattern
                ));
            }
            if pattern.files.is_empty() {
                return Err(anyhow!("Source pattern for {} lists no files", pattern.family));
            }
        }

        let mut only = HashSet::new();
        for name in &self.only {
            if !only.insert(name) {
                return Err(anyhow!("Duplicate framework in only: {}", name));
            }
        }

        validate_load_profile(&self.load)
    }
}

fn validate_load_profile(load: &LoadProfile) -> Result<()> {
    if load.program.trim().is_empty() {
        return Err(anyhow!("load.program cannot be empty"));
    }
    if load.concurrency == 0 {
        return Err(anyhow!("load.concurrency must be greater than 0"));
    }
    if load.duration.is_zero() {
        return Err(anyhow!("load.duration must be greater than 0"));
    }
    if load.duration.subsec_nanos() != 0 {
        return Err(anyhow!("load.duration must be whole seconds: {:?}", load.duration));
    }
    if !load.path.starts_with('/') {
        return Err(anyhow!("load.path must start with '/': {}", load.path));
    }
    match load.method.to_uppercase().as_str() {
        "GET" | "POST" | "PUT" | "PATCH" | "DELETE" | "HEAD" | "OPTIONS" => Ok(()),
        _ => Err(anyhow!("Unsupported HTTP method: {}", load.method)),
    }
}

pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(crate) fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        // Check for "ms" BEFORE "s" since "ms" ends with 's'
        if let Some(num) = s.strip_suffix("ms") {
            let millis: u64 = num.trim().parse().map_err(|_| format!("Invalid duration: {}", s))?;
            Ok(Duration::from_millis(millis))
        } else if let Some(num) = s.strip_suffix('s') {
            let secs: u64 = num.trim().parse().map_err(|_| format!("Invalid duration: {}", s))?;
            Ok(Duration::from_secs(secs))
        } else if let Some(num) = s.strip_suffix('m') {
            let mins: u64 = num.trim().parse().map_err(|_| format!("Invalid duration: {}", s))?;
            let secs = mins.checked_mul(60).ok_or_else(|| format!("Duration out of range: {}", s))?;
            Ok(Duration::from_secs(secs))
        } else {
            Err(format!("Duration must end with 's', 'ms', or 'm': {}", s))
        }
    }
}
