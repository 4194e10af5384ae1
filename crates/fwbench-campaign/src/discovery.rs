//! Turning a directory listing into the ordered list of campaign tuples.

use std::collections::BTreeSet;
use std::path::Path;

use fwbench_common::{Error, FrameworkName, Result, ResultExt, Variant};
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct DiscoveryOptions {
    /// Treat `fastify-v5` and friends as bases of their own.
    pub include_versioned: bool,
    /// Restrict to these bases. Empty means every base.
    pub only: Vec<String>,
}

/// One planned (framework, variant) run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TuplePlan {
    pub base: FrameworkName,
    /// Directory serving this variant.
    pub directory: FrameworkName,
    pub variant: Variant,
}

impl TuplePlan {
    fn new(base: &FrameworkName, directory: FrameworkName, variant: Variant) -> Self {
        Self {
            base: base.clone(),
            directory,
            variant,
        }
    }
}

/// Plan the campaign from directory names.
///
/// Bases come out in sorted order, each as a schema tuple followed by a
/// no-schema tuple. `<base>-schema` serves the schema variant when it exists;
/// otherwise `<base>` serves both.
pub fn plan_tuples<I, S>(entries: I, options: &DiscoveryOptions) -> Vec<TuplePlan>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let names: BTreeSet<FrameworkName> = entries
        .into_iter()
        .map(|s| FrameworkName::from(s.as_ref()))
        .collect();

    let mut plans = Vec::new();
    for name in &names {
        if name.is_schema_sibling() {
            if !names.contains(&FrameworkName::from(name.without_schema())) {
                debug!("Ignoring {}: no base directory", name);
            }
            continue;
        }
        if name.is_versioned() && !options.include_versioned {
            debug!("Ignoring versioned directory {}", name);
            continue;
        }
        if !options.only.is_empty() && !options.only.iter().any(|only| only == name.as_str()) {
            continue;
        }

        let sibling = name.schema_sibling();
        let schema_dir = if names.contains(&sibling) { sibling } else { name.clone() };

        for variant in Variant::ALL {
            let directory = match variant {
                Variant::Schema => schema_dir.clone(),
                Variant::NoSchema => name.clone(),
            };
            plans.push(TuplePlan::new(name, directory, variant));
        }
    }

    plans
}

/// Sorted subdirectory names of `root`, skipping hidden ones and
/// `node_modules`.
pub fn list_framework_dirs(root: &Path) -> Result<Vec<String>> {
    if !root.is_dir() {
        return Err(Error::not_found(root.display().to_string()));
    }

    let mut names = Vec::new();
    let entries = std::fs::read_dir(root)
        .map_err(Error::from)
        .context(format!("Failed to list {}", root.display()))?;

    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if name.starts_with('.') || name == "node_modules" {
            continue;
        }
        names.push(name);
    }

    names.sort();
    Ok(names)
}
