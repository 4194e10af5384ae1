//! Core domain types used throughout fwbench.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Directory suffix that marks the schema-validated sibling of a framework.
pub const SCHEMA_SUFFIX: &str = "-schema";

/// Framework name as it appears on disk, e.g. `fastify-v5` or `hono-schema`.
///
/// # Example
/// ```
/// use fwbench_common::FrameworkName;
///
/// let name = FrameworkName::from("fastify-v5-schema");
/// assert!(name.is_schema_sibling());
/// assert!(name.is_versioned());
/// assert_eq!(name.family(), "fastify");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FrameworkName(String);

impl FrameworkName {
    /// Creates a new FrameworkName from a string.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for `<base>-schema` directories.
    pub fn is_schema_sibling(&self) -> bool {
        self.0.len() > SCHEMA_SUFFIX.len() && self.0.ends_with(SCHEMA_SUFFIX)
    }

    /// True when the name (without `-schema`) ends in a version suffix
    /// such as `-v5`, `-5`, or `@5`.
    pub fn is_versioned(&self) -> bool {
        split_version(self.without_schema()).1.is_some()
    }

    /// Name of the schema-validated sibling directory.
    pub fn schema_sibling(&self) -> FrameworkName {
        FrameworkName(format!("{}{}", self.without_schema(), SCHEMA_SUFFIX))
    }

    /// Name with a trailing `-schema` removed.
    pub fn without_schema(&self) -> &str {
        if self.is_schema_sibling() {
            &self.0[..self.0.len() - SCHEMA_SUFFIX.len()]
        } else {
            &self.0
        }
    }

    /// Family key used for port defaults and source patterns:
    /// the name without `-schema` and without a version suffix.
    pub fn family(&self) -> &str {
        split_version(self.without_schema()).0
    }
}

/// Splits `fastify-v5` into (`fastify`, Some(`v5`)).
fn split_version(name: &str) -> (&str, Option<&str>) {
    if let Some(idx) = name.rfind(['-', '@']) {
        let (head, tail) = (&name[..idx], &name[idx + 1..]);
        let digits = tail.strip_prefix('v').unwrap_or(tail);
        if !head.is_empty() && !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
            return (head, Some(tail));
        }
    }
    (name, None)
}

impl From<&str> for FrameworkName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for FrameworkName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for FrameworkName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Request-handling mode tested against a framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    /// Requests are validated against a schema.
    Schema,
    /// Requests are handled without validation.
    NoSchema,
}

impl Variant {
    /// Campaign order: schema first, then no-schema.
    pub const ALL: [Variant; 2] = [Variant::Schema, Variant::NoSchema];

    /// Tag used in artifact file names.
    pub fn tag(&self) -> &'static str {
        match self {
            Variant::Schema => "schema",
            Variant::NoSchema => "no_schema",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}
