//! The package allowlist and package record normalization.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{GatewayError, Result};
use crate::room::document::PackageRecord;

/// Version recorded when a submission names a package without pinning one.
pub const DEFAULT_VERSION: &str = "installed";

/// One permitted package.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageInfo {
    pub name: String,
    pub description: String,
}

/// A package reference as it appears on the wire: either a bare name or a
/// `{name, version}` object. Normalized into [`PackageRecord`] at the
/// boundary so nothing downstream branches on shape.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PackageSpec {
    Name(String),
    Pinned { name: String, version: String },
}

impl PackageSpec {
    pub fn normalize(self) -> PackageRecord {
        match self {
            PackageSpec::Name(name) => PackageRecord {
                name,
                version: DEFAULT_VERSION.to_string(),
            },
            PackageSpec::Pinned { name, version } => PackageRecord { name, version },
        }
    }
}

/// Statically loaded set of installable packages.
pub struct Allowlist {
    packages: Vec<PackageInfo>,
    names: HashSet<String>,
}

impl Allowlist {
    /// Load from a file of `name|description` lines. Blank lines and `#`
    /// comments are skipped.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let allowlist = Self::parse(&content);
        info!(
            count = allowlist.packages.len(),
            path = %path.display(),
            "loaded package allowlist"
        );
        Ok(allowlist)
    }

    pub fn parse(content: &str) -> Self {
        let packages: Vec<PackageInfo> = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(|line| {
                let (name, description) = line.split_once('|').unwrap_or((line, ""));
                PackageInfo {
                    name: name.trim().to_string(),
                    description: description.trim().to_string(),
                }
            })
            .collect();
        let names = packages.iter().map(|p| p.name.clone()).collect();
        Self { packages, names }
    }

    pub fn empty() -> Self {
        Self::parse("")
    }

    pub fn packages(&self) -> &[PackageInfo] {
        &self.packages
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Reject any name absent from the allowlist, naming the offenders.
    pub fn validate(&self, names: &[String]) -> Result<()> {
        let invalid: Vec<&str> = names
            .iter()
            .filter(|name| !self.contains(name))
            .map(String::as_str)
            .collect();
        if invalid.is_empty() {
            Ok(())
        } else {
            Err(GatewayError::Validation(format!(
                "invalid packages: {}",
                invalid.join(", ")
            )))
        }
    }
}
