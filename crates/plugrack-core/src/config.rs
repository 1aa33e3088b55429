//! Runtime configuration.
//!
//! Holds the module search path and the per-category plugin selection. The
//! configuration is fixed once the contexts are built; nothing re-reads it
//! while the process runs.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PluginError, Result};
use crate::types::SearchPath;

/// Environment variable names.
pub mod env_vars {
    /// Overrides `plugin_dir`.
    pub const PLUGIN_DIR: &str = "PLUGRACK_PLUGIN_DIR";
    /// `PLUGRACK_PLUGINS_<CATEGORY>` overrides the selection for one category.
    pub const PLUGINS_PREFIX: &str = "PLUGRACK_PLUGINS_";
    /// Path of the configuration file.
    pub const CONFIG: &str = "PLUGRACK_CONFIG";
    /// Emit JSON logs from the CLI.
    pub const LOG_JSON: &str = "PLUGRACK_LOG_JSON";
}

/// Plugin selection for one category.
///
/// A string may hold a comma-separated list for fan-out categories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Selection {
    One(String),
    Many(Vec<String>),
}

impl Selection {
    /// Configured types in order, blanks removed.
    pub fn types(&self) -> Vec<String> {
        let raw: Vec<&str> = match self {
            Selection::One(s) => s.split(',').collect(),
            Selection::Many(list) => list.iter().map(String::as_str).collect(),
        };
        raw.into_iter()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

impl From<&str> for Selection {
    fn from(value: &str) -> Self {
        Selection::One(value.to_string())
    }
}

impl From<Vec<&str>> for Selection {
    fn from(value: Vec<&str>) -> Self {
        Selection::Many(value.into_iter().map(str::to_string).collect())
    }
}

/// Plugin runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Module search path, scanned left to right.
    #[serde(default)]
    pub plugin_dir: SearchPath,

    /// Host version checked against each module's requirement.
    /// Defaults to the runtime crate version.
    #[serde(default)]
    pub host_version: Option<String>,

    /// Selection per category.
    #[serde(default)]
    pub plugins: BTreeMap<String, Selection>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            plugin_dir: SearchPath::default(),
            host_version: None,
            plugins: BTreeMap::new(),
        }
    }
}

impl RuntimeConfig {
    /// Parse TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Read and parse a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            PluginError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Load from an optional file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(std::env::vars());
        Ok(config)
    }

    /// Apply `PLUGRACK_*` overrides from key/value pairs.
    pub fn apply_overrides<I, K, V>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let (key, value) = (key.as_ref(), value.as_ref());
            if key == env_vars::PLUGIN_DIR {
                tracing::debug!(plugin_dir = %value, "plugin_dir overridden from environment");
                self.plugin_dir = SearchPath::parse(value);
            } else if let Some(category) = key.strip_prefix(env_vars::PLUGINS_PREFIX) {
                if category.is_empty() {
                    continue;
                }
                let category = category.to_ascii_lowercase();
                tracing::debug!(%category, selection = %value, "plugin selection overridden from environment");
                self.plugins.insert(category, Selection::One(value.to_string()));
            }
        }
    }

    /// Builder: set the search path.
    pub fn with_plugin_dir(mut self, plugin_dir: SearchPath) -> Self {
        self.plugin_dir = plugin_dir;
        self
    }

    /// Builder: select plugins for a category.
    pub fn select(mut self, category: impl Into<String>, selection: impl Into<Selection>) -> Self {
        self.plugins.insert(category.into(), selection.into());
        self
    }

    /// Builder: pin the host version.
    pub fn with_host_version(mut self, version: impl Into<String>) -> Self {
        self.host_version = Some(version.into());
        self
    }

    /// Configured types for a category, in order. Empty when unconfigured.
    pub fn selected_types(&self, category: &str) -> Vec<String> {
        self.plugins
            .get(category)
            .map(Selection::types)
            .unwrap_or_default()
    }

    /// The host version modules are checked against.
    pub fn host_version(&self) -> Result<semver::Version> {
        let raw = self
            .host_version
            .as_deref()
            .unwrap_or(env!("CARGO_PKG_VERSION"));
        semver::Version::parse(raw)
            .map_err(|e| PluginError::Config(format!("invalid host_version '{}': {}", raw, e)))
    }
}
