//! Type strings and search paths.

use std::fmt::{self, Display, Formatter};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PluginError, Result};

/// A `<major>/<minor>` type string, the registry key of a module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FullType {
    full: String,
    split: usize,
}

impl FullType {
    /// Parse a complete `<major>/<minor>` string.
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        let (major, minor) = value.split_once('/').ok_or_else(|| PluginError::InvalidType {
            value: value.to_string(),
            reason: "expected <major>/<minor>".into(),
        })?;
        validate_part(value, major, "major type")?;
        validate_part(value, minor, "minor type")?;
        Ok(Self {
            full: value.to_string(),
            split: major.len(),
        })
    }

    /// Resolve a configured selection against its category.
    ///
    /// Accepts both the bare minor (`blcr`) and the full form
    /// (`checkpoint/blcr`); the full form must name the same category.
    pub fn for_category(category: &str, selection: &str) -> Result<Self> {
        let selection = selection.trim();
        if selection.contains('/') {
            let parsed = Self::parse(selection)?;
            if parsed.major() != category {
                return Err(PluginError::InvalidType {
                    value: selection.to_string(),
                    reason: format!("does not belong to category '{}'", category),
                });
            }
            Ok(parsed)
        } else {
            Self::parse(&format!("{}/{}", category, selection))
        }
    }

    pub fn major(&self) -> &str {
        &self.full[..self.split]
    }

    pub fn minor(&self) -> &str {
        &self.full[self.split + 1..]
    }

    pub fn as_str(&self) -> &str {
        &self.full
    }

    /// File stem the fast path looks for: `checkpoint/blcr` -> `checkpoint_blcr`.
    pub fn file_stem(&self) -> String {
        format!("{}_{}", self.major(), self.minor())
    }
}

fn validate_part(value: &str, part: &str, what: &str) -> Result<()> {
    let invalid = |reason: String| PluginError::InvalidType {
        value: value.to_string(),
        reason,
    };
    if part.is_empty() {
        return Err(invalid(format!("empty {}", what)));
    }
    if part.starts_with('.') {
        return Err(invalid(format!("{} may not start with '.'", what)));
    }
    if let Some(c) = part
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
    {
        return Err(invalid(format!("character {:?} not allowed in {}", c, what)));
    }
    Ok(())
}

impl Display for FullType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}

impl AsRef<str> for FullType {
    fn as_ref(&self) -> &str {
        &self.full
    }
}

/// Ordered, colon-separated list of module directories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct SearchPath(Vec<PathBuf>);

impl SearchPath {
    /// Parse `dir1:dir2:...`; empty segments are ignored.
    pub fn parse(value: &str) -> Self {
        Self(
            value
                .split(':')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .collect(),
        )
    }

    pub fn from_dirs<I, P>(dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        Self(dirs.into_iter().map(|p| p.as_ref().to_path_buf()).collect())
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for SearchPath {
    /// `$HOME/.plugrack/plugins`, then the system directory.
    fn default() -> Self {
        let mut paths = Vec::new();
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".plugrack").join("plugins"));
        }
        #[cfg(unix)]
        paths.push(PathBuf::from("/usr/lib/plugrack"));
        Self(paths)
    }
}

impl Display for SearchPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let joined: Vec<String> = self.0.iter().map(|p| p.display().to_string()).collect();
        f.write_str(&joined.join(":"))
    }
}

impl From<String> for SearchPath {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<SearchPath> for String {
    fn from(value: SearchPath) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_type_parse() {
        let t = FullType::parse("checkpoint/blcr").unwrap();
        assert_eq!(t.major(), "checkpoint");
        assert_eq!(t.minor(), "blcr");
        assert_eq!(t.file_stem(), "checkpoint_blcr");
        assert_eq!(t.to_string(), "checkpoint/blcr");
    }

    #[test]
    fn test_full_type_for_category() {
        let bare = FullType::for_category("checkpoint", "blcr").unwrap();
        let full = FullType::for_category("checkpoint", "checkpoint/blcr").unwrap();
        assert_eq!(bare, full);

        let err = FullType::for_category("checkpoint", "mpi/pmix").unwrap_err();
        assert!(matches!(err, PluginError::InvalidType { .. }));
    }

    #[test]
    fn test_full_type_rejects_path_tricks() {
        assert!(FullType::parse("checkpoint/../etc").is_err());
        assert!(FullType::parse("checkpoint/a/b").is_err());
        assert!(FullType::parse("checkpoint/").is_err());
        assert!(FullType::parse("/blcr").is_err());
        assert!(FullType::parse("blcr").is_err());
    }

    #[test]
    fn test_search_path_round_trip() {
        let path = SearchPath::parse("/usr/lib/plugrack::/opt/site ");
        assert_eq!(path.dirs().len(), 2);
        assert_eq!(path.to_string(), "/usr/lib/plugrack:/opt/site");
    }
}
