//! Plugin rack.
//!
//! A rack holds the modules discovered for one major type. Modules are
//! mapped on first use and stay mapped: there is no release, so once any
//! module has been used the rack can no longer be destroyed.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use plugrack_sdk::ModuleRecord;
use serde::Serialize;

use crate::error::{PluginError, Result};
use crate::linker::{ModuleHandle, ModuleLinker};
use crate::prober::Prober;
use crate::types::SearchPath;

/// One discovered module.
pub struct ModuleDescriptor {
    record: ModuleRecord,
    path: PathBuf,
    handle: Option<ModuleHandle>,
    refcount: usize,
    loaded_at: Option<DateTime<Utc>>,
    load_error: Option<String>,
}

impl ModuleDescriptor {
    fn new(record: ModuleRecord, path: PathBuf) -> Self {
        Self {
            record,
            path,
            handle: None,
            refcount: 0,
            loaded_at: None,
            load_error: None,
        }
    }

    pub fn full_type(&self) -> &str {
        &self.record.full_type
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self) -> &ModuleRecord {
        &self.record
    }

    pub fn is_loaded(&self) -> bool {
        self.handle.is_some()
    }

    pub fn refcount(&self) -> usize {
        self.refcount
    }

    /// Last linker error for this module, if mapping it failed.
    pub fn load_error(&self) -> Option<&str> {
        self.load_error.as_deref()
    }

    fn info(&self) -> ModuleInfo {
        ModuleInfo {
            full_type: self.record.full_type.clone(),
            name: self.record.name.clone(),
            path: self.path.clone(),
            plugin_id: self.record.plugin_id,
            version: self.record.version.clone(),
            requires: self.record.requires.clone(),
            loaded: self.is_loaded(),
            refcount: self.refcount,
            loaded_at: self.loaded_at,
        }
    }
}

impl std::fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("full_type", &self.record.full_type)
            .field("path", &self.path)
            .field("loaded", &self.is_loaded())
            .field("refcount", &self.refcount)
            .finish()
    }
}

/// Listing entry for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleInfo {
    pub full_type: String,
    pub name: String,
    pub path: PathBuf,
    pub plugin_id: u32,
    pub version: String,
    pub requires: String,
    pub loaded: bool,
    pub refcount: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loaded_at: Option<DateTime<Utc>>,
}

/// Lifecycle of a rack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RackState {
    Empty,
    Populated,
    Destroyed,
}

/// Registry of modules for one major type.
pub struct Rack {
    major_type: String,
    entries: Vec<ModuleDescriptor>,
    linker: Arc<dyn ModuleLinker>,
    prober: Prober,
    destroyed: bool,
}

impl Rack {
    pub fn new(major_type: impl Into<String>, linker: Arc<dyn ModuleLinker>, prober: Prober) -> Self {
        Self {
            major_type: major_type.into(),
            entries: Vec::new(),
            linker,
            prober,
            destroyed: false,
        }
    }

    pub fn major_type(&self) -> &str {
        &self.major_type
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn state(&self) -> RackState {
        if self.destroyed {
            RackState::Destroyed
        } else if self.entries.is_empty() {
            RackState::Empty
        } else {
            RackState::Populated
        }
    }

    /// Scan every directory of `search_path`, left to right.
    ///
    /// Unreadable directories and unrecognized files are logged and skipped.
    /// Returns the number of newly registered modules.
    pub fn read_dir(&mut self, search_path: &SearchPath) -> usize {
        let mut added = 0;
        for dir in search_path.dirs() {
            match self.read_one_dir(dir) {
                Ok(count) => added += count,
                Err(e) => {
                    tracing::warn!(
                        category = %self.major_type,
                        dir = %dir.display(),
                        error = %e,
                        "cannot read plugin directory"
                    );
                }
            }
        }
        tracing::debug!(
            category = %self.major_type,
            search_path = %search_path,
            added,
            total = self.entries.len(),
            "plugin discovery finished"
        );
        added
    }

    fn read_one_dir(&mut self, dir: &Path) -> std::io::Result<usize> {
        if !dir.exists() {
            tracing::debug!(dir = %dir.display(), "plugin directory does not exist");
            return Ok(0);
        }

        let mut candidates: Vec<PathBuf> = std::fs::read_dir(dir)?
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| self.is_candidate(path))
            .collect();
        candidates.sort();

        let mut added = 0;
        for path in candidates {
            let record = match self.prober.peek(&path) {
                Ok(record) => record,
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "skipping file");
                    continue;
                }
            };
            if !record.full_type.starts_with(&self.major_type) {
                tracing::debug!(
                    path = %path.display(),
                    declared = %record.full_type,
                    category = %self.major_type,
                    "skipping module of another category"
                );
                continue;
            }
            if self.register(record, path) {
                added += 1;
            }
        }
        Ok(added)
    }

    fn is_candidate(&self, path: &Path) -> bool {
        let is_file = std::fs::metadata(path).is_ok_and(|m| m.is_file());
        let name_matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| Prober::matches_major(name, &self.major_type));
        is_file && name_matches && Prober::is_module_file(path)
    }

    /// Add a descriptor. The first registration of a full type wins.
    pub fn register(&mut self, record: ModuleRecord, path: impl Into<PathBuf>) -> bool {
        let path = path.into();
        if let Some(existing) = self.find(&record.full_type) {
            tracing::warn!(
                full_type = %record.full_type,
                kept = %existing.path.display(),
                ignored = %path.display(),
                "duplicate plugin ignored"
            );
            return false;
        }
        tracing::debug!(full_type = %record.full_type, path = %path.display(), "plugin registered");
        self.destroyed = false;
        self.entries.push(ModuleDescriptor::new(record, path));
        true
    }

    pub fn contains(&self, full_type: &str) -> bool {
        self.find(full_type).is_some()
    }

    pub fn descriptor(&self, full_type: &str) -> Option<&ModuleDescriptor> {
        self.find(full_type)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ModuleDescriptor> {
        self.entries.iter()
    }

    fn find(&self, full_type: &str) -> Option<&ModuleDescriptor> {
        self.entries.iter().find(|d| d.record.full_type == full_type)
    }

    /// Map the module for `full_type` if needed and take a reference on it.
    ///
    /// A failed mapping is logged and recorded on the descriptor, which stays
    /// registered.
    pub fn use_by_type(&mut self, full_type: &str) -> Option<ModuleHandle> {
        let linker = Arc::clone(&self.linker);
        let descriptor = self
            .entries
            .iter_mut()
            .find(|d| d.record.full_type == full_type)?;

        if descriptor.handle.is_none() {
            match linker.open(&descriptor.path) {
                Ok(handle) => {
                    tracing::debug!(full_type, path = %descriptor.path.display(), "plugin loaded");
                    descriptor.handle = Some(handle);
                    descriptor.loaded_at = Some(Utc::now());
                    descriptor.load_error = None;
                }
                Err(e) => {
                    tracing::error!(
                        full_type,
                        path = %descriptor.path.display(),
                        error = %e,
                        "plugin failed to load"
                    );
                    descriptor.load_error = Some(e.to_string());
                    return None;
                }
            }
        }

        descriptor.refcount += 1;
        descriptor.handle.clone()
    }

    /// Diagnostic listing in discovery order.
    pub fn list(&self) -> Vec<ModuleInfo> {
        self.entries.iter().map(ModuleDescriptor::info).collect()
    }

    /// Unmap everything and empty the rack.
    ///
    /// Refused as a whole, leaving the rack untouched, while any module is
    /// referenced.
    pub fn destroy(&mut self) -> Result<()> {
        let in_use: Vec<String> = self
            .entries
            .iter()
            .filter(|d| d.refcount > 0)
            .map(|d| d.record.full_type.clone())
            .collect();
        if !in_use.is_empty() {
            return Err(PluginError::RackBusy {
                category: self.major_type.clone(),
                in_use,
            });
        }

        let unloaded = self.entries.iter().filter(|d| d.is_loaded()).count();
        self.entries.clear();
        self.destroyed = true;
        tracing::debug!(category = %self.major_type, unloaded, "plugin rack destroyed");
        Ok(())
    }
}

impl std::fmt::Debug for Rack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rack")
            .field("major_type", &self.major_type)
            .field("entries", &self.entries)
            .field("state", &self.state())
            .finish()
    }
}
