//! Load and link.
//!
//! Resolves a full type to a module and binds its symbol contract. The fast
//! path opens the file named after the type directly; the slow path scans
//! the search path into a rack and looks the type up there.

use std::fmt::{self, Display, Formatter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use plugrack_sdk::ModuleRecord;
use semver::{Version, VersionReq};
use serde::Serialize;

use crate::config::RuntimeConfig;
use crate::contract::{SymbolContract, SymbolTable};
use crate::error::{PluginError, Result};
use crate::linker::ModuleLinker;
use crate::prober::Prober;
use crate::rack::Rack;
use crate::types::{FullType, SearchPath};

/// Operator-facing reason for a linker failure. The linker's own message
/// names the module file and is logged instead.
const LOAD_FAILED_REASON: &str = "dynamic linker rejected the module";

/// How a module was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkVia {
    FastPath,
    Rack,
}

impl Display for LinkVia {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            LinkVia::FastPath => f.write_str("fast path"),
            LinkVia::Rack => f.write_str("rack"),
        }
    }
}

/// The module that satisfied a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkOutcome {
    pub full_type: String,
    pub path: PathBuf,
    pub plugin_id: u32,
    pub version: String,
    pub via: LinkVia,
}

impl LinkOutcome {
    fn new(record: &ModuleRecord, path: &Path, via: LinkVia) -> Self {
        Self {
            full_type: record.full_type.clone(),
            path: path.to_path_buf(),
            plugin_id: record.plugin_id,
            version: record.version.clone(),
            via,
        }
    }
}

/// Resolves types to bound symbol tables.
pub struct Loader {
    linker: Arc<dyn ModuleLinker>,
    prober: Prober,
    search_path: SearchPath,
    host_version: Version,
}

impl Loader {
    pub fn new(
        linker: Arc<dyn ModuleLinker>,
        prober: Prober,
        search_path: SearchPath,
        host_version: Version,
    ) -> Self {
        Self {
            linker,
            prober,
            search_path,
            host_version,
        }
    }

    pub fn from_config(config: &RuntimeConfig, linker: Arc<dyn ModuleLinker>) -> Result<Self> {
        Ok(Self::new(
            linker,
            Prober::new(),
            config.plugin_dir.clone(),
            config.host_version()?,
        ))
    }

    pub fn search_path(&self) -> &SearchPath {
        &self.search_path
    }

    pub fn host_version(&self) -> &Version {
        &self.host_version
    }

    /// A rack for `major_type`, populated from the search path.
    pub fn new_rack(&self, major_type: &str) -> Rack {
        let mut rack = Rack::new(major_type, Arc::clone(&self.linker), self.prober);
        rack.read_dir(&self.search_path);
        rack
    }

    /// Find, load and bind the module for `full_type`.
    ///
    /// `rack` is created on demand for the slow path and left in place for
    /// the caller to keep or tear down.
    pub fn load_and_link(
        &self,
        full_type: &FullType,
        contract: &SymbolContract,
        rack: &mut Option<Rack>,
    ) -> Result<(SymbolTable, LinkOutcome)> {
        contract.validate()?;

        let fast_error = match self.fast_path(full_type, contract) {
            Ok(Some(linked)) => return Ok(linked),
            Ok(None) => None,
            Err(e @ PluginError::Incomplete { .. }) => return Err(e),
            Err(e) => Some(e),
        };

        tracing::debug!(
            category = contract.category,
            full_type = %full_type,
            "fast path missed, scanning search path"
        );
        let rack = rack.get_or_insert_with(|| self.new_rack(full_type.major()));

        match (self.link_via_rack(full_type, contract, rack), fast_error) {
            (Err(PluginError::NotFound { .. }), Some(closest)) => Err(closest),
            (result, _) => result,
        }
    }

    /// Try the conventional file names in each search directory.
    ///
    /// `Ok(None)` means nothing usable was found there. Errors describe the
    /// closest miss.
    fn fast_path(
        &self,
        full_type: &FullType,
        contract: &SymbolContract,
    ) -> Result<Option<(SymbolTable, LinkOutcome)>> {
        let stem = full_type.file_stem();
        let suffix = std::env::consts::DLL_SUFFIX;
        let names = [format!("{stem}{suffix}"), format!("lib{stem}{suffix}")];
        let mut closest: Option<PluginError> = None;

        for dir in self.search_path.dirs() {
            for name in &names {
                let path = dir.join(name);
                if !path.is_file() {
                    continue;
                }

                let record = match self.prober.peek(&path) {
                    Ok(record) => record,
                    Err(e) => {
                        tracing::debug!(path = %path.display(), error = %e, "fast path candidate unreadable");
                        continue;
                    }
                };

                if record.full_type != full_type.as_str() {
                    tracing::warn!(
                        path = %path.display(),
                        expected = %full_type,
                        declared = %record.full_type,
                        "module declares a different type than its file name"
                    );
                    closest.get_or_insert(PluginError::TypeMismatch {
                        category: contract.category.to_string(),
                        full_type: full_type.to_string(),
                        declared: record.full_type,
                    });
                    continue;
                }

                if let Err(e) = self.check_compatible(&record, contract, full_type) {
                    tracing::warn!(path = %path.display(), error = %e, "skipping incompatible module");
                    closest = Some(e);
                    continue;
                }

                let module = match self.linker.open(&path) {
                    Ok(module) => module,
                    Err(e) => {
                        tracing::error!(path = %path.display(), error = %e, "plugin failed to load");
                        if !matches!(closest, Some(PluginError::Incompatible { .. })) {
                            closest = Some(load_failed(contract, full_type));
                        }
                        continue;
                    }
                };

                let table = SymbolTable::resolve(module, contract, full_type.as_str())?;
                return Ok(Some((table, LinkOutcome::new(&record, &path, LinkVia::FastPath))));
            }
        }

        match closest {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }

    /// Look `full_type` up in a populated rack and bind it.
    pub fn link_via_rack(
        &self,
        full_type: &FullType,
        contract: &SymbolContract,
        rack: &mut Rack,
    ) -> Result<(SymbolTable, LinkOutcome)> {
        let (record, path) = match rack.descriptor(full_type.as_str()) {
            Some(d) => (d.record().clone(), d.path().to_path_buf()),
            None => return Err(not_found(contract, full_type)),
        };

        self.check_compatible(&record, contract, full_type)?;

        // The rack logs the linker's own message, path included.
        let module = rack
            .use_by_type(full_type.as_str())
            .ok_or_else(|| load_failed(contract, full_type))?;

        let table = SymbolTable::resolve(module, contract, full_type.as_str())?;
        Ok((table, LinkOutcome::new(&record, &path, LinkVia::Rack)))
    }

    fn check_compatible(
        &self,
        record: &ModuleRecord,
        contract: &SymbolContract,
        full_type: &FullType,
    ) -> Result<()> {
        let incompatible = |reason: String| PluginError::Incompatible {
            category: contract.category.to_string(),
            full_type: full_type.to_string(),
            reason,
        };
        let requirement = VersionReq::parse(&record.requires).map_err(|e| {
            incompatible(format!("invalid host requirement '{}': {}", record.requires, e))
        })?;
        if !requirement.matches(&self.host_version) {
            return Err(incompatible(format!(
                "requires host {}, running {}",
                record.requires, self.host_version
            )));
        }
        Ok(())
    }
}

fn not_found(contract: &SymbolContract, full_type: &FullType) -> PluginError {
    PluginError::NotFound {
        category: contract.category.to_string(),
        full_type: full_type.to_string(),
    }
}

fn load_failed(contract: &SymbolContract, full_type: &FullType) -> PluginError {
    PluginError::LoadFailed {
        category: contract.category.to_string(),
        full_type: full_type.to_string(),
        reason: LOAD_FAILED_REASON.to_string(),
    }
}
