//! Shared fixtures: a temporary plugin directory whose module files carry
//! real records, served by a static linker.

#![allow(dead_code)]

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use plugrack_core::{ModuleLinker, ModuleRecord, RuntimeConfig, SearchPath, StaticLinker, StaticModule};
use tempfile::TempDir;

pub const HOST_VERSION: &str = "0.6.0";

thread_local! {
    static CALLS: RefCell<Vec<&'static str>> = const { RefCell::new(Vec::new()) };
}

/// Note a plugin call on the current thread.
pub fn record_call(name: &'static str) {
    CALLS.with(|calls| calls.borrow_mut().push(name));
}

/// Calls noted on the current thread since the last take.
pub fn take_calls() -> Vec<&'static str> {
    CALLS.with(|calls| std::mem::take(&mut *calls.borrow_mut()))
}

/// File name with the platform module suffix.
pub fn so(stem: &str) -> String {
    format!("{stem}{}", std::env::consts::DLL_SUFFIX)
}

/// Bytes of a fake module file: some header noise, the record, a trailer.
pub fn module_bytes(record: &ModuleRecord) -> Vec<u8> {
    let mut bytes = b"\x7fELF\x02\x01\x01\0".to_vec();
    bytes.extend_from_slice(&[0u8; 56]);
    bytes.extend_from_slice(b".text .data .plugrack PLUGRACK_MODULE_RECORD\0");
    bytes.extend_from_slice(&record.to_bytes());
    bytes.extend_from_slice(&[0xCC; 32]);
    bytes
}

pub struct PluginDir {
    dir: TempDir,
    linker: Arc<StaticLinker>,
}

impl PluginDir {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create temp dir"),
            linker: Arc::new(StaticLinker::new()),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn search_path(&self) -> SearchPath {
        SearchPath::from_dirs([self.path()])
    }

    pub fn static_linker(&self) -> &StaticLinker {
        &self.linker
    }

    pub fn linker(&self) -> Arc<dyn ModuleLinker> {
        self.linker.clone()
    }

    /// Write a module file without making it loadable.
    pub fn write(&self, file_name: &str, record: &ModuleRecord) -> PathBuf {
        let path = self.path().join(file_name);
        std::fs::write(&path, module_bytes(record)).expect("write module file");
        path
    }

    /// Write a module file and register its symbols with the linker.
    pub fn install(&self, file_name: &str, record: &ModuleRecord, module: StaticModule) -> PathBuf {
        let path = self.write(file_name, record);
        self.linker.register(&path, module);
        path
    }

    /// Configuration pointing at this directory only.
    pub fn config(&self) -> RuntimeConfig {
        RuntimeConfig::default()
            .with_plugin_dir(self.search_path())
            .with_host_version(HOST_VERSION)
    }
}
