//! Module linking.
//!
//! This is the only place the runtime talks to the dynamic linker. Everything
//! above works with [`ModuleHandle`] and [`RawSymbol`] and never touches
//! `libloading` directly.
//!
//! Two linkers are provided:
//! - [`NativeLinker`] maps shared objects with `libloading`.
//! - [`StaticLinker`] serves symbol tables compiled into the host, keyed by
//!   the path the module file was discovered at.

use std::collections::HashMap;
use std::ffi::c_void;
use std::fmt;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use libloading::Library;
use parking_lot::RwLock;

/// Address of an exported symbol. Never null.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawSymbol(NonNull<c_void>);

// SAFETY: a RawSymbol is an address into a mapped module. It is never
// dereferenced by the runtime itself, only reinterpreted by category bindings.
unsafe impl Send for RawSymbol {}
unsafe impl Sync for RawSymbol {}

impl RawSymbol {
    /// Wrap an address, rejecting null.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or the address of a function that stays mapped for
    /// as long as the returned symbol can be reached through a module handle.
    /// Category bindings call through it without further checks.
    pub unsafe fn from_ptr(ptr: *const ()) -> Option<Self> {
        NonNull::new(ptr as *mut c_void).map(Self)
    }

    pub fn as_ptr(&self) -> *const c_void {
        self.0.as_ptr()
    }

    pub fn addr(&self) -> usize {
        self.0.as_ptr() as usize
    }
}

impl fmt::Debug for RawSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawSymbol({:#x})", self.addr())
    }
}

/// A module mapped into the process.
///
/// Dropping the last handle unmaps the module, so anything that keeps a
/// symbol address must also keep a handle.
///
/// # Safety
///
/// Every symbol returned by [`LinkedModule::symbol`] must be the address of
/// a live function with the signature the category contract assigns to that
/// name, valid for as long as the module is alive.
pub unsafe trait LinkedModule: Send + Sync {
    /// File the module was loaded from.
    fn path(&self) -> &Path;

    /// Look up an exported symbol.
    fn symbol(&self, name: &str) -> Option<RawSymbol>;
}

/// Shared ownership of a mapped module.
pub type ModuleHandle = Arc<dyn LinkedModule>;

/// Error from a linker.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct LinkError(pub String);

/// Maps module files into the process.
pub trait ModuleLinker: Send + Sync {
    fn open(&self, path: &Path) -> Result<ModuleHandle, LinkError>;
}

/// Linker backed by the platform dynamic linker.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeLinker;

impl NativeLinker {
    pub fn new() -> Self {
        Self
    }
}

impl ModuleLinker for NativeLinker {
    fn open(&self, path: &Path) -> Result<ModuleHandle, LinkError> {
        let library = open_library(path)?;
        tracing::debug!(path = %path.display(), "mapped native module");
        Ok(Arc::new(NativeModule {
            path: path.to_path_buf(),
            library,
        }))
    }
}

#[cfg(unix)]
fn open_library(path: &Path) -> Result<Library, LinkError> {
    use libloading::os::unix::{Library as UnixLibrary, RTLD_LOCAL, RTLD_NOW};

    // SAFETY: mapping a module runs its initializers. Callers only get here
    // after the prober accepted the file's record for the requested type.
    // RTLD_NOW surfaces unresolved externals here instead of at first call.
    let library = unsafe { UnixLibrary::open(Some(path), RTLD_NOW | RTLD_LOCAL) }
        .map_err(|e| LinkError(e.to_string()))?;
    Ok(Library::from(library))
}

#[cfg(not(unix))]
fn open_library(path: &Path) -> Result<Library, LinkError> {
    // SAFETY: see the unix variant.
    unsafe { Library::new(path) }.map_err(|e| LinkError(e.to_string()))
}

struct NativeModule {
    path: PathBuf,
    library: Library,
}

// SAFETY: addresses come from the dynamic linker and live as long as
// `library`, which the handle owns.
unsafe impl LinkedModule for NativeModule {
    fn path(&self) -> &Path {
        &self.path
    }

    fn symbol(&self, name: &str) -> Option<RawSymbol> {
        // SAFETY: only the address is read here. The category binding decides
        // what type it has, against the contract the module was built for.
        unsafe {
            let symbol: libloading::Symbol<*mut c_void> = self.library.get(name.as_bytes()).ok()?;
            RawSymbol::from_ptr(*symbol as *const ())
        }
    }
}

impl Drop for NativeModule {
    fn drop(&mut self) {
        tracing::debug!(path = %self.path.display(), "unmapping native module");
    }
}

/// Symbol table of a module compiled into the host.
#[derive(Debug, Default, Clone)]
pub struct StaticModule {
    symbols: HashMap<String, RawSymbol>,
}

impl StaticModule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an exported symbol. Null addresses are ignored.
    ///
    /// # Safety
    ///
    /// `address` must be a live `extern "C"` function whose signature matches
    /// the one the category contract assigns to `name`. Contexts bound to this
    /// module call it directly.
    ///
    /// Registering an address requires an `unsafe` block:
    ///
    /// ```compile_fail,E0133
    /// use plugrack_core::StaticModule;
    ///
    /// let _ = StaticModule::new().with_symbol("checkpoint_init", 0x10 as *const ());
    /// ```
    pub unsafe fn with_symbol(mut self, name: impl Into<String>, address: *const ()) -> Self {
        // SAFETY: forwarded from the caller.
        if let Some(symbol) = unsafe { RawSymbol::from_ptr(address) } {
            self.symbols.insert(name.into(), symbol);
        }
        self
    }
}

/// Linker for built-in modules.
///
/// Discovery still goes through the module files on disk; only the mapping
/// step is replaced by a lookup of the registered path.
#[derive(Default)]
pub struct StaticLinker {
    modules: RwLock<HashMap<PathBuf, Arc<StaticModule>>>,
    opens: AtomicUsize,
}

impl StaticLinker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the symbol table served for `path`.
    pub fn register(&self, path: impl AsRef<Path>, module: StaticModule) -> &Self {
        self.modules
            .write()
            .insert(path.as_ref().to_path_buf(), Arc::new(module));
        self
    }

    /// Number of successful `open` calls so far.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl ModuleLinker for StaticLinker {
    fn open(&self, path: &Path) -> Result<ModuleHandle, LinkError> {
        let module = self
            .modules
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| LinkError(format!("no built-in module at {}", path.display())))?;
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(StaticHandle {
            path: path.to_path_buf(),
            module,
        }))
    }
}

impl fmt::Debug for StaticLinker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticLinker")
            .field("modules", &self.modules.read().len())
            .field("opens", &self.open_count())
            .finish()
    }
}

struct StaticHandle {
    path: PathBuf,
    module: Arc<StaticModule>,
}

// SAFETY: every symbol was registered through `StaticModule::with_symbol`,
// whose callers vouch for it.
unsafe impl LinkedModule for StaticHandle {
    fn path(&self) -> &Path {
        &self.path
    }

    fn symbol(&self, name: &str) -> Option<RawSymbol> {
        self.module.symbols.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn answer() -> i32 {
        42
    }

    #[test]
    fn test_raw_symbol_rejects_null() {
        unsafe {
            assert!(RawSymbol::from_ptr(std::ptr::null()).is_none());
            assert!(RawSymbol::from_ptr(answer as *const ()).is_some());
        }
    }

    #[test]
    fn test_static_linker_serves_registered_path() {
        let linker = StaticLinker::new();
        linker.register(
            "/plugins/checkpoint_none.so",
            unsafe { StaticModule::new().with_symbol("answer", answer as *const ()) },
        );

        let module = linker.open(Path::new("/plugins/checkpoint_none.so")).unwrap();
        assert_eq!(module.path(), Path::new("/plugins/checkpoint_none.so"));
        assert!(module.symbol("answer").is_some());
        assert!(module.symbol("missing").is_none());
        assert_eq!(linker.open_count(), 1);

        assert!(linker.open(Path::new("/plugins/other.so")).is_err());
        assert_eq!(linker.open_count(), 1);
    }

    #[test]
    fn test_static_module_ignores_null_symbol() {
        let linker = StaticLinker::new();
        linker.register("/plugins/checkpoint_none.so", unsafe {
            StaticModule::new().with_symbol("checkpoint_init", std::ptr::null())
        });

        let module = linker.open(Path::new("/plugins/checkpoint_none.so")).unwrap();
        assert!(module.symbol("checkpoint_init").is_none());
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    const SYSTEM_LIBRARY: &str = "libc.so.6";

    #[cfg(target_os = "macos")]
    const SYSTEM_LIBRARY: &str = "/usr/lib/libSystem.B.dylib";

    #[cfg(any(all(target_os = "linux", target_env = "gnu"), target_os = "macos"))]
    #[test]
    fn test_native_linker_resolves_system_symbol() {
        let module = NativeLinker::new()
            .open(Path::new(SYSTEM_LIBRARY))
            .unwrap_or_else(|e| panic!("cannot open {SYSTEM_LIBRARY}: {e}"));
        assert_eq!(module.path(), Path::new(SYSTEM_LIBRARY));

        let getpid = module.symbol("getpid").expect("getpid is exported");
        assert_ne!(getpid.addr(), 0);
        assert!(module.symbol("plugrack_no_such_symbol").is_none());

        // The address is callable for as long as the handle lives.
        let getpid: extern "C" fn() -> i32 = unsafe { std::mem::transmute(getpid.as_ptr()) };
        assert_eq!(getpid(), std::process::id() as i32);
    }

    #[test]
    fn test_native_linker_reports_missing_file() {
        let err = NativeLinker::new()
            .open(Path::new("/nonexistent/plugrack/checkpoint_none.so"))
            .err()
            .unwrap();
        assert!(!err.0.is_empty());
    }
}
