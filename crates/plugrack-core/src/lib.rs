//! Plugin runtime for plugrack hosts.
//!
//! Subsystems select native implementations by configured type string. This
//! crate discovers candidate modules on the search path, binds their symbol
//! contracts, and hands each subsystem a lazily initialized context.

pub mod categories;
pub mod config;
pub mod context;
pub mod contract;
pub mod error;
pub mod fanout;
pub mod linker;
pub mod loader;
pub mod prober;
pub mod rack;
pub mod types;

pub use config::{RuntimeConfig, Selection};
pub use context::{Context, ContextState};
pub use contract::{Category, SymbolContract, SymbolTable};
pub use error::{PluginError, Result};
pub use fanout::{FanOutPolicy, MultiContext};
pub use linker::{ModuleHandle, ModuleLinker, NativeLinker, StaticLinker, StaticModule};
pub use loader::{LinkOutcome, LinkVia, Loader};
pub use prober::{ProbeError, Prober};
pub use rack::{ModuleInfo, Rack, RackState};
pub use types::{FullType, SearchPath};

pub use plugrack_sdk::ModuleRecord;

/// Re-exports commonly used types.
pub mod prelude {
    // Configuration
    pub use crate::config::{env_vars, RuntimeConfig, Selection};
    pub use crate::types::{FullType, SearchPath};

    // Error handling
    pub use crate::error::{PluginError, Result};

    // Contexts
    pub use crate::context::{Context, ContextState};
    pub use crate::fanout::{FanOutPolicy, MultiContext};

    // Categories
    pub use crate::categories::{
        Checkpoint, CheckpointAction, CheckpointOps, JobSubmit, JobSubmitOps, Namespace,
        NamespaceOps, Subsystems,
    };

    // Linking
    pub use crate::contract::{Category, SymbolContract, SymbolTable};
    pub use crate::linker::{ModuleLinker, NativeLinker, StaticLinker, StaticModule};
}
