//! Reference categories and host composition.
//!
//! Each category module defines its symbol contract, the safe interface the
//! host calls, and the adapter binding a resolved table to that interface.

pub mod checkpoint;
pub mod job_submit;
pub mod namespace;

use std::os::raw::c_int;
use std::sync::Arc;

use crate::config::RuntimeConfig;
use crate::context::Context;
use crate::error::{PluginError, Result};
use crate::fanout::MultiContext;
use crate::linker::ModuleLinker;

pub use checkpoint::{Checkpoint, CheckpointAction, CheckpointOps};
pub use job_submit::{JobSubmit, JobSubmitOps};
pub use namespace::{Namespace, NamespaceOps};

/// Map a plugin status code to a result.
pub(crate) fn check_status(
    category: &str,
    full_type: &str,
    operation: &'static str,
    code: c_int,
) -> Result<()> {
    if plugrack_sdk::status::is_success(code) {
        Ok(())
    } else {
        tracing::debug!(category, full_type, operation, code, "plugin operation failed");
        Err(PluginError::OperationFailed {
            category: category.to_string(),
            full_type: full_type.to_string(),
            operation,
            code,
        })
    }
}

/// Every plugin-backed subsystem of the host, built from one configuration.
pub struct Subsystems {
    pub checkpoint: Context<Checkpoint>,
    pub job_submit: MultiContext<JobSubmit>,
    pub namespace: MultiContext<Namespace>,
}

impl Subsystems {
    pub fn new(config: Arc<RuntimeConfig>, linker: Arc<dyn ModuleLinker>) -> Self {
        Self {
            checkpoint: Context::new(Arc::clone(&config), Arc::clone(&linker)),
            job_submit: MultiContext::new(Arc::clone(&config), Arc::clone(&linker)),
            namespace: MultiContext::new(config, linker),
        }
    }

    /// Initialize every subsystem.
    ///
    /// A fatal error aborts startup and is returned. Other failures leave the
    /// affected subsystem failed and are returned in the `Ok` list.
    pub fn init_all(&self) -> Result<Vec<PluginError>> {
        let results = [
            self.checkpoint.init(),
            self.job_submit.init(),
            self.namespace.init(),
        ];

        let mut failures = Vec::new();
        for result in results {
            match result {
                Ok(()) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!(category = e.category().unwrap_or("-"), error = %e, "subsystem unavailable");
                    failures.push(e);
                }
            }
        }
        Ok(failures)
    }

    /// Finalize every subsystem.
    pub fn fini_all(&mut self) {
        self.namespace.fini();
        self.job_submit.fini();
        self.checkpoint.fini();
    }
}
