//! Per-category plugin context.
//!
//! A [`Context`] owns the selection for one category, the rack it may have
//! built, and the bound operations. The first caller of [`Context::init`]
//! does the work under the context mutex; everyone after that reads the
//! published operations without locking.

use std::fmt::{self, Display, Formatter};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::RuntimeConfig;
use crate::contract::Category;
use crate::error::{PluginError, Result};
use crate::linker::ModuleLinker;
use crate::loader::{LinkOutcome, Loader};
use crate::rack::{ModuleInfo, Rack};
use crate::types::FullType;

/// Lifecycle of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ContextState {
    Uninitialized = 0,
    Initializing = 1,
    Ready = 2,
    Failed = 3,
}

impl ContextState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ContextState::Initializing,
            2 => ContextState::Ready,
            3 => ContextState::Failed,
            _ => ContextState::Uninitialized,
        }
    }
}

impl Display for ContextState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContextState::Uninitialized => "uninitialized",
            ContextState::Initializing => "initializing",
            ContextState::Ready => "ready",
            ContextState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Atomic cell for [`ContextState`], readable without the init lock.
#[derive(Debug, Default)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn get(&self) -> ContextState {
        ContextState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: ContextState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Tear down a rack after failure or at fini. A busy rack is kept so its
/// modules stay mapped.
pub(crate) fn release_rack(category: &str, rack: &mut Option<Rack>) {
    let Some(current) = rack.as_mut() else {
        return;
    };
    match current.destroy() {
        Ok(()) => *rack = None,
        Err(e) => tracing::debug!(category, error = %e, "plugin rack retained"),
    }
}

#[derive(Default)]
struct Slot {
    rack: Option<Rack>,
    outcome: Option<LinkOutcome>,
    error: Option<PluginError>,
}

/// Lazily bound single-plugin context.
pub struct Context<C: Category> {
    config: Arc<RuntimeConfig>,
    linker: Arc<dyn ModuleLinker>,
    // Declared before `slot` so the bound operations drop before the rack.
    ops: OnceCell<Box<C::Ops>>,
    state: StateCell,
    slot: Mutex<Slot>,
}

impl<C: Category> Context<C> {
    pub fn new(config: Arc<RuntimeConfig>, linker: Arc<dyn ModuleLinker>) -> Self {
        Self {
            config,
            linker,
            ops: OnceCell::new(),
            state: StateCell::default(),
            slot: Mutex::new(Slot::default()),
        }
    }

    pub fn category(&self) -> &'static str {
        C::NAME
    }

    pub fn state(&self) -> ContextState {
        self.state.get()
    }

    pub fn is_ready(&self) -> bool {
        self.ops.get().is_some()
    }

    /// Bind the configured plugin if not done yet.
    ///
    /// Once failed, returns the recorded error until [`Context::fini`].
    pub fn init(&self) -> Result<()> {
        self.ops().map(|_| ())
    }

    /// The bound operations, initializing on first use.
    pub fn ops(&self) -> Result<&C::Ops> {
        if let Some(ops) = self.ops.get() {
            return Ok(ops.as_ref());
        }

        let mut slot = self.slot.lock();
        if let Some(ops) = self.ops.get() {
            return Ok(ops.as_ref());
        }
        if let Some(err) = &slot.error {
            return Err(err.clone());
        }

        self.state.set(ContextState::Initializing);
        match self.ops.get_or_try_init(|| self.bind(&mut *slot)) {
            Ok(ops) => {
                self.state.set(ContextState::Ready);
                Ok(ops.as_ref())
            }
            Err(e) => {
                tracing::error!(category = C::NAME, error = %e, "plugin context failed to initialize");
                release_rack(C::NAME, &mut slot.rack);
                slot.error = Some(e.clone());
                self.state.set(ContextState::Failed);
                Err(e)
            }
        }
    }

    fn bind(&self, slot: &mut Slot) -> Result<Box<C::Ops>> {
        let full_type = self.selected_type()?;
        let loader = Loader::from_config(&self.config, Arc::clone(&self.linker))?;
        let (table, outcome) = loader.load_and_link(&full_type, &C::contract(), &mut slot.rack)?;

        tracing::info!(
            category = C::NAME,
            full_type = %outcome.full_type,
            path = %outcome.path.display(),
            via = %outcome.via,
            "plugin bound"
        );
        slot.outcome = Some(outcome);

        // SAFETY: the table was resolved against `C`'s own contract.
        Ok(unsafe { C::bind(table) })
    }

    fn selected_type(&self) -> Result<FullType> {
        let selected = self.config.selected_types(C::NAME);
        match selected.as_slice() {
            [] => Err(PluginError::NotConfigured {
                category: C::NAME.to_string(),
            }),
            [one] => FullType::for_category(C::NAME, one),
            _ => Err(PluginError::InvalidType {
                value: selected.join(","),
                reason: format!("{} accepts a single plugin", C::NAME),
            }),
        }
    }

    /// The module that was bound, once ready.
    pub fn outcome(&self) -> Option<LinkOutcome> {
        self.slot.lock().outcome.clone()
    }

    /// The recorded failure, if the context is failed.
    pub fn error(&self) -> Option<PluginError> {
        self.slot.lock().error.clone()
    }

    /// Modules of this category on the search path.
    pub fn list_available(&self) -> Result<Vec<ModuleInfo>> {
        let slot = self.slot.lock();
        if let Some(rack) = &slot.rack {
            return Ok(rack.list());
        }
        let loader = Loader::from_config(&self.config, Arc::clone(&self.linker))?;
        Ok(loader.new_rack(C::NAME).list())
    }

    /// Drop the bound operations and reset to `Uninitialized`.
    ///
    /// The rack is destroyed when nothing references it and kept otherwise,
    /// in which case a later `init` reuses it.
    pub fn fini(&mut self) {
        drop(self.ops.take());
        let slot = self.slot.get_mut();
        release_rack(C::NAME, &mut slot.rack);
        slot.outcome = None;
        slot.error = None;
        self.state.set(ContextState::Uninitialized);
        tracing::debug!(category = C::NAME, "plugin context finalized");
    }
}

impl<C: Category> fmt::Debug for Context<C> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("category", &C::NAME)
            .field("state", &self.state())
            .finish()
    }
}
