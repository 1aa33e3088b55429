//! Fan-out contexts.
//!
//! Some categories run an ordered list of plugins for every call. Each
//! configured type gets its own bound table, all sharing one rack, and
//! calls are dispatched across them according to a [`FanOutPolicy`].

use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::RuntimeConfig;
use crate::context::{release_rack, ContextState, StateCell};
use crate::contract::Category;
use crate::error::{PluginError, Result};
use crate::linker::ModuleLinker;
use crate::loader::{LinkOutcome, Loader};
use crate::rack::{ModuleInfo, Rack};
use crate::types::FullType;

/// How a call is spread across the configured plugins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FanOutPolicy {
    /// Stop at the first failure and return it.
    FailFast,
    /// Call every plugin, then return the first failure.
    RunAll,
}

/// One bound plugin of a fan-out context.
pub struct BoundOps<C: Category> {
    full_type: String,
    ops: Box<C::Ops>,
}

impl<C: Category> BoundOps<C> {
    pub fn full_type(&self) -> &str {
        &self.full_type
    }

    pub fn ops(&self) -> &C::Ops {
        self.ops.as_ref()
    }
}

#[derive(Default)]
struct Slot {
    rack: Option<Rack>,
    outcomes: Vec<LinkOutcome>,
    error: Option<PluginError>,
}

/// Lazily bound multi-plugin context.
pub struct MultiContext<C: Category> {
    config: Arc<RuntimeConfig>,
    linker: Arc<dyn ModuleLinker>,
    tables: OnceCell<Vec<BoundOps<C>>>,
    state: StateCell,
    slot: Mutex<Slot>,
}

impl<C: Category> MultiContext<C> {
    pub fn new(config: Arc<RuntimeConfig>, linker: Arc<dyn ModuleLinker>) -> Self {
        Self {
            config,
            linker,
            tables: OnceCell::new(),
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

    pub fn init(&self) -> Result<()> {
        self.tables().map(|_| ())
    }

    /// Bound tables in configured order, initializing on first use.
    pub fn tables(&self) -> Result<&[BoundOps<C>]> {
        if let Some(tables) = self.tables.get() {
            return Ok(tables.as_slice());
        }

        let mut slot = self.slot.lock();
        if let Some(tables) = self.tables.get() {
            return Ok(tables.as_slice());
        }
        if let Some(err) = &slot.error {
            return Err(err.clone());
        }

        self.state.set(ContextState::Initializing);
        match self.tables.get_or_try_init(|| self.bind_all(&mut *slot)) {
            Ok(tables) => {
                self.state.set(ContextState::Ready);
                Ok(tables.as_slice())
            }
            Err(e) => {
                if e.is_fatal() {
                    tracing::error!(category = C::NAME, error = %e, "fatal plugin configuration");
                } else {
                    tracing::error!(category = C::NAME, error = %e, "plugin context failed to initialize");
                }
                slot.outcomes.clear();
                release_rack(C::NAME, &mut slot.rack);
                slot.error = Some(e.clone());
                self.state.set(ContextState::Failed);
                Err(e)
            }
        }
    }

    fn bind_all(&self, slot: &mut Slot) -> Result<Vec<BoundOps<C>>> {
        let mut selected: Vec<FullType> = Vec::new();
        for raw in self.config.selected_types(C::NAME) {
            let full_type = FullType::for_category(C::NAME, &raw)?;
            if selected.contains(&full_type) {
                tracing::warn!(category = C::NAME, full_type = %full_type, "plugin listed twice, ignoring repeat");
                continue;
            }
            selected.push(full_type);
        }
        if selected.is_empty() {
            tracing::debug!(category = C::NAME, "no plugins configured");
            return Ok(Vec::new());
        }

        let loader = Loader::from_config(&self.config, Arc::clone(&self.linker))?;
        let contract = C::contract();
        let mut tables = Vec::with_capacity(selected.len());
        let mut outcomes: Vec<LinkOutcome> = Vec::with_capacity(selected.len());

        for full_type in &selected {
            let (table, outcome) = loader.load_and_link(full_type, &contract, &mut slot.rack)?;
            if C::UNIQUE_PLUGIN_IDS {
                check_unique_id::<C>(&outcomes, &outcome)?;
            }
            tracing::info!(
                category = C::NAME,
                full_type = %outcome.full_type,
                path = %outcome.path.display(),
                via = %outcome.via,
                "plugin bound"
            );

            // SAFETY: the table was resolved against `C`'s own contract.
            let ops = unsafe { C::bind(table) };
            tables.push(BoundOps {
                full_type: full_type.to_string(),
                ops,
            });
            outcomes.push(outcome);
        }

        slot.outcomes = outcomes;
        Ok(tables)
    }

    /// Call `f` on each bound table in configured order.
    pub fn dispatch<F>(&self, policy: FanOutPolicy, mut f: F) -> Result<()>
    where
        F: FnMut(&C::Ops) -> Result<()>,
    {
        let mut first_error = None;
        for bound in self.tables()? {
            let Err(e) = f(bound.ops()) else {
                continue;
            };
            match policy {
                FanOutPolicy::FailFast => return Err(e),
                FanOutPolicy::RunAll if first_error.is_none() => first_error = Some(e),
                FanOutPolicy::RunAll => {
                    tracing::warn!(category = C::NAME, full_type = bound.full_type(), error = %e, "additional plugin failure");
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn outcomes(&self) -> Vec<LinkOutcome> {
        self.slot.lock().outcomes.clone()
    }

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

    /// Drop all bound tables and reset to `Uninitialized`.
    pub fn fini(&mut self) {
        drop(self.tables.take());
        let slot = self.slot.get_mut();
        release_rack(C::NAME, &mut slot.rack);
        slot.outcomes.clear();
        slot.error = None;
        self.state.set(ContextState::Uninitialized);
        tracing::debug!(category = C::NAME, "plugin context finalized");
    }
}

fn check_unique_id<C: Category>(bound: &[LinkOutcome], next: &LinkOutcome) -> Result<()> {
    if next.plugin_id == 0 {
        return Ok(());
    }
    match bound.iter().find(|o| o.plugin_id == next.plugin_id) {
        Some(first) => Err(PluginError::DuplicatePluginId {
            category: C::NAME.to_string(),
            plugin_id: next.plugin_id,
            first: first.full_type.clone(),
            second: next.full_type.clone(),
        }),
        None => Ok(()),
    }
}

impl<C: Category> fmt::Debug for MultiContext<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiContext")
            .field("category", &C::NAME)
            .field("state", &self.state())
            .field("tables", &self.tables.get().map_or(0, Vec::len))
            .finish()
    }
}
