//! Checkpoint category: one plugin checkpoints and restarts job steps.

use std::fmt;
use std::os::raw::c_int;

use super::check_status;
use crate::contract::{Category, SymbolTable};
use crate::error::Result;

type InitFn = unsafe extern "C" fn() -> c_int;
type FiniFn = unsafe extern "C" fn() -> c_int;
type OpFn = unsafe extern "C" fn(job_id: u32, step_id: u32, action: u16) -> c_int;
type RestartFn = unsafe extern "C" fn(job_id: u32) -> c_int;

/// Checkpoint request passed to `checkpoint_op`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum CheckpointAction {
    Able = 0,
    Disable = 1,
    Enable = 2,
    Create = 3,
    Vacate = 4,
    Requeue = 5,
    Restart = 6,
    Error = 7,
}

impl fmt::Display for CheckpointAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Safe interface to the bound checkpoint plugin.
pub trait CheckpointOps: Send + Sync {
    fn full_type(&self) -> &str;
    fn init(&self) -> Result<()>;
    fn fini(&self) -> Result<()>;
    fn op(&self, job_id: u32, step_id: u32, action: CheckpointAction) -> Result<()>;
    fn restart(&self, job_id: u32) -> Result<()>;
}

/// The checkpoint category.
#[derive(Debug)]
pub struct Checkpoint;

impl Category for Checkpoint {
    const NAME: &'static str = "checkpoint";
    const SYMBOLS: &'static [&'static str] = &[
        "checkpoint_init",
        "checkpoint_fini",
        "checkpoint_op",
        "checkpoint_restart",
    ];

    type Ops = dyn CheckpointOps;

    unsafe fn bind(table: SymbolTable) -> Box<Self::Ops> {
        Box::new(NativeCheckpoint {
            init: table.get(0),
            fini: table.get(1),
            op: table.get(2),
            restart: table.get(3),
            table,
        })
    }
}

struct NativeCheckpoint {
    init: InitFn,
    fini: FiniFn,
    op: OpFn,
    restart: RestartFn,
    table: SymbolTable,
}

impl NativeCheckpoint {
    fn check(&self, operation: &'static str, code: c_int) -> Result<()> {
        check_status(Checkpoint::NAME, self.table.full_type(), operation, code)
    }
}

// SAFETY (all calls below): the pointers come from a table resolved against
// the checkpoint contract and `table` keeps the module mapped.
impl CheckpointOps for NativeCheckpoint {
    fn full_type(&self) -> &str {
        self.table.full_type()
    }

    fn init(&self) -> Result<()> {
        self.check("checkpoint_init", unsafe { (self.init)() })
    }

    fn fini(&self) -> Result<()> {
        self.check("checkpoint_fini", unsafe { (self.fini)() })
    }

    fn op(&self, job_id: u32, step_id: u32, action: CheckpointAction) -> Result<()> {
        tracing::debug!(job_id, step_id, %action, "checkpoint op");
        self.check("checkpoint_op", unsafe {
            (self.op)(job_id, step_id, action as u16)
        })
    }

    fn restart(&self, job_id: u32) -> Result<()> {
        self.check("checkpoint_restart", unsafe { (self.restart)(job_id) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_is_valid() {
        Checkpoint::contract().validate().unwrap();
        assert_eq!(Checkpoint::contract().len(), 4);
        assert!(!Checkpoint::UNIQUE_PLUGIN_IDS);
    }
}
