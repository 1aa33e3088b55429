//! Job submission filters.
//!
//! Every configured filter sees every submission, in configured order, and
//! any one of them can reject it.

use std::os::raw::c_int;

use super::check_status;
use crate::contract::{Category, SymbolTable};
use crate::error::Result;
use crate::fanout::{FanOutPolicy, MultiContext};

type FilterFn = unsafe extern "C" fn(job_id: u32, uid: u32) -> c_int;

pub trait JobSubmitOps: Send + Sync {
    fn full_type(&self) -> &str;
    fn submit(&self, job_id: u32, uid: u32) -> Result<()>;
    fn modify(&self, job_id: u32, uid: u32) -> Result<()>;
}

/// The job submission category.
#[derive(Debug)]
pub struct JobSubmit;

impl Category for JobSubmit {
    const NAME: &'static str = "job_submit";
    const SYMBOLS: &'static [&'static str] = &["job_submit", "job_modify"];
    const UNIQUE_PLUGIN_IDS: bool = true;

    type Ops = dyn JobSubmitOps;

    unsafe fn bind(table: SymbolTable) -> Box<Self::Ops> {
        Box::new(NativeJobSubmit {
            submit: table.get(0),
            modify: table.get(1),
            table,
        })
    }
}

struct NativeJobSubmit {
    submit: FilterFn,
    modify: FilterFn,
    table: SymbolTable,
}

impl JobSubmitOps for NativeJobSubmit {
    fn full_type(&self) -> &str {
        self.table.full_type()
    }

    fn submit(&self, job_id: u32, uid: u32) -> Result<()> {
        // SAFETY: resolved against this contract; `table` keeps the module mapped.
        let code = unsafe { (self.submit)(job_id, uid) };
        check_status(JobSubmit::NAME, self.full_type(), "job_submit", code)
    }

    fn modify(&self, job_id: u32, uid: u32) -> Result<()> {
        // SAFETY: as above.
        let code = unsafe { (self.modify)(job_id, uid) };
        check_status(JobSubmit::NAME, self.full_type(), "job_modify", code)
    }
}

impl MultiContext<JobSubmit> {
    /// Run a new submission through every filter; the first rejection wins.
    pub fn submit(&self, job_id: u32, uid: u32) -> Result<()> {
        self.dispatch(FanOutPolicy::FailFast, |ops| ops.submit(job_id, uid))
    }

    /// Run a modification request through every filter.
    pub fn modify(&self, job_id: u32, uid: u32) -> Result<()> {
        self.dispatch(FanOutPolicy::FailFast, |ops| ops.modify(job_id, uid))
    }
}
