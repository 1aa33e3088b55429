//! Job namespace plugins.
//!
//! Creation must succeed in every plugin. Join and delete run through all of
//! them regardless, so a failing plugin cannot leave the others half set up.

use std::os::raw::c_int;

use super::check_status;
use crate::contract::{Category, SymbolTable};
use crate::error::Result;
use crate::fanout::{FanOutPolicy, MultiContext};

type CreateFn = unsafe extern "C" fn(job_id: u32) -> c_int;
type JoinFn = unsafe extern "C" fn(job_id: u32, pid: u32) -> c_int;
type DeleteFn = unsafe extern "C" fn(job_id: u32) -> c_int;

pub trait NamespaceOps: Send + Sync {
    fn full_type(&self) -> &str;
    fn create(&self, job_id: u32) -> Result<()>;
    fn join(&self, job_id: u32, pid: u32) -> Result<()>;
    fn delete(&self, job_id: u32) -> Result<()>;
}

#[derive(Debug)]
pub struct Namespace;

impl Category for Namespace {
    const NAME: &'static str = "namespace";
    const SYMBOLS: &'static [&'static str] =
        &["namespace_create", "namespace_join", "namespace_delete"];

    type Ops = dyn NamespaceOps;

    unsafe fn bind(table: SymbolTable) -> Box<Self::Ops> {
        Box::new(NativeNamespace {
            create: table.get(0),
            join: table.get(1),
            delete: table.get(2),
            table,
        })
    }
}

struct NativeNamespace {
    create: CreateFn,
    join: JoinFn,
    delete: DeleteFn,
    table: SymbolTable,
}

impl NamespaceOps for NativeNamespace {
    fn full_type(&self) -> &str {
        self.table.full_type()
    }

    fn create(&self, job_id: u32) -> Result<()> {
        // SAFETY: resolved against this contract; `table` keeps the module mapped.
        let code = unsafe { (self.create)(job_id) };
        check_status(Namespace::NAME, self.full_type(), "namespace_create", code)
    }

    fn join(&self, job_id: u32, pid: u32) -> Result<()> {
        // SAFETY: as above.
        let code = unsafe { (self.join)(job_id, pid) };
        check_status(Namespace::NAME, self.full_type(), "namespace_join", code)
    }

    fn delete(&self, job_id: u32) -> Result<()> {
        // SAFETY: as above.
        let code = unsafe { (self.delete)(job_id) };
        check_status(Namespace::NAME, self.full_type(), "namespace_delete", code)
    }
}

impl MultiContext<Namespace> {
    pub fn create(&self, job_id: u32) -> Result<()> {
        self.dispatch(FanOutPolicy::FailFast, |ops| ops.create(job_id))
    }

    pub fn join(&self, job_id: u32, pid: u32) -> Result<()> {
        self.dispatch(FanOutPolicy::RunAll, |ops| ops.join(job_id, pid))
    }

    pub fn delete(&self, job_id: u32) -> Result<()> {
        self.dispatch(FanOutPolicy::RunAll, |ops| ops.delete(job_id))
    }
}
