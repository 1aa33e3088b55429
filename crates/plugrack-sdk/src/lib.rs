//! Plugrack module SDK
//!
//! Everything a module author needs to be discovered and bound by a plugrack
//! host: the self-describing [`ModuleRecord`], the [`declare_module!`] macro
//! that exports it, and the status codes returned by contracted operations.
//!
//! Contracted operations themselves are plain `#[no_mangle] extern "C"`
//! functions whose names and signatures come from the category the module
//! implements.

#[macro_use]
pub mod macros;
pub mod record;

pub use record::{ModuleRecord, RecordError, LAYOUT_VERSION, MAGIC, RECORD_LEN, RECORD_SYMBOL};

/// Status codes returned by contracted operations.
pub mod status {
    use std::os::raw::c_int;

    /// Operation succeeded.
    pub const SUCCESS: c_int = 0;

    /// Generic failure.
    pub const ERROR: c_int = -1;

    /// Whether a returned status denotes success.
    pub fn is_success(code: c_int) -> bool {
        code == SUCCESS
    }
}
