//! Symbol contracts and typed binding.
//!
//! A category declares the ordered list of symbols its modules must export
//! and an adapter that turns the resolved addresses into a trait object.
//! Positions are an ABI: new operations are appended, never inserted.

use std::collections::HashSet;
use std::fmt::{self, Display, Formatter};

use crate::error::{PluginError, Result};
use crate::linker::{ModuleHandle, RawSymbol};

/// Ordered symbol names a module must export to serve a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolContract {
    pub category: &'static str,
    pub symbols: &'static [&'static str],
}

impl SymbolContract {
    pub const fn new(category: &'static str, symbols: &'static [&'static str]) -> Self {
        Self { category, symbols }
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Reject empty contracts and repeated names.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| PluginError::InvalidContract {
            category: self.category.to_string(),
            reason,
        };
        if self.symbols.is_empty() {
            return Err(invalid("no symbols declared".into()));
        }
        let mut seen = HashSet::new();
        for name in self.symbols {
            if name.is_empty() {
                return Err(invalid("empty symbol name".into()));
            }
            if !seen.insert(*name) {
                return Err(invalid(format!("symbol '{}' declared twice", name)));
            }
        }
        Ok(())
    }
}

impl Display for SymbolContract {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.category, self.symbols.join(", "))
    }
}

/// A subsystem served by interchangeable modules.
///
/// `bind` is the per-category adapter: it reads the table positionally and
/// returns the safe interface the rest of the host uses.
pub trait Category: Send + Sync + 'static {
    /// Major type; also the rack filter.
    const NAME: &'static str;

    /// Contracted symbols, in ABI order.
    const SYMBOLS: &'static [&'static str];

    /// Whether simultaneously active modules must declare distinct plugin ids.
    const UNIQUE_PLUGIN_IDS: bool = false;

    /// Interface handed to callers once bound.
    type Ops: ?Sized + Send + Sync;

    /// Build the adapter over a fully resolved table.
    ///
    /// # Safety
    /// Every entry of `table` must have the signature this category assigns
    /// to its position.
    unsafe fn bind(table: SymbolTable) -> Box<Self::Ops>;

    fn contract() -> SymbolContract {
        SymbolContract::new(Self::NAME, Self::SYMBOLS)
    }
}

/// Addresses resolved for a contract, in contract order.
///
/// Holds a handle on the module so the addresses stay valid for as long as
/// the table (or anything cloned out of it with [`SymbolTable::module`]) lives.
#[derive(Clone)]
pub struct SymbolTable {
    contract: SymbolContract,
    full_type: String,
    entries: Box<[RawSymbol]>,
    module: ModuleHandle,
}

impl SymbolTable {
    /// Resolve every contracted symbol in `module`.
    ///
    /// All-or-nothing: any unresolved name fails the whole table.
    pub fn resolve(
        module: ModuleHandle,
        contract: &SymbolContract,
        full_type: &str,
    ) -> Result<Self> {
        let mut entries = Vec::with_capacity(contract.len());
        let mut missing = Vec::new();

        for name in contract.symbols {
            match module.symbol(name) {
                Some(symbol) => entries.push(symbol),
                None => missing.push((*name).to_string()),
            }
        }

        if !missing.is_empty() {
            tracing::warn!(
                category = contract.category,
                full_type,
                path = %module.path().display(),
                missing = ?missing,
                "incomplete plugin detected"
            );
            return Err(PluginError::Incomplete {
                category: contract.category.to_string(),
                full_type: full_type.to_string(),
                missing,
                expected: contract.len(),
            });
        }

        Ok(Self {
            contract: *contract,
            full_type: full_type.to_string(),
            entries: entries.into_boxed_slice(),
            module,
        })
    }

    pub fn contract(&self) -> &SymbolContract {
        &self.contract
    }

    pub fn full_type(&self) -> &str {
        &self.full_type
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keep-alive handle for adapters that outlive the table.
    pub fn module(&self) -> ModuleHandle {
        self.module.clone()
    }

    /// Addresses in contract order.
    pub fn addresses(&self) -> Vec<usize> {
        self.entries.iter().map(RawSymbol::addr).collect()
    }

    /// Reinterpret the entry at `index` as `F`.
    ///
    /// # Safety
    /// `F` must be the function pointer type the module exported at that
    /// position.
    ///
    /// # Panics
    /// Panics if `index` is out of range or `F` is not pointer sized.
    pub unsafe fn get<F: Copy>(&self, index: usize) -> F {
        assert_eq!(
            std::mem::size_of::<F>(),
            std::mem::size_of::<*const ()>(),
            "symbol type must be pointer sized"
        );
        let address = self.entries[index].as_ptr();
        std::mem::transmute_copy::<*const std::ffi::c_void, F>(&address)
    }

    /// Like [`SymbolTable::get`], by name.
    ///
    /// # Safety
    /// See [`SymbolTable::get`].
    pub unsafe fn get_named<F: Copy>(&self, name: &str) -> Option<F> {
        let index = self.contract.symbols.iter().position(|s| *s == name)?;
        Some(self.get(index))
    }
}

impl fmt::Debug for SymbolTable {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymbolTable")
            .field("contract", &self.contract)
            .field("full_type", &self.full_type)
            .field("path", &self.module.path())
            .field("entries", &self.entries)
            .finish()
    }
}
