//! Defers compilation of a unit until one of its symbols is needed.
//!
//! The symbol table of a registered unit is computed from its IR at
//! registration time, so answering "does this unit define X" never compiles
//! anything. Only a lookup that hits a defined symbol triggers emission, and
//! emission happens at most once per unit even when lookups race.

use std::collections::HashMap;
use std::sync::Arc;

use lazyjit_core::{CompilationUnit, JitError, JitResult, Mangler, Symbol, SymbolFlags};
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::{CompileLayer, JitLayer, ObjectHandle, SymbolResolver};

/// Identifies a unit registered with the lazy layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LazyHandle(usize);

enum Emission {
    Pending(CompilationUnit),
    Emitted(ObjectHandle),
}

struct LazyUnit {
    name: String,
    symbols: HashMap<String, SymbolFlags>,
    resolver: Arc<dyn SymbolResolver>,
    emission: Mutex<Emission>,
}

impl LazyUnit {
    fn defines(&self, name: &str, exported_only: bool) -> bool {
        self.symbols
            .get(name)
            .is_some_and(|flags| !exported_only || flags.contains(SymbolFlags::EXPORTED))
    }
}

pub struct LazyEmittingLayer {
    base: Arc<CompileLayer>,
    mangler: Arc<Mangler>,
    units: RwLock<Vec<Arc<LazyUnit>>>,
}

impl LazyEmittingLayer {
    pub fn new(base: Arc<CompileLayer>, mangler: Arc<Mangler>) -> Self {
        Self {
            base,
            mangler,
            units: RwLock::new(Vec::new()),
        }
    }

    pub fn base(&self) -> &Arc<CompileLayer> {
        &self.base
    }

    /// Registers `unit` without compiling it.
    ///
    /// `resolver` serves the unit's imports once it is emitted.
    pub fn add_unit(
        &self,
        unit: CompilationUnit,
        resolver: Arc<dyn SymbolResolver>,
    ) -> LazyHandle {
        let mut symbols = HashMap::with_capacity(unit.functions.len() + unit.globals.len());
        for function in &unit.functions {
            let mut flags = SymbolFlags::CALLABLE;
            if function.linkage.is_exported() {
                flags |= SymbolFlags::EXPORTED;
            }
            symbols.insert(self.mangler.mangle(&function.name), flags);
        }
        for global in &unit.globals {
            let flags = if global.linkage.is_exported() {
                SymbolFlags::EXPORTED
            } else {
                SymbolFlags::empty()
            };
            symbols.insert(self.mangler.mangle(&global.name), flags);
        }

        let mut units = self.units.write();
        let handle = LazyHandle(units.len());
        debug!(unit = %unit.name, symbols = symbols.len(), "unit registered for lazy emission");
        units.push(Arc::new(LazyUnit {
            name: unit.name.clone(),
            symbols,
            resolver,
            emission: Mutex::new(Emission::Pending(unit)),
        }));
        handle
    }

    /// Whether the unit behind `handle` has been compiled and linked.
    pub fn is_emitted(&self, handle: LazyHandle) -> JitResult<bool> {
        let unit = self.unit(handle)?;
        let emitted = matches!(*unit.emission.lock(), Emission::Emitted(_));
        Ok(emitted)
    }

    /// Forces emission of the unit behind `handle`.
    pub fn emit(&self, handle: LazyHandle) -> JitResult<ObjectHandle> {
        let unit = self.unit(handle)?;
        self.emit_unit(&unit)
    }

    fn unit(&self, handle: LazyHandle) -> JitResult<Arc<LazyUnit>> {
        self.units
            .read()
            .get(handle.0)
            .cloned()
            .ok_or(JitError::InvalidHandle(handle.0))
    }

    /// Compiles the unit on first call. A failed emission leaves the unit
    /// pending so a later lookup retries.
    fn emit_unit(&self, unit: &LazyUnit) -> JitResult<ObjectHandle> {
        let mut emission = unit.emission.lock();
        let handle = match &*emission {
            Emission::Emitted(handle) => return Ok(*handle),
            Emission::Pending(ir) => self.base.add_unit(ir, unit.resolver.as_ref())?,
        };
        *emission = Emission::Emitted(handle);
        debug!(unit = %unit.name, "unit emitted");
        Ok(handle)
    }

    fn lookup(&self, unit: &LazyUnit, name: &str, exported_only: bool) -> JitResult<Symbol> {
        if !unit.defines(name, exported_only) {
            return Ok(Symbol::unresolved());
        }
        let object = self.emit_unit(unit)?;
        self.base
            .linker()
            .find_symbol_in(object, name, exported_only)
    }
}

impl JitLayer for LazyEmittingLayer {
    type Handle = LazyHandle;

    fn find_symbol(&self, name: &str, exported_only: bool) -> JitResult<Symbol> {
        let units: Vec<Arc<LazyUnit>> = self.units.read().clone();
        for unit in &units {
            let sym = self.lookup(unit, name, exported_only)?;
            if sym.is_resolved() {
                return Ok(sym);
            }
        }
        Ok(Symbol::unresolved())
    }

    fn find_symbol_in(
        &self,
        handle: LazyHandle,
        name: &str,
        exported_only: bool,
    ) -> JitResult<Symbol> {
        let unit = self.unit(handle)?;
        self.lookup(&unit, name, exported_only)
    }
}
