//! Maps compiled code into executable memory.
//!
//! Each object gets its own `JITModule`. Imports are resolved up front
//! through the caller's [`SymbolResolver`] into a per-object table that the
//! module's symbol lookup reads during finalization, so an unresolvable
//! import surfaces as `UnresolvedSymbol` instead of a panic inside Cranelift.

use std::collections::HashMap;
use std::sync::Arc;

use cranelift_codegen::isa::OwnedTargetIsa;
use cranelift_jit::{JITBuilder, JITModule};
use lazyjit_core::{JitError, JitResult, Symbol, SymbolFlags};
use parking_lot::RwLock;
use tracing::{debug, trace};

use super::{JitLayer, SymbolResolver};
use crate::codegen::{DefinitionId, ObjectCode};

/// Identifies a linked object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectHandle(usize);

type ImportTable = Arc<RwLock<HashMap<String, u64>>>;

/// A module being filled by a code generator, not yet linked.
pub struct PendingObject {
    unit_name: String,
    module: JITModule,
    imports: ImportTable,
}

impl PendingObject {
    pub fn unit_name(&self) -> &str {
        &self.unit_name
    }

    pub fn module_mut(&mut self) -> &mut JITModule {
        &mut self.module
    }
}

struct LinkedObject {
    unit_name: String,
    // Owns the code memory the symbols point into.
    _module: JITModule,
    symbols: HashMap<String, Symbol>,
}

// SAFETY: the module is never touched after finalization; it is only held so
// its executable memory lives as long as the layer.
unsafe impl Send for LinkedObject {}
unsafe impl Sync for LinkedObject {}

impl LinkedObject {
    fn find(&self, name: &str, exported_only: bool) -> Symbol {
        match self.symbols.get(name) {
            Some(sym) if !exported_only || sym.is_exported() => *sym,
            _ => Symbol::unresolved(),
        }
    }
}

/// Bottom layer: owns all executable memory.
pub struct ObjectLinkingLayer {
    isa: OwnedTargetIsa,
    objects: RwLock<Vec<Arc<LinkedObject>>>,
}

impl ObjectLinkingLayer {
    pub fn new(isa: OwnedTargetIsa) -> Self {
        Self {
            isa,
            objects: RwLock::new(Vec::new()),
        }
    }

    /// Creates an empty module for `unit_name` whose imports will be served
    /// from the resolver passed to [`add_object`](Self::add_object).
    pub fn begin_object(&self, unit_name: &str) -> PendingObject {
        let imports: ImportTable = Arc::new(RwLock::new(HashMap::new()));
        let table = Arc::clone(&imports);
        let mut builder =
            JITBuilder::with_isa(self.isa.clone(), cranelift_module::default_libcall_names());
        builder.symbol_lookup_fn(Box::new(move |name| {
            table
                .read()
                .get(name)
                .map(|&addr| addr as usize as *const u8)
        }));
        PendingObject {
            unit_name: unit_name.to_string(),
            module: JITModule::new(builder),
            imports,
        }
    }

    /// Resolves every import of `code`, finalizes it and records its symbols.
    ///
    /// On error nothing is recorded and the module is dropped.
    pub fn add_object(
        &self,
        mut pending: PendingObject,
        code: ObjectCode,
        resolver: &dyn SymbolResolver,
    ) -> JitResult<ObjectHandle> {
        for name in &code.imports {
            let address = resolver.resolve(name)?.require(name)?;
            trace!(unit = %pending.unit_name, symbol = %name, address = format_args!("{address:#x}"), "import resolved");
            pending.imports.write().insert(name.clone(), address);
        }

        pending
            .module
            .finalize_definitions()
            .map_err(|e| JitError::link(&pending.unit_name, e.to_string()))?;

        let mut symbols = HashMap::with_capacity(code.definitions.len());
        for def in &code.definitions {
            let (address, mut flags) = match def.id {
                DefinitionId::Function(id) => (
                    pending.module.get_finalized_function(id) as usize as u64,
                    SymbolFlags::CALLABLE,
                ),
                DefinitionId::Data(id) => (
                    pending.module.get_finalized_data(id).0 as usize as u64,
                    SymbolFlags::empty(),
                ),
            };
            if def.exported {
                flags |= SymbolFlags::EXPORTED;
            }
            symbols.insert(def.name.clone(), Symbol::new(address, flags));
        }

        let mut objects = self.objects.write();
        let handle = ObjectHandle(objects.len());
        debug!(
            event = "object_linked",
            unit = %pending.unit_name,
            symbols = symbols.len(),
            imports = code.imports.len(),
        );
        objects.push(Arc::new(LinkedObject {
            unit_name: pending.unit_name,
            _module: pending.module,
            symbols,
        }));
        Ok(handle)
    }

    /// Number of objects linked so far.
    pub fn object_count(&self) -> usize {
        self.objects.read().len()
    }

    pub fn unit_name(&self, handle: ObjectHandle) -> Option<String> {
        self.objects
            .read()
            .get(handle.0)
            .map(|obj| obj.unit_name.clone())
    }
}

impl JitLayer for ObjectLinkingLayer {
    type Handle = ObjectHandle;

    fn find_symbol(&self, name: &str, exported_only: bool) -> JitResult<Symbol> {
        let objects = self.objects.read();
        Ok(objects
            .iter()
            .map(|obj| obj.find(name, exported_only))
            .find(Symbol::is_resolved)
            .unwrap_or_default())
    }

    fn find_symbol_in(
        &self,
        handle: ObjectHandle,
        name: &str,
        exported_only: bool,
    ) -> JitResult<Symbol> {
        let objects = self.objects.read();
        let obj = objects
            .get(handle.0)
            .ok_or(JitError::InvalidHandle(handle.0))?;
        Ok(obj.find(name, exported_only))
    }
}
