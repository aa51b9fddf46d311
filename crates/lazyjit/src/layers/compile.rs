use std::sync::Arc;

use lazyjit_core::{CompilationUnit, JitResult, Mangler};
use tracing::debug;

use super::{ObjectHandle, ObjectLinkingLayer, SymbolResolver};
use crate::codegen::CodeGenerator;

/// Compiles IR eagerly and passes the result to the linking layer.
pub struct CompileLayer {
    compiler: Arc<dyn CodeGenerator>,
    linker: Arc<ObjectLinkingLayer>,
    mangler: Arc<Mangler>,
}

impl CompileLayer {
    pub fn new(
        compiler: Arc<dyn CodeGenerator>,
        linker: Arc<ObjectLinkingLayer>,
        mangler: Arc<Mangler>,
    ) -> Self {
        Self {
            compiler,
            linker,
            mangler,
        }
    }

    pub fn linker(&self) -> &Arc<ObjectLinkingLayer> {
        &self.linker
    }

    pub fn add_unit(
        &self,
        unit: &CompilationUnit,
        resolver: &dyn SymbolResolver,
    ) -> JitResult<ObjectHandle> {
        debug!(unit = %unit.name, functions = unit.functions.len(), "compiling unit");
        let mut pending = self.linker.begin_object(&unit.name);
        let code = self
            .compiler
            .compile(unit, &self.mangler, pending.module_mut())?;
        self.linker.add_object(pending, code, resolver)
    }
}
