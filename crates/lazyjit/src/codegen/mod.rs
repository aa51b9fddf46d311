//! Code generation seam.
//!
//! A [`CodeGenerator`] lowers a [`CompilationUnit`] into a caller-supplied
//! [`JITModule`]. It declares and defines symbols but never finalizes:
//! relocation and import resolution belong to the object linking layer.

mod cranelift;


use cranelift_jit::JITModule;
use cranelift_module::{DataId, FuncId};
use lazyjit_core::{CompilationUnit, JitResult, Mangler};

pub use self::cranelift::CraneliftCodeGen;
pub(crate) use self::cranelift::int_signature;

/// Converts a compilation unit into relocatable code inside a module.
pub trait CodeGenerator: Send + Sync {
    /// Lowers every function and global of `unit` into `module`.
    ///
    /// All names in the returned [`ObjectCode`] are mangled with `mangler`.
    fn compile(
        &self,
        unit: &CompilationUnit,
        mangler: &Mangler,
        module: &mut JITModule,
    ) -> JitResult<ObjectCode>;
}

/// Module-level id of a definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionId {
    Function(FuncId),
    Data(DataId),
}

/// A symbol defined by compiled code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinedSymbol {
    pub name: String,
    pub id: DefinitionId,
    pub exported: bool,
}

/// Compiled, not yet linked, output of one unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectCode {
    pub unit_name: String,
    pub definitions: Vec<DefinedSymbol>,
    /// Mangled names the code refers to but does not define.
    pub imports: Vec<String>,
}

impl ObjectCode {
    pub fn new(unit_name: impl Into<String>) -> Self {
        Self {
            unit_name: unit_name.into(),
            ..Self::default()
        }
    }
}
