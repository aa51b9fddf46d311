//! Compilation units: the IR fragments submitted to the engine.

use super::expr::Expr;

/// Symbol visibility within and across units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Linkage {
    /// Visible to other units through the fallback chain.
    #[default]
    Export,
    /// Visible only inside the defining unit.
    Internal,
}

impl Linkage {
    pub fn is_exported(self) -> bool {
        matches!(self, Linkage::Export)
    }
}

/// Target data layout carried by a unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataLayout {
    pub triple: String,
    pub pointer_bits: u16,
    pub big_endian: bool,
}

impl DataLayout {
    /// Whether code laid out for `self` can run on a target laid out as `target`.
    pub fn is_compatible_with(&self, target: &DataLayout) -> bool {
        self.pointer_bits == target.pointer_bits && self.big_endian == target.big_endian
    }
}

/// A function definition. Takes `arity` i64 parameters and returns i64.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDef {
    pub name: String,
    pub arity: usize,
    pub linkage: Linkage,
    pub body: Expr,
}

impl FunctionDef {
    pub fn new(name: impl Into<String>, arity: usize, linkage: Linkage, body: Expr) -> Self {
        Self {
            name: name.into(),
            arity,
            linkage,
            body,
        }
    }

    pub fn exported(name: impl Into<String>, arity: usize, body: Expr) -> Self {
        Self::new(name, arity, Linkage::Export, body)
    }

    pub fn internal(name: impl Into<String>, arity: usize, body: Expr) -> Self {
        Self::new(name, arity, Linkage::Internal, body)
    }
}

/// A writable 8-byte global cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalDef {
    pub name: String,
    pub linkage: Linkage,
    pub initial: i64,
}

impl GlobalDef {
    pub fn new(name: impl Into<String>, linkage: Linkage, initial: i64) -> Self {
        Self {
            name: name.into(),
            linkage,
            initial,
        }
    }
}

/// A function the unit calls but does not define.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternFunction {
    pub name: String,
    pub arity: usize,
}

/// A data symbol the unit references but does not define.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternGlobal {
    pub name: String,
}

/// One entry of a unit's static constructor or destructor table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticInit {
    pub function: String,
    pub priority: u32,
}

/// Default priority for static initializers without an explicit one.
pub const DEFAULT_INIT_PRIORITY: u32 = 65535;

/// A self-contained IR program fragment submitted for JIT execution.
///
/// Ownership moves into the engine on submission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompilationUnit {
    pub name: String,
    pub data_layout: Option<DataLayout>,
    pub functions: Vec<FunctionDef>,
    pub globals: Vec<GlobalDef>,
    pub extern_functions: Vec<ExternFunction>,
    pub extern_globals: Vec<ExternGlobal>,
    pub constructors: Vec<StaticInit>,
    pub destructors: Vec<StaticInit>,
}

impl CompilationUnit {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_data_layout(mut self, layout: DataLayout) -> Self {
        self.data_layout = Some(layout);
        self
    }

    pub fn with_function(mut self, function: FunctionDef) -> Self {
        self.functions.push(function);
        self
    }

    pub fn with_global(mut self, global: GlobalDef) -> Self {
        self.globals.push(global);
        self
    }

    pub fn with_extern_function(mut self, name: impl Into<String>, arity: usize) -> Self {
        self.extern_functions.push(ExternFunction {
            name: name.into(),
            arity,
        });
        self
    }

    pub fn with_extern_global(mut self, name: impl Into<String>) -> Self {
        self.extern_globals.push(ExternGlobal { name: name.into() });
        self
    }

    /// Appends an entry to the static constructor table.
    pub fn with_constructor(mut self, function: impl Into<String>) -> Self {
        self.constructors.push(StaticInit {
            function: function.into(),
            priority: DEFAULT_INIT_PRIORITY,
        });
        self
    }

    /// Appends an entry to the static destructor table.
    pub fn with_destructor(mut self, function: impl Into<String>) -> Self {
        self.destructors.push(StaticInit {
            function: function.into(),
            priority: DEFAULT_INIT_PRIORITY,
        });
        self
    }

    pub fn function(&self, name: &str) -> Option<&FunctionDef> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn global(&self, name: &str) -> Option<&GlobalDef> {
        self.globals.iter().find(|g| g.name == name)
    }

    pub fn extern_function(&self, name: &str) -> Option<&ExternFunction> {
        self.extern_functions.iter().find(|f| f.name == name)
    }

    /// Constructor function names in table order.
    pub fn constructor_names(&self) -> impl Iterator<Item = &str> {
        self.constructors.iter().map(|c| c.function.as_str())
    }

    /// Destructor function names in table order.
    pub fn destructor_names(&self) -> impl Iterator<Item = &str> {
        self.destructors.iter().map(|d| d.function.as_str())
    }

    /// Arity of a callable name, whether defined here or declared external.
    pub fn arity_of(&self, name: &str) -> Option<usize> {
        self.function(name)
            .map(|f| f.arity)
            .or_else(|| self.extern_function(name).map(|f| f.arity))
    }

    /// Whether `name` is a data symbol defined or declared by this unit.
    pub fn has_data_symbol(&self, name: &str) -> bool {
        self.global(name).is_some() || self.extern_globals.iter().any(|g| g.name == name)
    }
}
