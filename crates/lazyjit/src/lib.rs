//! lazyjit - a lazy, compile-on-demand JIT engine over Cranelift
//!
//! Units of IR are added to an [`Engine`], which compiles each function only
//! when it is first called. Until then, lookups hand out stub addresses that
//! compile and patch themselves on first use.
//!
//! # Example
//!
//! ```no_run
//! use lazyjit::{CompilationUnit, Engine, Expr, FunctionDef};
//!
//! let unit = CompilationUnit::new("demo")
//!     .with_function(FunctionDef::exported(
//!         "add",
//!         2,
//!         Expr::add(Expr::param(0), Expr::param(1)),
//!     ))
//!     .with_function(FunctionDef::exported(
//!         "main",
//!         0,
//!         Expr::call("add", vec![Expr::int(2), Expr::int(3)]),
//!     ));
//!
//! let mut engine = Engine::new()?;
//! engine.add_module(unit)?;
//! assert_eq!(engine.invoke("main", &[])?, 5);
//! # Ok::<(), lazyjit::JitError>(())
//! ```

pub mod callback;
pub mod codegen;
pub mod engine;
pub mod host;
pub mod layers;
pub mod overrides;
pub mod target;

pub use callback::{take_trampoline_error, CallSite, CallbackManager, Trampoline, TrampolineId};
pub use codegen::{CodeGenerator, CraneliftCodeGen, ObjectCode};
pub use engine::{CtorDtorRunner, Engine, EngineBuilder, EngineStats, MAX_INVOKE_ARGS};
pub use host::{HostSymbols, NoHostSymbols, ProcessSymbols};
pub use layers::cod::PartitionState;
pub use layers::{
    CompileLayer, CompileOnDemandLayer, JitLayer, LazyEmittingLayer, ModuleHandle,
    ObjectLinkingLayer, SymbolResolver,
};
pub use overrides::{RuntimeOverrides, CXA_ATEXIT, DSO_HANDLE};
pub use target::Target;

pub use lazyjit_config::{ConfigError, JitConfig, OptLevel, PartitionPolicy};
pub use lazyjit_core::{
    CompilationUnit, DataLayout, Expr, ExternFunction, ExternGlobal, FunctionDef, GlobalDef,
    JitError, JitResult, Linkage, Mangler, StaticInit, Symbol, SymbolFlags,
};

#[cfg(feature = "console")]
pub use lazyjit_console as console;
