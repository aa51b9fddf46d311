//! Intermediate representation accepted by the engine.

mod expr;
mod unit;
mod validate;

#[cfg(test)]
mod tests;

pub use expr::Expr;
pub use unit::{
    CompilationUnit, DataLayout, ExternFunction, ExternGlobal, FunctionDef, GlobalDef, Linkage,
    StaticInit, DEFAULT_INIT_PRIORITY,
};
