//! lazyjit core - IR, symbols and naming shared by every engine layer
//!
//! This crate provides:
//! - The compilation unit IR submitted to the engine
//! - Structural validation of units
//! - `Symbol` lookup results
//! - The target-ABI `Mangler`
//! - The `JitError` taxonomy

pub mod error;
pub mod ir;
pub mod mangle;
pub mod symbol;

pub use error::{JitError, JitResult};
pub use ir::{
    CompilationUnit, DataLayout, Expr, ExternFunction, ExternGlobal, FunctionDef, GlobalDef,
    Linkage, StaticInit,
};
pub use mangle::Mangler;
pub use symbol::{Symbol, SymbolFlags};
