//! The layer stack.
//!
//! Bottom to top:
//!
//! ```text
//! CompileOnDemandLayer   partitions units, hands out stubs, compiles on first call
//! LazyEmittingLayer      defers compilation until a defined symbol is looked up
//! CompileLayer           runs the CodeGenerator
//! ObjectLinkingLayer     resolves imports, finalizes code into executable memory
//! ```
//!
//! Each layer owns the one below it through an `Arc` and forwards lookups
//! downward. Every name crossing a layer boundary is already mangled.

pub mod cod;
mod compile;
mod lazy_emit;
mod object_linking;

#[cfg(test)]
mod tests;

use lazyjit_core::{JitResult, Symbol};

pub use cod::{CompileOnDemandLayer, ModuleHandle};
pub use compile::CompileLayer;
pub use lazy_emit::{LazyEmittingLayer, LazyHandle};
pub use object_linking::{ObjectHandle, ObjectLinkingLayer, PendingObject};

/// Symbol lookup shared by all layers.
pub trait JitLayer: Send + Sync {
    /// Opaque id of something added to this layer.
    type Handle: Copy + std::fmt::Debug;

    /// Searches everything added to the layer, in addition order.
    fn find_symbol(&self, name: &str, exported_only: bool) -> JitResult<Symbol>;

    /// Searches only what `handle` added.
    fn find_symbol_in(
        &self,
        handle: Self::Handle,
        name: &str,
        exported_only: bool,
    ) -> JitResult<Symbol>;
}

/// Resolves a mangled name imported by code being linked.
///
/// Returning an unresolved symbol is not an error; the linker decides.
pub trait SymbolResolver: Send + Sync {
    fn resolve(&self, mangled: &str) -> JitResult<Symbol>;
}

impl<F> SymbolResolver for F
where
    F: Fn(&str) -> JitResult<Symbol> + Send + Sync,
{
    fn resolve(&self, mangled: &str) -> JitResult<Symbol> {
        self(mangled)
    }
}
