//! Resolved symbols as handed out by every layer.

use bitflags::bitflags;

bitflags! {
    /// Properties of a resolved symbol.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SymbolFlags: u8 {
        /// Visible to other units through the fallback chain.
        const EXPORTED = 0b0001;
        /// Address of executable code rather than data.
        const CALLABLE = 0b0010;
        /// Supplied by the runtime override registry.
        const OVERRIDE = 0b0100;
        /// Found in the host process symbol table.
        const HOST = 0b1000;
    }
}

/// The result of a symbol lookup.
///
/// `unresolved` is an ordinary value, not an error: lookups are speculative
/// and callers decide whether a miss is fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Symbol {
    address: Option<u64>,
    flags: SymbolFlags,
}

impl Symbol {
    pub fn new(address: u64, flags: SymbolFlags) -> Self {
        Self {
            address: Some(address),
            flags,
        }
    }

    pub fn unresolved() -> Self {
        Self::default()
    }

    pub fn address(&self) -> Option<u64> {
        self.address
    }

    pub fn flags(&self) -> SymbolFlags {
        self.flags
    }

    pub fn is_resolved(&self) -> bool {
        self.address.is_some()
    }

    pub fn is_exported(&self) -> bool {
        self.flags.contains(SymbolFlags::EXPORTED)
    }

    /// Returns the address, or `UnresolvedSymbol` naming `name`.
    ///
    /// For callers with a hard requirement on the symbol (constructor
    /// runners, entry points).
    pub fn require(&self, name: &str) -> crate::JitResult<u64> {
        self.address
            .ok_or_else(|| crate::JitError::UnresolvedSymbol(name.to_string()))
    }
}
