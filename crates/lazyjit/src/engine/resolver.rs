use std::sync::{Arc, Weak};

use lazyjit_core::{JitResult, Mangler, Symbol, SymbolFlags};
use tracing::trace;

use crate::host::HostSymbols;
use crate::layers::{CompileOnDemandLayer, JitLayer, SymbolResolver};
use crate::overrides::RuntimeOverrides;

/// The engine-wide resolution chain: JIT units, then overrides, then host.
pub(crate) struct FallbackResolver {
    cod: Weak<CompileOnDemandLayer>,
    overrides: Arc<RuntimeOverrides>,
    host: Option<Arc<dyn HostSymbols>>,
    mangler: Arc<Mangler>,
}

impl FallbackResolver {
    pub fn new(
        cod: Weak<CompileOnDemandLayer>,
        overrides: Arc<RuntimeOverrides>,
        host: Option<Arc<dyn HostSymbols>>,
        mangler: Arc<Mangler>,
    ) -> Self {
        Self {
            cod,
            overrides,
            host,
            mangler,
        }
    }
}

impl SymbolResolver for FallbackResolver {
    fn resolve(&self, mangled: &str) -> JitResult<Symbol> {
        if let Some(cod) = self.cod.upgrade() {
            let sym = cod.find_symbol(mangled, true)?;
            if sym.is_resolved() {
                trace!(symbol = %mangled, tier = "jit", "symbol resolved");
                return Ok(sym);
            }
        }

        let sym = self.overrides.search(mangled);
        if sym.is_resolved() {
            trace!(symbol = %mangled, tier = "override", "symbol resolved");
            return Ok(sym);
        }

        if let Some(host) = &self.host {
            if let Some(address) = host.lookup(self.mangler.host_name(mangled)) {
                trace!(symbol = %mangled, tier = "host", "symbol resolved");
                return Ok(Symbol::new(
                    address,
                    SymbolFlags::EXPORTED | SymbolFlags::HOST,
                ));
            }
        }

        trace!(symbol = %mangled, "symbol unresolved");
        Ok(Symbol::unresolved())
    }
}
