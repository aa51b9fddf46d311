//! Compile-on-demand: per-function laziness on top of the lazy emitting layer.
//!
//! Adding a unit compiles nothing. The unit is split into
//!
//! - a **skeleton** (`<unit>$stubs`) holding every global plus one stub per
//!   function. A stub calls through a patchable [`CallSite`] that initially
//!   points at a trampoline.
//! - one **partition** unit per group chosen by the [`PartitionPolicy`],
//!   holding the real bodies and importing everything else by name.
//!
//! Lookups hand out stub addresses until a partition is compiled, then the
//! compiled addresses. The first call through a stub fires the trampoline,
//! which compiles the callee's partition, patches the call sites of every
//! member and forwards the call.

mod partition;
pub mod partitioner;


use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use lazyjit_config::PartitionPolicy;
use lazyjit_core::{
    CompilationUnit, Expr, ExternFunction, ExternGlobal, FunctionDef, JitError, JitResult, Mangler,
    Symbol, SymbolFlags,
};
use parking_lot::RwLock;
use tracing::{debug, info};

use self::partition::{Partition, PartitionMember};
pub use self::partition::PartitionState;
use super::{JitLayer, LazyEmittingLayer, LazyHandle, SymbolResolver};
use crate::callback::{CallSite, CallbackManager};

/// Identifies a logical unit added to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleHandle(usize);

impl ModuleHandle {
    pub fn index(self) -> usize {
        self.0
    }
}

struct StubbedFunction {
    partition: usize,
    arity: usize,
    flags: SymbolFlags,
}

/// The engine's view of one added unit: its skeleton, partitions and symbols.
struct LogicalUnit {
    name: String,
    skeleton: LazyHandle,
    functions: HashMap<String, StubbedFunction>,
    data: HashMap<String, SymbolFlags>,
    partitions: Vec<Arc<Partition>>,
}

impl LogicalUnit {
    fn find(&self, lazy: &LazyEmittingLayer, name: &str, exported_only: bool) -> JitResult<Symbol> {
        let flags = if let Some(function) = self.functions.get(name) {
            if let Some(address) = self.partitions[function.partition].resolved_address(name) {
                return Ok(visible(Symbol::new(address, function.flags), exported_only));
            }
            function.flags
        } else if let Some(&flags) = self.data.get(name) {
            flags
        } else {
            return Ok(Symbol::unresolved());
        };

        if exported_only && !flags.contains(SymbolFlags::EXPORTED) {
            return Ok(Symbol::unresolved());
        }
        let sym = lazy.find_symbol_in(self.skeleton, name, false)?;
        Ok(sym
            .address()
            .map(|address| Symbol::new(address, flags))
            .unwrap_or_default())
    }
}

fn visible(sym: Symbol, exported_only: bool) -> Symbol {
    if exported_only && !sym.is_exported() {
        Symbol::unresolved()
    } else {
        sym
    }
}

/// Serves the imports of a unit's skeleton and partitions: the unit's own
/// symbols first (internal ones included), then the engine-wide fallback.
struct UnitResolver {
    layer: Weak<CompileOnDemandLayer>,
    handle: ModuleHandle,
    fallback: Arc<dyn SymbolResolver>,
}

impl SymbolResolver for UnitResolver {
    fn resolve(&self, mangled: &str) -> JitResult<Symbol> {
        if let Some(layer) = self.layer.upgrade() {
            let local = layer.find_symbol_in(self.handle, mangled, false)?;
            if local.is_resolved() {
                return Ok(local);
            }
        }
        self.fallback.resolve(mangled)
    }
}

/// Top layer of the stack.
pub struct CompileOnDemandLayer {
    this: Weak<CompileOnDemandLayer>,
    lazy: Arc<LazyEmittingLayer>,
    callbacks: Arc<CallbackManager>,
    mangler: Arc<Mangler>,
    policy: PartitionPolicy,
    units: RwLock<BTreeMap<ModuleHandle, Arc<LogicalUnit>>>,
    next_handle: AtomicUsize,
}

impl CompileOnDemandLayer {
    pub fn new(
        lazy: Arc<LazyEmittingLayer>,
        callbacks: Arc<CallbackManager>,
        mangler: Arc<Mangler>,
        policy: PartitionPolicy,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            lazy,
            callbacks,
            mangler,
            policy,
            units: RwLock::new(BTreeMap::new()),
            next_handle: AtomicUsize::new(0),
        })
    }

    pub fn policy(&self) -> PartitionPolicy {
        self.policy
    }

    /// Registers `unit` for lazy compilation.
    ///
    /// Allocates a trampoline per function and registers the skeleton and
    /// partitions with the lazy layer; no code is generated for the unit.
    /// Imports that the unit does not define itself go to `fallback`.
    pub fn add_module(
        &self,
        unit: CompilationUnit,
        fallback: Arc<dyn SymbolResolver>,
    ) -> JitResult<ModuleHandle> {
        let handle = ModuleHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let resolver: Arc<dyn SymbolResolver> = Arc::new(UnitResolver {
            layer: self.this.clone(),
            handle,
            fallback,
        });

        let groups = partitioner::partition(&unit, self.policy);
        let mut partition_of = vec![0; unit.functions.len()];
        for (group_idx, group) in groups.iter().enumerate() {
            for &fn_idx in group {
                partition_of[fn_idx] = group_idx;
            }
        }

        // Trampolines and call sites first: the skeleton bakes in slot addresses.
        let mut call_sites = Vec::with_capacity(unit.functions.len());
        let mut trampolines = Vec::with_capacity(unit.functions.len());
        for function in &unit.functions {
            let trampoline = self.callbacks.allocate(function.arity)?;
            call_sites.push(CallSite::new(trampoline.address()));
            trampolines.push(trampoline);
        }

        let skeleton = skeleton_unit(&unit, &call_sites);
        let partition_units: Vec<CompilationUnit> = groups
            .iter()
            .map(|group| partition_unit(&unit, group))
            .collect();

        let mut functions = HashMap::with_capacity(unit.functions.len());
        for (idx, function) in unit.functions.iter().enumerate() {
            let mut flags = SymbolFlags::CALLABLE;
            if function.linkage.is_exported() {
                flags |= SymbolFlags::EXPORTED;
            }
            functions.insert(
                self.mangler.mangle(&function.name),
                StubbedFunction {
                    partition: partition_of[idx],
                    arity: function.arity,
                    flags,
                },
            );
        }
        let data = unit
            .globals
            .iter()
            .map(|g| {
                let flags = if g.linkage.is_exported() {
                    SymbolFlags::EXPORTED
                } else {
                    SymbolFlags::empty()
                };
                (self.mangler.mangle(&g.name), flags)
            })
            .collect();

        let skeleton = self.lazy.add_unit(skeleton, Arc::clone(&resolver));
        let mut partitions = Vec::with_capacity(groups.len());
        for (group, part_unit) in groups.iter().zip(partition_units) {
            let members = group
                .iter()
                .map(|&idx| PartitionMember {
                    mangled: self.mangler.mangle(&unit.functions[idx].name),
                    call_site: Arc::clone(&call_sites[idx]),
                })
                .collect();
            let name = part_unit.name.clone();
            let lazy_handle = self.lazy.add_unit(part_unit, Arc::clone(&resolver));
            partitions.push(Arc::new(Partition::new(name, lazy_handle, members)));
        }

        for (idx, trampoline) in trampolines.iter().enumerate() {
            let partition = Arc::clone(&partitions[partition_of[idx]]);
            let lazy = Arc::clone(&self.lazy);
            let mangled = self.mangler.mangle(&unit.functions[idx].name);
            self.callbacks.set_handler(
                trampoline.id(),
                Arc::new(move || {
                    let addresses = partition.materialize(&lazy)?;
                    addresses.get(&mangled).copied().ok_or_else(|| {
                        JitError::Internal(format!(
                            "partition '{}' has no address for '{mangled}'",
                            partition.name()
                        ))
                    })
                }),
            );
        }

        info!(
            event = "module_added",
            unit = %unit.name,
            functions = unit.functions.len(),
            partitions = partitions.len(),
            policy = ?self.policy,
        );
        self.units.write().insert(
            handle,
            Arc::new(LogicalUnit {
                name: unit.name,
                skeleton,
                functions,
                data,
                partitions,
            }),
        );
        Ok(handle)
    }

    /// Makes a unit unreachable for lookups. Its linked code stays mapped.
    pub fn remove_module(&self, handle: ModuleHandle) -> JitResult<()> {
        let unit = self
            .units
            .write()
            .remove(&handle)
            .ok_or(JitError::InvalidHandle(handle.0))?;
        debug!(unit = %unit.name, "module removed");
        Ok(())
    }

    fn unit(&self, handle: ModuleHandle) -> JitResult<Arc<LogicalUnit>> {
        self.units
            .read()
            .get(&handle)
            .cloned()
            .ok_or(JitError::InvalidHandle(handle.0))
    }

    /// Arity of the first exported function named `mangled`.
    pub fn function_arity(&self, mangled: &str) -> Option<usize> {
        self.units.read().values().find_map(|unit| {
            unit.functions
                .get(mangled)
                .filter(|f| f.flags.contains(SymbolFlags::EXPORTED))
                .map(|f| f.arity)
        })
    }

    pub fn unit_name(&self, handle: ModuleHandle) -> JitResult<String> {
        Ok(self.unit(handle)?.name.clone())
    }

    /// State of the partition containing `mangled` in unit `handle`.
    pub fn partition_state(&self, handle: ModuleHandle, mangled: &str) -> JitResult<Option<PartitionState>> {
        let unit = self.unit(handle)?;
        Ok(unit
            .functions
            .get(mangled)
            .map(|f| unit.partitions[f.partition].state()))
    }

    pub fn module_count(&self) -> usize {
        self.units.read().len()
    }

    pub fn partition_count(&self) -> usize {
        self.units.read().values().map(|u| u.partitions.len()).sum()
    }

    pub fn compiled_partition_count(&self) -> usize {
        self.units
            .read()
            .values()
            .flat_map(|u| u.partitions.iter())
            .filter(|p| p.state() == PartitionState::Resolved)
            .count()
    }
}

impl JitLayer for CompileOnDemandLayer {
    type Handle = ModuleHandle;

    fn find_symbol(&self, name: &str, exported_only: bool) -> JitResult<Symbol> {
        let units: Vec<Arc<LogicalUnit>> = self.units.read().values().cloned().collect();
        for unit in units {
            let sym = unit.find(&self.lazy, name, exported_only)?;
            if sym.is_resolved() {
                return Ok(sym);
            }
        }
        Ok(Symbol::unresolved())
    }

    fn find_symbol_in(
        &self,
        handle: ModuleHandle,
        name: &str,
        exported_only: bool,
    ) -> JitResult<Symbol> {
        self.unit(handle)?.find(&self.lazy, name, exported_only)
    }
}

// ---------------------------------------------------------------------------
// Unit splitting
// ---------------------------------------------------------------------------

/// Every global of `unit` plus a stub per function calling through its slot.
fn skeleton_unit(unit: &CompilationUnit, call_sites: &[Arc<CallSite>]) -> CompilationUnit {
    let mut skeleton = CompilationUnit::new(format!("{}$stubs", unit.name));
    skeleton.data_layout = unit.data_layout.clone();
    skeleton.globals = unit.globals.clone();
    skeleton.functions = unit
        .functions
        .iter()
        .zip(call_sites)
        .map(|(function, site)| {
            let args = (0..function.arity).map(Expr::param).collect();
            FunctionDef::new(
                function.name.clone(),
                function.arity,
                function.linkage,
                Expr::call_indirect(site.slot_address(), args),
            )
        })
        .collect();
    skeleton
}

/// The bodies of `group`, with every other referenced symbol declared external.
fn partition_unit(unit: &CompilationUnit, group: &[usize]) -> CompilationUnit {
    let names: Vec<&str> = group
        .iter()
        .map(|&idx| unit.functions[idx].name.as_str())
        .collect();
    let mut part = CompilationUnit::new(format!("{}${}", unit.name, names.join("+")));
    part.data_layout = unit.data_layout.clone();

    let mut callees = BTreeSet::new();
    let mut globals = BTreeSet::new();
    for &idx in group {
        let function = &unit.functions[idx];
        callees.extend(function.body.referenced_functions());
        globals.extend(function.body.referenced_globals());
        part.functions.push(function.clone());
    }

    part.extern_functions = callees
        .into_iter()
        .filter(|name| !names.contains(name))
        .filter_map(|name| {
            unit.arity_of(name).map(|arity| ExternFunction {
                name: name.to_string(),
                arity,
            })
        })
        .collect();
    part.extern_globals = globals
        .into_iter()
        .map(|name| ExternGlobal {
            name: name.to_string(),
        })
        .collect();
    part
}
