//! The composition root.
//!
//! `Engine` owns the layer stack, the callback manager, the override registry
//! and the destructor runners of every added unit. Units go in through
//! [`Engine::add_module`]; code comes out through lookups and the `invoke`
//! helpers.

mod builder;
mod ctor_dtor;
mod resolver;


use std::ffi::{c_char, CString};
use std::sync::Arc;

use lazyjit_config::JitConfig;
use lazyjit_core::{
    CompilationUnit, DataLayout, JitError, JitResult, Mangler, Symbol, SymbolFlags,
};
use tracing::{error, info, warn};

pub use self::builder::EngineBuilder;
pub use self::ctor_dtor::CtorDtorRunner;
use self::resolver::FallbackResolver;
use crate::callback::{take_trampoline_error, CallbackManager};
use crate::layers::cod::PartitionState;
use crate::layers::{
    CompileOnDemandLayer, JitLayer, ModuleHandle, ObjectLinkingLayer, SymbolResolver,
};
use crate::overrides::RuntimeOverrides;

/// Most arguments [`Engine::invoke`] can pass.
pub const MAX_INVOKE_ARGS: usize = 6;

/// Counters describing how much work the engine has done.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub modules: usize,
    pub partitions: usize,
    pub partitions_compiled: usize,
    pub trampolines_fired: u64,
    pub objects_linked: usize,
    pub pending_cleanups: usize,
}

/// A lazy JIT over a stack of compile-on-demand layers.
pub struct Engine {
    config: JitConfig,
    data_layout: DataLayout,
    mangler: Arc<Mangler>,
    linker: Arc<ObjectLinkingLayer>,
    callbacks: Arc<CallbackManager>,
    cod: Arc<CompileOnDemandLayer>,
    overrides: Arc<RuntimeOverrides>,
    resolver: Arc<FallbackResolver>,
    dtor_runners: Vec<CtorDtorRunner<CompileOnDemandLayer>>,
    torn_down: bool,
}

impl Engine {
    /// Engine with default configuration, code generator and host lookup.
    pub fn new() -> JitResult<Self> {
        EngineBuilder::new().build()
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn config(&self) -> &JitConfig {
        &self.config
    }

    pub fn mangler(&self) -> &Mangler {
        &self.mangler
    }

    /// Layout of the host target; stamped into units that carry none.
    pub fn data_layout(&self) -> &DataLayout {
        &self.data_layout
    }

    /// Adds a unit and runs its static constructors.
    ///
    /// Nothing but the constructors (and what they call) is compiled. A unit
    /// that fails validation or targets a different layout is rejected before
    /// any engine state changes. If a constructor fails, the unit is removed
    /// again, exit-time cleanups its constructors registered are dropped, and
    /// the error returned.
    pub fn add_module(&mut self, mut unit: CompilationUnit) -> JitResult<ModuleHandle> {
        if self.torn_down {
            return Err(JitError::InvalidArgument(
                "engine has been torn down".to_string(),
            ));
        }
        let layout = unit
            .data_layout
            .get_or_insert_with(|| self.data_layout.clone());
        if !layout.is_compatible_with(&self.data_layout) {
            return Err(JitError::structural(
                &unit.name,
                format!(
                    "data layout of '{}' ({}-bit{}) does not match target '{}'",
                    layout.triple,
                    layout.pointer_bits,
                    if layout.big_endian { ", big-endian" } else { "" },
                    self.data_layout.triple
                ),
            ));
        }
        unit.validate()?;

        let ctor_names: Vec<String> = unit
            .constructor_names()
            .map(|name| self.mangler.mangle(name))
            .collect();
        let dtor_names: Vec<String> = unit
            .destructor_names()
            .map(|name| self.mangler.mangle(name))
            .collect();

        let fallback: Arc<dyn SymbolResolver> = self.resolver.clone();
        let handle = self.cod.add_module(unit, fallback)?;

        let cleanup_mark = self.overrides.pending_cleanups();
        let ctors = CtorDtorRunner::<CompileOnDemandLayer>::new(ctor_names, handle);
        if let Err(err) = ctors.run_via_layer(&self.cod) {
            warn!(handle = handle.index(), error = %err, "static constructor failed; module removed");
            self.overrides.discard_cleanups_after(cleanup_mark);
            self.cod.remove_module(handle)?;
            return Err(err);
        }
        self.dtor_runners.push(CtorDtorRunner::new(dtor_names, handle));
        Ok(handle)
    }

    /// Looks up an exported symbol across all units, in the order they were added.
    pub fn find_symbol(&self, name: &str) -> JitResult<Symbol> {
        self.cod.find_symbol(&self.mangler.mangle(name), true)
    }

    /// Looks up an exported symbol of one unit.
    pub fn find_symbol_in(&self, handle: ModuleHandle, name: &str) -> JitResult<Symbol> {
        self.cod.find_symbol_in(handle, &self.mangler.mangle(name), true)
    }

    /// Resolves `name` through the full chain JIT code links against:
    /// exported JIT symbols, then runtime overrides, then the host.
    pub fn resolve_symbol(&self, name: &str) -> JitResult<Symbol> {
        self.resolver.resolve(&self.mangler.mangle(name))
    }

    /// Calls an exported JIT function with up to six arguments.
    pub fn invoke(&self, name: &str, args: &[i64]) -> JitResult<i64> {
        let mangled = self.mangler.mangle(name);
        if let Some(arity) = self.cod.function_arity(&mangled) {
            if arity != args.len() {
                return Err(JitError::InvalidArgument(format!(
                    "'{name}' takes {arity} arguments, {} given",
                    args.len()
                )));
            }
        }
        let address = self.function_address(&mangled, name)?;

        // Drop anything left over from an earlier call on this thread.
        let _ = take_trampoline_error();
        // SAFETY: address is an exported JIT function of matching arity.
        let result = unsafe { call_with_args(address, args)? };
        match take_trampoline_error() {
            Some(err) => Err(err),
            None => Ok(result),
        }
    }

    /// Address of the exported function `mangled`; data symbols are rejected.
    fn function_address(&self, mangled: &str, name: &str) -> JitResult<u64> {
        let sym = self.cod.find_symbol(mangled, true)?;
        let address = sym.require(name)?;
        if !sym.flags().contains(SymbolFlags::CALLABLE) {
            return Err(JitError::InvalidArgument(format!(
                "'{name}' is a data symbol, not a function"
            )));
        }
        Ok(address)
    }

    /// Runs the configured entry point as `main(argc, argv, envp)` and returns
    /// its exit status.
    pub fn run_main(&self, args: &[&str], env: &[&str]) -> JitResult<i32> {
        let entry = self.config.entry_point.as_str();
        let mangled = self.mangler.mangle(entry);
        if let Some(arity) = self.cod.function_arity(&mangled) {
            if arity > 3 {
                return Err(JitError::InvalidArgument(format!(
                    "entry point '{entry}' takes {arity} arguments, at most 3 supported"
                )));
            }
        }
        let address = self.function_address(&mangled, entry)?;

        let argv_owned = to_c_strings(args)?;
        let env_owned = to_c_strings(env)?;
        let argv = null_terminated(&argv_owned);
        let envp = null_terminated(&env_owned);

        info!(entry = %entry, argc = args.len(), "running entry point");
        let _ = take_trampoline_error();
        // SAFETY: the C calling convention lets a callee ignore trailing
        // arguments, so any entry point of arity <= 3 accepts this call.
        let main: extern "C" fn(i64, i64, i64) -> i64 =
            unsafe { std::mem::transmute(address as usize as *const u8) };
        let status = main(
            args.len() as i64,
            argv.as_ptr() as usize as i64,
            envp.as_ptr() as usize as i64,
        );
        match take_trampoline_error() {
            Some(err) => Err(err),
            None => Ok(status as i32),
        }
    }

    /// Compilation state of the partition holding `name` in unit `handle`,
    /// or `None` if the unit defines no such function.
    pub fn partition_state(
        &self,
        handle: ModuleHandle,
        name: &str,
    ) -> JitResult<Option<PartitionState>> {
        self.cod.partition_state(handle, &self.mangler.mangle(name))
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            modules: self.cod.module_count(),
            partitions: self.cod.partition_count(),
            partitions_compiled: self.cod.compiled_partition_count(),
            trampolines_fired: self.callbacks.fired_count(),
            objects_linked: self.linker.object_count(),
            pending_cleanups: self.overrides.pending_cleanups(),
        }
    }

    /// Runs destructors of every unit, newest unit first, then the cleanups
    /// registered through `__cxa_atexit`.
    ///
    /// Runs once; later calls and `Drop` do nothing. A failing destructor is
    /// logged and the rest still run; the first failure is returned.
    pub fn teardown(&mut self) -> JitResult<()> {
        if self.torn_down {
            return Ok(());
        }
        self.torn_down = true;
        info!(
            event = "teardown",
            modules = self.dtor_runners.len(),
            cleanups = self.overrides.pending_cleanups(),
        );

        let mut first_error = None;
        for runner in self.dtor_runners.drain(..).rev() {
            if let Err(err) = runner.run_via_layer(&self.cod) {
                warn!(handle = runner.handle().index(), error = %err, "static destructor failed");
                first_error.get_or_insert(err);
            }
        }
        self.overrides.run_destructors();
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(err) = self.teardown() {
            error!(error = %err, "teardown failed");
        }
    }
}

fn to_c_strings(values: &[&str]) -> JitResult<Vec<CString>> {
    values
        .iter()
        .map(|v| {
            CString::new(*v)
                .map_err(|_| JitError::InvalidArgument(format!("argument contains NUL: {v:?}")))
        })
        .collect()
}

fn null_terminated(values: &[CString]) -> Vec<*const c_char> {
    values
        .iter()
        .map(|v| v.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect()
}

/// # Safety
///
/// `address` must be a function taking `args.len()` i64 parameters and
/// returning i64.
unsafe fn call_with_args(address: u64, args: &[i64]) -> JitResult<i64> {
    let ptr = address as usize as *const u8;
    let result = match *args {
        [] => {
            let f: extern "C" fn() -> i64 = std::mem::transmute(ptr);
            f()
        }
        [a] => {
            let f: extern "C" fn(i64) -> i64 = std::mem::transmute(ptr);
            f(a)
        }
        [a, b] => {
            let f: extern "C" fn(i64, i64) -> i64 = std::mem::transmute(ptr);
            f(a, b)
        }
        [a, b, c] => {
            let f: extern "C" fn(i64, i64, i64) -> i64 = std::mem::transmute(ptr);
            f(a, b, c)
        }
        [a, b, c, d] => {
            let f: extern "C" fn(i64, i64, i64, i64) -> i64 = std::mem::transmute(ptr);
            f(a, b, c, d)
        }
        [a, b, c, d, e] => {
            let f: extern "C" fn(i64, i64, i64, i64, i64) -> i64 = std::mem::transmute(ptr);
            f(a, b, c, d, e)
        }
        [a, b, c, d, e, g] => {
            let f: extern "C" fn(i64, i64, i64, i64, i64, i64) -> i64 = std::mem::transmute(ptr);
            f(a, b, c, d, e, g)
        }
        _ => {
            return Err(JitError::InvalidArgument(format!(
                "at most {MAX_INVOKE_ARGS} arguments supported, {} given",
                args.len()
            )))
        }
    };
    Ok(result)
}
