//! Compile callbacks and the trampolines that fire them.
//!
//! A trampoline is a tiny generated function with the same signature as the
//! function it stands in for. When called it asks the [`CallbackManager`] for
//! the real target (running the registered compile handler if needed) and
//! tail-forwards its arguments there.
//!
//! Errors raised while compiling cannot unwind through generated frames. The
//! callback instead parks the error in a thread-local slot and the trampoline
//! returns 0; the engine collects it with [`take_trampoline_error`] once
//! control is back in Rust.

mod call_site;


use std::cell::RefCell;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cranelift_codegen::ir::types::I64;
use cranelift_codegen::ir::{AbiParam, InstBuilder, UserFuncName};
use cranelift_codegen::isa::OwnedTargetIsa;
use cranelift_codegen::Context;
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{FuncId, Linkage, Module};
use lazyjit_core::{JitError, JitResult};
use parking_lot::{Mutex, RwLock};
use tracing::trace;

pub use self::call_site::CallSite;
use crate::codegen::int_signature;

const RESOLVE_SYMBOL: &str = "__lazyjit_resolve_trampoline";

/// Identifies one trampoline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrampolineId(u64);

impl TrampolineId {
    pub fn get(self) -> u64 {
        self.0
    }
}

/// A generated trampoline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trampoline {
    id: TrampolineId,
    address: u64,
    arity: usize,
}

impl Trampoline {
    pub fn id(&self) -> TrampolineId {
        self.id
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn arity(&self) -> usize {
        self.arity
    }
}

/// Produces the compiled address a trampoline should forward to.
pub type CompileHandler = Arc<dyn Fn() -> JitResult<u64> + Send + Sync>;

struct CallbackShared {
    handlers: RwLock<HashMap<TrampolineId, CompileHandler>>,
    fired: AtomicU64,
}

impl CallbackShared {
    fn fire(&self, id: TrampolineId) -> JitResult<u64> {
        let handler = self
            .handlers
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| JitError::Internal(format!("no compile handler for trampoline {}", id.0)))?;
        self.fired.fetch_add(1, Ordering::Relaxed);
        trace!(event = "trampoline_fired", trampoline = id.0);
        handler()
    }
}

struct TrampolineModule {
    module: JITModule,
    ctx: Context,
    builder_ctx: FunctionBuilderContext,
    resolve_fn: FuncId,
}

// SAFETY: the module is only reached through the manager's mutex.
unsafe impl Send for TrampolineModule {}

/// Allocates trampolines and dispatches their callbacks.
pub struct CallbackManager {
    shared: Arc<CallbackShared>,
    trampolines: Mutex<TrampolineModule>,
    next_id: AtomicU64,
}

impl CallbackManager {
    pub fn new(isa: OwnedTargetIsa) -> JitResult<Self> {
        let mut builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());
        builder.symbol(RESOLVE_SYMBOL, resolve_trampoline as *const u8);
        let mut module = JITModule::new(builder);

        let ptr_type = module.target_config().pointer_type();
        let mut sig = module.make_signature();
        sig.params.push(AbiParam::new(ptr_type));
        sig.params.push(AbiParam::new(I64));
        sig.returns.push(AbiParam::new(I64));
        let resolve_fn = module
            .declare_function(RESOLVE_SYMBOL, Linkage::Import, &sig)
            .map_err(|e| JitError::Internal(format!("declaring trampoline resolver: {e}")))?;

        let ctx = module.make_context();
        Ok(Self {
            shared: Arc::new(CallbackShared {
                handlers: RwLock::new(HashMap::new()),
                fired: AtomicU64::new(0),
            }),
            trampolines: Mutex::new(TrampolineModule {
                module,
                ctx,
                builder_ctx: FunctionBuilderContext::new(),
                resolve_fn,
            }),
            next_id: AtomicU64::new(0),
        })
    }

    /// Generates a trampoline for a function taking `arity` i64 arguments.
    ///
    /// Calling it before a handler is registered parks an error and returns 0.
    pub fn allocate(&self, arity: usize) -> JitResult<Trampoline> {
        let id = TrampolineId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut guard = self.trampolines.lock();
        let TrampolineModule {
            module,
            ctx,
            builder_ctx,
            resolve_fn,
        } = &mut *guard;

        let ptr_type = module.target_config().pointer_type();
        let sig = int_signature(module, arity);
        let name = format!("__lazyjit_trampoline_{}", id.0);
        let func_id = module
            .declare_function(&name, Linkage::Local, &sig)
            .map_err(|e| JitError::Internal(format!("declaring {name}: {e}")))?;
        ctx.func.signature = sig.clone();
        ctx.func.name = UserFuncName::user(0, func_id.as_u32());

        {
            let mut b = FunctionBuilder::new(&mut ctx.func, builder_ctx);
            let entry = b.create_block();
            b.append_block_params_for_function_params(entry);
            b.switch_to_block(entry);
            b.seal_block(entry);
            let args = b.block_params(entry).to_vec();

            // target = resolve(shared, id)
            let resolve = module.declare_func_in_func(*resolve_fn, b.func);
            let shared = b
                .ins()
                .iconst(ptr_type, Arc::as_ptr(&self.shared) as usize as i64);
            let id_value = b.ins().iconst(I64, id.0 as i64);
            let call = b.ins().call(resolve, &[shared, id_value]);
            let target = b.inst_results(call)[0];

            let forward = b.create_block();
            let failed = b.create_block();
            b.ins().brif(target, forward, &[], failed, &[]);

            b.switch_to_block(failed);
            b.seal_block(failed);
            let zero = b.ins().iconst(I64, 0);
            b.ins().return_(&[zero]);

            b.switch_to_block(forward);
            b.seal_block(forward);
            let sig_ref = b.import_signature(sig);
            let call = b.ins().call_indirect(sig_ref, target, &args);
            let results = b.inst_results(call).to_vec();
            b.ins().return_(&results);
            b.finalize();
        }

        module
            .define_function(func_id, ctx)
            .map_err(|e| JitError::Internal(format!("defining {name}: {e}")))?;
        module.clear_context(ctx);
        module
            .finalize_definitions()
            .map_err(|e| JitError::Internal(format!("finalizing {name}: {e}")))?;
        let address = module.get_finalized_function(func_id) as usize as u64;

        trace!(trampoline = id.0, arity, address = format_args!("{address:#x}"), "trampoline allocated");
        Ok(Trampoline { id, address, arity })
    }

    /// Installs the handler run when trampoline `id` is first called.
    pub fn set_handler(&self, id: TrampolineId, handler: CompileHandler) {
        self.shared.handlers.write().insert(id, handler);
    }

    /// Runs the handler for `id` directly, without going through generated code.
    pub fn fire(&self, id: TrampolineId) -> JitResult<u64> {
        self.shared.fire(id)
    }

    /// Total handler invocations so far.
    pub fn fired_count(&self) -> u64 {
        self.shared.fired.load(Ordering::Relaxed)
    }
}

thread_local! {
    static PARKED_ERROR: RefCell<Option<JitError>> = const { RefCell::new(None) };
}

/// Takes the error parked by a failed trampoline on this thread, if any.
pub fn take_trampoline_error() -> Option<JitError> {
    PARKED_ERROR.with(|slot| slot.borrow_mut().take())
}

// Keeps the first error: later ones are usually fallout from it.
fn park_error(err: JitError) {
    PARKED_ERROR.with(|slot| {
        let mut slot = slot.borrow_mut();
        if slot.is_none() {
            *slot = Some(err);
        }
    });
}

extern "C" fn resolve_trampoline(shared: *const CallbackShared, id: u64) -> u64 {
    // SAFETY: trampolines embed the address of the manager's shared state,
    // which the manager keeps alive for as long as its trampolines exist.
    let shared = unsafe { &*shared };
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| shared.fire(TrampolineId(id))));
    match outcome {
        Ok(Ok(address)) => address,
        Ok(Err(err)) => {
            park_error(err);
            0
        }
        Err(_) => {
            park_error(JitError::Internal(format!(
                "compile handler for trampoline {id} panicked"
            )));
            0
        }
    }
}
