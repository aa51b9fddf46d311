use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cranelift_jit::JITModule;
use lazyjit_config::JitConfig;
use lazyjit_core::{CompilationUnit, Expr, FunctionDef, JitError, JitResult, Mangler, Symbol};
use parking_lot::Mutex;

use super::{CompileLayer, JitLayer, LazyEmittingLayer, ObjectLinkingLayer, SymbolResolver};
use crate::codegen::{CodeGenerator, CraneliftCodeGen, ObjectCode};
use crate::target::Target;

/// Counts compiles per unit; optionally slow, optionally failing once.
#[derive(Default)]
struct ProbeCodeGen {
    counts: Mutex<HashMap<String, usize>>,
    delay: Option<Duration>,
    fail_next: AtomicBool,
}

impl ProbeCodeGen {
    fn count(&self, unit: &str) -> usize {
        self.counts.lock().get(unit).copied().unwrap_or(0)
    }
}

impl CodeGenerator for ProbeCodeGen {
    fn compile(
        &self,
        unit: &CompilationUnit,
        mangler: &Mangler,
        module: &mut JITModule,
    ) -> JitResult<ObjectCode> {
        *self.counts.lock().entry(unit.name.clone()).or_default() += 1;
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(JitError::structural(&unit.name, "injected failure"));
        }
        CraneliftCodeGen.compile(unit, mangler, module)
    }
}

fn lazy_layer(probe: Arc<ProbeCodeGen>) -> LazyEmittingLayer {
    let target = Target::native(&JitConfig::default()).expect("native target");
    let mangler = Arc::new(Mangler::undecorated());
    let compile = CompileLayer::new(
        probe,
        Arc::new(ObjectLinkingLayer::new(target.isa())),
        Arc::clone(&mangler),
    );
    LazyEmittingLayer::new(Arc::new(compile), mangler)
}

fn no_imports() -> Arc<dyn SymbolResolver> {
    Arc::new(|_: &str| -> JitResult<Symbol> { Ok(Symbol::unresolved()) })
}

fn sample_unit(name: &str) -> CompilationUnit {
    CompilationUnit::new(name)
        .with_function(FunctionDef::exported("answer", 0, Expr::int(42)))
        .with_function(FunctionDef::internal("secret", 0, Expr::int(7)))
}

#[test]
fn test_registration_compiles_nothing() {
    let probe = Arc::new(ProbeCodeGen::default());
    let layer = lazy_layer(Arc::clone(&probe));
    let handle = layer.add_unit(sample_unit("u"), no_imports());

    assert_eq!(probe.count("u"), 0);
    assert!(!layer.is_emitted(handle).unwrap());

    // A miss is answered from the precomputed table.
    assert!(!layer.find_symbol("nothing", false).unwrap().is_resolved());
    assert_eq!(probe.count("u"), 0);
}

#[test]
fn test_first_hit_emits_once() {
    let probe = Arc::new(ProbeCodeGen::default());
    let layer = lazy_layer(Arc::clone(&probe));
    let handle = layer.add_unit(sample_unit("u"), no_imports());

    let first = layer.find_symbol_in(handle, "answer", true).unwrap();
    let second = layer.find_symbol("answer", true).unwrap();
    assert!(first.is_resolved());
    assert_eq!(first, second);
    assert_eq!(probe.count("u"), 1);
    assert!(layer.is_emitted(handle).unwrap());
}

#[test]
fn test_exported_only_does_not_emit_for_internal() {
    let probe = Arc::new(ProbeCodeGen::default());
    let layer = lazy_layer(Arc::clone(&probe));
    let handle = layer.add_unit(sample_unit("u"), no_imports());

    assert!(!layer.find_symbol_in(handle, "secret", true).unwrap().is_resolved());
    assert_eq!(probe.count("u"), 0);
    assert!(layer.find_symbol_in(handle, "secret", false).unwrap().is_resolved());
    assert_eq!(probe.count("u"), 1);
}

#[test]
fn test_failed_emission_is_retried() {
    let probe = Arc::new(ProbeCodeGen::default());
    probe.fail_next.store(true, Ordering::SeqCst);
    let layer = lazy_layer(Arc::clone(&probe));
    let handle = layer.add_unit(sample_unit("u"), no_imports());

    let err = layer.find_symbol_in(handle, "answer", true).unwrap_err();
    assert!(matches!(err, JitError::StructuralCompile { .. }));
    assert!(!layer.is_emitted(handle).unwrap());

    assert!(layer.find_symbol_in(handle, "answer", true).unwrap().is_resolved());
    assert_eq!(probe.count("u"), 2);
}

#[test]
fn test_concurrent_lookups_emit_once() {
    let probe = Arc::new(ProbeCodeGen {
        delay: Some(Duration::from_millis(50)),
        ..ProbeCodeGen::default()
    });
    let layer = lazy_layer(Arc::clone(&probe));
    let handle = layer.add_unit(sample_unit("u"), no_imports());

    let addresses: Vec<u64> = thread::scope(|s| {
        let workers: Vec<_> = (0..8)
            .map(|_| {
                s.spawn(|| {
                    layer
                        .find_symbol_in(handle, "answer", true)
                        .unwrap()
                        .address()
                        .unwrap()
                })
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    assert!(addresses.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(probe.count("u"), 1);
}

#[test]
fn test_invalid_handle() {
    let layer = lazy_layer(Arc::new(ProbeCodeGen::default()));
    let other = lazy_layer(Arc::new(ProbeCodeGen::default()));
    let handle = other.add_unit(sample_unit("u"), no_imports());

    assert_eq!(
        layer.find_symbol_in(handle, "answer", true).unwrap_err(),
        JitError::InvalidHandle(0)
    );
}

#[test]
fn test_units_searched_in_addition_order() {
    let probe = Arc::new(ProbeCodeGen::default());
    let layer = lazy_layer(Arc::clone(&probe));
    let first = layer.add_unit(sample_unit("first"), no_imports());
    layer.add_unit(sample_unit("second"), no_imports());

    let found = layer.find_symbol("answer", true).unwrap();
    assert_eq!(found, layer.find_symbol_in(first, "answer", true).unwrap());
    assert_eq!(probe.count("first"), 1);
    assert_eq!(probe.count("second"), 0);
}
