//! Static constructors, destructors and exit-time cleanups.

use std::sync::Arc;

use lazyjit::{CompilationUnit, EngineBuilder, Expr, FunctionDef, HostSymbols, JitError};
use lazyjit_test::units::{self, append_digit};
use lazyjit_test::{CountingCodeGen, ProbeCell};

fn no_host() -> Arc<dyn HostSymbols> {
    Arc::new(std::collections::HashMap::<String, u64>::new())
}

#[test]
fn test_constructors_run_on_add() {
    let probe = Arc::new(CountingCodeGen::new());
    let mut engine = EngineBuilder::new()
        .code_generator(probe.clone())
        .build()
        .unwrap();
    engine.add_module(units::constructed("c")).unwrap();

    assert_eq!(probe.count("c$init"), 1);
    assert_eq!(probe.count("c$status"), 0);
    assert_eq!(engine.invoke("status", &[]).unwrap(), 7);
}

#[test]
fn test_destructors_run_in_reverse_add_order() {
    let trace = ProbeCell::new(0);
    {
        let mut engine = EngineBuilder::new()
            .runtime_override("trace", trace.as_ptr())
            .host_symbols(no_host())
            .build()
            .unwrap();
        engine.add_module(units::traced_destructor("a", 1)).unwrap();
        engine.add_module(units::traced_destructor("b", 2)).unwrap();
        engine.add_module(units::traced_destructor("c", 3)).unwrap();
        assert_eq!(trace.get(), 0, "destructors wait for teardown");
        engine.teardown().unwrap();
        assert_eq!(trace.get(), 321);
    }
    assert_eq!(trace.get(), 321, "drop after teardown runs nothing again");
}

#[test]
fn test_drop_tears_down() {
    let trace = ProbeCell::new(0);
    {
        let mut engine = EngineBuilder::new()
            .runtime_override("trace", trace.as_ptr())
            .host_symbols(no_host())
            .build()
            .unwrap();
        engine.add_module(units::traced_destructor("a", 4)).unwrap();
        engine.add_module(units::traced_destructor("b", 5)).unwrap();
    }
    assert_eq!(trace.get(), 54);
}

#[test]
fn test_destructors_within_a_unit_run_in_table_order() {
    let trace = ProbeCell::new(0);
    let unit = CompilationUnit::new("multi")
        .with_extern_global("trace")
        .with_function(FunctionDef::internal("first", 0, append_digit(1)))
        .with_function(FunctionDef::internal("second", 0, append_digit(2)))
        .with_destructor("first")
        .with_destructor("second");
    let mut engine = EngineBuilder::new()
        .runtime_override("trace", trace.as_ptr())
        .host_symbols(no_host())
        .build()
        .unwrap();
    engine.add_module(unit).unwrap();
    engine.teardown().unwrap();
    assert_eq!(trace.get(), 12);
}

#[test]
fn test_cxa_atexit_cleanups_run_after_destructors() {
    let trace = ProbeCell::new(0);
    let unit = CompilationUnit::new("atexit")
        .with_extern_function("__cxa_atexit", 3)
        .with_extern_global("__dso_handle")
        .with_extern_global("trace")
        .with_function(FunctionDef::internal(
            "cleanup",
            1,
            Expr::store_global(
                "trace",
                Expr::add(
                    Expr::mul(Expr::load_global("trace"), Expr::int(10)),
                    Expr::param(0),
                ),
            ),
        ))
        .with_function(FunctionDef::internal(
            "init",
            0,
            Expr::call(
                "__cxa_atexit",
                vec![
                    Expr::func_addr("cleanup"),
                    Expr::int(5),
                    Expr::global_addr("__dso_handle"),
                ],
            ),
        ))
        .with_function(FunctionDef::internal("fini", 0, append_digit(1)))
        .with_constructor("init")
        .with_destructor("fini");

    let mut engine = EngineBuilder::new()
        .runtime_override("trace", trace.as_ptr())
        .host_symbols(no_host())
        .build()
        .unwrap();
    engine.add_module(unit).unwrap();
    assert_eq!(engine.stats().pending_cleanups, 1);

    engine.teardown().unwrap();
    assert_eq!(trace.get(), 15);
    assert_eq!(engine.stats().pending_cleanups, 0);
}

#[test]
fn test_failing_constructor_rejects_module() {
    let unit = CompilationUnit::new("broken")
        .with_extern_function("missing_fn", 0)
        .with_function(FunctionDef::internal(
            "init",
            0,
            Expr::call("missing_fn", vec![]),
        ))
        .with_function(FunctionDef::exported("api", 0, Expr::int(1)))
        .with_constructor("init");
    let mut engine = EngineBuilder::new().host_symbols(no_host()).build().unwrap();

    let err = engine.add_module(unit).unwrap_err();
    assert!(matches!(err, JitError::UnresolvedSymbol(name) if name.ends_with("missing_fn")));
    assert_eq!(engine.stats().modules, 0);
    assert!(!engine.find_symbol("api").unwrap().is_resolved());
    engine.teardown().unwrap();
}

#[test]
fn test_failing_constructor_drops_earlier_cleanups() {
    let trace = ProbeCell::new(0);
    let unit = CompilationUnit::new("half_built")
        .with_extern_function("__cxa_atexit", 3)
        .with_extern_function("missing_fn", 0)
        .with_extern_global("__dso_handle")
        .with_extern_global("trace")
        .with_function(FunctionDef::internal("cleanup", 1, append_digit(9)))
        .with_function(FunctionDef::internal(
            "register",
            0,
            Expr::call(
                "__cxa_atexit",
                vec![
                    Expr::func_addr("cleanup"),
                    Expr::int(0),
                    Expr::global_addr("__dso_handle"),
                ],
            ),
        ))
        .with_function(FunctionDef::internal(
            "fail",
            0,
            Expr::call("missing_fn", vec![]),
        ))
        .with_constructor("register")
        .with_constructor("fail");

    let mut engine = EngineBuilder::new()
        .runtime_override("trace", trace.as_ptr())
        .host_symbols(no_host())
        .build()
        .unwrap();
    engine.add_module(units::traced_destructor("kept", 1)).unwrap();

    let err = engine.add_module(unit).unwrap_err();
    assert!(matches!(err, JitError::UnresolvedSymbol(name) if name.ends_with("missing_fn")));
    assert_eq!(engine.stats().pending_cleanups, 0);
    assert_eq!(engine.stats().modules, 1);

    engine.teardown().unwrap();
    assert_eq!(trace.get(), 1, "only the surviving unit's destructor ran");
}
