//! The three-tier fallback chain and name mangling.

use std::collections::HashMap;
use std::sync::Arc;

use lazyjit::{
    CompilationUnit, Engine, EngineBuilder, Expr, FunctionDef, HostSymbols, JitConfig, JitError,
    SymbolFlags,
};
use lazyjit_test::units;

extern "C" fn override_pick() -> i64 {
    2
}

extern "C" fn host_pick() -> i64 {
    3
}

extern "C" fn host_double(x: i64) -> i64 {
    x * 2
}

fn host_map(entries: &[(&str, u64)]) -> Arc<dyn HostSymbols> {
    let map: HashMap<String, u64> = entries
        .iter()
        .map(|(name, addr)| (name.to_string(), *addr))
        .collect();
    Arc::new(map)
}

fn uses_pick(name: &str) -> CompilationUnit {
    CompilationUnit::new(name)
        .with_extern_function("pick", 0)
        .with_function(FunctionDef::exported(
            "use_pick",
            0,
            Expr::call("pick", vec![]),
        ))
}

#[test]
fn test_jit_unit_beats_override() {
    let mut engine = EngineBuilder::new()
        .runtime_override("pick", override_pick as *const u8)
        .host_symbols(host_map(&[("pick", host_pick as *const () as usize as u64)]))
        .build()
        .unwrap();
    engine
        .add_module(
            CompilationUnit::new("provider")
                .with_function(FunctionDef::exported("pick", 0, Expr::int(1))),
        )
        .unwrap();
    engine.add_module(uses_pick("consumer")).unwrap();

    assert_eq!(engine.invoke("use_pick", &[]).unwrap(), 1);
    let resolved = engine.resolve_symbol("pick").unwrap();
    assert!(!resolved.flags().contains(SymbolFlags::OVERRIDE));
    assert_eq!(resolved, engine.find_symbol("pick").unwrap());
}

#[test]
fn test_override_beats_host() {
    let mut engine = EngineBuilder::new()
        .runtime_override("pick", override_pick as *const u8)
        .host_symbols(host_map(&[("pick", host_pick as *const () as usize as u64)]))
        .build()
        .unwrap();
    engine.add_module(uses_pick("consumer")).unwrap();

    assert_eq!(engine.invoke("use_pick", &[]).unwrap(), 2);
    assert!(engine
        .resolve_symbol("pick")
        .unwrap()
        .flags()
        .contains(SymbolFlags::OVERRIDE));
    // Overrides are link-time only; explicit lookups see JIT units alone.
    assert!(!engine.find_symbol("pick").unwrap().is_resolved());
}

#[test]
fn test_host_is_last_resort() {
    let mut engine = EngineBuilder::new()
        .host_symbols(host_map(&[("pick", host_pick as *const () as usize as u64)]))
        .build()
        .unwrap();
    engine.add_module(uses_pick("consumer")).unwrap();

    assert_eq!(engine.invoke("use_pick", &[]).unwrap(), 3);
    assert!(engine
        .resolve_symbol("pick")
        .unwrap()
        .flags()
        .contains(SymbolFlags::HOST));
}

#[test]
fn test_host_tier_can_be_disabled() {
    let mut engine = EngineBuilder::new()
        .config(JitConfig::default().with_host_symbols(false))
        .host_symbols(host_map(&[("pick", host_pick as *const () as usize as u64)]))
        .build()
        .unwrap();
    engine.add_module(uses_pick("consumer")).unwrap();

    let err = engine.invoke("use_pick", &[]).unwrap_err();
    assert!(matches!(err, JitError::UnresolvedSymbol(name) if name.ends_with("pick")));
}

#[test]
fn test_host_function_with_arguments() {
    let mut engine = EngineBuilder::new()
        .host_symbols(host_map(&[("double_it", host_double as *const () as usize as u64)]))
        .build()
        .unwrap();
    engine
        .add_module(
            CompilationUnit::new("u")
                .with_extern_function("double_it", 1)
                .with_function(FunctionDef::exported(
                    "f",
                    1,
                    Expr::add(Expr::call("double_it", vec![Expr::param(0)]), Expr::int(1)),
                )),
        )
        .unwrap();
    assert_eq!(engine.invoke("f", &[20]).unwrap(), 41);
}

#[cfg(unix)]
#[test]
fn test_process_symbols_resolve_libc() {
    let mut engine = Engine::new().unwrap();
    engine
        .add_module(
            CompilationUnit::new("libc_user")
                .with_extern_function("labs", 1)
                .with_function(FunctionDef::exported(
                    "abs_of",
                    1,
                    Expr::call("labs", vec![Expr::param(0)]),
                )),
        )
        .unwrap();
    assert_eq!(engine.invoke("abs_of", &[-5]).unwrap(), 5);
}

#[test]
fn test_missing_symbol_fails_at_invocation_not_add() {
    let mut engine = EngineBuilder::new()
        .host_symbols(host_map(&[]))
        .build()
        .unwrap();
    engine.add_module(units::calls_missing("m")).unwrap();

    assert!(!engine.find_symbol("missing_fn").unwrap().is_resolved());
    assert!(engine.find_symbol("main").unwrap().is_resolved());

    for _ in 0..2 {
        let err = engine.invoke("main", &[]).unwrap_err();
        assert!(
            matches!(&err, JitError::UnresolvedSymbol(name) if name.ends_with("missing_fn")),
            "unexpected error: {err}"
        );
    }
    assert_eq!(engine.stats().partitions_compiled, 0);
}

#[test]
fn test_failed_callee_used_as_divisor_reports_error() {
    let mut engine = EngineBuilder::new()
        .host_symbols(host_map(&[]))
        .build()
        .unwrap();
    engine
        .add_module(
            CompilationUnit::new("divides")
                .with_extern_function("missing_fn", 0)
                .with_function(FunctionDef::internal(
                    "helper",
                    0,
                    Expr::call("missing_fn", vec![]),
                ))
                .with_function(FunctionDef::exported(
                    "main",
                    0,
                    Expr::div(Expr::int(10), Expr::call("helper", vec![])),
                )),
        )
        .unwrap();

    let err = engine.invoke("main", &[]).unwrap_err();
    assert!(
        matches!(&err, JitError::UnresolvedSymbol(name) if name.ends_with("missing_fn")),
        "unexpected error: {err}"
    );
}

#[test]
fn test_internal_symbols_do_not_cross_units() {
    let mut engine = EngineBuilder::new()
        .host_symbols(host_map(&[]))
        .build()
        .unwrap();
    engine
        .add_module(
            CompilationUnit::new("owner")
                .with_function(FunctionDef::internal("helper", 0, Expr::int(9)))
                .with_function(FunctionDef::exported(
                    "wrapped",
                    0,
                    Expr::call("helper", vec![]),
                )),
        )
        .unwrap();
    engine
        .add_module(
            CompilationUnit::new("outsider")
                .with_extern_function("helper", 0)
                .with_function(FunctionDef::exported(
                    "peek",
                    0,
                    Expr::call("helper", vec![]),
                )),
        )
        .unwrap();

    assert_eq!(engine.invoke("wrapped", &[]).unwrap(), 9);
    assert!(!engine.find_symbol("helper").unwrap().is_resolved());
    assert!(matches!(
        engine.invoke("peek", &[]),
        Err(JitError::UnresolvedSymbol(_))
    ));
}

#[test]
fn test_first_added_unit_wins() {
    let mut engine = Engine::new().unwrap();
    let first = engine
        .add_module(
            CompilationUnit::new("first")
                .with_function(FunctionDef::exported("answer", 0, Expr::int(42))),
        )
        .unwrap();
    let second = engine
        .add_module(
            CompilationUnit::new("second")
                .with_function(FunctionDef::exported("answer", 0, Expr::int(43))),
        )
        .unwrap();

    assert_eq!(engine.invoke("answer", &[]).unwrap(), 42);
    assert_eq!(
        engine.find_symbol("answer").unwrap(),
        engine.find_symbol_in(first, "answer").unwrap()
    );
    assert_ne!(
        engine.find_symbol_in(first, "answer").unwrap(),
        engine.find_symbol_in(second, "answer").unwrap()
    );
}

#[test]
fn test_lookups_mangle_consistently() {
    let mut engine = Engine::new().unwrap();
    engine.add_module(units::add_main("demo")).unwrap();

    let by_logical = engine.find_symbol("add").unwrap();
    let verbatim = format!("\u{1}{}", engine.mangler().mangle("add"));
    let by_verbatim = engine.find_symbol(&verbatim).unwrap();
    assert!(by_logical.is_resolved());
    assert_eq!(by_logical, by_verbatim);

    let mangler = engine.mangler();
    assert_eq!(mangler.mangle("add"), mangler.mangle("add"));
    assert_eq!(mangler.host_name(&mangler.mangle("add")), "add");
}
