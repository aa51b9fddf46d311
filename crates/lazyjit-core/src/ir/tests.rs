//! Tests for IR construction and validation.

use super::*;
use crate::JitError;

fn add_unit() -> CompilationUnit {
    CompilationUnit::new("arith")
        .with_function(FunctionDef::exported(
            "add",
            2,
            Expr::add(Expr::param(0), Expr::param(1)),
        ))
        .with_function(FunctionDef::exported(
            "main",
            0,
            Expr::call("add", vec![Expr::int(2), Expr::int(3)]),
        ))
}

fn reason(err: JitError) -> String {
    match err {
        JitError::StructuralCompile { reason, .. } => reason,
        other => panic!("expected structural error, got {other:?}"),
    }
}

#[test]
fn test_valid_unit_passes() {
    assert!(add_unit().validate().is_ok());
}

#[test]
fn test_duplicate_names_rejected() {
    let unit = add_unit().with_global(GlobalDef::new("add", Linkage::Export, 0));
    assert!(reason(unit.validate().unwrap_err()).contains("more than once"));
}

#[test]
fn test_unknown_callee_rejected() {
    let unit = CompilationUnit::new("u").with_function(FunctionDef::exported(
        "main",
        0,
        Expr::call("missing_fn", vec![]),
    ));
    assert!(reason(unit.validate().unwrap_err()).contains("unknown 'missing_fn'"));
}

#[test]
fn test_declared_extern_is_accepted() {
    let unit = CompilationUnit::new("u")
        .with_extern_function("missing_fn", 0)
        .with_function(FunctionDef::exported(
            "main",
            0,
            Expr::call("missing_fn", vec![]),
        ));
    assert!(unit.validate().is_ok());
}

#[test]
fn test_wrong_arity_rejected() {
    let unit = add_unit().with_function(FunctionDef::exported(
        "bad",
        0,
        Expr::call("add", vec![Expr::int(1)]),
    ));
    assert!(reason(unit.validate().unwrap_err()).contains("expected 2"));
}

#[test]
fn test_param_out_of_range_rejected() {
    let unit = CompilationUnit::new("u")
        .with_function(FunctionDef::exported("f", 1, Expr::param(1)));
    assert!(unit.validate().is_err());
}

#[test]
fn test_unknown_global_rejected() {
    let unit = CompilationUnit::new("u").with_function(FunctionDef::exported(
        "f",
        0,
        Expr::store_global("counter", Expr::int(1)),
    ));
    assert!(reason(unit.validate().unwrap_err()).contains("counter"));
}

#[test]
fn test_constructor_must_be_nullary_definition() {
    let unit = add_unit().with_constructor("add");
    assert!(reason(unit.validate().unwrap_err()).contains("no arguments"));

    let unit = add_unit().with_destructor("nowhere");
    assert!(reason(unit.validate().unwrap_err()).contains("not defined"));
}

#[test]
fn test_referenced_symbols() {
    let body = Expr::seq(vec![
        Expr::store_global("g", Expr::call("f", vec![Expr::func_addr("h")])),
        Expr::load_global("k"),
    ]);
    assert_eq!(body.referenced_functions(), vec!["f", "h"]);
    assert_eq!(body.referenced_globals(), vec!["g", "k"]);
}

#[test]
fn test_layout_compatibility() {
    let host = DataLayout {
        triple: "x86_64-unknown-linux-gnu".into(),
        pointer_bits: 64,
        big_endian: false,
    };
    let narrow = DataLayout {
        pointer_bits: 32,
        ..host.clone()
    };
    assert!(host.is_compatible_with(&host));
    assert!(!narrow.is_compatible_with(&host));
}
