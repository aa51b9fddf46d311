//! Sample compilation units.

use lazyjit_core::{CompilationUnit, Expr, FunctionDef, GlobalDef, Linkage};

/// `add(a, b) = a + b`, `main() = add(2, 3)`.
pub fn add_main(name: &str) -> CompilationUnit {
    CompilationUnit::new(name)
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

/// `count` exported functions `f0..f{count-1}` where `fi(x) = x + i`, plus
/// `main() = f{used}(10)`.
pub fn many_functions(name: &str, count: usize, used: usize) -> CompilationUnit {
    let mut unit = CompilationUnit::new(name);
    for i in 0..count {
        unit = unit.with_function(FunctionDef::exported(
            format!("f{i}"),
            1,
            Expr::add(Expr::param(0), Expr::int(i as i64)),
        ));
    }
    unit.with_function(FunctionDef::exported(
        "main",
        0,
        Expr::call(format!("f{used}"), vec![Expr::int(10)]),
    ))
}

/// Recursive `fact(n)`.
pub fn factorial(name: &str) -> CompilationUnit {
    CompilationUnit::new(name).with_function(FunctionDef::exported(
        "fact",
        1,
        Expr::if_then_else(
            Expr::le(Expr::param(0), Expr::int(1)),
            Expr::int(1),
            Expr::mul(
                Expr::param(0),
                Expr::call("fact", vec![Expr::sub(Expr::param(0), Expr::int(1))]),
            ),
        ),
    ))
}

/// Recursive `fib(n)` and `main() = fib(argc + 19)`, taking `(argc, argv, envp)`.
pub fn fibonacci(name: &str) -> CompilationUnit {
    CompilationUnit::new(name)
        .with_function(FunctionDef::exported(
            "fib",
            1,
            Expr::if_then_else(
                Expr::lt(Expr::param(0), Expr::int(2)),
                Expr::param(0),
                Expr::add(
                    Expr::call("fib", vec![Expr::sub(Expr::param(0), Expr::int(1))]),
                    Expr::call("fib", vec![Expr::sub(Expr::param(0), Expr::int(2))]),
                ),
            ),
        ))
        .with_function(FunctionDef::exported(
            "main",
            3,
            Expr::call("fib", vec![Expr::add(Expr::param(0), Expr::int(19))]),
        ))
}

/// Mutually recursive `is_even` / `is_odd`.
pub fn parity(name: &str) -> CompilationUnit {
    CompilationUnit::new(name)
        .with_function(FunctionDef::exported(
            "is_even",
            1,
            Expr::if_then_else(
                Expr::eq(Expr::param(0), Expr::int(0)),
                Expr::int(1),
                Expr::call("is_odd", vec![Expr::sub(Expr::param(0), Expr::int(1))]),
            ),
        ))
        .with_function(FunctionDef::exported(
            "is_odd",
            1,
            Expr::if_then_else(
                Expr::eq(Expr::param(0), Expr::int(0)),
                Expr::int(0),
                Expr::call("is_even", vec![Expr::sub(Expr::param(0), Expr::int(1))]),
            ),
        ))
}

/// `main()` calling an external function that nothing defines.
pub fn calls_missing(name: &str) -> CompilationUnit {
    CompilationUnit::new(name)
        .with_extern_function("missing_fn", 0)
        .with_function(FunctionDef::exported(
            "main",
            0,
            Expr::add(Expr::call("missing_fn", vec![]), Expr::int(1)),
        ))
}

/// Appends digit `digit` to the external cell `trace`: `trace = trace * 10 + digit`.
pub fn append_digit(digit: i64) -> Expr {
    Expr::store_global(
        "trace",
        Expr::add(
            Expr::mul(Expr::load_global("trace"), Expr::int(10)),
            Expr::int(digit),
        ),
    )
}

/// A unit whose destructor appends `digit` to the external cell `trace`.
pub fn traced_destructor(name: &str, digit: i64) -> CompilationUnit {
    CompilationUnit::new(name)
        .with_extern_global("trace")
        .with_function(FunctionDef::internal("fini", 0, append_digit(digit)))
        .with_destructor("fini")
}

/// A unit whose constructor sets its own `ready` global, read back by `status()`.
pub fn constructed(name: &str) -> CompilationUnit {
    CompilationUnit::new(name)
        .with_global(GlobalDef::new("ready", Linkage::Internal, 0))
        .with_function(FunctionDef::internal(
            "init",
            0,
            Expr::store_global("ready", Expr::int(7)),
        ))
        .with_function(FunctionDef::exported("status", 0, Expr::load_global("ready")))
        .with_constructor("init")
}
