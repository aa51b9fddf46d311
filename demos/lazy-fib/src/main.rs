//! Builds a small program, runs its `main` through the lazy JIT and reports
//! how much of it was actually compiled.
//!
//! Usage: `lazy-fib [config.toml|config.yaml] [args...]`. The number of
//! arguments picks which Fibonacci number is computed.

use std::process::ExitCode;

use lazyjit::{CompilationUnit, Engine, Expr, FunctionDef, JitConfig, JitError};
use tracing::info;

fn program() -> CompilationUnit {
    let fib = FunctionDef::exported(
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
    );
    // Never called: stays a stub for the whole run.
    let unused = FunctionDef::exported(
        "square",
        1,
        Expr::mul(Expr::param(0), Expr::param(0)),
    );
    let main = FunctionDef::exported(
        "main",
        3,
        Expr::rem(
            Expr::call("fib", vec![Expr::add(Expr::param(0), Expr::int(20))]),
            Expr::int(256),
        ),
    );
    CompilationUnit::new("lazy_fib")
        .with_function(fib)
        .with_function(unused)
        .with_function(main)
}

fn run() -> Result<i32, JitError> {
    let mut args: Vec<String> = std::env::args().collect();
    let config = match args.get(1) {
        Some(path) if path.ends_with(".toml") || path.ends_with(".yaml") || path.ends_with(".yml") => {
            let loaded = if path.ends_with(".toml") {
                JitConfig::load(path)
            } else {
                JitConfig::from_yaml_file(path)
            };
            let config =
                loaded.map_err(|e| JitError::InvalidArgument(format!("config {path}: {e}")))?;
            args.remove(1);
            config
        }
        _ => JitConfig::default(),
    };

    let mut engine = Engine::builder().config(config).build()?;
    let handle = engine.add_module(program())?;

    let argv: Vec<&str> = args.iter().map(String::as_str).collect();
    let env: Vec<String> = std::env::vars().map(|(k, v)| format!("{k}={v}")).collect();
    let envp: Vec<&str> = env.iter().map(String::as_str).collect();
    let status = engine.run_main(&argv, &envp)?;

    let stats = engine.stats();
    info!(
        event = "demo_done",
        status,
        partitions = stats.partitions,
        partitions_compiled = stats.partitions_compiled,
        trampolines_fired = stats.trampolines_fired,
        "run complete"
    );
    println!(
        "exit status {status}: compiled {}/{} partitions, {} trampoline hits, square is {:?}",
        stats.partitions_compiled,
        stats.partitions,
        stats.trampolines_fired,
        engine.partition_state(handle, "square")?,
    );
    engine.teardown()?;
    Ok(status)
}

fn main() -> ExitCode {
    lazyjit::console::init();
    match run() {
        Ok(status) => ExitCode::from(status as u8),
        Err(err) => {
            eprintln!("lazy-fib: {err}");
            ExitCode::FAILURE
        }
    }
}
