//! Colorful console output for engine lifecycle events.
//!
//! Provides a custom `tracing` layer that formats lazyjit events with colors.
//!
//! ## Log Levels
//!
//! - **INFO**: Lifecycle events (engine ready, module added, teardown)
//! - **DEBUG**: Partition compiles, object links, static initializers
//! - **TRACE**: Trampoline firing and symbol resolution

use owo_colors::OwoColorize;
use std::io::{self, Write};
use std::sync::OnceLock;
use std::time::Instant;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

static INIT: OnceLock<()> = OnceLock::new();
static EPOCH: OnceLock<Instant> = OnceLock::new();

const DEFAULT_DIRECTIVE: &str = "lazyjit=info";

/// Initializes console output.
///
/// Safe to call multiple times - only the first call has effect. The filter
/// honours `RUST_LOG` and defaults to `lazyjit=info`.
pub fn init() {
    INIT.get_or_init(|| {
        EPOCH.get_or_init(Instant::now);
        let filter = match DEFAULT_DIRECTIVE.parse() {
            Ok(directive) => EnvFilter::builder()
                .with_default_directive(directive)
                .from_env_lossy(),
            Err(_) => EnvFilter::from_default_env(),
        };

        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(JitConsoleLayer)
            .try_init();
    });
}

fn elapsed_secs() -> f64 {
    EPOCH
        .get()
        .map(|epoch| epoch.elapsed().as_secs_f64())
        .unwrap_or(0.0)
}

/// A tracing layer that formats engine events with colors.
pub struct JitConsoleLayer;

impl<S: Subscriber> Layer<S> for JitConsoleLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if !metadata.target().starts_with("lazyjit") {
            return;
        }

        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);

        let output = format_event(&visitor, *metadata.level());
        if !output.is_empty() {
            let _ = writeln!(io::stdout(), "{}", output);
        }
    }
}

#[derive(Default)]
struct EventVisitor {
    event: Option<String>,
    message: Option<String>,
    unit: Option<String>,
    partition: Option<String>,
    function: Option<String>,
    triple: Option<String>,
    policy: Option<String>,
    error: Option<String>,
    functions: Option<u64>,
    partitions: Option<u64>,
    symbols: Option<u64>,
    imports: Option<u64>,
    modules: Option<u64>,
    cleanups: Option<u64>,
    trampoline: Option<u64>,
}

impl Visit for EventVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let s = format!("{:?}", value);
        let s = s.trim_matches('"').to_string();
        match field.name() {
            "event" => self.event = Some(s),
            "message" => self.message = Some(s),
            "unit" => self.unit = Some(s),
            "partition" => self.partition = Some(s),
            "function" => self.function = Some(s),
            "triple" => self.triple = Some(s),
            "policy" => self.policy = Some(s),
            "error" => self.error = Some(s),
            _ => {}
        }
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        match field.name() {
            "functions" => self.functions = Some(value),
            "partitions" => self.partitions = Some(value),
            "symbols" => self.symbols = Some(value),
            "imports" => self.imports = Some(value),
            "modules" => self.modules = Some(value),
            "cleanups" => self.cleanups = Some(value),
            "trampoline" => self.trampoline = Some(value),
            _ => {}
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.record_u64(field, value as u64);
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.record_debug(field, &value);
    }
}

fn format_event(v: &EventVisitor, level: Level) -> String {
    match v.event.as_deref() {
        Some("engine_ready") => format_engine_ready(v),
        Some("module_added") => format_module_added(v),
        Some("partition_compiled") => format_partition_compiled(v),
        Some("object_linked") => format_object_linked(v),
        Some("static_init_run") => format_static_init(v),
        Some("trampoline_fired") => format_trampoline(v),
        Some("teardown") => format_teardown(v),
        _ if level <= Level::WARN => format_problem(v, level),
        _ => String::new(),
    }
}

fn format_elapsed() -> String {
    format!("{:>7.3}s", elapsed_secs())
        .bright_black()
        .to_string()
}

fn format_engine_ready(v: &EventVisitor) -> String {
    format!(
        "{} {} Engine ready │ {} │ {} partitions",
        format_elapsed(),
        "▶".bright_green().bold(),
        v.triple.as_deref().unwrap_or("unknown").bright_yellow(),
        v.policy.as_deref().unwrap_or("?").bright_magenta(),
    )
}

fn format_module_added(v: &EventVisitor) -> String {
    format!(
        "{} {} Module {} │ {} functions │ {} partitions",
        format_elapsed(),
        "+".bright_blue().bold(),
        v.unit.as_deref().unwrap_or("?").white().bold(),
        v.functions.unwrap_or(0).bright_yellow(),
        v.partitions.unwrap_or(0).bright_yellow(),
    )
}

fn format_partition_compiled(v: &EventVisitor) -> String {
    format!(
        "{} {} Compiled {} │ {} functions",
        format_elapsed(),
        "⚡".bright_cyan(),
        v.partition.as_deref().unwrap_or("?").bright_magenta(),
        v.functions.unwrap_or(0),
    )
}

fn format_object_linked(v: &EventVisitor) -> String {
    format!(
        "{} {} Linked {} │ {} symbols │ {} imports",
        format_elapsed(),
        "↳".bright_black(),
        v.unit.as_deref().unwrap_or("?").white(),
        v.symbols.unwrap_or(0),
        v.imports.unwrap_or(0),
    )
}

fn format_static_init(v: &EventVisitor) -> String {
    format!(
        "{} {} Static initializer {}",
        format_elapsed(),
        "•".bright_green(),
        v.function.as_deref().unwrap_or("?").white(),
    )
}

fn format_trampoline(v: &EventVisitor) -> String {
    format!(
        "{} {} Trampoline {}",
        format_elapsed(),
        "→".bright_black(),
        v.trampoline.unwrap_or(0).bright_black(),
    )
}

fn format_teardown(v: &EventVisitor) -> String {
    format!(
        "{} {} Teardown │ {} modules │ {} exit cleanups",
        format_elapsed(),
        "■".bright_cyan().bold(),
        v.modules.unwrap_or(0).bright_yellow(),
        v.cleanups.unwrap_or(0).bright_yellow(),
    )
}

fn format_problem(v: &EventVisitor, level: Level) -> String {
    let icon = if level == Level::ERROR {
        "✗".bright_red().bold().to_string()
    } else {
        "!".yellow().bold().to_string()
    };
    let mut output = format!(
        "{} {} {}",
        format_elapsed(),
        icon,
        v.message.as_deref().unwrap_or("")
    );
    if let Some(ref error) = v.error {
        output.push_str(&format!(" │ {}", error.bright_red()));
    }
    output
}
