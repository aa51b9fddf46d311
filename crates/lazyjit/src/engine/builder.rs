use std::sync::Arc;

use lazyjit_config::JitConfig;
use lazyjit_core::JitResult;
use tracing::info;

use super::resolver::FallbackResolver;
use super::Engine;
use crate::callback::CallbackManager;
use crate::codegen::{CodeGenerator, CraneliftCodeGen};
use crate::host::{HostSymbols, ProcessSymbols};
use crate::layers::{CompileLayer, CompileOnDemandLayer, LazyEmittingLayer, ObjectLinkingLayer};
use crate::overrides::RuntimeOverrides;
use crate::target::Target;

/// Builder for [`Engine`].
///
/// # Example
///
/// ```no_run
/// use lazyjit::{EngineBuilder, JitConfig, PartitionPolicy};
///
/// let engine = EngineBuilder::new()
///     .config(JitConfig::default().with_partition_policy(PartitionPolicy::StronglyConnected))
///     .build()
///     .unwrap();
/// ```
#[derive(Default)]
pub struct EngineBuilder {
    config: JitConfig,
    code_generator: Option<Arc<dyn CodeGenerator>>,
    host_symbols: Option<Arc<dyn HostSymbols>>,
    overrides: Vec<(String, u64)>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: JitConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the default Cranelift code generator.
    pub fn code_generator(mut self, code_generator: Arc<dyn CodeGenerator>) -> Self {
        self.code_generator = Some(code_generator);
        self
    }

    /// Replaces the process symbol table as the last resolution tier.
    ///
    /// Ignored when `host_symbols` is disabled in the config.
    pub fn host_symbols(mut self, host: Arc<dyn HostSymbols>) -> Self {
        self.host_symbols = Some(host);
        self
    }

    /// Supplies `address` for the logical name `name` ahead of the host.
    pub fn runtime_override(mut self, name: impl Into<String>, address: *const u8) -> Self {
        self.overrides.push((name.into(), address as usize as u64));
        self
    }

    pub fn build(self) -> JitResult<Engine> {
        let target = Target::native(&self.config)?;
        let mangler = Arc::new(target.mangler());
        let isa = target.isa();

        let linker = Arc::new(ObjectLinkingLayer::new(isa.clone()));
        let code_generator = self
            .code_generator
            .unwrap_or_else(|| Arc::new(CraneliftCodeGen::new()) as Arc<dyn CodeGenerator>);
        let compile = Arc::new(CompileLayer::new(
            code_generator,
            Arc::clone(&linker),
            Arc::clone(&mangler),
        ));
        let lazy = Arc::new(LazyEmittingLayer::new(compile, Arc::clone(&mangler)));
        let callbacks = Arc::new(CallbackManager::new(isa)?);
        let cod = CompileOnDemandLayer::new(
            lazy,
            Arc::clone(&callbacks),
            Arc::clone(&mangler),
            self.config.partition_policy,
        );

        let mut overrides = RuntimeOverrides::new(&mangler);
        for (name, address) in &self.overrides {
            overrides.insert(&mangler, name, *address);
        }
        let overrides = Arc::new(overrides);

        let host = if self.config.host_symbols {
            Some(
                self.host_symbols
                    .unwrap_or_else(|| Arc::new(ProcessSymbols) as Arc<dyn HostSymbols>),
            )
        } else {
            None
        };
        let resolver = Arc::new(FallbackResolver::new(
            Arc::downgrade(&cod),
            Arc::clone(&overrides),
            host,
            Arc::clone(&mangler),
        ));

        info!(
            event = "engine_ready",
            triple = %target.data_layout().triple,
            policy = ?self.config.partition_policy,
            overrides = self.overrides.len(),
        );

        Ok(Engine {
            config: self.config,
            data_layout: target.data_layout().clone(),
            mangler,
            linker,
            callbacks,
            cod,
            overrides,
            resolver,
            dtor_runners: Vec::new(),
            torn_down: false,
        })
    }
}
