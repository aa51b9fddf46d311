//! Host target selection.

use cranelift_codegen::ir::Endianness;
use cranelift_codegen::isa::OwnedTargetIsa;
use cranelift_codegen::settings::{self, Configurable};
use lazyjit_config::JitConfig;
use lazyjit_core::{DataLayout, JitError, JitResult, Mangler};

/// The native target: code generator ISA plus the data layout it implies.
pub struct Target {
    isa: OwnedTargetIsa,
    data_layout: DataLayout,
}

impl Target {
    /// Configures Cranelift for the host machine.
    pub fn native(config: &JitConfig) -> JitResult<Self> {
        let mut flag_builder = settings::builder();
        let verifier = if config.verify_ir { "true" } else { "false" };
        for (name, value) in [
            ("use_colocated_libcalls", "false"),
            ("is_pic", "false"),
            ("opt_level", config.opt_level.as_setting()),
            ("enable_verifier", verifier),
        ] {
            flag_builder
                .set(name, value)
                .map_err(|e| JitError::Target(format!("setting {name}={value}: {e}")))?;
        }

        let isa_builder = cranelift_native::builder()
            .map_err(|msg| JitError::Target(format!("host machine is not supported: {msg}")))?;
        let isa = isa_builder
            .finish(settings::Flags::new(flag_builder))
            .map_err(|e| JitError::Target(e.to_string()))?;

        let data_layout = DataLayout {
            triple: isa.triple().to_string(),
            pointer_bits: u16::from(isa.pointer_bits()),
            big_endian: matches!(isa.endianness(), Endianness::Big),
        };
        Ok(Self { isa, data_layout })
    }

    pub fn isa(&self) -> OwnedTargetIsa {
        self.isa.clone()
    }

    /// Layout stamped into units that do not carry one.
    pub fn data_layout(&self) -> &DataLayout {
        &self.data_layout
    }

    /// The mangler for this target's ABI.
    pub fn mangler(&self) -> Mangler {
        Mangler::for_triple(&self.data_layout.triple)
    }
}
