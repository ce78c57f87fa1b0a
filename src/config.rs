//! Target configuration: ABI and object-format selection.
//!
//! Selects the ABI/object-format pair the emitter and object writer agree
//! on, and carries a small builder-pattern extensibility surface for
//! registering external intrinsics the IR builder should recognize by
//! name instead of treating as an ordinary call.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetAbi {
    /// ELF/x86-64, Itanium C++ ABI.
    Itanium,
    /// COFF/x86-64, MSVC ABI.
    Msvc,
}

/// A hand-recognized intrinsic name the IR builder should lower directly
/// instead of emitting an ordinary `FunctionCall` (e.g. `__builtin_trap`,
/// a target-specific atomic). `mangled_name` is what the object writer
/// actually sees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalIntrinsic {
    pub name: String,
    pub mangled_name: String,
}

impl ExternalIntrinsic {
    pub fn new(name: impl Into<String>, mangled_name: impl Into<String>) -> Self {
        ExternalIntrinsic { name: name.into(), mangled_name: mangled_name.into() }
    }
}

/// Everything the pipeline needs to know about the target before it can
/// emit a single instruction: ABI, calling-convention register budget,
/// and the set of intrinsics it should short-circuit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub abi: TargetAbi,
    pub pointer_size_bits: u32,
    /// Four on Windows x64, six on System V.
    pub max_register_args: u8,
    pub shadow_space_bytes: u32,
    intrinsics: Vec<ExternalIntrinsic>,
}

impl TargetConfig {
    pub fn itanium_sysv() -> Self {
        TargetConfig { abi: TargetAbi::Itanium, pointer_size_bits: 64, max_register_args: 6, shadow_space_bytes: 0, intrinsics: Vec::new() }
    }

    pub fn msvc_win64() -> Self {
        TargetConfig { abi: TargetAbi::Msvc, pointer_size_bits: 64, max_register_args: 4, shadow_space_bytes: 32, intrinsics: Vec::new() }
    }

    pub fn with_intrinsic(mut self, intrinsic: ExternalIntrinsic) -> Self {
        self.intrinsics.push(intrinsic);
        self
    }

    pub fn intrinsics(&self) -> &[ExternalIntrinsic] {
        &self.intrinsics
    }

    pub fn find_intrinsic(&self, name: &str) -> Option<&ExternalIntrinsic> {
        self.intrinsics.iter().find(|i| i.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msvc_target_reserves_shadow_space_and_four_register_args() {
        let cfg = TargetConfig::msvc_win64();
        assert_eq!(cfg.shadow_space_bytes, 32);
        assert_eq!(cfg.max_register_args, 4);
        assert_eq!(cfg.abi, TargetAbi::Msvc);
    }

    #[test]
    fn registered_intrinsic_is_found_by_its_source_name() {
        let cfg = TargetConfig::itanium_sysv().with_intrinsic(ExternalIntrinsic::new("__builtin_trap", "__builtin_trap"));
        assert!(cfg.find_intrinsic("__builtin_trap").is_some());
        assert!(cfg.find_intrinsic("nonexistent").is_none());
    }
}
