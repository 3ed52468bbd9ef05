//! Pluggable code generator trait (spec §6) and its capability set.
//!
//! Grounded on the teacher's `isa::TargetIsa` (referenced throughout
//! `cranelift-codegen` as `isa: &dyn TargetIsa`, queried for flags and
//! register info before instruction selection runs): one object per
//! target, queried for a capability set before the analyzer decides
//! whether TSMC, shadow-register placement, or DJNZ fusion are even on
//! the table. Spec §6: "a backend without TSMC support forces the
//! analyzer to treat all functions as non-TSMC."

use crate::config::Config;
use crate::ir::module::Module;
use crate::types::TypeInterner;

pub mod z80;

#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum BackendError {
    #[error("TSMC requested for recursive function `{0}`")]
    TsmcOnRecursive(String),
    #[error("spill region exhausted past address {0:#06x}")]
    SpillExhausted(u16),
    #[error("no instruction pattern matched for `{0}`")]
    NoPatternMatch(String),
    #[error("unsupported construct reached the backend: {0}")]
    Unsupported(String),
}

/// A target's capabilities, queried by the analyzer and the pipeline
/// driver before they offer TSMC, shadow-register placement, or
/// DJNZ-shaped loop fusion (spec §6).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Capabilities {
    pub supports_tsmc: bool,
    pub has_shadow_registers: bool,
    pub has_djnz: bool,
}

/// One pluggable code generator. Z80 is the only implementation this
/// crate ships; the trait exists so the pipeline driver never hardcodes
/// "Z80" past the point where a `Config::target` is resolved to a
/// `dyn TargetIsa`.
pub trait TargetIsa {
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> Capabilities;

    fn emit_module(&self, module: &Module, types: &TypeInterner, config: &Config) -> Result<String, BackendError>;
}
