//! Compile-time configuration, per spec §6.
//!
//! Grounded on `cranelift-codegen`'s `settings` module shape: a flat struct
//! of typed knobs built through a `Builder`, consulted by `isa::call_conv`
//! (`isa.flags()`) and by every pass that needs to know whether it is
//! allowed to run.

use std::fmt;

/// Optimization level; gates which `opt` passes beyond constant-folding and
/// DCE run (spec §4.D, §6).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum OptLevel {
    /// Only constant propagation/folding and dead-code elimination run.
    Off,
    /// Adds register-pressure scheduling and strength reduction.
    Default,
    /// Adds loop recognition and tail-call marking, and iterates the
    /// fixed-point loop to the full 16-iteration cap instead of stopping
    /// early once no single pass changes anything twice in a row.
    Aggressive,
}

impl Default for OptLevel {
    fn default() -> Self {
        OptLevel::Default
    }
}

/// Target platform tag (spec §6): selects the output routine for
/// `PrintU8`/`PrintString` and predefines a `TARGET` constant visible to
/// the analyzer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Target {
    ZxSpectrum,
    Cpm,
    Msx,
    Cpc,
}

impl Target {
    /// The entry point used by the backend's runtime-helper section to
    /// print a single character held in `A`.
    pub fn putchar_routine(self) -> &'static str {
        match self {
            Target::ZxSpectrum => "RST 16",
            Target::Cpm => "CALL 5", // BDOS function 2, C = 2 already loaded by caller
            Target::Msx => "CALL $00A2",
            Target::Cpc => "CALL $BB5A",
        }
    }

    /// The `TARGET` constant predefined for the analyzer (e.g. for
    /// `@target == "zxspectrum"` conditional compilation, out of this
    /// crate's scope beyond exposing the tag string).
    pub fn name(self) -> &'static str {
        match self {
            Target::ZxSpectrum => "zxspectrum",
            Target::Cpm => "cpm",
            Target::Msx => "msx",
            Target::Cpc => "cpc",
        }
    }

    /// Whether this target's environment is known to service interrupts
    /// that could observe a torn 16-bit TSMC patch (spec §4.E.3, §9).
    pub fn has_isr(self) -> bool {
        matches!(self, Target::ZxSpectrum | Target::Msx | Target::Cpc)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Compile-time configuration consumed across every pipeline stage.
#[derive(Debug, Clone)]
pub struct Config {
    pub optimize: OptLevel,
    pub enable_smc: bool,
    pub enable_ctie: bool,
    pub target: Target,
    pub max_ctie_steps: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            optimize: OptLevel::Default,
            enable_smc: true,
            enable_ctie: true,
            target: Target::ZxSpectrum,
            max_ctie_steps: 1_000_000,
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// Builder for [`Config`], following the teacher's `settings::Builder`
/// convention of validating as it goes rather than at the end.
#[derive(Debug, Default, Clone)]
pub struct ConfigBuilder {
    cfg: ConfigOverrides,
}

#[derive(Debug, Default, Clone)]
struct ConfigOverrides {
    optimize: Option<OptLevel>,
    enable_smc: Option<bool>,
    enable_ctie: Option<bool>,
    target: Option<Target>,
    max_ctie_steps: Option<u64>,
}

impl ConfigBuilder {
    pub fn optimize(mut self, level: OptLevel) -> Self {
        self.cfg.optimize = Some(level);
        self
    }

    pub fn enable_smc(mut self, v: bool) -> Self {
        self.cfg.enable_smc = Some(v);
        self
    }

    pub fn enable_ctie(mut self, v: bool) -> Self {
        self.cfg.enable_ctie = Some(v);
        self
    }

    pub fn target(mut self, t: Target) -> Self {
        self.cfg.target = Some(t);
        self
    }

    pub fn max_ctie_steps(mut self, n: u64) -> Self {
        self.cfg.max_ctie_steps = Some(n);
        self
    }

    pub fn finish(self) -> Config {
        let default = Config::default();
        Config {
            optimize: self.cfg.optimize.unwrap_or(default.optimize),
            enable_smc: self.cfg.enable_smc.unwrap_or(default.enable_smc),
            enable_ctie: self.cfg.enable_ctie.unwrap_or(default.enable_ctie),
            target: self.cfg.target.unwrap_or(default.target),
            max_ctie_steps: self.cfg.max_ctie_steps.unwrap_or(default.max_ctie_steps),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let cfg = Config::builder()
            .optimize(OptLevel::Aggressive)
            .enable_smc(false)
            .finish();
        assert_eq!(cfg.optimize, OptLevel::Aggressive);
        assert!(!cfg.enable_smc);
        assert!(cfg.enable_ctie); // untouched default
    }

    #[test]
    fn opt_levels_are_ordered() {
        assert!(OptLevel::Off < OptLevel::Default);
        assert!(OptLevel::Default < OptLevel::Aggressive);
    }
}
