//! Loop gains, lock criteria, and hardware geometry for the control core.
//!
//! Every tunable lives here so that a deployment can carry its whole
//! parametrization as one JSON document. Defaults match an 18-port switch
//! with a 125 MHz reference clock.

use std::path::Path;

use serde::{Deserialize, Serialize};
use softpll_shared::RTS_PLL_CHANNELS;

use crate::logging::LoggingConfig;

/// Hardware geometry and fixed-point formats
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct HardwareConfig {
    /// Width of the raw tag counter
    pub tag_bits: u32,
    /// Log2 of the number of helper cycles in one beat period
    pub hpll_n: u32,
    /// Width of the oscillator DACs
    pub dac_bits: u32,
    /// Fractional bits of the PI gains
    pub pi_frac_bits: u32,
    /// Reference clock period in picoseconds
    pub clock_period_ps: u32,
    /// Number of reference (port) channels
    pub n_ref: usize,
    /// Number of output channels, including the local oscillator
    pub n_out: usize,
    /// Tag channel of the external reference phase detector.
    /// Defaults to the channel following the outputs.
    #[serde(default)]
    pub ext_channel: Option<usize>,
    /// Maximum tags drained per event handler invocation
    pub fifo_depth: usize,
    /// Rate of the free-running tick counter
    pub ticks_per_second: u32,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            tag_bits: 20,
            hpll_n: 14,
            dac_bits: 16,
            pi_frac_bits: 12,
            clock_period_ps: 8000,
            n_ref: 18,
            n_out: 1,
            ext_channel: None,
            fifo_depth: 64,
            ticks_per_second: 100_000,
        }
    }
}

impl HardwareConfig {
    /// Tag channel of the local oscillator output
    pub fn local_channel(&self) -> usize {
        self.n_ref
    }

    /// Tag channel of output `output`
    pub fn out_channel(&self, output: usize) -> usize {
        self.n_ref + output
    }

    pub fn ext_channel(&self) -> usize {
        self.ext_channel.unwrap_or(self.n_ref + self.n_out)
    }

    /// Total number of tag channels
    pub fn n_channels(&self) -> usize {
        (self.n_ref + self.n_out).max(self.ext_channel() + 1)
    }

    /// Largest value a DAC accepts
    pub fn dac_max(&self) -> i32 {
        ((1_i64 << self.dac_bits) - 1) as i32
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.tag_bits == 0 || self.tag_bits > 30 {
            return Err(format!("tag_bits must be in 1..=30, got {}", self.tag_bits));
        }
        if self.hpll_n < 3 || self.hpll_n >= self.tag_bits {
            return Err(format!(
                "hpll_n must be in 3..tag_bits ({}), got {}",
                self.tag_bits, self.hpll_n
            ));
        }
        if self.dac_bits == 0 || self.dac_bits > 24 {
            return Err(format!("dac_bits must be in 1..=24, got {}", self.dac_bits));
        }
        if self.pi_frac_bits > 24 {
            return Err(format!(
                "pi_frac_bits must be at most 24, got {}",
                self.pi_frac_bits
            ));
        }
        if self.clock_period_ps == 0 {
            return Err("clock_period_ps must be > 0".to_owned());
        }
        if self.n_ref == 0 {
            return Err("At least one reference channel is required".to_owned());
        }
        if self.n_ref > RTS_PLL_CHANNELS {
            return Err(format!(
                "n_ref ({}) exceeds the {} channel slots of the status record",
                self.n_ref, RTS_PLL_CHANNELS
            ));
        }
        if self.n_out == 0 {
            return Err("At least one output channel is required".to_owned());
        }
        if self.ext_channel() < self.n_ref + self.n_out {
            return Err(format!(
                "ext_channel {} overlaps the reference or output channels",
                self.ext_channel()
            ));
        }
        if self.fifo_depth == 0 {
            return Err("fifo_depth must be > 0".to_owned());
        }
        if self.ticks_per_second == 0 {
            return Err("ticks_per_second must be > 0".to_owned());
        }
        Ok(())
    }
}

/// Gains and output range of one PI regulator
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct PiConfig {
    pub kp: i32,
    pub ki: i32,
    pub y_min: i32,
    pub y_max: i32,
    /// Output offset added after the gains are applied
    pub bias: i32,
    pub anti_windup: bool,
}

impl PiConfig {
    pub fn validate(&self, name: &str) -> Result<(), String> {
        if self.y_min > self.y_max {
            return Err(format!(
                "{name}: y_min ({}) must not exceed y_max ({})",
                self.y_min, self.y_max
            ));
        }
        Ok(())
    }
}

/// Hysteresis thresholds of one lock detector
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct LockConfig {
    /// Largest error magnitude counted as in-lock
    pub threshold: i32,
    /// In-threshold samples needed to declare lock
    pub lock_samples: u32,
    /// Counter value at which lock is dropped
    pub delock_samples: u32,
}

impl LockConfig {
    pub fn validate(&self, name: &str) -> Result<(), String> {
        if self.threshold < 0 {
            return Err(format!("{name}: threshold must be >= 0"));
        }
        if self.lock_samples == 0 {
            return Err(format!("{name}: lock_samples must be > 0"));
        }
        if self.delock_samples >= self.lock_samples {
            return Err(format!(
                "{name}: delock_samples ({}) must be below lock_samples ({})",
                self.delock_samples, self.lock_samples
            ));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct HelperConfig {
    pub prelock_pi: PiConfig,
    pub prelock_ld: LockConfig,
    pub phase_pi: PiConfig,
    pub phase_ld: LockConfig,
    /// Phase error magnitude limit fed to the PI
    pub error_clamp: i32,
    /// Setpoint magnitude above which setpoint and epoch adder are rebased together
    pub setpoint_wrap: i64,
}

impl Default for HelperConfig {
    fn default() -> Self {
        let y_max = (1 << 16) - 5;
        Self {
            prelock_pi: PiConfig {
                kp: 150,
                ki: 2,
                y_min: 5,
                y_max,
                bias: y_max / 2,
                anti_windup: true,
            },
            prelock_ld: LockConfig {
                threshold: 2,
                lock_samples: 1000,
                delock_samples: 990,
            },
            phase_pi: PiConfig {
                kp: 153,
                ki: 2,
                y_min: 5,
                y_max,
                bias: y_max,
                anti_windup: true,
            },
            phase_ld: LockConfig {
                threshold: 200,
                lock_samples: 10000,
                delock_samples: 100,
            },
            error_clamp: 150_000,
            setpoint_wrap: 100_000_000,
        }
    }
}

/// How the phase stage of a main loop pairs reference and output tags
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PairingStrategy {
    /// Latest tag from each side, compared within one beat period
    #[default]
    Masked,
    /// Tags paired by per-side sequence number, compared on unwrapped phase
    Sequenced,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct MainConfig {
    pub freq_pi: PiConfig,
    pub freq_ld: LockConfig,
    pub phase_pi: PiConfig,
    pub phase_ld: LockConfig,
    #[serde(default)]
    pub pairing: PairingStrategy,
}

impl Default for MainConfig {
    fn default() -> Self {
        Self {
            freq_pi: PiConfig {
                kp: 100,
                ki: 600,
                y_min: 5,
                y_max: 65530,
                bias: 32000,
                anti_windup: false,
            },
            freq_ld: LockConfig {
                threshold: 200,
                lock_samples: 1000,
                delock_samples: 990,
            },
            phase_pi: PiConfig {
                kp: 1100,
                ki: 30,
                y_min: 5,
                y_max: 65530,
                bias: 32000,
                anti_windup: true,
            },
            phase_ld: LockConfig {
                threshold: 500,
                lock_samples: 1000,
                delock_samples: 900,
            },
            pairing: PairingStrategy::Masked,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ExternalConfig {
    pub pi: PiConfig,
    pub ld: LockConfig,
    /// Short-term low-pass coefficient, in 1/65536
    pub lp_short_alpha: i32,
    /// Long-term low-pass coefficient, in 1/65536
    pub lp_long_alpha: i32,
    /// Width of the phase detector value below its wrap flag
    pub error_bits: u32,
    /// DAC value written while the external reference is absent
    pub neutral_dac: i32,
    /// Time allowed for each PPS realignment stage
    pub realign_timeout_s: u32,
}

impl Default for ExternalConfig {
    fn default() -> Self {
        Self {
            pi: PiConfig {
                kp: 300,
                ki: 1,
                y_min: 5,
                y_max: (1 << 16) - 5,
                bias: 32768,
                anti_windup: true,
            },
            ld: LockConfig {
                threshold: 250,
                lock_samples: 10000,
                delock_samples: 9990,
            },
            lp_short_alpha: 4000,
            lp_long_alpha: 1000,
            error_bits: 16,
            neutral_dac: 32768,
            realign_timeout_s: 2,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PtrackerConfig {
    /// Phase samples averaged per published value
    pub n_avg: u32,
}

impl Default for PtrackerConfig {
    fn default() -> Self {
        Self { n_avg: 256 }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SequencerConfig {
    /// Settle time after forcing safe DAC values
    pub clear_dacs_settle_ms: u32,
    pub safe_helper_dac: i32,
    pub safe_main_dac: i32,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            clear_dacs_settle_ms: 100,
            safe_helper_dac: 0,
            safe_main_dac: 32768,
        }
    }
}

/// Complete parametrization of the control core
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct SpllConfig {
    #[serde(default)]
    pub hw: HardwareConfig,
    #[serde(default)]
    pub helper: HelperConfig,
    #[serde(default)]
    pub main: MainConfig,
    #[serde(default)]
    pub external: ExternalConfig,
    #[serde(default)]
    pub ptracker: PtrackerConfig,
    #[serde(default)]
    pub sequencer: SequencerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SpllConfig {
    /// Load and validate a JSON configuration file
    pub fn from_json_file(path: &Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config {}: {e}", path.display()))?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self, String> {
        let cfg: SpllConfig =
            serde_json::from_str(text).map_err(|e| format!("Failed to parse config: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn to_json_string(&self) -> Result<String, String> {
        serde_json::to_string_pretty(self).map_err(|e| format!("Failed to serialize config: {e}"))
    }

    /// Settle time after forcing safe DAC values, in ticks
    pub fn clear_dacs_settle_ticks(&self) -> u32 {
        let ticks = self.sequencer.clear_dacs_settle_ms as u64 * self.hw.ticks_per_second as u64
            / 1000;
        ticks.min(u32::MAX as u64 / 2) as u32
    }

    /// Realignment stage timeout, in ticks
    pub fn realign_timeout_ticks(&self) -> u32 {
        let ticks = self.external.realign_timeout_s as u64 * self.hw.ticks_per_second as u64;
        ticks.min(u32::MAX as u64 / 2) as u32
    }

    /// Check cross-field consistency
    pub fn validate(&self) -> Result<(), String> {
        self.hw.validate()?;
        self.logging.validate()?;

        self.helper.prelock_pi.validate("helper.prelock_pi")?;
        self.helper.prelock_ld.validate("helper.prelock_ld")?;
        self.helper.phase_pi.validate("helper.phase_pi")?;
        self.helper.phase_ld.validate("helper.phase_ld")?;
        if self.helper.error_clamp <= 0 {
            return Err("helper.error_clamp must be > 0".to_owned());
        }
        if self.helper.setpoint_wrap <= 1 << self.hw.tag_bits {
            return Err(format!(
                "helper.setpoint_wrap must exceed the tag range ({})",
                1_i64 << self.hw.tag_bits
            ));
        }

        self.main.freq_pi.validate("main.freq_pi")?;
        self.main.freq_ld.validate("main.freq_ld")?;
        self.main.phase_pi.validate("main.phase_pi")?;
        self.main.phase_ld.validate("main.phase_ld")?;

        self.external.pi.validate("external.pi")?;
        self.external.ld.validate("external.ld")?;
        for (name, alpha) in [
            ("lp_short_alpha", self.external.lp_short_alpha),
            ("lp_long_alpha", self.external.lp_long_alpha),
        ] {
            if !(0..=65536).contains(&alpha) {
                return Err(format!("external.{name} must be in 0..=65536, got {alpha}"));
            }
        }
        if self.external.error_bits == 0 || self.external.error_bits > 24 {
            return Err(format!(
                "external.error_bits must be in 1..=24, got {}",
                self.external.error_bits
            ));
        }
        if self.external.realign_timeout_s == 0 {
            return Err("external.realign_timeout_s must be > 0".to_owned());
        }

        if self.ptracker.n_avg == 0 {
            return Err("ptracker.n_avg must be > 0".to_owned());
        }

        let dac_max = self.hw.dac_max();
        for (name, v) in [
            ("sequencer.safe_helper_dac", self.sequencer.safe_helper_dac),
            ("sequencer.safe_main_dac", self.sequencer.safe_main_dac),
            ("external.neutral_dac", self.external.neutral_dac),
        ] {
            if !(0..=dac_max).contains(&v) {
                return Err(format!("{name} ({v}) is outside the DAC range 0..={dac_max}"));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        SpllConfig::default().validate().unwrap();
    }

    #[test]
    fn json_roundtrip() {
        let mut cfg = SpllConfig::default();
        cfg.main.pairing = PairingStrategy::Sequenced;
        cfg.hw.n_out = 3;
        let text = cfg.to_json_string().unwrap();
        let parsed = SpllConfig::from_json_str(&text).unwrap();
        assert_eq!(cfg, parsed);
    }

    #[test]
    fn missing_sections_take_defaults() {
        let parsed = SpllConfig::from_json_str("{}").unwrap();
        assert_eq!(parsed, SpllConfig::default());
    }

    #[test]
    fn rejects_inverted_lock_hysteresis() {
        let mut cfg = SpllConfig::default();
        cfg.helper.phase_ld.delock_samples = cfg.helper.phase_ld.lock_samples;
        let err = cfg.validate().unwrap_err();
        assert!(err.contains("helper.phase_ld"), "{err}");
    }

    #[test]
    fn rejects_overlapping_ext_channel() {
        let mut cfg = SpllConfig::default();
        cfg.hw.ext_channel = Some(3);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_more_references_than_status_slots() {
        let mut cfg = SpllConfig::default();
        cfg.hw.n_ref = RTS_PLL_CHANNELS;
        assert!(cfg.validate().is_ok());
        cfg.hw.n_ref = RTS_PLL_CHANNELS + 2;
        let err = cfg.validate().unwrap_err();
        assert!(err.contains("n_ref"), "{err}");
    }

    #[test]
    fn channel_layout() {
        let hw = HardwareConfig {
            n_ref: 4,
            n_out: 2,
            ..Default::default()
        };
        assert_eq!(hw.local_channel(), 4);
        assert_eq!(hw.out_channel(1), 5);
        assert_eq!(hw.ext_channel(), 6);
        assert_eq!(hw.n_channels(), 7);
    }

    #[test]
    fn settle_and_timeout_ticks() {
        let cfg = SpllConfig::default();
        assert_eq!(cfg.clear_dacs_settle_ticks(), 10_000);
        assert_eq!(cfg.realign_timeout_ticks(), 200_000);
    }
}
