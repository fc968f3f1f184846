//! Conversion between picoseconds and native phase units
//!
//! One reference clock period spans `2^hpll_n` phase units, so a unit is
//! `clock_period_ps / 2^hpll_n` picoseconds (about 0.49 ps for 8 ns and 14 bits).

use crate::config::HardwareConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhaseUnits {
    clock_period_ps: i64,
    hpll_n: u32,
}

impl PhaseUnits {
    pub fn new(clock_period_ps: u32, hpll_n: u32) -> Self {
        Self {
            clock_period_ps: clock_period_ps as i64,
            hpll_n,
        }
    }

    pub fn from_config(hw: &HardwareConfig) -> Self {
        Self::new(hw.clock_period_ps, hw.hpll_n)
    }

    /// Phase units in one clock period
    pub fn units_per_period(&self) -> i64 {
        1 << self.hpll_n
    }

    /// Nearest phase unit count for `ps`
    pub fn ps_to_units(&self, ps: i32) -> i32 {
        div_round(ps as i64 * self.units_per_period(), self.clock_period_ps) as i32
    }

    /// Nearest picosecond count for `units`
    pub fn units_to_ps(&self, units: i64) -> i32 {
        div_round(units * self.clock_period_ps, self.units_per_period()) as i32
    }
}

/// Division rounding half away from zero, for a positive denominator
fn div_round(num: i64, den: i64) -> i64 {
    if num >= 0 {
        (num + den / 2) / den
    } else {
        -((-num + den / 2) / den)
    }
}
