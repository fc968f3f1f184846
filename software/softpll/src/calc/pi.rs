//! A fixed-point PI regulator with output clamping and optional anti-windup

use crate::config::PiConfig;

/// A fixed-point PI regulator with output clamping and optional anti-windup.
///
/// The output is `((integrator * ki + x * kp) >> frac_bits) + bias`, clamped
/// to `[y_min, y_max]`. With anti-windup enabled, the integrator only
/// accepts a new sample while saturated if that moves it back toward the
/// active range.
#[derive(Clone, Debug)]
pub struct PiController {
    // User inputs
    kp: i32,
    ki: i32,
    frac_bits: u32,
    y_min: i32,
    y_max: i32,
    bias: i32,
    anti_windup: bool,

    // Internal state
    integrator: i64,
    x: i32,
    y: i32,
}

impl PiController {
    pub fn new(cfg: &PiConfig, frac_bits: u32) -> Self {
        Self {
            kp: cfg.kp,
            ki: cfg.ki,
            frac_bits,
            y_min: cfg.y_min,
            y_max: cfg.y_max,
            bias: cfg.bias,
            anti_windup: cfg.anti_windup,

            integrator: 0,
            x: 0,
            y: cfg.bias.clamp(cfg.y_min, cfg.y_max),
        }
    }

    /// Replace the output offset, typically with the last output of the
    /// stage that ran before this one
    pub fn with_bias(mut self, bias: i32) -> Self {
        self.set_bias(bias);
        self
    }

    pub fn set_bias(&mut self, bias: i32) {
        self.bias = bias;
        self.y = bias.clamp(self.y_min, self.y_max);
    }

    /// Consume one error sample and produce the next clamped output
    pub fn update(&mut self, x: i32) -> i32 {
        self.x = x;
        let i_new = self.integrator + x as i64;
        let y = ((i_new * self.ki as i64 + x as i64 * self.kp as i64) >> self.frac_bits)
            + self.bias as i64;

        let y = if y < self.y_min as i64 {
            if !self.anti_windup || i_new > self.integrator {
                self.integrator = i_new;
            }
            self.y_min
        } else if y > self.y_max as i64 {
            if !self.anti_windup || i_new < self.integrator {
                self.integrator = i_new;
            }
            self.y_max
        } else {
            self.integrator = i_new;
            y as i32
        };

        self.y = y;
        y
    }

    /// Last output
    pub fn y(&self) -> i32 {
        self.y
    }

    /// Last error input
    pub fn x(&self) -> i32 {
        self.x
    }

    pub fn integrator(&self) -> i64 {
        self.integrator
    }

    pub fn bias(&self) -> i32 {
        self.bias
    }
}
