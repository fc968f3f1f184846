//! First-order fixed-point low-pass filter

/// First-order IIR low-pass filter in 16-bit fixed point.
///
/// Each step moves the state toward the input by `alpha / 65536` of the
/// difference, rounding the half-step up. The first sample primes the
/// state so that there is no cold-start transient.
#[derive(Clone, Debug)]
pub struct LowPass {
    alpha: i32,
    state: Option<i32>,
}

impl LowPass {
    pub fn new(alpha: i32) -> Self {
        Self { alpha, state: None }
    }

    pub fn update(&mut self, x: i32) -> i32 {
        let y = match self.state {
            None => x,
            Some(y_d) => {
                let scaled = (self.alpha as i64 * (x as i64 - y_d as i64)) >> 15;
                (y_d as i64 + (scaled >> 1) + (scaled & 1)) as i32
            }
        };
        self.state = Some(y);
        y
    }

    pub fn reset(&mut self) {
        self.state = None;
    }

    pub fn value(&self) -> Option<i32> {
        self.state
    }
}
