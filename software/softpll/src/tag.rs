//! Tags and tag-counter arithmetic
//!
//! A tag is a `tag_bits`-wide snapshot of the helper-cycle counter taken at an
//! edge of the DDMTD output of one channel. The counter wraps, so every
//! consumer keeps a per-channel epoch adder to turn tags into a
//! monotonic phase.

/// One time-stamp event from the tag FIFO
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tag {
    pub channel: usize,
    pub value: u32,
}

impl Tag {
    pub fn new(channel: usize, value: u32) -> Self {
        Self { channel, value }
    }
}

/// Unwraps successive tags of one channel into a monotonic phase
#[derive(Clone, Debug)]
pub struct TagUnwrapper {
    tag_bits: u32,
    last: Option<u32>,
    adder: i64,
}

impl TagUnwrapper {
    pub fn new(tag_bits: u32) -> Self {
        Self {
            tag_bits,
            last: None,
            adder: 0,
        }
    }

    /// Extend `value` with the epoch adder, advancing the epoch when the
    /// raw counter went backwards
    pub fn unwrap(&mut self, value: u32) -> i64 {
        if let Some(last) = self.last {
            if last > value {
                self.adder += 1 << self.tag_bits;
            }
        }
        self.last = Some(value);
        value as i64 + self.adder
    }

    /// Shift the epoch adder, for setpoint rebasing and phase nudges
    pub fn adjust(&mut self, delta: i64) {
        self.adder += delta;
    }

    pub fn adder(&self) -> i64 {
        self.adder
    }

    pub fn last(&self) -> Option<u32> {
        self.last
    }

    pub fn reset(&mut self) {
        self.last = None;
        self.adder = 0;
    }
}

/// Distance from `prev` to `cur` on a counter of width `tag_bits`
pub fn wrapped_delta(prev: u32, cur: u32, tag_bits: u32) -> i64 {
    let d = cur as i64 - prev as i64;
    if d < 0 { d + (1 << tag_bits) } else { d }
}

/// `diff` taken modulo `2^bits`, in `[-2^(bits-1), 2^(bits-1))`
pub fn centred(diff: i64, bits: u32) -> i64 {
    let half = 1i64 << (bits - 1);
    ((diff + half) & ((1i64 << bits) - 1)) - half
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn unwrap_across_counter_wrap() {
        let mut u = TagUnwrapper::new(20);
        assert_eq!(u.unwrap(1_040_000), 1_040_000);
        assert_eq!(u.unwrap(8_000), (1 << 20) + 8_000);
        assert_eq!(u.adder(), 1 << 20);
    }

    #[test]
    fn adjust_moves_subsequent_phase() {
        let mut u = TagUnwrapper::new(20);
        u.unwrap(100);
        u.adjust(-3);
        assert_eq!(u.unwrap(200), 197);
    }

    #[test]
    fn delta_across_wrap() {
        assert_eq!(wrapped_delta(100, 16_484, 20), 16_384);
        assert_eq!(wrapped_delta((1 << 20) - 100, 16_284, 20), 16_384);
    }

    #[test]
    fn centred_difference_keeps_sign() {
        assert_eq!(centred(-1, 14), -1);
        assert_eq!(centred(16_383, 14), -1);
        assert_eq!(centred(-16_379, 14), 5);
        assert_eq!(centred(8_191, 14), 8_191);
        assert_eq!(centred(8_192, 14), -8_192);
    }

    proptest! {
        #[test]
        fn unwrapped_phase_is_monotonic(start in 0u32..(1 << 20), steps in prop::collection::vec(1u32..(1 << 19), 1..100)) {
            let mut u = TagUnwrapper::new(20);
            let mut raw = start;
            let mut prev = u.unwrap(raw);
            for step in steps {
                raw = (raw + step) & ((1 << 20) - 1);
                let p = u.unwrap(raw);
                prop_assert_eq!(p - prev, step as i64);
                prev = p;
            }
        }

        #[test]
        fn centred_is_identity_near_zero(d in -(1i64 << 19)..(1i64 << 19), k in -4i64..4) {
            prop_assert_eq!(centred(d + (k << 20), 20), d);
        }
    }
}
