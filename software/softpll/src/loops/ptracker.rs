//! Passive phase tracker between two channels

use crate::peripheral::{ActuatorWrite, Effects};
use crate::tag::Tag;

/// Averages the phase of channel `a` relative to channel `b` over a window of
/// tag pairs. Never writes a DAC.
///
/// The difference is taken modulo one beat period. When the first sample of a
/// window lies within a quarter period of the wrap point, later samples from
/// the other side of the wrap are unwrapped toward it, so that a window
/// straddling the wrap does not average to half a period.
#[derive(Clone, Debug)]
pub struct PhaseTracker {
    id_a: usize,
    id_b: usize,
    n_avg: u32,
    hpll_n: u32,

    enabled: bool,
    tag_a: Option<u32>,
    tag_b: Option<u32>,
    acc: i64,
    avg_count: u32,
    preserve_sign: i8,
    phase_val: i32,
    ready: bool,
    sample_n: u32,
}

impl PhaseTracker {
    pub fn new(id_a: usize, id_b: usize, n_avg: u32, hpll_n: u32) -> Self {
        Self {
            id_a,
            id_b,
            n_avg,
            hpll_n,

            enabled: false,
            tag_a: None,
            tag_b: None,
            acc: 0,
            avg_count: 0,
            preserve_sign: 0,
            phase_val: 0,
            ready: false,
            sample_n: 0,
        }
    }

    /// Enable the tracker, clearing any previous measurement
    pub fn start(&mut self, fx: &mut Effects) {
        self.enabled = true;
        self.tag_a = None;
        self.tag_b = None;
        self.acc = 0;
        self.avg_count = 0;
        self.preserve_sign = 0;
        self.ready = false;
        self.sample_n = 0;
        self.enable_taggers(fx);
    }

    /// Stop feeding the tracker. The taggers stay on since loops may share them.
    pub fn stop(&mut self) {
        self.enabled = false;
    }

    pub fn enable_taggers(&self, fx: &mut Effects) {
        fx.push(ActuatorWrite::Tagger {
            channel: self.id_a,
            enable: true,
        });
        fx.push(ActuatorWrite::Tagger {
            channel: self.id_b,
            enable: true,
        });
    }

    pub fn update(&mut self, tag: Tag) {
        if !self.enabled {
            return;
        }
        if tag.channel == self.id_a {
            self.tag_a = Some(tag.value);
        }
        if tag.channel == self.id_b {
            self.tag_b = Some(tag.value);
        }

        let (Some(a), Some(b)) = (self.tag_a, self.tag_b) else {
            return;
        };
        self.tag_a = None;
        self.tag_b = None;
        self.sample_n = self.sample_n.wrapping_add(1);

        let period = 1_i64 << self.hpll_n;
        let wrap_lo = 1_i64 << (self.hpll_n - 2);
        let wrap_hi = 3 * wrap_lo;
        let delta = (a as i64 - b as i64) & (period - 1);

        if self.avg_count == 0 {
            self.preserve_sign = if delta <= wrap_lo {
                -1
            } else if delta >= wrap_hi {
                1
            } else {
                0
            };
            self.acc = delta;
        } else if delta <= wrap_lo && self.preserve_sign > 0 {
            self.acc += delta + period;
        } else if delta >= wrap_hi && self.preserve_sign < 0 {
            self.acc += delta - period;
        } else {
            self.acc += delta;
        }
        self.avg_count += 1;

        if self.avg_count >= self.n_avg {
            self.phase_val = (self.acc / self.n_avg as i64) as i32;
            self.ready = true;
            self.acc = 0;
            self.avg_count = 0;
        }
    }

    /// Last averaged phase in phase units, and whether one has been published
    pub fn phase(&self) -> (i32, bool) {
        (self.phase_val, self.ready)
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn channels(&self) -> (usize, usize) {
        (self.id_a, self.id_b)
    }

    /// Tag pairs processed since start
    pub fn samples(&self) -> u32 {
        self.sample_n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BEAT: u32 = 1 << 14;

    fn tracker(n_avg: u32) -> PhaseTracker {
        let mut t = PhaseTracker::new(0, 5, n_avg, 14);
        t.start(&mut Effects::new());
        t
    }

    fn pair(t: &mut PhaseTracker, k: u32, a_offset: i64) {
        t.update(Tag::new(5, k * BEAT));
        t.update(Tag::new(0, ((k * BEAT) as i64 + a_offset) as u32));
    }

    #[test]
    fn disabled_tracker_ignores_tags() {
        let mut t = PhaseTracker::new(0, 5, 4, 14);
        for k in 1..10 {
            pair(&mut t, k, 100);
        }
        assert_eq!(t.phase(), (0, false));
        assert_eq!(t.samples(), 0);
    }

    #[test]
    fn publishes_average_after_window() {
        let mut t = tracker(4);
        for k in 1..4 {
            pair(&mut t, k, 1000);
        }
        assert!(!t.phase().1);
        pair(&mut t, 4, 1000);
        assert_eq!(t.phase(), (1000, true));
    }

    #[test]
    fn window_straddling_wrap_keeps_sign_of_first_sample() {
        let mut t = tracker(4);
        // Phase jitters around zero: +2, -2, +2, -2
        for (k, offset) in [(1, 2), (2, -2), (3, 2), (4, -2)] {
            pair(&mut t, k, offset);
        }
        let (phase, ready) = t.phase();
        assert!(ready);
        assert_eq!(phase, 0);
    }

    #[test]
    fn window_pinned_high_unwraps_upward() {
        let mut t = tracker(2);
        pair(&mut t, 1, -4);
        pair(&mut t, 2, 2);
        // First sample 16380 pins the window high; +2 unwraps to 16386
        assert_eq!(t.phase(), (16383, true));
    }

    #[test]
    fn start_enables_both_taggers() {
        let mut t = PhaseTracker::new(2, 7, 4, 14);
        let mut fx = Effects::new();
        t.start(&mut fx);
        assert_eq!(
            fx.writes,
            vec![
                ActuatorWrite::Tagger {
                    channel: 2,
                    enable: true
                },
                ActuatorWrite::Tagger {
                    channel: 7,
                    enable: true
                },
            ]
        );
    }
}
