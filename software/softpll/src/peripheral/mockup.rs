//! Software stand-in for the SoftPLL register block, for hardware-out-of-the-loop
//! operation and tests.
//!
//! Besides recording every register write, the mockup can synthesize ideal
//! tags: on each simulated beat, every enabled tagger emits the helper-cycle
//! count of that beat plus a per-channel phase offset. Loops fed this way see
//! zero frequency error, so they lock as quickly as their lock detectors allow.

use std::collections::{BTreeMap, VecDeque};

use tracing::warn;

use crate::config::HardwareConfig;
use crate::error::SpllError;
use crate::tag::Tag;

use super::{ActuatorWrite, AlignStage, OscillatorDriver, SpllPeripheral};

#[derive(Debug)]
pub struct MockPeripheral {
    tag_bits: u32,
    hpll_n: u32,
    ext_channel: usize,

    fifo: VecDeque<Tag>,
    fifo_capacity: usize,
    overflows: u64,

    taggers: Vec<bool>,
    paused: Vec<bool>,
    offsets: Vec<i64>,
    beat: u64,
    ticks_per_beat: u32,

    helper_dac: Option<i32>,
    main_dacs: BTreeMap<usize, i32>,
    writes: Vec<ActuatorWrite>,

    period_error: Option<i32>,
    external_enabled: bool,
    ext_ref_present: bool,
    align_done: bool,
    auto_align: bool,
    align_requests: Vec<AlignStage>,

    ticks: u32,
    irq_enabled: bool,
}

impl MockPeripheral {
    pub fn new(hw: &HardwareConfig) -> Self {
        let n = hw.n_channels();
        Self {
            tag_bits: hw.tag_bits,
            hpll_n: hw.hpll_n,
            ext_channel: hw.ext_channel(),

            fifo: VecDeque::new(),
            fifo_capacity: 4096,
            overflows: 0,

            taggers: vec![false; n],
            paused: vec![false; n],
            offsets: vec![0; n],
            beat: 0,
            ticks_per_beat: 26,

            helper_dac: None,
            main_dacs: BTreeMap::new(),
            writes: Vec::new(),

            period_error: Some(0),
            external_enabled: false,
            ext_ref_present: true,
            align_done: false,
            auto_align: true,
            align_requests: Vec::new(),

            ticks: 0,
            irq_enabled: false,
        }
    }

    /// Queue a tag as if the hardware had captured it.
    /// Tags from disabled taggers are not captured.
    pub fn push_tag(&mut self, tag: Tag) -> bool {
        if !self.taggers.get(tag.channel).copied().unwrap_or(false) {
            return false;
        }
        if self.fifo.len() >= self.fifo_capacity {
            self.overflows += 1;
            warn!("Mock tag FIFO full, dropping tag from channel {}", tag.channel);
            return false;
        }
        self.fifo.push_back(tag);
        true
    }

    /// Simulate `n` beat periods of ideal tags from every enabled tagger
    pub fn run_beats(&mut self, n: u32) {
        let mask = (1_i64 << self.tag_bits) - 1;
        for _ in 0..n {
            self.beat += 1;
            for ch in 0..self.taggers.len() {
                if !self.taggers[ch] || self.paused[ch] {
                    continue;
                }
                let value = if ch == self.ext_channel {
                    // Phase detector output without the wrap flag
                    self.offsets[ch] & 0xffff
                } else {
                    ((self.beat << self.hpll_n) as i64 + self.offsets[ch]) & mask
                };
                self.push_tag(Tag::new(ch, value as u32));
            }
            self.advance_ticks(self.ticks_per_beat);
        }
    }

    pub fn advance_ticks(&mut self, n: u32) {
        self.ticks = self.ticks.wrapping_add(n);
    }

    pub fn set_ticks(&mut self, ticks: u32) {
        self.ticks = ticks;
    }

    /// Phase offset of a channel's synthesized tags, in phase units
    pub fn set_offset(&mut self, channel: usize, offset: i64) {
        if let Some(o) = self.offsets.get_mut(channel) {
            *o = offset;
        }
    }

    /// Suppress synthesized tags from a channel, as if its signal were lost
    pub fn set_paused(&mut self, channel: usize, paused: bool) {
        if let Some(p) = self.paused.get_mut(channel) {
            *p = paused;
        }
    }

    pub fn set_period_error(&mut self, err: Option<i32>) {
        self.period_error = err;
    }

    pub fn set_ext_ref_present(&mut self, present: bool) {
        self.ext_ref_present = present;
    }

    pub fn set_align_done(&mut self, done: bool) {
        self.align_done = done;
    }

    /// Whether realignment requests complete immediately
    pub fn set_auto_align(&mut self, auto: bool) {
        self.auto_align = auto;
    }

    pub fn fifo_len(&self) -> usize {
        self.fifo.len()
    }

    pub fn overflows(&self) -> u64 {
        self.overflows
    }

    pub fn tagger_enabled(&self, channel: usize) -> bool {
        self.taggers.get(channel).copied().unwrap_or(false)
    }

    pub fn helper_dac(&self) -> Option<i32> {
        self.helper_dac
    }

    pub fn main_dac(&self, output: usize) -> Option<i32> {
        self.main_dacs.get(&output).copied()
    }

    /// Every register write applied so far, oldest first
    pub fn writes(&self) -> &[ActuatorWrite] {
        &self.writes
    }

    pub fn clear_writes(&mut self) {
        self.writes.clear();
    }

    pub fn external_enabled(&self) -> bool {
        self.external_enabled
    }

    pub fn align_requests(&self) -> &[AlignStage] {
        &self.align_requests
    }

    pub fn irq_enabled(&self) -> bool {
        self.irq_enabled
    }
}

impl SpllPeripheral for MockPeripheral {
    fn pop_tag(&mut self) -> Option<Tag> {
        self.fifo.pop_front()
    }

    fn enable_tagger(&mut self, channel: usize, enable: bool) {
        self.writes.push(ActuatorWrite::Tagger { channel, enable });
        match self.taggers.get_mut(channel) {
            Some(t) => *t = enable,
            None => warn!("Mock peripheral has no tagger on channel {channel}"),
        }
    }

    fn write_helper_dac(&mut self, value: i32) {
        self.writes.push(ActuatorWrite::HelperDac(value));
        self.helper_dac = Some(value);
    }

    fn write_main_dac(&mut self, output: usize, value: i32) {
        self.writes.push(ActuatorWrite::MainDac { output, value });
        self.main_dacs.insert(output, value);
    }

    fn helper_period_error(&mut self) -> Option<i32> {
        self.period_error
    }

    fn set_external_enabled(&mut self, enable: bool) {
        self.writes.push(ActuatorWrite::External { enable });
        self.external_enabled = enable;
    }

    fn ext_ref_present(&self) -> bool {
        self.ext_ref_present
    }

    fn request_align(&mut self, stage: AlignStage) {
        self.writes.push(ActuatorWrite::Align(stage));
        self.align_requests.push(stage);
        self.align_done = self.auto_align;
    }

    fn align_done(&self) -> bool {
        self.align_done
    }

    fn ticks(&self) -> u32 {
        self.ticks
    }

    fn set_irq_enabled(&mut self, enable: bool) {
        self.irq_enabled = enable;
    }
}

/// Oscillator chip stand-in that answers unless told not to
#[derive(Debug, Clone)]
pub struct MockOscillator {
    responds: bool,
    initialized: bool,
}

impl MockOscillator {
    pub fn new(responds: bool) -> Self {
        Self {
            responds,
            initialized: false,
        }
    }

    pub fn initialized(&self) -> bool {
        self.initialized
    }
}

impl OscillatorDriver for MockOscillator {
    fn initialize(&mut self) -> Result<(), SpllError> {
        if !self.responds {
            return Err(SpllError::ChipNotResponding);
        }
        self.initialized = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hw() -> HardwareConfig {
        HardwareConfig {
            n_ref: 2,
            n_out: 1,
            ..Default::default()
        }
    }

    #[test]
    fn disabled_taggers_capture_nothing() {
        let mut mock = MockPeripheral::new(&hw());
        mock.run_beats(3);
        assert_eq!(mock.fifo_len(), 0);
        assert!(!mock.push_tag(Tag::new(0, 5)));
    }

    #[test]
    fn ideal_tags_advance_one_beat_per_beat() {
        let mut mock = MockPeripheral::new(&hw());
        mock.enable_tagger(0, true);
        mock.enable_tagger(2, true);
        mock.set_offset(2, 100);
        mock.run_beats(2);
        let tags: Vec<Tag> = std::iter::from_fn(|| mock.pop_tag()).collect();
        assert_eq!(
            tags,
            vec![
                Tag::new(0, 16384),
                Tag::new(2, 16484),
                Tag::new(0, 32768),
                Tag::new(2, 32868),
            ]
        );
        assert_eq!(mock.ticks(), 52);
    }

    #[test]
    fn realign_request_clears_done_unless_automatic() {
        let mut mock = MockPeripheral::new(&hw());
        mock.set_align_done(true);
        mock.set_auto_align(false);
        mock.request_align(AlignStage::Stage1);
        assert!(!mock.align_done());
        assert_eq!(mock.align_requests(), &[AlignStage::Stage1]);
    }

    #[test]
    fn silent_oscillator_fails_bring_up() {
        let mut osc = MockOscillator::new(false);
        assert_eq!(osc.initialize(), Err(SpllError::ChipNotResponding));
        assert!(!osc.initialized());
    }
}
