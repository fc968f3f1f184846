//! Main loop: disciplines one output oscillator to a reference channel
//!
//! The loop first matches frequency by comparing beat periods measured on
//! the reference and output channels, then hands over to phase tracking
//! with the frequency stage's last DAC value as the starting point.
//! Commanded phase shifts are slewed one phase unit per processed tag pair.

use std::collections::VecDeque;

use tracing::{info, warn};

use crate::calc::{LockDetector, LockEvent, PiController};
use crate::config::{MainConfig, PairingStrategy, SpllConfig};
use crate::diag::{DiagKind, DiagSource, EVT_LOCKED, EVT_START};
use crate::peripheral::{ActuatorWrite, Effects};
use crate::tag::{Tag, TagUnwrapper, centred, wrapped_delta};

use super::LoopStatus;

/// Most unmatched tags kept per side by the sequenced pairing
const SEQ_QUEUE_DEPTH: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MainState {
    Disabled,
    FrequencyLock,
    PhaseLock,
}

/// Forms (reference, output) phase pairs for the phase stage.
///
/// `Masked` compares each output tag with the latest reference tag and
/// takes the difference modulo one beat period, so phase is resolved within
/// +/- half a beat. That holds once frequency lock has brought the two
/// channels close; a larger offset aliases.
///
/// `Sequenced` numbers the tags of each side and only pairs equal sequence
/// numbers, dropping whichever side ran ahead. The unwrapped phases are
/// differenced modulo the tag counter range, since each side's unwrapper
/// may have started on a different counter lap.
#[derive(Clone, Debug)]
enum TagPairer {
    Masked {
        latest_ref: Option<i64>,
        pending_out: Option<i64>,
    },
    Sequenced {
        refs: VecDeque<(u32, i64)>,
        outs: VecDeque<(u32, i64)>,
        next_ref: u32,
        next_out: u32,
    },
}

impl TagPairer {
    fn new(strategy: PairingStrategy) -> Self {
        match strategy {
            PairingStrategy::Masked => TagPairer::Masked {
                latest_ref: None,
                pending_out: None,
            },
            PairingStrategy::Sequenced => TagPairer::Sequenced {
                refs: VecDeque::with_capacity(SEQ_QUEUE_DEPTH + 1),
                outs: VecDeque::with_capacity(SEQ_QUEUE_DEPTH + 1),
                next_ref: 0,
                next_out: 0,
            },
        }
    }

    fn push_ref(&mut self, phase: i64) {
        match self {
            TagPairer::Masked { latest_ref, .. } => *latest_ref = Some(phase),
            TagPairer::Sequenced { refs, next_ref, .. } => {
                refs.push_back((*next_ref, phase));
                *next_ref = next_ref.wrapping_add(1);
                if refs.len() > SEQ_QUEUE_DEPTH {
                    refs.pop_front();
                }
            }
        }
    }

    fn push_out(&mut self, phase: i64) {
        match self {
            TagPairer::Masked { pending_out, .. } => *pending_out = Some(phase),
            TagPairer::Sequenced { outs, next_out, .. } => {
                outs.push_back((*next_out, phase));
                *next_out = next_out.wrapping_add(1);
                if outs.len() > SEQ_QUEUE_DEPTH {
                    outs.pop_front();
                }
            }
        }
    }

    /// Next complete pair, if any
    fn next_pair(&mut self) -> Option<(i64, i64)> {
        match self {
            TagPairer::Masked {
                latest_ref,
                pending_out,
            } => match (*latest_ref, *pending_out) {
                (Some(r), Some(o)) => {
                    *pending_out = None;
                    Some((r, o))
                }
                _ => None,
            },
            TagPairer::Sequenced { refs, outs, .. } => loop {
                let (&(seq_r, r), &(seq_o, o)) = (refs.front()?, outs.front()?);
                if seq_r == seq_o {
                    refs.pop_front();
                    outs.pop_front();
                    return Some((r, o));
                } else if seq_r < seq_o {
                    refs.pop_front();
                } else {
                    outs.pop_front();
                }
            },
        }
    }

    fn error(&self, r: i64, o: i64, hpll_n: u32, tag_bits: u32) -> i64 {
        match self {
            TagPairer::Masked { .. } => centred(r - o, hpll_n),
            TagPairer::Sequenced { .. } => centred(r - o, tag_bits),
        }
    }
}

#[derive(Clone, Debug)]
pub struct MainLoop {
    cfg: MainConfig,
    frac_bits: u32,
    tag_bits: u32,
    hpll_n: u32,

    ref_channel: usize,
    out_channel: usize,
    output: usize,

    state: MainState,
    pi: PiController,
    ld: LockDetector,

    // Frequency stage
    tag_ref_d: Option<u32>,
    tag_out_d: Option<u32>,
    period_ref: i64,
    period_out: i64,
    ref_ready: bool,
    out_ready: bool,

    // Phase stage
    unwrap_ref: TagUnwrapper,
    unwrap_out: TagUnwrapper,
    pairer: TagPairer,
    phase_shift_target: i32,
    phase_shift_current: i32,

    sample_n: i32,
}

impl MainLoop {
    /// Loop steering DAC `output` so that `out_channel` follows `ref_channel`
    pub fn new(cfg: &SpllConfig, ref_channel: usize, out_channel: usize, output: usize) -> Self {
        let frac_bits = cfg.hw.pi_frac_bits;
        Self {
            cfg: cfg.main.clone(),
            frac_bits,
            tag_bits: cfg.hw.tag_bits,
            hpll_n: cfg.hw.hpll_n,

            ref_channel,
            out_channel,
            output,

            state: MainState::Disabled,
            pi: PiController::new(&cfg.main.freq_pi, frac_bits),
            ld: LockDetector::new(&cfg.main.freq_ld),

            tag_ref_d: None,
            tag_out_d: None,
            period_ref: 0,
            period_out: 0,
            ref_ready: false,
            out_ready: false,

            unwrap_ref: TagUnwrapper::new(cfg.hw.tag_bits),
            unwrap_out: TagUnwrapper::new(cfg.hw.tag_bits),
            pairer: TagPairer::new(cfg.main.pairing),
            phase_shift_target: 0,
            phase_shift_current: 0,

            sample_n: 0,
        }
    }

    /// Begin frequency acquisition. A pending phase shift target is kept
    /// and re-applied from zero.
    pub fn start(&mut self, fx: &mut Effects) {
        self.state = MainState::FrequencyLock;
        self.pi = PiController::new(&self.cfg.freq_pi, self.frac_bits);
        self.ld = LockDetector::new(&self.cfg.freq_ld);
        self.tag_ref_d = None;
        self.tag_out_d = None;
        self.ref_ready = false;
        self.out_ready = false;
        self.phase_shift_current = 0;
        self.sample_n = 0;

        fx.push(ActuatorWrite::Tagger {
            channel: self.ref_channel,
            enable: true,
        });
        fx.push(ActuatorWrite::Tagger {
            channel: self.out_channel,
            enable: true,
        });
        fx.sample_last(DiagSource::MainPrelock, DiagKind::Event, EVT_START);
        info!(
            "Main loop {} starting: channel {} -> channel {}",
            self.output, self.ref_channel, self.out_channel
        );
    }

    /// Disable the loop. Only the output tagger is switched off, since the
    /// reference channel may be shared with other loops.
    pub fn stop(&mut self, fx: &mut Effects) {
        self.state = MainState::Disabled;
        self.ld.reset();
        fx.push(ActuatorWrite::Tagger {
            channel: self.out_channel,
            enable: false,
        });
    }

    pub fn update(&mut self, tag: Tag, fx: &mut Effects) -> LoopStatus {
        if tag.channel != self.ref_channel && tag.channel != self.out_channel {
            return LoopStatus::from_locked(self.locked());
        }

        match self.state {
            MainState::Disabled => LoopStatus::Locking,
            MainState::FrequencyLock => {
                if self.freq_update(tag, fx) {
                    self.enter_phase_lock();
                }
                LoopStatus::Locking
            }
            MainState::PhaseLock => self.phase_update(tag, fx),
        }
    }

    /// Returns true when the frequency stage has just locked
    fn freq_update(&mut self, tag: Tag, fx: &mut Effects) -> bool {
        if tag.channel == self.ref_channel {
            if let Some(prev) = self.tag_ref_d {
                self.period_ref = wrapped_delta(prev, tag.value, self.tag_bits);
                self.ref_ready = true;
            }
            self.tag_ref_d = Some(tag.value);
        } else {
            if let Some(prev) = self.tag_out_d {
                self.period_out = wrapped_delta(prev, tag.value, self.tag_bits);
                self.out_ready = true;
            }
            self.tag_out_d = Some(tag.value);
        }

        // Only act on two fresh period measurements
        if !(self.ref_ready && self.out_ready) {
            return false;
        }
        self.ref_ready = false;
        self.out_ready = false;

        let err = clamp_i32(self.period_ref - self.period_out);
        let y = self.pi.update(err);
        fx.push(ActuatorWrite::MainDac {
            output: self.output,
            value: y,
        });

        fx.sample(DiagSource::MainPrelock, DiagKind::Period, clamp_i32(self.period_ref));
        fx.sample(DiagSource::MainPrelock, DiagKind::Err, err);
        fx.sample(DiagSource::MainPrelock, DiagKind::SampleId, self.sample_n);
        self.sample_n = self.sample_n.wrapping_add(1);
        fx.sample_last(DiagSource::MainPrelock, DiagKind::Y, y);

        self.ld.update(err) == LockEvent::BecameLocked
    }

    fn enter_phase_lock(&mut self) {
        info!(
            "Main loop {} frequency locked, switching to phase at DAC {}",
            self.output,
            self.pi.y()
        );
        self.pi = PiController::new(&self.cfg.phase_pi, self.frac_bits).with_bias(self.pi.y());
        self.ld = LockDetector::new(&self.cfg.phase_ld);
        self.unwrap_ref.reset();
        self.unwrap_out.reset();
        self.pairer = TagPairer::new(self.cfg.pairing);
        self.state = MainState::PhaseLock;
    }

    fn phase_update(&mut self, tag: Tag, fx: &mut Effects) -> LoopStatus {
        if tag.channel == self.ref_channel {
            let phase = self.unwrap_ref.unwrap(tag.value);
            self.pairer.push_ref(phase);
            fx.sample(DiagSource::Main, DiagKind::Ref, tag.value as i32);
        } else {
            let phase = self.unwrap_out.unwrap(tag.value);
            self.pairer.push_out(phase);
            fx.sample(DiagSource::Main, DiagKind::Tag, tag.value as i32);
        }

        while let Some((r, o)) = self.pairer.next_pair() {
            let err = clamp_i32(self.pairer.error(r, o, self.hpll_n, self.tag_bits));
            let y = self.pi.update(err);
            fx.push(ActuatorWrite::MainDac {
                output: self.output,
                value: y,
            });

            fx.sample(DiagSource::Main, DiagKind::SampleId, self.sample_n);
            self.sample_n = self.sample_n.wrapping_add(1);
            fx.sample(DiagSource::Main, DiagKind::Setpoint, self.phase_shift_current);
            fx.sample(DiagSource::Main, DiagKind::Y, y);

            let event = self.ld.update(err);
            if event == LockEvent::BecameLocked {
                fx.sample(DiagSource::Main, DiagKind::Event, EVT_LOCKED);
            }
            fx.sample_last(DiagSource::Main, DiagKind::Err, err);

            match event {
                LockEvent::BecameLocked => info!("Main loop {} phase locked", self.output),
                LockEvent::BecameUnlocked => warn!("Main loop {} lost phase lock", self.output),
                LockEvent::NoChange => {}
            }

            // Slew toward the commanded shift
            if self.phase_shift_current < self.phase_shift_target {
                self.phase_shift_current += 1;
                self.unwrap_ref.adjust(1);
            } else if self.phase_shift_current > self.phase_shift_target {
                self.phase_shift_current -= 1;
                self.unwrap_ref.adjust(-1);
            }
        }

        LoopStatus::from_locked(self.locked())
    }

    /// Set the phase shift target in phase units
    pub fn set_phase_shift(&mut self, target: i32) {
        self.phase_shift_target = target;
    }

    pub fn shift_in_progress(&self) -> bool {
        self.phase_shift_current != self.phase_shift_target
    }

    pub fn phase_shift_current(&self) -> i32 {
        self.phase_shift_current
    }

    pub fn phase_shift_target(&self) -> i32 {
        self.phase_shift_target
    }

    pub fn locked(&self) -> bool {
        self.state == MainState::PhaseLock && self.ld.locked()
    }

    pub fn state(&self) -> MainState {
        self.state
    }

    pub fn ref_channel(&self) -> usize {
        self.ref_channel
    }

    pub fn out_channel(&self) -> usize {
        self.out_channel
    }

    pub fn output(&self) -> usize {
        self.output
    }

    pub fn dac(&self) -> i32 {
        self.pi.y()
    }
}

fn clamp_i32(v: i64) -> i32 {
    v.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}
