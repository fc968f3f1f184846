//! External-reference loop: disciplines the local timebase to an external
//! 10 MHz / PPS reference, with optional PPS edge realignment.

use tracing::{error, info, warn};

use crate::calc::{LockDetector, LockEvent, LowPass, PiController};
use crate::config::{ExternalConfig, SpllConfig};
use crate::diag::{DiagKind, DiagSource, EVT_LOCKED, EVT_START};
use crate::peripheral::{ActuatorWrite, AlignStage, Effects, HwInputs};
use crate::tag::Tag;

use super::LoopStatus;

/// Progress of the PPS realignment
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum RealignState {
    Stage1,
    Stage1Wait,
    Stage2,
    Stage2Wait,
    /// A stage timed out
    Invalid,
    /// No realignment requested
    Disabled,
    Done,
}

#[derive(Clone, Debug)]
pub struct ExternalLoop {
    cfg: ExternalConfig,
    frac_bits: u32,
    realign_timeout: u32,
    ref_channel: usize,

    pi: PiController,
    ld: LockDetector,
    lp_short: LowPass,
    lp_long: LowPass,

    err_offset: i64,
    err_d0: Option<i64>,
    raw_d0: i64,

    realign: RealignState,
    realign_start: u32,
    ref_present: bool,
    sample_n: i32,
}

impl ExternalLoop {
    pub fn new(cfg: &SpllConfig) -> Self {
        let frac_bits = cfg.hw.pi_frac_bits;
        Self {
            cfg: cfg.external.clone(),
            frac_bits,
            realign_timeout: cfg.realign_timeout_ticks(),
            ref_channel: cfg.hw.ext_channel(),

            pi: PiController::new(&cfg.external.pi, frac_bits),
            ld: LockDetector::new(&cfg.external.ld),
            lp_short: LowPass::new(cfg.external.lp_short_alpha),
            lp_long: LowPass::new(cfg.external.lp_long_alpha),

            err_offset: 0,
            err_d0: None,
            raw_d0: 0,

            realign: RealignState::Disabled,
            realign_start: 0,
            ref_present: true,
            sample_n: 0,
        }
    }

    /// Reset the loop, enable the external input, and optionally arm PPS realignment
    pub fn start(&mut self, align_pps: bool, fx: &mut Effects) {
        self.pi = PiController::new(&self.cfg.pi, self.frac_bits);
        self.ld = LockDetector::new(&self.cfg.ld);
        self.lp_short.reset();
        self.lp_long.reset();
        self.err_offset = 0;
        self.err_d0 = None;
        self.raw_d0 = 0;
        self.realign = if align_pps {
            RealignState::Stage1
        } else {
            RealignState::Disabled
        };
        self.ref_present = true;
        self.sample_n = 0;

        fx.push(ActuatorWrite::External { enable: true });
        fx.push(ActuatorWrite::Tagger {
            channel: self.ref_channel,
            enable: true,
        });
        fx.sample_last(DiagSource::External, DiagKind::Event, EVT_START);
        info!("External loop starting, PPS realignment {align_pps}");
    }

    pub fn stop(&mut self, fx: &mut Effects) {
        fx.push(ActuatorWrite::Tagger {
            channel: self.ref_channel,
            enable: false,
        });
        fx.push(ActuatorWrite::External { enable: false });
        self.ld.reset();
        self.realign = RealignState::Disabled;
    }

    pub fn update(&mut self, tag: Tag, inputs: &HwInputs, fx: &mut Effects) -> LoopStatus {
        if tag.channel != self.ref_channel {
            return LoopStatus::from_locked(self.locked());
        }
        if !inputs.ext_ref_present {
            self.hold_neutral(fx);
            return LoopStatus::Locking;
        }
        self.ref_present = true;

        let bits = self.cfg.error_bits;
        let raw = tag.value as i64;
        let wrapped = raw & (1 << bits) != 0;
        let value = raw & ((1 << bits) - 1);

        if wrapped {
            if value > self.raw_d0 {
                self.err_offset -= 1 << bits;
            } else {
                self.err_offset += 1 << bits;
            }
        }
        self.raw_d0 = value;

        let cur = value + self.err_offset;
        // First sample only anchors the differentiator
        let Some(prev) = self.err_d0.replace(cur) else {
            return LoopStatus::Locking;
        };
        let err = (cur - prev).clamp(i32::MIN as i64, i32::MAX as i64) as i32;

        let y = self.pi.update(err);
        let y2 = self.lp_short.update(y);
        let ylt = self.lp_long.update(y);
        fx.push(ActuatorWrite::MainDac {
            output: 0,
            value: y2 & 0xffff,
        });

        // Lock means the fast output has settled onto its own slow trend
        let event = self.ld.update(y2 - ylt);

        fx.sample(DiagSource::External, DiagKind::Err, ylt);
        fx.sample(DiagSource::External, DiagKind::SampleId, self.sample_n);
        self.sample_n = self.sample_n.wrapping_add(1);
        if event == LockEvent::BecameLocked {
            fx.sample(DiagSource::External, DiagKind::Event, EVT_LOCKED);
        }
        fx.sample_last(DiagSource::External, DiagKind::Y, y2);

        match event {
            LockEvent::BecameLocked => info!("External loop locked"),
            LockEvent::BecameUnlocked => warn!("External loop lost lock"),
            LockEvent::NoChange => {}
        }

        LoopStatus::from_locked(self.locked())
    }

    /// Per-evaluation housekeeping: reference presence and PPS realignment
    pub fn poll(&mut self, inputs: &HwInputs, fx: &mut Effects) {
        if !inputs.ext_ref_present {
            self.hold_neutral(fx);
            return;
        }
        self.ref_present = true;

        match self.realign {
            RealignState::Stage1 => {
                if self.ld.locked() {
                    info!("External loop locked, aligning PPS (stage 1)");
                    fx.push(ActuatorWrite::Align(AlignStage::Stage1));
                    self.realign_start = inputs.now;
                    self.realign = RealignState::Stage1Wait;
                }
            }
            RealignState::Stage1Wait => {
                if inputs.align_done {
                    self.realign = RealignState::Stage2;
                } else if self.timed_out(inputs.now) {
                    error!("PPS realignment stage 1 timed out");
                    self.realign = RealignState::Invalid;
                }
            }
            RealignState::Stage2 => {
                fx.push(ActuatorWrite::Align(AlignStage::Stage2));
                self.realign_start = inputs.now;
                self.realign = RealignState::Stage2Wait;
            }
            RealignState::Stage2Wait => {
                if inputs.align_done {
                    info!("PPS realignment done");
                    self.realign = RealignState::Done;
                } else if self.timed_out(inputs.now) {
                    error!("PPS realignment stage 2 timed out");
                    self.realign = RealignState::Invalid;
                }
            }
            RealignState::Invalid | RealignState::Disabled | RealignState::Done => {}
        }
    }

    fn timed_out(&self, now: u32) -> bool {
        now.wrapping_sub(self.realign_start) > self.realign_timeout
    }

    /// Park the DAC at its neutral value once per loss of the reference
    fn hold_neutral(&mut self, fx: &mut Effects) {
        if self.ref_present {
            warn!("External reference absent, holding DAC at neutral");
            fx.push(ActuatorWrite::MainDac {
                output: 0,
                value: self.cfg.neutral_dac,
            });
        }
        self.ref_present = false;
        self.ld.reset();
    }

    /// Phase loop locked and realignment either not requested or complete
    pub fn locked(&self) -> bool {
        self.ld.locked() && matches!(self.realign, RealignState::Disabled | RealignState::Done)
    }

    pub fn phase_locked(&self) -> bool {
        self.ld.locked()
    }

    pub fn realign_state(&self) -> RealignState {
        self.realign
    }

    pub fn ref_channel(&self) -> usize {
        self.ref_channel
    }

    pub fn ref_present(&self) -> bool {
        self.ref_present
    }
}
