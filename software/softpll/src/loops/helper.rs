//! Helper loop: disciplines the DDMTD offset oscillator to a reference channel
//!
//! The helper clock runs slightly off the reference frequency so that the
//! beat between the two is slow enough to time-stamp. Startup is split in
//! two stages. Prelocking steers the DAC from the hardware period counter
//! alone; once that settles, phase tracking takes over from the tags,
//! starting from the prelock output so that the DAC does not jump.

use tracing::{info, warn};

use crate::calc::{LockDetector, LockEvent, PiController};
use crate::config::{HelperConfig, SpllConfig};
use crate::diag::{DiagKind, DiagSource, EVT_LOCKED, EVT_START};
use crate::peripheral::{ActuatorWrite, Effects, HwInputs};
use crate::tag::{Tag, TagUnwrapper};

use super::LoopStatus;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HelperStage {
    Prelocking,
    PhaseTracking,
}

#[derive(Clone, Debug)]
pub struct HelperLoop {
    cfg: HelperConfig,
    frac_bits: u32,
    hpll_n: u32,
    ref_channel: usize,

    stage: HelperStage,
    prelock_pi: PiController,
    prelock_ld: LockDetector,
    pi: PiController,
    ld: LockDetector,

    unwrap: TagUnwrapper,
    setpoint: Option<i64>,
    sample_n: i32,
}

impl HelperLoop {
    pub fn new(cfg: &SpllConfig, ref_channel: usize) -> Self {
        let frac_bits = cfg.hw.pi_frac_bits;
        Self {
            cfg: cfg.helper.clone(),
            frac_bits,
            hpll_n: cfg.hw.hpll_n,
            ref_channel,

            stage: HelperStage::Prelocking,
            prelock_pi: PiController::new(&cfg.helper.prelock_pi, frac_bits),
            prelock_ld: LockDetector::new(&cfg.helper.prelock_ld),
            pi: PiController::new(&cfg.helper.phase_pi, frac_bits),
            ld: LockDetector::new(&cfg.helper.phase_ld),

            unwrap: TagUnwrapper::new(cfg.hw.tag_bits),
            setpoint: None,
            sample_n: 0,
        }
    }

    /// Reset both stages and enable the reference tagger
    pub fn start(&mut self, fx: &mut Effects) {
        self.stage = HelperStage::Prelocking;
        self.prelock_pi = PiController::new(&self.cfg.prelock_pi, self.frac_bits);
        self.prelock_ld = LockDetector::new(&self.cfg.prelock_ld);
        self.pi = PiController::new(&self.cfg.phase_pi, self.frac_bits);
        self.ld = LockDetector::new(&self.cfg.phase_ld);
        self.unwrap.reset();
        self.setpoint = None;
        self.sample_n = 0;

        fx.push(ActuatorWrite::Tagger {
            channel: self.ref_channel,
            enable: true,
        });
        fx.sample_last(DiagSource::Helper, DiagKind::Event, EVT_START);
        info!("Helper loop starting on channel {}", self.ref_channel);
    }

    pub fn stop(&mut self, fx: &mut Effects) {
        fx.push(ActuatorWrite::Tagger {
            channel: self.ref_channel,
            enable: false,
        });
        self.stage = HelperStage::Prelocking;
        self.ld.reset();
    }

    /// Process one tag. Tags from other channels are ignored.
    pub fn update(&mut self, tag: Tag, inputs: &HwInputs, fx: &mut Effects) -> LoopStatus {
        if tag.channel != self.ref_channel {
            return LoopStatus::from_locked(self.locked());
        }

        match self.stage {
            HelperStage::Prelocking => self.prelock_update(inputs, fx),
            HelperStage::PhaseTracking => self.phase_update(tag.value, fx),
        }
    }

    fn prelock_update(&mut self, inputs: &HwInputs, fx: &mut Effects) -> LoopStatus {
        // No fresh period measurement: hold the DAC
        let Some(err) = inputs.helper_freq_error else {
            return LoopStatus::Locking;
        };

        let y = self.prelock_pi.update(err);
        fx.push(ActuatorWrite::HelperDac(y));
        fx.sample(DiagSource::HelperPrelock, DiagKind::Y, y);
        fx.sample_last(DiagSource::HelperPrelock, DiagKind::Err, err);

        if self.prelock_ld.update(err) == LockEvent::BecameLocked {
            info!(
                "Helper prelock done on channel {}, handing over at DAC {y}",
                self.ref_channel
            );
            self.pi = PiController::new(&self.cfg.phase_pi, self.frac_bits).with_bias(y);
            self.ld = LockDetector::new(&self.cfg.phase_ld);
            self.unwrap.reset();
            self.setpoint = None;
            self.stage = HelperStage::PhaseTracking;
        }

        LoopStatus::Locking
    }

    fn phase_update(&mut self, value: u32, fx: &mut Effects) -> LoopStatus {
        let phase = self.unwrap.unwrap(value);
        fx.sample(DiagSource::Helper, DiagKind::Tag, value as i32);

        // First tag only anchors the setpoint
        let Some(prev_setpoint) = self.setpoint else {
            self.setpoint = Some(phase);
            return LoopStatus::Locking;
        };

        let mut setpoint = prev_setpoint + (1 << self.hpll_n);
        fx.sample(DiagSource::Helper, DiagKind::Ref, setpoint as i32);

        let clamp = self.cfg.error_clamp as i64;
        let err = (phase - setpoint).clamp(-clamp, clamp) as i32;

        // Rebase setpoint and epoch adder together before they grow unbounded
        let wrap = self.cfg.setpoint_wrap;
        if phase > wrap && setpoint > wrap {
            self.unwrap.adjust(-wrap);
            setpoint -= wrap;
        }
        self.setpoint = Some(setpoint);

        let y = self.pi.update(err);
        fx.push(ActuatorWrite::HelperDac(y));

        fx.sample(DiagSource::Helper, DiagKind::SampleId, self.sample_n);
        self.sample_n = self.sample_n.wrapping_add(1);
        fx.sample(DiagSource::Helper, DiagKind::Y, y);

        let event = self.ld.update(err);
        if event == LockEvent::BecameLocked {
            fx.sample(DiagSource::Helper, DiagKind::Event, EVT_LOCKED);
        }
        fx.sample_last(DiagSource::Helper, DiagKind::Err, err);

        match event {
            LockEvent::BecameLocked => info!("Helper locked on channel {}", self.ref_channel),
            LockEvent::BecameUnlocked => warn!("Helper lost lock on channel {}", self.ref_channel),
            LockEvent::NoChange => {}
        }

        LoopStatus::from_locked(self.ld.locked())
    }

    /// Phase tracking and its lock detector agree that the loop is locked
    pub fn locked(&self) -> bool {
        self.stage == HelperStage::PhaseTracking && self.ld.locked()
    }

    pub fn stage(&self) -> HelperStage {
        self.stage
    }

    pub fn ref_channel(&self) -> usize {
        self.ref_channel
    }

    pub fn setpoint(&self) -> Option<i64> {
        self.setpoint
    }

    /// Last DAC value of the active stage
    pub fn dac(&self) -> i32 {
        match self.stage {
            HelperStage::Prelocking => self.prelock_pi.y(),
            HelperStage::PhaseTracking => self.pi.y(),
        }
    }
}
