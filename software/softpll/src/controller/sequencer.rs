//! Mode sequencer: decides which loops run, in what order they start, and
//! how the system recovers after a loop loses lock.
//!
//! Each mode owns an explicit ordered list of startup states. The sequencer
//! only ever moves forward through that list or jumps back to one of its
//! entries on a delock, so every restart path ends in `Ready` again or stays
//! parked in a waiting state until its loop locks.
//!
//! [`Sequencer::update`] is the whole per-tag action: it takes the tag (if
//! any) and a snapshot of hardware inputs and pushes register writes into an
//! [`Effects`] buffer, without touching hardware itself.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::SpllConfig;
use crate::error::SpllError;
use crate::loops::{ExternalLoop, HelperLoop, MainLoop, MainState, PhaseTracker, RealignState};
use crate::peripheral::{ActuatorWrite, Effects, HwInputs};
use crate::tag::Tag;

/// Operating mode of the timing core
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Disabled,
    /// Local timebase follows an external 10 MHz / PPS reference
    GrandMaster { align_pps: bool },
    /// Local oscillator runs free; only the helper is disciplined
    FreeRunningMaster,
    /// Local oscillator follows the reference recovered on `ref_channel`
    Slave { ref_channel: usize },
}

impl Mode {
    /// States visited, in order, when starting up in this mode
    pub fn startup_sequence(&self) -> &'static [SeqState] {
        use SeqState::*;
        match self {
            Mode::Disabled => &[Disabled],
            Mode::GrandMaster { .. } => &[
                ClearDacs,
                WaitClearDacs,
                StartExternal,
                WaitExternal,
                StartHelper,
                WaitHelper,
                Ready,
            ],
            Mode::FreeRunningMaster => &[ClearDacs, WaitClearDacs, StartHelper, WaitHelper, Ready],
            Mode::Slave { .. } => &[
                ClearDacs,
                WaitClearDacs,
                StartHelper,
                WaitHelper,
                StartMain,
                WaitMain,
                Ready,
            ],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SeqState {
    ClearDacs = 0,
    WaitClearDacs = 1,
    StartExternal = 2,
    WaitExternal = 3,
    StartHelper = 4,
    WaitHelper = 5,
    StartMain = 6,
    WaitMain = 7,
    Ready = 8,
    Disabled = 9,
}

impl SeqState {
    pub fn from_u8(v: u8) -> Option<Self> {
        use SeqState::*;
        Some(match v {
            0 => ClearDacs,
            1 => WaitClearDacs,
            2 => StartExternal,
            3 => WaitExternal,
            4 => StartHelper,
            5 => WaitHelper,
            6 => StartMain,
            7 => WaitMain,
            8 => Ready,
            9 => Disabled,
            _ => return None,
        })
    }
}

/// Secondary output disciplined to the local oscillator output
#[derive(Clone, Debug)]
struct AuxOutput {
    requested: bool,
    main: MainLoop,
}

#[derive(Clone, Debug)]
pub struct Sequencer {
    cfg: SpllConfig,
    settle_ticks: u32,

    mode: Mode,
    state: SeqState,
    clear_start: u32,
    helper_locked: bool,
    delock_count: u32,

    helper: HelperLoop,
    ext: ExternalLoop,
    main: MainLoop,
    aux: Vec<AuxOutput>,
    ptrackers: Vec<PhaseTracker>,
}

impl Sequencer {
    /// A sequencer in `Disabled` mode
    pub fn new(cfg: &SpllConfig) -> Self {
        let hw = &cfg.hw;
        let local = hw.local_channel();
        let aux = (1..hw.n_out)
            .map(|output| AuxOutput {
                requested: false,
                main: MainLoop::new(cfg, local, hw.out_channel(output), output),
            })
            .collect();
        let ptrackers = (0..hw.n_ref)
            .map(|ch| PhaseTracker::new(ch, local, cfg.ptracker.n_avg, hw.hpll_n))
            .collect();

        Self {
            cfg: cfg.clone(),
            settle_ticks: cfg.clear_dacs_settle_ticks(),

            mode: Mode::Disabled,
            state: SeqState::Disabled,
            clear_start: 0,
            helper_locked: false,
            delock_count: 0,

            helper: HelperLoop::new(cfg, local),
            ext: ExternalLoop::new(cfg),
            main: MainLoop::new(cfg, 0, local, 0),
            aux,
            ptrackers,
        }
    }

    /// Switch mode, discarding all loop state. Rejected without side effects
    /// if a slave reference channel is out of range.
    pub fn set_mode(&mut self, mode: Mode, fx: &mut Effects) -> Result<(), SpllError> {
        let local = self.cfg.hw.local_channel();
        let helper_ref = match mode {
            Mode::Slave { ref_channel } if ref_channel >= self.cfg.hw.n_ref => {
                return Err(SpllError::InvalidChannel(ref_channel));
            }
            Mode::Slave { ref_channel } => ref_channel,
            _ => local,
        };

        self.stop_loops(fx);
        self.ext.stop(fx);

        self.helper = HelperLoop::new(&self.cfg, helper_ref);
        self.ext = ExternalLoop::new(&self.cfg);
        self.main = MainLoop::new(&self.cfg, helper_ref, local, 0);
        for aux in self.aux.iter_mut() {
            let (ref_ch, out_ch, output) =
                (aux.main.ref_channel(), aux.main.out_channel(), aux.main.output());
            aux.main = MainLoop::new(&self.cfg, ref_ch, out_ch, output);
        }
        for t in self.ptrackers.iter_mut() {
            if t.enabled() {
                t.start(fx);
            }
        }

        self.mode = mode;
        self.helper_locked = false;
        self.state = mode.startup_sequence()[0];
        info!("Mode set to {mode:?}");
        Ok(())
    }

    /// Evaluate one tag, or none when the FIFO was found empty
    pub fn update(&mut self, tag: Option<Tag>, inputs: &HwInputs, fx: &mut Effects) {
        if let Some(tag) = tag {
            self.route(tag, inputs, fx);
        }
        if self.ext_active() {
            self.ext.poll(inputs, fx);
        }
        self.step(inputs, fx);
    }

    fn ext_active(&self) -> bool {
        matches!(self.mode, Mode::GrandMaster { .. })
            && matches!(
                self.state,
                SeqState::WaitExternal
                    | SeqState::StartHelper
                    | SeqState::WaitHelper
                    | SeqState::Ready
            )
    }

    fn helper_active(&self) -> bool {
        matches!(
            self.state,
            SeqState::WaitHelper | SeqState::StartMain | SeqState::WaitMain | SeqState::Ready
        )
    }

    fn main_active(&self) -> bool {
        matches!(self.mode, Mode::Slave { .. })
            && matches!(self.state, SeqState::WaitMain | SeqState::Ready)
    }

    fn route(&mut self, tag: Tag, inputs: &HwInputs, fx: &mut Effects) {
        if self.ext_active() {
            self.ext.update(tag, inputs, fx);
        }
        if self.helper_active() {
            self.helper.update(tag, inputs, fx);
        }
        if self.main_active() {
            self.main.update(tag, fx);
        }
        if self.state == SeqState::Ready {
            for aux in self.aux.iter_mut() {
                if aux.main.state() != MainState::Disabled {
                    aux.main.update(tag, fx);
                }
            }
            for t in self.ptrackers.iter_mut() {
                t.update(tag);
            }
        }
    }

    fn step(&mut self, inputs: &HwInputs, fx: &mut Effects) {
        match self.state {
            SeqState::ClearDacs => {
                self.stop_loops(fx);
                fx.push(ActuatorWrite::HelperDac(self.cfg.sequencer.safe_helper_dac));
                for output in 0..self.cfg.hw.n_out {
                    fx.push(ActuatorWrite::MainDac {
                        output,
                        value: self.cfg.sequencer.safe_main_dac,
                    });
                }
                for t in self.ptrackers.iter().filter(|t| t.enabled()) {
                    t.enable_taggers(fx);
                }
                self.clear_start = inputs.now;
                self.state = SeqState::WaitClearDacs;
            }
            SeqState::WaitClearDacs => {
                if inputs.now.wrapping_sub(self.clear_start) > self.settle_ticks {
                    self.advance();
                }
            }
            SeqState::StartExternal => {
                let align_pps = matches!(self.mode, Mode::GrandMaster { align_pps: true });
                self.ext.start(align_pps, fx);
                self.advance();
            }
            SeqState::WaitExternal => {
                if self.ext.locked() {
                    self.advance();
                } else if self.ext.realign_state() == RealignState::Invalid {
                    warn!("PPS realignment failed, restarting external loop");
                    self.state = SeqState::StartExternal;
                }
            }
            SeqState::StartHelper => {
                self.helper.start(fx);
                self.advance();
            }
            SeqState::WaitHelper => {
                if self.helper.locked() {
                    self.helper_locked = true;
                    self.advance();
                }
            }
            SeqState::StartMain => {
                self.main.start(fx);
                self.advance();
            }
            SeqState::WaitMain => {
                if !self.helper.locked() {
                    warn!("Helper lost lock while main loop was locking");
                    self.helper_locked = false;
                    self.state = SeqState::ClearDacs;
                } else if self.main.locked() {
                    self.advance();
                }
            }
            SeqState::Ready => self.check_ready(fx),
            SeqState::Disabled => {}
        }
    }

    /// Re-check lock of every loop the mode depends on, in priority order
    fn check_ready(&mut self, fx: &mut Effects) {
        if !self.helper.locked() {
            self.helper_locked = false;
            self.restart(SeqState::ClearDacs, "Helper loop lost lock", fx);
            return;
        }
        if matches!(self.mode, Mode::GrandMaster { .. }) && !self.ext.locked() {
            self.restart(SeqState::StartExternal, "External loop lost lock", fx);
            return;
        }
        if matches!(self.mode, Mode::Slave { .. }) && !self.main.locked() {
            self.restart(SeqState::ClearDacs, "Main loop lost lock", fx);
            return;
        }

        for aux in self.aux.iter_mut() {
            if aux.requested && aux.main.state() == MainState::Disabled {
                aux.main.start(fx);
            }
        }
    }

    fn restart(&mut self, to: SeqState, reason: &str, fx: &mut Effects) {
        self.delock_count = self.delock_count.wrapping_add(1);
        warn!(
            "{reason}, restarting from {to:?} (delock count {})",
            self.delock_count
        );
        for aux in self.aux.iter_mut() {
            if aux.main.state() != MainState::Disabled {
                aux.main.stop(fx);
            }
        }
        self.state = to;
    }

    fn advance(&mut self) {
        let seq = self.mode.startup_sequence();
        let next = seq
            .iter()
            .position(|s| *s == self.state)
            .and_then(|pos| seq.get(pos + 1));
        if let Some(&next) = next {
            debug!("Sequencer {:?} -> {next:?}", self.state);
            if next == SeqState::Ready {
                info!("All loops locked in {:?}", self.mode);
            }
            self.state = next;
        }
    }

    /// Stop every disciplining loop except the external one
    fn stop_loops(&mut self, fx: &mut Effects) {
        self.helper.stop(fx);
        self.main.stop(fx);
        for aux in self.aux.iter_mut() {
            aux.main.stop(fx);
        }
    }

    /// Set the main loop phase shift target, in phase units
    pub fn set_phase_shift(&mut self, target: i32) -> Result<(), SpllError> {
        if !matches!(self.mode, Mode::Slave { .. }) {
            return Err(SpllError::NotInSlaveMode);
        }
        self.main.set_phase_shift(target);
        Ok(())
    }

    pub fn enable_ptracker(
        &mut self,
        channel: usize,
        enable: bool,
        fx: &mut Effects,
    ) -> Result<(), SpllError> {
        let t = self
            .ptrackers
            .get_mut(channel)
            .ok_or(SpllError::InvalidChannel(channel))?;
        if enable && !t.enabled() {
            t.start(fx);
        } else if !enable {
            t.stop();
        }
        Ok(())
    }

    /// Request or release an auxiliary output. Outputs start once the
    /// sequencer is `Ready`.
    pub fn set_aux_enabled(
        &mut self,
        output: usize,
        enable: bool,
        fx: &mut Effects,
    ) -> Result<(), SpllError> {
        let aux = output
            .checked_sub(1)
            .and_then(|i| self.aux.get_mut(i))
            .ok_or(SpllError::InvalidOutput(output))?;
        aux.requested = enable;
        if !enable && aux.main.state() != MainState::Disabled {
            aux.main.stop(fx);
        }
        Ok(())
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn state(&self) -> SeqState {
        self.state
    }

    pub fn delock_count(&self) -> u32 {
        self.delock_count
    }

    /// Helper lock as last acknowledged by the sequencer
    pub fn helper_locked(&self) -> bool {
        self.helper_locked
    }

    pub fn helper(&self) -> &HelperLoop {
        &self.helper
    }

    pub fn external(&self) -> &ExternalLoop {
        &self.ext
    }

    pub fn main(&self) -> &MainLoop {
        &self.main
    }

    /// Loop of auxiliary output `output` (numbered from 1)
    pub fn aux(&self, output: usize) -> Option<&MainLoop> {
        output
            .checked_sub(1)
            .and_then(|i| self.aux.get(i))
            .map(|a| &a.main)
    }

    pub fn ptrackers(&self) -> &[PhaseTracker] {
        &self.ptrackers
    }

    pub fn config(&self) -> &SpllConfig {
        &self.cfg
    }
}
