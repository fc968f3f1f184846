//! Host-facing control surface of the real-time subsystem
//!
//! Translates the host's numeric modes and picosecond phases into control
//! core commands, and assembles the fixed-layout status record the host polls.

use softpll_shared::state::{
    CHAN_DISABLED, CHAN_PMEAS_READY, CHAN_PTRACKER_ENABLED, CHAN_SHIFTING, RTS_DMTD_LOCKED,
    RTS_EXT_10M_VALID, RTS_EXT_PPS_VALID, RTS_REF_LOCKED,
};
use softpll_shared::{REF_NONE, RTS_PLL_CHANNELS, RtsMode, RtsState};
use tracing::info;

use crate::config::SpllConfig;
use crate::controller::{Mode, SeqState, SpllControl};
use crate::error::SpllError;
use crate::loops::RealignState;
use crate::units::PhaseUnits;

pub struct RtSubsystem<C: SpllControl> {
    ctl: C,
    units: PhaseUnits,
    n_ref: usize,
    state: RtsState,
}

impl<C: SpllControl> RtSubsystem<C> {
    pub fn new(ctl: C, cfg: &SpllConfig) -> Self {
        Self {
            ctl,
            units: PhaseUnits::from_config(&cfg.hw),
            n_ref: cfg.hw.n_ref,
            state: RtsState::default(),
        }
    }

    /// Current status record
    pub fn get_state(&mut self) -> RtsState {
        self.refresh();
        self.state
    }

    /// Select the operating mode. Boundary-clock mode leaves the PLL
    /// disabled until a reference is picked with [`Self::lock_channel`].
    pub fn set_mode(&mut self, mode: RtsMode) -> Result<(), SpllError> {
        let core_mode = match mode {
            RtsMode::GmExternal => Mode::GrandMaster { align_pps: true },
            RtsMode::GmFreeRunning => Mode::FreeRunningMaster,
            RtsMode::BoundaryClock | RtsMode::Disabled => Mode::Disabled,
            RtsMode::Unknown(code) => return Err(SpllError::InvalidMode(code)),
        };
        self.ctl.set_mode(core_mode)?;
        self.state.global.mode = mode.into();
        self.state.global.current_ref = REF_NONE;
        info!("RT subsystem mode set to {mode:?}");
        Ok(())
    }

    /// Start recovering time from `channel`. Boundary-clock mode only.
    pub fn lock_channel(&mut self, channel: u32, priority: u32) -> Result<(), SpllError> {
        if RtsMode::from(self.state.global.mode) != RtsMode::BoundaryClock {
            return Err(SpllError::NotInSlaveMode);
        }
        let ch = self.check_channel(channel)?;
        self.ctl.set_mode(Mode::Slave { ref_channel: ch })?;

        self.state.global.current_ref = channel;
        let slot = &mut self.state.channels[ch];
        slot.priority = priority;

        // Re-apply a setpoint given before this channel was selected
        let setpoint = slot.phase_setpoint;
        if setpoint != 0 {
            self.ctl.set_phase_shift(self.units.ps_to_units(setpoint))?;
        }
        info!("Locking to channel {channel} with priority {priority}");
        Ok(())
    }

    /// Set the phase setpoint of `channel` in picoseconds. Takes effect
    /// immediately on the current reference, otherwise once it is selected.
    pub fn adjust_phase(&mut self, channel: u32, phase_ps: i32) -> Result<(), SpllError> {
        if RtsMode::from(self.state.global.mode) != RtsMode::BoundaryClock {
            return Err(SpllError::NotInSlaveMode);
        }
        let ch = self.check_channel(channel)?;
        if self.state.global.current_ref == channel {
            self.ctl.set_phase_shift(self.units.ps_to_units(phase_ps))?;
        }
        self.state.channels[ch].phase_setpoint = phase_ps;
        Ok(())
    }

    pub fn enable_ptracker(&mut self, channel: u32, enable: bool) -> Result<(), SpllError> {
        let ch = self.check_channel(channel)?;
        self.ctl.enable_ptracker(ch, enable)
    }

    pub fn control(&self) -> &C {
        &self.ctl
    }

    pub fn control_mut(&mut self) -> &mut C {
        &mut self.ctl
    }

    /// Reference channels that also have a slot in the status record
    fn check_channel(&self, channel: u32) -> Result<usize, SpllError> {
        let ch = channel as usize;
        if ch >= self.n_ref.min(RTS_PLL_CHANNELS) {
            return Err(SpllError::InvalidChannel(ch));
        }
        Ok(ch)
    }

    fn refresh(&mut self) {
        let snap = self.ctl.status().snapshot();
        let global = &mut self.state.global;

        let mut flags = 0;
        if snap.helper_locked {
            flags |= RTS_DMTD_LOCKED;
        }
        if snap.state == SeqState::Ready {
            flags |= RTS_REF_LOCKED;
        }
        if let Mode::GrandMaster { .. } = snap.mode {
            if snap.ext_ref_present {
                flags |= RTS_EXT_10M_VALID;
            }
            if snap.realign == RealignState::Done {
                flags |= RTS_EXT_PPS_VALID;
            }
        }
        global.flags = flags;
        global.delock_count = snap.delock_count;

        let current_ref = global.current_ref;
        for (i, ch) in self.state.channels.iter_mut().enumerate() {
            ch.flags = 0;
            ch.phase_current = 0;
            ch.phase_loopback = 0;

            if i >= self.n_ref {
                ch.flags = CHAN_DISABLED;
                continue;
            }

            if i as u32 == current_ref {
                ch.phase_current = self.units.units_to_ps(snap.shift.current as i64);
                if snap.shift.in_progress {
                    ch.flags |= CHAN_SHIFTING;
                }
            }

            if let Some(t) = snap.trackers.get(i) {
                if t.enabled {
                    ch.flags |= CHAN_PTRACKER_ENABLED;
                }
                if t.ready {
                    ch.phase_loopback = self.units.units_to_ps(t.phase as i64);
                    ch.flags |= CHAN_PMEAS_READY;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::Spll;
    use crate::peripheral::MockPeripheral;

    fn subsystem() -> RtSubsystem<Spll<MockPeripheral>> {
        let mut cfg = SpllConfig::default();
        cfg.hw.n_ref = 4;
        let hw = MockPeripheral::new(&cfg.hw);
        let spll = Spll::new(cfg.clone(), hw).unwrap();
        RtSubsystem::new(spll, &cfg)
    }

    #[test]
    fn initial_record_has_no_reference() {
        let mut rts = subsystem();
        let state = rts.get_state();
        assert_eq!(RtsMode::from(state.global.mode), RtsMode::Disabled);
        assert_eq!(state.global.current_ref, REF_NONE);
        assert_eq!(state.channels[3].flags, 0);
        assert_eq!(state.channels[4].flags, CHAN_DISABLED);
        assert_eq!(state.channels[17].flags, CHAN_DISABLED);
    }

    #[test]
    fn unknown_mode_is_rejected_without_change() {
        let mut rts = subsystem();
        rts.set_mode(RtsMode::GmFreeRunning).unwrap();
        assert_eq!(
            rts.set_mode(RtsMode::Unknown(9)),
            Err(SpllError::InvalidMode(9))
        );
        assert_eq!(
            RtsMode::from(rts.get_state().global.mode),
            RtsMode::GmFreeRunning
        );
        assert_eq!(rts.control().sequencer().mode(), Mode::FreeRunningMaster);
    }

    #[test]
    fn boundary_clock_waits_for_lock_channel() {
        let mut rts = subsystem();
        assert_eq!(rts.lock_channel(1, 0), Err(SpllError::NotInSlaveMode));

        rts.set_mode(RtsMode::BoundaryClock).unwrap();
        assert_eq!(rts.control().sequencer().mode(), Mode::Disabled);
        assert_eq!(rts.lock_channel(4, 0), Err(SpllError::InvalidChannel(4)));

        rts.lock_channel(1, 3).unwrap();
        assert_eq!(
            rts.control().sequencer().mode(),
            Mode::Slave { ref_channel: 1 }
        );
        let state = rts.get_state();
        assert_eq!(state.global.current_ref, 1);
        assert_eq!(state.channels[1].priority, 3);
    }

    #[test]
    fn phase_setpoint_is_converted_to_units() {
        let mut rts = subsystem();
        assert_eq!(rts.adjust_phase(1, 1000), Err(SpllError::NotInSlaveMode));

        rts.set_mode(RtsMode::BoundaryClock).unwrap();
        // Stored for a channel that is not the reference yet
        rts.adjust_phase(2, -500).unwrap();
        assert_eq!(rts.control().sequencer().main().phase_shift_target(), 0);

        rts.lock_channel(1, 0).unwrap();
        rts.adjust_phase(1, 1000).unwrap();
        assert_eq!(rts.control().sequencer().main().phase_shift_target(), 2048);

        let state = rts.get_state();
        assert_eq!(state.channels[1].phase_setpoint, 1000);
        assert_eq!(state.channels[1].phase_current, 0);
        assert_ne!(state.channels[1].flags & CHAN_SHIFTING, 0);
        assert_eq!(state.channels[2].phase_setpoint, -500);

        // Selecting channel 2 applies its stored setpoint
        rts.lock_channel(2, 0).unwrap();
        assert_eq!(rts.control().sequencer().main().phase_shift_target(), -1024);
    }

    #[test]
    fn tracker_flags_follow_enable() {
        let mut rts = subsystem();
        rts.enable_ptracker(2, true).unwrap();
        assert_eq!(
            rts.get_state().channels[2].flags & CHAN_PTRACKER_ENABLED,
            CHAN_PTRACKER_ENABLED
        );
        assert_eq!(rts.enable_ptracker(8, true), Err(SpllError::InvalidChannel(8)));
        rts.enable_ptracker(2, false).unwrap();
        assert_eq!(rts.get_state().channels[2].flags, 0);
    }

    #[test]
    fn channels_past_the_status_record_are_rejected() {
        let cfg = SpllConfig::default();
        let spll = Spll::new(cfg.clone(), MockPeripheral::new(&cfg.hw)).unwrap();
        // A geometry that never went through validation
        let mut wide = cfg.clone();
        wide.hw.n_ref = RTS_PLL_CHANNELS + 2;
        let mut rts = RtSubsystem::new(spll, &wide);

        rts.set_mode(RtsMode::BoundaryClock).unwrap();
        assert_eq!(rts.lock_channel(19, 0), Err(SpllError::InvalidChannel(19)));
        assert_eq!(rts.adjust_phase(18, 100), Err(SpllError::InvalidChannel(18)));
        assert_eq!(rts.control().sequencer().mode(), Mode::Disabled);

        rts.lock_channel(17, 2).unwrap();
        assert_eq!(rts.get_state().channels[17].priority, 2);
    }
}
