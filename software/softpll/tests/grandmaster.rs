//! Grandmaster bring-up with PPS realignment, seen through the host interface

mod common;

use common::{fast_config, in_state, mock_spll, pump, run_until};
use softpll::loops::RealignState;
use softpll::peripheral::{AlignStage, MockPeripheral};
use softpll::{Mode, RtSubsystem, RtsMode, SeqState, Spll, SpllControl};
use softpll_shared::state::{RTS_DMTD_LOCKED, RTS_EXT_10M_VALID, RTS_EXT_PPS_VALID, RTS_REF_LOCKED};

#[test]
fn grandmaster_aligns_pps_then_reports_lock() {
    let cfg = fast_config(2, 1);
    let mut rts = RtSubsystem::new(mock_spll(&cfg), &cfg);
    rts.set_mode(RtsMode::GmExternal).unwrap();

    let spll = rts.control_mut();
    assert!(run_until(spll, 20, in_state(SeqState::WaitExternal)).is_some());
    assert!(spll.peripheral().external_enabled());
    assert!(spll.peripheral().tagger_enabled(cfg.hw.ext_channel()));

    assert!(run_until(spll, 50, in_state(SeqState::WaitHelper)).is_some());
    assert_eq!(
        spll.peripheral().align_requests(),
        &[AlignStage::Stage1, AlignStage::Stage2]
    );
    assert_eq!(spll.sequencer().external().realign_state(), RealignState::Done);

    assert!(run_until(spll, 50, in_state(SeqState::Ready)).is_some());

    let state = rts.get_state();
    assert_eq!(RtsMode::from(state.global.mode), RtsMode::GmExternal);
    let expected = RTS_DMTD_LOCKED | RTS_REF_LOCKED | RTS_EXT_10M_VALID | RTS_EXT_PPS_VALID;
    assert_eq!(state.global.flags & expected, expected);
    assert_eq!(state.global.delock_count, 0);
}

#[test]
fn stalled_realignment_restarts_external_loop() {
    let cfg = fast_config(2, 1);
    let mut spll = mock_spll(&cfg);
    spll.peripheral_mut().set_auto_align(false);
    spll.set_mode(Mode::GrandMaster { align_pps: true })
        .unwrap();

    let waiting = |s: &Spll<MockPeripheral>| {
        s.sequencer().external().realign_state() == RealignState::Stage1Wait
    };
    assert!(run_until(&mut spll, 50, waiting).is_some());
    assert_eq!(spll.sequencer().state(), SeqState::WaitExternal);

    // No completion from the hardware within the timeout
    spll.peripheral_mut()
        .advance_ticks(cfg.realign_timeout_ticks() + 1);
    assert_eq!(spll.handle_irq(), 0);
    assert_eq!(spll.sequencer().state(), SeqState::StartExternal);
    assert_eq!(spll.sequencer().delock_count(), 0);

    spll.handle_irq();
    assert_eq!(spll.sequencer().state(), SeqState::WaitExternal);
    assert_eq!(spll.sequencer().external().realign_state(), RealignState::Stage1);
}

#[test]
fn missing_external_reference_holds_neutral_dac() {
    let cfg = fast_config(2, 1);
    let mut spll = mock_spll(&cfg);
    spll.set_mode(Mode::GrandMaster { align_pps: false })
        .unwrap();
    assert!(run_until(&mut spll, 100, in_state(SeqState::Ready)).is_some());

    spll.peripheral_mut().set_ext_ref_present(false);
    pump(&mut spll);
    assert_eq!(spll.peripheral().main_dac(0), Some(cfg.external.neutral_dac));
    assert!(!spll.status().ext_locked());
    assert_eq!(spll.sequencer().delock_count(), 1);

    // Back to lock once the reference returns
    spll.peripheral_mut().set_ext_ref_present(true);
    assert!(run_until(&mut spll, 100, in_state(SeqState::Ready)).is_some());
    assert_eq!(spll.sequencer().delock_count(), 1);
}
