//! Slave mode bring-up, loss of the reference, and recovery

mod common;

use common::{fast_config, in_state, mock_spll, pump, run_until};
use softpll::config::PairingStrategy;
use softpll::peripheral::ActuatorWrite;
use softpll::{Mode, SeqState, SpllControl};

#[test]
fn slave_locks_then_recovers_from_reference_loss() {
    let cfg = fast_config(2, 1);
    let mut spll = mock_spll(&cfg);
    spll.set_mode(Mode::Slave { ref_channel: 0 }).unwrap();
    assert_eq!(spll.sequencer().state(), SeqState::ClearDacs);

    // Safe DAC values go out before any loop starts
    pump(&mut spll);
    assert_eq!(spll.peripheral().helper_dac(), Some(0));
    assert_eq!(spll.peripheral().main_dac(0), Some(32768));
    assert_eq!(spll.sequencer().state(), SeqState::WaitClearDacs);

    assert!(run_until(&mut spll, 20, in_state(SeqState::WaitHelper)).is_some());
    assert!(spll.peripheral().tagger_enabled(0));

    assert!(run_until(&mut spll, 50, in_state(SeqState::WaitMain)).is_some());
    assert!(spll.sequencer().helper_locked());
    assert!(spll.peripheral().tagger_enabled(cfg.hw.local_channel()));

    assert!(run_until(&mut spll, 50, in_state(SeqState::Ready)).is_some());
    let status = spll.status();
    assert_eq!(status.state(), SeqState::Ready);
    assert!(status.helper_locked());
    assert!(status.main_locked());
    assert_eq!(status.delock_count(), 0);

    // Lose the reference for a few beats: the helper sees a phase jump on return
    spll.peripheral_mut().set_paused(0, true);
    for _ in 0..3 {
        pump(&mut spll);
    }
    assert_eq!(spll.sequencer().state(), SeqState::Ready);
    spll.peripheral_mut().set_paused(0, false);

    let left_ready = run_until(&mut spll, 50, |s| s.sequencer().state() != SeqState::Ready);
    assert!(left_ready.is_some());
    assert!(matches!(
        spll.sequencer().state(),
        SeqState::ClearDacs | SeqState::WaitClearDacs
    ));
    assert_eq!(spll.sequencer().delock_count(), 1);
    assert!(!spll.sequencer().helper_locked());
    assert!(!spll.peripheral().tagger_enabled(0));

    // Full restart back to lock
    assert!(run_until(&mut spll, 100, in_state(SeqState::Ready)).is_some());
    assert_eq!(spll.status().delock_count(), 1);
}

#[test]
fn phase_shift_slews_to_target_once_locked() {
    let cfg = fast_config(2, 1);
    let mut spll = mock_spll(&cfg);
    spll.set_mode(Mode::Slave { ref_channel: 1 }).unwrap();
    spll.set_phase_shift(3).unwrap();
    assert!(spll.status().shift().in_progress);

    assert!(run_until(&mut spll, 100, in_state(SeqState::Ready)).is_some());
    assert!(run_until(&mut spll, 20, |s| !s.sequencer().main().shift_in_progress()).is_some());

    let shift = spll.status().shift();
    assert_eq!(shift.current, 3);
    assert_eq!(shift.target, 3);
    assert!(!shift.in_progress);
}

#[test]
fn negative_phase_shift_keeps_main_loop_locked() {
    let cfg = fast_config(2, 1);
    let mut spll = mock_spll(&cfg);
    spll.set_mode(Mode::Slave { ref_channel: 0 }).unwrap();
    assert!(run_until(&mut spll, 100, in_state(SeqState::Ready)).is_some());

    spll.set_phase_shift(-3).unwrap();
    for _ in 0..10 {
        pump(&mut spll);
        assert_eq!(spll.sequencer().state(), SeqState::Ready);
    }

    let status = spll.status();
    assert_eq!(status.shift().current, -3);
    assert!(!status.shift().in_progress);
    assert!(status.main_locked());
    assert_eq!(status.delock_count(), 0);
}

#[test]
fn output_trailing_reference_locks_without_restart() {
    for pairing in [PairingStrategy::Masked, PairingStrategy::Sequenced] {
        let mut cfg = fast_config(2, 1);
        cfg.main.pairing = pairing;
        let mut spll = mock_spll(&cfg);
        spll.peripheral_mut().set_offset(cfg.hw.local_channel(), -5);
        spll.set_mode(Mode::Slave { ref_channel: 0 }).unwrap();
        assert!(run_until(&mut spll, 100, in_state(SeqState::Ready)).is_some());

        // Long enough for the tag counter to wrap under the loop
        spll.set_phase_shift(-2).unwrap();
        for _ in 0..80 {
            pump(&mut spll);
            assert_eq!(spll.sequencer().state(), SeqState::Ready, "{pairing:?}");
        }
        let status = spll.status();
        assert!(status.main_locked());
        assert_eq!(status.shift().current, -2);
        assert_eq!(status.delock_count(), 0);
    }
}

#[test]
fn mode_change_to_master_stops_main_output_loop() {
    let cfg = fast_config(2, 1);
    let mut spll = mock_spll(&cfg);
    spll.set_mode(Mode::Slave { ref_channel: 0 }).unwrap();
    assert!(run_until(&mut spll, 100, in_state(SeqState::Ready)).is_some());

    spll.peripheral_mut().clear_writes();
    spll.set_mode(Mode::FreeRunningMaster).unwrap();
    let local = cfg.hw.local_channel();
    assert!(spll.peripheral().writes().contains(&ActuatorWrite::Tagger {
        channel: local,
        enable: false
    }));
    assert_eq!(spll.status().mode(), Mode::FreeRunningMaster);
    assert!(!spll.status().main_locked());

    // Master modes discipline the helper against the local output
    assert!(run_until(&mut spll, 100, in_state(SeqState::Ready)).is_some());
    assert_eq!(spll.sequencer().helper().ref_channel(), local);
    assert_eq!(spll.sequencer().delock_count(), 0);
}
