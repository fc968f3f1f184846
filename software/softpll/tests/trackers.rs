//! Phase trackers and auxiliary outputs, which only run once the core is ready

mod common;

use common::{fast_config, in_state, mock_spll, run_until};
use softpll::{Mode, SeqState, SpllControl, SpllError};

#[test]
fn tracker_measures_channel_offset_after_ready() {
    let cfg = fast_config(2, 1);
    let mut spll = mock_spll(&cfg);
    spll.peripheral_mut().set_offset(1, 100);
    spll.enable_ptracker(1, true).unwrap();
    spll.set_mode(Mode::Slave { ref_channel: 0 }).unwrap();

    // Enabled trackers keep their taggers through the safe-DAC phase
    assert!(spll.peripheral().tagger_enabled(1));

    assert!(run_until(&mut spll, 100, in_state(SeqState::Ready)).is_some());
    assert_eq!(spll.status().tracker(1).map(|t| t.ready), Some(false));

    let ready = |s: &softpll::Spll<softpll::peripheral::MockPeripheral>| {
        s.status().tracker(1).is_some_and(|t| t.ready)
    };
    assert!(run_until(&mut spll, 10, ready).is_some());
    let t = spll.status().tracker(1).unwrap();
    assert!(t.enabled);
    assert_eq!(t.phase, 100);

    // Channel 0 was never enabled
    assert_eq!(spll.status().tracker(0).map(|t| t.enabled), Some(false));
}

#[test]
fn aux_output_starts_once_ready() {
    let cfg = fast_config(2, 2);
    let mut spll = mock_spll(&cfg);
    assert_eq!(spll.set_aux_enabled(2, true), Err(SpllError::InvalidOutput(2)));
    spll.set_aux_enabled(1, true).unwrap();
    spll.set_mode(Mode::FreeRunningMaster).unwrap();

    assert!(run_until(&mut spll, 100, in_state(SeqState::Ready)).is_some());
    let aux_locked = |s: &softpll::Spll<softpll::peripheral::MockPeripheral>| {
        s.status().snapshot().aux_locked == vec![true]
    };
    assert!(run_until(&mut spll, 50, aux_locked).is_some());
    assert!(spll.peripheral().tagger_enabled(cfg.hw.out_channel(1)));
    assert!(spll.peripheral().main_dac(1).is_some());

    // Releasing the output stops its loop but leaves the core ready
    spll.set_aux_enabled(1, false).unwrap();
    assert!(!spll.peripheral().tagger_enabled(cfg.hw.out_channel(1)));
    assert_eq!(spll.status().snapshot().aux_locked, vec![false]);
    assert_eq!(spll.sequencer().state(), SeqState::Ready);
}
