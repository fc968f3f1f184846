//! Shared setup for the hardware-out-of-the-loop scenarios

#![allow(dead_code)]

use softpll::config::{LockConfig, SpllConfig};
use softpll::peripheral::MockPeripheral;
use softpll::{SeqState, Spll};

/// Small board with short lock detectors, so that scenarios lock in tens of beats
pub fn fast_config(n_ref: usize, n_out: usize) -> SpllConfig {
    let mut cfg = SpllConfig::default();
    cfg.hw.n_ref = n_ref;
    cfg.hw.n_out = n_out;
    cfg.sequencer.clear_dacs_settle_ms = 1;
    cfg.ptracker.n_avg = 4;

    let ld = |threshold, lock_samples, delock_samples| LockConfig {
        threshold,
        lock_samples,
        delock_samples,
    };
    cfg.helper.prelock_ld = ld(2, 3, 1);
    cfg.helper.phase_ld = ld(200, 5, 2);
    cfg.main.freq_ld = ld(200, 3, 1);
    cfg.main.phase_ld = ld(500, 3, 1);
    cfg.external.ld = ld(250, 5, 2);
    cfg
}

pub fn mock_spll(cfg: &SpllConfig) -> Spll<MockPeripheral> {
    let hw = MockPeripheral::new(&cfg.hw);
    Spll::new(cfg.clone(), hw).unwrap()
}

/// One beat of ideal tags, then run the handler until the FIFO is empty
pub fn pump(spll: &mut Spll<MockPeripheral>) {
    spll.peripheral_mut().run_beats(1);
    while spll.handle_irq() > 0 {}
}

/// Pump beats until `pred` holds. Returns the number of beats it took.
pub fn run_until(
    spll: &mut Spll<MockPeripheral>,
    max_beats: u32,
    pred: impl Fn(&Spll<MockPeripheral>) -> bool,
) -> Option<u32> {
    for beat in 0..max_beats {
        if pred(spll) {
            return Some(beat);
        }
        pump(spll);
    }
    pred(spll).then_some(max_beats)
}

pub fn in_state(state: SeqState) -> impl Fn(&Spll<MockPeripheral>) -> bool {
    move |s| s.sequencer().state() == state
}
