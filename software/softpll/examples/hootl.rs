//! Run the control core against the software register mockup, with no
//! hardware in the loop.
//!
//! Demonstrated here:
//!   * Loading a configuration and setting up logging
//!   * Driving the event handler from synthesized tags
//!   * Commanding the core through the host-facing interface
//!   * Collecting diagnostic samples over a channel

use std::path::PathBuf;

use softpll::config::{LockConfig, SpllConfig};
use softpll::diag::ChannelSink;
use softpll::logging::{default_session_name, init_logging};
use softpll::peripheral::MockPeripheral;
use softpll::{RtSubsystem, RtsMode, SeqState, Spll};

use tracing::info;

fn main() -> Result<(), String> {
    // Either a user config or defaults with short lock detectors, so that
    // the demo locks within a few hundred beats
    let cfg = match std::env::args().nth(1) {
        Some(path) => SpllConfig::from_json_file(&PathBuf::from(path))?,
        None => {
            let mut cfg = SpllConfig::default();
            cfg.hw.n_ref = 4;
            cfg.sequencer.clear_dacs_settle_ms = 1;
            cfg.helper.prelock_ld = LockConfig {
                threshold: 2,
                lock_samples: 10,
                delock_samples: 5,
            };
            cfg.helper.phase_ld = LockConfig {
                threshold: 200,
                lock_samples: 50,
                delock_samples: 10,
            };
            cfg.main.freq_ld.lock_samples = 20;
            cfg.main.freq_ld.delock_samples = 10;
            cfg.main.phase_ld.lock_samples = 20;
            cfg.main.phase_ld.delock_samples = 10;
            cfg.ptracker.n_avg = 16;
            cfg
        }
    };

    let (log_path, _guards) = init_logging(&cfg.logging, &default_session_name())?;
    info!("Logging to {}", log_path.display());

    let (sink, diag_rx) = ChannelSink::bounded(4096);
    let mut hw = MockPeripheral::new(&cfg.hw);
    hw.set_offset(2, 1234);
    let spll = Spll::new(cfg.clone(), hw)?.with_diag_sink(Box::new(sink));

    let mut rts = RtSubsystem::new(spll, &cfg);
    rts.set_mode(RtsMode::BoundaryClock)
        .map_err(|e| e.to_string())?;
    rts.lock_channel(1, 0).map_err(|e| e.to_string())?;
    rts.enable_ptracker(2, true).map_err(|e| e.to_string())?;

    let mut beats = 0;
    while rts.control().sequencer().state() != SeqState::Ready && beats < 5000 {
        let spll = rts.control_mut();
        spll.peripheral_mut().run_beats(1);
        while spll.handle_irq() > 0 {}
        beats += 1;
    }
    info!(
        "Reached {:?} after {beats} beats",
        rts.control().sequencer().state()
    );

    rts.adjust_phase(1, 500).map_err(|e| e.to_string())?;
    for _ in 0..200 {
        let spll = rts.control_mut();
        spll.peripheral_mut().run_beats(1);
        while spll.handle_irq() > 0 {}
    }

    let state = rts.get_state();
    info!(
        "Global flags {:#x}, delock count {}",
        state.global.flags, state.global.delock_count
    );
    for ch in 0..cfg.hw.n_ref {
        let c = &state.channels[ch];
        info!(
            "Channel {ch}: flags {:#x}, setpoint {} ps, current {} ps, loopback {} ps",
            c.flags, c.phase_setpoint, c.phase_current, c.phase_loopback
        );
    }
    info!("Collected {} diagnostic samples", diag_rx.try_iter().count());

    Ok(())
}
