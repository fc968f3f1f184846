//! Event handler tying the sequencer to the hardware
//!
//! [`Spll`] owns the peripheral and the sequencer. Each call to
//! [`Spll::handle_irq`] runs to completion: it drains at most one FIFO's worth
//! of tags, evaluates the sequencer once per tag, applies the resulting
//! register writes, and refreshes the shared status. Commands that
//! reconfigure the loops suspend the event source for their duration.

pub mod runner;
pub mod sequencer;
pub mod status;

use std::sync::Arc;

use tracing::info;

use crate::config::SpllConfig;
use crate::diag::{DiagSink, NullSink};
use crate::error::SpllError;
use crate::peripheral::{Effects, HwInputs, SpllPeripheral};
use crate::tag::Tag;

pub use runner::{SpllClient, SpllRunner};
pub use sequencer::{Mode, SeqState, Sequencer};
pub use status::{SharedStatus, ShiftStatus, StatusSnapshot, TrackerStatus};

/// Commands accepted by the control core, whether called in-thread on
/// [`Spll`] or through a [`SpllClient`]
pub trait SpllControl {
    fn set_mode(&mut self, mode: Mode) -> Result<(), SpllError>;

    /// Main loop phase shift target in phase units. Slave mode only.
    fn set_phase_shift(&mut self, units: i32) -> Result<(), SpllError>;

    fn enable_ptracker(&mut self, channel: usize, enable: bool) -> Result<(), SpllError>;

    fn set_aux_enabled(&mut self, output: usize, enable: bool) -> Result<(), SpllError>;

    fn status(&self) -> Arc<SharedStatus>;
}

pub struct Spll<P: SpllPeripheral> {
    cfg: SpllConfig,
    hw: P,
    seq: Sequencer,
    status: Arc<SharedStatus>,
    fx: Effects,
    diag: Box<dyn DiagSink>,
}

impl<P: SpllPeripheral> Spll<P> {
    /// Validate the configuration and build a core in `Disabled` mode
    pub fn new(cfg: SpllConfig, hw: P) -> Result<Self, String> {
        cfg.validate()?;
        let seq = Sequencer::new(&cfg);
        let status = Arc::new(SharedStatus::new(
            cfg.hw.n_ref,
            cfg.hw.n_out.saturating_sub(1),
        ));
        status.publish(&seq, true);

        Ok(Self {
            cfg,
            hw,
            seq,
            status,
            fx: Effects::new(),
            diag: Box::new(NullSink),
        })
    }

    /// Route diagnostic samples to `sink` instead of discarding them
    pub fn with_diag_sink(mut self, sink: Box<dyn DiagSink>) -> Self {
        self.diag = sink;
        self
    }

    /// Drain pending tags through the sequencer. Returns the number of tags
    /// processed; an empty FIFO still gives the sequencer one evaluation so
    /// that time-based transitions progress.
    pub fn handle_irq(&mut self) -> usize {
        let mut drained = 0;
        while drained < self.cfg.hw.fifo_depth {
            let Some(tag) = self.hw.pop_tag() else {
                break;
            };
            drained += 1;
            self.step(Some(tag));
        }
        if drained == 0 {
            self.step(None);
        }
        self.status.publish(&self.seq, false);
        drained
    }

    fn step(&mut self, tag: Option<Tag>) {
        let inputs = HwInputs::sample(&mut self.hw);
        self.seq.update(tag, &inputs, &mut self.fx);
        self.flush();
    }

    fn flush(&mut self) {
        for write in self.fx.writes.drain(..) {
            write.apply(&mut self.hw);
        }
        for sample in self.fx.diag.drain(..) {
            self.diag.consume(sample);
        }
    }

    /// Apply a reconfiguration with the event source suspended
    fn reconfigure<T>(
        &mut self,
        f: impl FnOnce(&mut Sequencer, &mut Effects) -> Result<T, SpllError>,
    ) -> Result<T, SpllError> {
        self.hw.set_irq_enabled(false);
        let result = f(&mut self.seq, &mut self.fx);
        self.flush();
        self.status.publish(&self.seq, true);
        self.hw.set_irq_enabled(true);
        result
    }

    pub fn sequencer(&self) -> &Sequencer {
        &self.seq
    }

    pub fn config(&self) -> &SpllConfig {
        &self.cfg
    }

    pub fn peripheral(&self) -> &P {
        &self.hw
    }

    pub fn peripheral_mut(&mut self) -> &mut P {
        &mut self.hw
    }
}

impl<P: SpllPeripheral> SpllControl for Spll<P> {
    /// Switch mode. Pending tags from the previous configuration are discarded.
    fn set_mode(&mut self, mode: Mode) -> Result<(), SpllError> {
        self.reconfigure(|seq, fx| seq.set_mode(mode, fx))?;
        self.hw.set_irq_enabled(false);
        let mut flushed = 0_usize;
        while self.hw.pop_tag().is_some() {
            flushed += 1;
        }
        self.hw.set_irq_enabled(true);
        if flushed > 0 {
            info!("Discarded {flushed} stale tags on mode change");
        }
        Ok(())
    }

    fn set_phase_shift(&mut self, units: i32) -> Result<(), SpllError> {
        self.reconfigure(|seq, _| seq.set_phase_shift(units))
    }

    fn enable_ptracker(&mut self, channel: usize, enable: bool) -> Result<(), SpllError> {
        self.reconfigure(|seq, fx| seq.enable_ptracker(channel, enable, fx))
    }

    fn set_aux_enabled(&mut self, output: usize, enable: bool) -> Result<(), SpllError> {
        self.reconfigure(|seq, fx| seq.set_aux_enabled(output, enable, fx))
    }

    fn status(&self) -> Arc<SharedStatus> {
        self.status.clone()
    }
}
