//! Hardware seams of the control core
//!
//! The loops never touch hardware directly. Each handled tag is processed
//! against a snapshot of the hardware inputs, and the writes it produces are
//! collected as data and applied afterwards. The SoftPLL register block is
//! reached through [`SpllPeripheral`]; the oscillator chip's one-time bring-up
//! goes through [`OscillatorDriver`].

use crate::diag::{DiagKind, DiagSample, DiagSource};
use crate::error::SpllError;
use crate::tag::Tag;

pub mod mockup;
pub use mockup::{MockOscillator, MockPeripheral};

/// Stage of the two-step PPS realignment
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlignStage {
    /// Sample the external PPS edge and align the local cycle counter to it
    Stage1,
    /// Re-align the PPS output after the counter adjustment
    Stage2,
}

/// Register-level interface of the SoftPLL block
pub trait SpllPeripheral {
    /// Oldest pending tag, or `None` when the FIFO is empty
    fn pop_tag(&mut self) -> Option<Tag>;

    fn enable_tagger(&mut self, channel: usize, enable: bool);

    fn write_helper_dac(&mut self, value: i32);

    fn write_main_dac(&mut self, output: usize, value: i32);

    /// Consume the hardware period-counter error between the helper
    /// oscillator and its reference, if a new measurement is available
    fn helper_period_error(&mut self) -> Option<i32>;

    fn set_external_enabled(&mut self, enable: bool);

    fn ext_ref_present(&self) -> bool;

    /// Start a realignment stage. Clears the done flag.
    fn request_align(&mut self, stage: AlignStage);

    /// Whether the last requested realignment stage has completed
    fn align_done(&self) -> bool;

    /// Free-running tick counter, wrapping
    fn ticks(&self) -> u32;

    fn set_irq_enabled(&mut self, enable: bool);
}

/// One-time bring-up of the oscillator chip
pub trait OscillatorDriver {
    fn initialize(&mut self) -> Result<(), SpllError>;
}

/// Hardware inputs sampled once per handled tag
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HwInputs {
    pub now: u32,
    pub helper_freq_error: Option<i32>,
    pub ext_ref_present: bool,
    pub align_done: bool,
}

impl HwInputs {
    pub fn sample<P: SpllPeripheral + ?Sized>(hw: &mut P) -> Self {
        Self {
            now: hw.ticks(),
            helper_freq_error: hw.helper_period_error(),
            ext_ref_present: hw.ext_ref_present(),
            align_done: hw.align_done(),
        }
    }
}

/// A register write produced by a loop or the sequencer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActuatorWrite {
    HelperDac(i32),
    MainDac { output: usize, value: i32 },
    Tagger { channel: usize, enable: bool },
    External { enable: bool },
    Align(AlignStage),
}

impl ActuatorWrite {
    pub fn apply<P: SpllPeripheral + ?Sized>(self, hw: &mut P) {
        match self {
            ActuatorWrite::HelperDac(v) => hw.write_helper_dac(v),
            ActuatorWrite::MainDac { output, value } => hw.write_main_dac(output, value),
            ActuatorWrite::Tagger { channel, enable } => hw.enable_tagger(channel, enable),
            ActuatorWrite::External { enable } => hw.set_external_enabled(enable),
            ActuatorWrite::Align(stage) => hw.request_align(stage),
        }
    }
}

/// Writes and diagnostic samples accumulated while processing one tag.
///
/// Reused across tags so that the steady state does not allocate.
#[derive(Debug, Default)]
pub struct Effects {
    pub writes: Vec<ActuatorWrite>,
    pub diag: Vec<DiagSample>,
}

impl Effects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, write: ActuatorWrite) {
        self.writes.push(write);
    }

    pub fn sample(&mut self, source: DiagSource, kind: DiagKind, value: i32) {
        self.diag.push(DiagSample {
            source,
            kind,
            value,
            last: false,
        });
    }

    /// Record the final sample produced for the current tag
    pub fn sample_last(&mut self, source: DiagSource, kind: DiagKind, value: i32) {
        self.diag.push(DiagSample {
            source,
            kind,
            value,
            last: true,
        });
    }

    pub fn clear(&mut self) {
        self.writes.clear();
        self.diag.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.diag.is_empty()
    }
}
