//! Errors surfaced by the control core to its callers.
//!
//! Loss of lock and missing measurements are not errors; they are absorbed by
//! the loops and the sequencer. What remains is hardware that does not answer
//! at bring-up and commands that do not make sense in the current configuration.

use std::fmt;

/// Errors that can occur while bringing up or commanding the SoftPLL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SpllError {
    /// The oscillator chip did not respond during initialization.
    ChipNotResponding,
    /// A slave-only operation was requested while not in slave mode.
    NotInSlaveMode,
    /// Reference channel index outside the configured reference channels.
    InvalidChannel(usize),
    /// Output index outside the configured auxiliary outputs.
    InvalidOutput(usize),
    /// Mode code not recognized.
    InvalidMode(u32),
    /// The event handler thread is no longer running.
    Disconnected,
}

impl fmt::Display for SpllError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpllError::ChipNotResponding => write!(f, "oscillator chip not responding"),
            SpllError::NotInSlaveMode => write!(f, "operation is only valid in slave mode"),
            SpllError::InvalidChannel(ch) => write!(f, "invalid reference channel {ch}"),
            SpllError::InvalidOutput(out) => write!(f, "invalid auxiliary output {out}"),
            SpllError::InvalidMode(code) => write!(f, "unknown mode code {code}"),
            SpllError::Disconnected => write!(f, "event handler is not running"),
        }
    }
}

impl std::error::Error for SpllError {}
