//! Software-defined PLL core for a White Rabbit timing node.
//!
//! Phase tags from a DMTD front end are turned into oscillator DAC
//! corrections by a set of cooperating loops: a helper loop that keeps the
//! DMTD offset oscillator locked, a main loop per output that phase-locks it
//! to the selected reference, an optional external loop for grandmaster
//! operation, and per-channel phase trackers. A sequencer brings the loops up
//! in order for the selected mode and restarts them on loss of lock.

pub mod calc;
pub mod config;
pub mod controller;
pub mod diag;
pub mod error;
pub mod logging;
pub mod loops;
pub mod peripheral;
pub mod rts;
pub mod tag;
pub mod units;

pub use config::SpllConfig;
pub use controller::{Mode, SeqState, Spll, SpllClient, SpllControl, SpllRunner};
pub use error::SpllError;
pub use rts::RtSubsystem;
pub use softpll_shared::{RtsMode, RtsState};
