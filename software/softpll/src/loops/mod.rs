//! Per-tag control loops
//!
//! Every loop is a plain state machine: it is fed one tag and one snapshot of
//! hardware inputs at a time, and pushes its DAC and tagger writes into an
//! [`Effects`](crate::peripheral::Effects) buffer instead of touching hardware.

pub mod external;
pub mod helper;
pub mod main_loop;
pub mod ptracker;

pub use external::{ExternalLoop, RealignState};
pub use helper::{HelperLoop, HelperStage};
pub use main_loop::{MainLoop, MainState};
pub use ptracker::PhaseTracker;

/// Lock status reported by a loop after processing a tag
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopStatus {
    Locking,
    Locked,
}

impl LoopStatus {
    fn from_locked(locked: bool) -> Self {
        if locked {
            LoopStatus::Locked
        } else {
            LoopStatus::Locking
        }
    }
}
