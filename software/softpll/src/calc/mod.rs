//! Fixed-point building blocks shared by every loop: the PI regulator,
//! the hysteretic lock detector, and the first-order low-pass filter.

mod lock_detector;
mod low_pass;
mod pi;

pub use lock_detector::{LockDetector, LockEvent};
pub use low_pass::LowPass;
pub use pi::PiController;
