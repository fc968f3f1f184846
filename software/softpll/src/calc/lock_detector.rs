//! Hysteretic lock detector driven by a loop's error samples

use crate::config::LockConfig;

/// Lock state change produced by one sample
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockEvent {
    NoChange,
    BecameLocked,
    BecameUnlocked,
}

/// Counts in-threshold samples up to `lock_samples` to declare lock, and
/// counts out-of-threshold samples down to `delock_samples` to drop it.
///
/// Once locked, it takes `lock_samples - delock_samples` consecutive bad
/// samples to unlock, so isolated outliers are tolerated.
#[derive(Clone, Debug)]
pub struct LockDetector {
    threshold: i32,
    lock_samples: u32,
    delock_samples: u32,

    counter: u32,
    locked: bool,
}

impl LockDetector {
    pub fn new(cfg: &LockConfig) -> Self {
        Self {
            threshold: cfg.threshold,
            lock_samples: cfg.lock_samples,
            delock_samples: cfg.delock_samples,
            counter: 0,
            locked: false,
        }
    }

    pub fn update(&mut self, y: i32) -> LockEvent {
        if (y as i64).abs() <= self.threshold as i64 {
            if self.counter < self.lock_samples {
                self.counter += 1;
            }
            if self.counter == self.lock_samples && !self.locked {
                self.locked = true;
                return LockEvent::BecameLocked;
            }
        } else {
            if self.counter > self.delock_samples {
                self.counter -= 1;
            }
            if self.counter == self.delock_samples {
                self.counter = 0;
                if self.locked {
                    self.locked = false;
                    return LockEvent::BecameUnlocked;
                }
            }
        }
        LockEvent::NoChange
    }

    /// Drop lock immediately and start counting from zero
    pub fn reset(&mut self) {
        self.counter = 0;
        self.locked = false;
    }

    pub fn locked(&self) -> bool {
        self.locked
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn detector() -> LockDetector {
        LockDetector::new(&LockConfig {
            threshold: 100,
            lock_samples: 10,
            delock_samples: 5,
        })
    }

    #[test]
    fn locks_after_exactly_lock_samples() {
        let mut ld = detector();
        for _ in 0..9 {
            assert_eq!(ld.update(100), LockEvent::NoChange);
        }
        assert!(!ld.locked());
        assert_eq!(ld.update(-100), LockEvent::BecameLocked);
        assert!(ld.locked());
        assert_eq!(ld.update(0), LockEvent::NoChange);
        assert_eq!(ld.counter(), 10);
    }

    #[test]
    fn unlocks_after_lock_minus_delock_bad_samples() {
        let mut ld = detector();
        for _ in 0..10 {
            ld.update(0);
        }
        for _ in 0..4 {
            assert_eq!(ld.update(1000), LockEvent::NoChange);
            assert!(ld.locked());
        }
        assert_eq!(ld.update(1000), LockEvent::BecameUnlocked);
        assert!(!ld.locked());
        assert_eq!(ld.counter(), 0);
    }

    #[test]
    fn isolated_outliers_do_not_unlock() {
        let mut ld = detector();
        for _ in 0..10 {
            ld.update(0);
        }
        for _ in 0..50 {
            ld.update(5000);
            ld.update(0);
            assert!(ld.locked());
        }
    }

    #[test]
    fn force_reset() {
        let mut ld = detector();
        for _ in 0..10 {
            ld.update(0);
        }
        ld.reset();
        assert!(!ld.locked());
        assert_eq!(ld.counter(), 0);
    }

    proptest! {
        #[test]
        fn counter_stays_in_range(ys in prop::collection::vec(-300i32..300, 0..500)) {
            let mut ld = detector();
            for y in ys {
                ld.update(y);
                prop_assert!(ld.counter() <= 10);
                if ld.locked() {
                    prop_assert!(ld.counter() > 5);
                }
            }
        }
    }
}
