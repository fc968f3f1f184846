//! Status shared between the event handler and foreground readers
//!
//! Single-valued flags and counters are individual atomics: a reader may see
//! a mix of values from two consecutive handler invocations, which is fine
//! for status that is refreshed continuously. Values that only make sense
//! together (a tracker's phase with its ready flag, the shift setpoint with
//! its progress) sit behind short-lived mutexes. The handler only ever
//! `try_lock`s these, skipping the refresh rather than waiting on a reader.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};

use super::sequencer::{Mode, SeqState, Sequencer};
use crate::loops::RealignState;

/// One phase tracker's published measurement
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrackerStatus {
    pub enabled: bool,
    pub ready: bool,
    /// Averaged phase in phase units
    pub phase: i32,
}

/// Main loop phase shift progress, in phase units
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShiftStatus {
    pub current: i32,
    pub target: i32,
    pub in_progress: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub mode: Mode,
    pub state: SeqState,
    pub helper_locked: bool,
    pub main_locked: bool,
    pub ext_locked: bool,
    pub ext_ref_present: bool,
    pub realign: RealignState,
    pub delock_count: u32,
    pub shift: ShiftStatus,
    pub trackers: Vec<TrackerStatus>,
    pub aux_locked: Vec<bool>,
}

#[derive(Debug)]
pub struct SharedStatus {
    mode: Mutex<Mode>,
    state: AtomicU8,
    helper_locked: AtomicBool,
    main_locked: AtomicBool,
    ext_locked: AtomicBool,
    ext_ref_present: AtomicBool,
    realign: AtomicU8,
    delock_count: AtomicU32,
    shift: Mutex<ShiftStatus>,
    trackers: Vec<Mutex<TrackerStatus>>,
    aux_locked: Vec<AtomicBool>,
}

impl SharedStatus {
    pub fn new(n_ref: usize, n_aux: usize) -> Self {
        Self {
            mode: Mutex::new(Mode::Disabled),
            state: AtomicU8::new(SeqState::Disabled as u8),
            helper_locked: AtomicBool::new(false),
            main_locked: AtomicBool::new(false),
            ext_locked: AtomicBool::new(false),
            ext_ref_present: AtomicBool::new(false),
            realign: AtomicU8::new(RealignState::Disabled as u8),
            delock_count: AtomicU32::new(0),
            shift: Mutex::new(ShiftStatus::default()),
            trackers: (0..n_ref)
                .map(|_| Mutex::new(TrackerStatus::default()))
                .collect(),
            aux_locked: (0..n_aux).map(|_| AtomicBool::new(false)).collect(),
        }
    }

    /// Refresh from the sequencer. With `wait` unset, fields whose lock is
    /// held by a reader keep their previous value until the next refresh.
    pub fn publish(&self, seq: &Sequencer, wait: bool) {
        self.state.store(seq.state() as u8, Ordering::Relaxed);
        self.helper_locked
            .store(seq.helper().locked(), Ordering::Relaxed);
        self.main_locked.store(seq.main().locked(), Ordering::Relaxed);
        self.ext_locked
            .store(seq.external().locked(), Ordering::Relaxed);
        self.ext_ref_present
            .store(seq.external().ref_present(), Ordering::Relaxed);
        self.realign
            .store(seq.external().realign_state() as u8, Ordering::Relaxed);
        self.delock_count
            .store(seq.delock_count(), Ordering::Relaxed);
        for (i, flag) in self.aux_locked.iter().enumerate() {
            let locked = seq.aux(i + 1).is_some_and(|m| m.locked());
            flag.store(locked, Ordering::Relaxed);
        }

        if let Some(mut mode) = acquire(&self.mode, wait) {
            *mode = seq.mode();
        }
        if let Some(mut shift) = acquire(&self.shift, wait) {
            let main = seq.main();
            *shift = ShiftStatus {
                current: main.phase_shift_current(),
                target: main.phase_shift_target(),
                in_progress: main.shift_in_progress(),
            };
        }
        for (slot, t) in self.trackers.iter().zip(seq.ptrackers()) {
            if let Some(mut s) = acquire(slot, wait) {
                let (phase, ready) = t.phase();
                *s = TrackerStatus {
                    enabled: t.enabled(),
                    ready,
                    phase,
                };
            }
        }
    }

    pub fn mode(&self) -> Mode {
        *lock(&self.mode)
    }

    pub fn state(&self) -> SeqState {
        SeqState::from_u8(self.state.load(Ordering::Relaxed)).unwrap_or(SeqState::Disabled)
    }

    pub fn helper_locked(&self) -> bool {
        self.helper_locked.load(Ordering::Relaxed)
    }

    pub fn main_locked(&self) -> bool {
        self.main_locked.load(Ordering::Relaxed)
    }

    pub fn ext_locked(&self) -> bool {
        self.ext_locked.load(Ordering::Relaxed)
    }

    pub fn delock_count(&self) -> u32 {
        self.delock_count.load(Ordering::Relaxed)
    }

    pub fn shift(&self) -> ShiftStatus {
        *lock(&self.shift)
    }

    /// Consistent phase, ready and enable flags of one tracker
    pub fn tracker(&self, channel: usize) -> Option<TrackerStatus> {
        self.trackers.get(channel).map(|m| *lock(m))
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            mode: self.mode(),
            state: self.state(),
            helper_locked: self.helper_locked(),
            main_locked: self.main_locked(),
            ext_locked: self.ext_locked(),
            ext_ref_present: self.ext_ref_present.load(Ordering::Relaxed),
            realign: realign_from_u8(self.realign.load(Ordering::Relaxed)),
            delock_count: self.delock_count(),
            shift: self.shift(),
            trackers: self.trackers.iter().map(|m| *lock(m)).collect(),
            aux_locked: self
                .aux_locked
                .iter()
                .map(|f| f.load(Ordering::Relaxed))
                .collect(),
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn acquire<T>(m: &Mutex<T>, wait: bool) -> Option<MutexGuard<'_, T>> {
    if wait {
        return Some(lock(m));
    }
    match m.try_lock() {
        Ok(guard) => Some(guard),
        Err(TryLockError::Poisoned(e)) => Some(e.into_inner()),
        Err(TryLockError::WouldBlock) => None,
    }
}

fn realign_from_u8(v: u8) -> RealignState {
    use RealignState::*;
    [Stage1, Stage1Wait, Stage2, Stage2Wait, Invalid, Disabled, Done]
        .into_iter()
        .find(|s| *s as u8 == v)
        .unwrap_or(Disabled)
}
