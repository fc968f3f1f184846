//! Aggregated PLL status record reported to the host.
//!
//! The record is a global block followed by [`RTS_PLL_CHANNELS`] channel
//! blocks. Phase fields are in picoseconds.
use byte_struct::*;

pub use byte_struct::{ByteStruct, ByteStructLen};

use crate::{RTS_PLL_CHANNELS, REF_NONE};

/// Reference input frequency valid
pub const CHAN_REF_VALID: u32 = 1 << 0;
/// Frequency out of range
pub const CHAN_FREQ_OUT_OF_RANGE: u32 = 1 << 1;
/// Phase is drifting too fast
pub const CHAN_DRIFTING: u32 = 1 << 2;
/// Channel phase measurement is ready
pub const CHAN_PMEAS_READY: u32 = 1 << 3;
/// Channel not available/disabled
pub const CHAN_DISABLED: u32 = 1 << 4;
/// Channel is busy adjusting phase
pub const CHAN_SHIFTING: u32 = 1 << 5;
/// Channel phase tracker is enabled
pub const CHAN_PTRACKER_ENABLED: u32 = 1 << 6;

/// DMTD clock is present (helper loop locked)
pub const RTS_DMTD_LOCKED: u32 = 1 << 0;
/// 125 MHz reference locked
pub const RTS_REF_LOCKED: u32 = 1 << 1;
/// External 10 MHz reference present
pub const RTS_EXT_10M_VALID: u32 = 1 << 2;
/// External 1-PPS present
pub const RTS_EXT_PPS_VALID: u32 = 1 << 3;
/// External 10 MHz frequency out-of-range
pub const RTS_EXT_10M_OUT_OF_RANGE: u32 = 1 << 4;
/// External 1-PPS frequency out-of-range
pub const RTS_EXT_PPS_OUT_OF_RANGE: u32 = 1 << 5;
/// Holdover mode active
pub const RTS_HOLDOVER_ACTIVE: u32 = 1 << 6;

/// State of an individual input channel (switch port)
#[derive(ByteStruct, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[byte_struct_be]
pub struct RtsChannelState {
    /// Switchover priority: 0 = highest, 1 - 254 = high..low, 255 = channel disabled
    pub priority: u32,

    /// Phase setpoint in picoseconds. Used only when the channel is the slave reference.
    pub phase_setpoint: i32,

    /// Current phase shift in picoseconds. Used only when the channel is the slave reference.
    pub phase_current: i32,

    /// TX-RX loopback phase measurement in picoseconds
    pub phase_loopback: i32,

    /// Per-channel `CHAN_*` flags
    pub flags: u32,
}

/// Global part of the status record
#[derive(ByteStruct, Clone, Copy, Debug, PartialEq, Eq)]
#[byte_struct_be]
pub struct RtsGlobalState {
    /// Global `RTS_*` flags
    pub flags: u32,

    /// Duration of the current holdover period in 10 us units
    pub holdover_duration: i32,

    /// Numeric [`crate::RtsMode`] code
    pub mode: u32,

    /// Number of full re-lock cycles since the subsystem started
    pub delock_count: u32,

    /// Index of the channel used as slave reference, or [`REF_NONE`]
    pub current_ref: u32,
}

impl Default for RtsGlobalState {
    fn default() -> Self {
        Self {
            flags: 0,
            holdover_duration: 0,
            mode: crate::RtsMode::Disabled.into(),
            delock_count: 0,
            current_ref: REF_NONE,
        }
    }
}

/// Complete status record
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RtsState {
    pub global: RtsGlobalState,
    pub channels: [RtsChannelState; RTS_PLL_CHANNELS],
}

impl RtsState {
    /// Serialized length in bytes
    pub const BYTE_LEN: usize =
        RtsGlobalState::BYTE_LEN + RTS_PLL_CHANNELS * RtsChannelState::BYTE_LEN;

    /// Write the record into the first [`Self::BYTE_LEN`] bytes of `bytes`.
    ///
    /// Panics if `bytes` is too short, the same as the per-block encoders.
    pub fn write_bytes(&self, bytes: &mut [u8]) {
        let n = RtsGlobalState::BYTE_LEN;
        self.global.write_bytes(&mut bytes[..n]);
        let m = RtsChannelState::BYTE_LEN;
        for i in 0..RTS_PLL_CHANNELS {
            let start = n + i * m;
            self.channels[i].write_bytes(&mut bytes[start..start + m]);
        }
    }

    /// Read a record from the first [`Self::BYTE_LEN`] bytes of `bytes`.
    pub fn read_bytes(bytes: &[u8]) -> Self {
        let n = RtsGlobalState::BYTE_LEN;
        let m = RtsChannelState::BYTE_LEN;
        let mut state = Self {
            global: RtsGlobalState::read_bytes(&bytes[..n]),
            ..Default::default()
        };
        for i in 0..RTS_PLL_CHANNELS {
            let start = n + i * m;
            state.channels[i] = RtsChannelState::read_bytes(&bytes[start..start + m]);
        }
        state
    }
}
