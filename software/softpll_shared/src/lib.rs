#![doc = include_str!("../README.md")]
#![cfg_attr(not(feature = "std"), no_std)]
#![allow(clippy::needless_range_loop)]

pub mod state;

pub use state::{RtsChannelState, RtsGlobalState, RtsState};

/// Number of channel records carried by the status record, whether or
/// not the hardware implements that many reference inputs
pub const RTS_PLL_CHANNELS: usize = 18;

/// Reference channel value meaning "no reference selected"
pub const REF_NONE: u32 = 255;

/// Derive To/From with an added "Unknown" variant catch-all for converting
/// from numerical values that do not match a valid variant in order to
/// avoid either panicking or cumbersome error handling.
#[macro_export]
macro_rules! enum_with_unknown {
    (
        $( #[$enum_attr:meta] )*
        pub enum $name:ident($ty:ty) {
            $(
              $( #[$variant_attr:meta] )*
              $variant:ident = $value:expr
            ),+ $(,)?
        }
    ) => {
        #[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
        $( #[$enum_attr] )*
        pub enum $name {
            $(
              $( #[$variant_attr] )*
              $variant
            ),*,
            /// Catch-all for values that do not match a variant
            Unknown($ty)
        }

        impl ::core::convert::From<$ty> for $name {
            fn from(value: $ty) -> Self {
                match value {
                    $( $value => $name::$variant ),*,
                    other => $name::Unknown(other)
                }
            }
        }

        impl ::core::convert::From<$name> for $ty {
            fn from(value: $name) -> Self {
                match value {
                    $( $name::$variant => $value ),*,
                    $name::Unknown(other) => other
                }
            }
        }
    }
}

enum_with_unknown! {
    /// Operating mode of the real-time subsystem as seen by the host
    pub enum RtsMode(u32) {
        /// Grandmaster locked to an external 10 MHz / 1-PPS reference
        GmExternal = 1,
        /// Grandmaster running from the local oscillator
        GmFreeRunning = 2,
        /// Boundary clock recovering time from a network port
        BoundaryClock = 3,
        /// PLL disabled
        Disabled = 4,
    }
}

impl Default for RtsMode {
    fn default() -> Self {
        Self::Disabled
    }
}
