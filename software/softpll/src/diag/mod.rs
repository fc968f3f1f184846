//! Per-sample diagnostic stream
//!
//! Loops emit one sample per quantity they touch while processing a tag, with
//! the final sample of each tag flagged as `last`. Samples go to a sink chosen
//! at construction: discarded, or forwarded over a bounded channel to a
//! reader outside the event handler.

mod channel;

pub use channel::ChannelSink;

/// Loop a diagnostic sample came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiagSource {
    Main,
    MainPrelock,
    External,
    Helper,
    HelperPrelock,
}

impl DiagSource {
    fn code(self) -> u32 {
        match self {
            DiagSource::Main => 0x00,
            DiagSource::MainPrelock => 0x40,
            DiagSource::External => 0x10,
            DiagSource::Helper => 0x20,
            DiagSource::HelperPrelock => 0x60,
        }
    }
}

/// Quantity carried by a diagnostic sample. The discriminants are the
/// register codes read by offline tuning tools.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiagKind {
    Y = 0,
    Err = 1,
    Tag = 2,
    Period = 3,
    Event = 4,
    Ref = 5,
    SampleId = 6,
    /// Phase shift setpoint of the main loop
    Setpoint = 7,
}

/// Value of a `DiagKind::Event` sample marking a loop (re)start
pub const EVT_START: i32 = 1;
/// Value of a `DiagKind::Event` sample marking a lock
pub const EVT_LOCKED: i32 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DiagSample {
    pub source: DiagSource,
    pub kind: DiagKind,
    pub value: i32,
    pub last: bool,
}

impl DiagSample {
    /// Pack into one 32-bit word: bit 31 marks the last sample of a tag,
    /// bits 24..31 hold source and kind, bits 0..24 the truncated value
    pub fn encode(&self) -> u32 {
        let what = self.source.code() | self.kind as u32;
        ((self.last as u32) << 31) | (what << 24) | (self.value as u32 & 0x00ff_ffff)
    }
}

/// Destination for diagnostic samples.
///
/// Called from the event handler, so implementations must not block.
pub trait DiagSink: Send {
    fn consume(&mut self, sample: DiagSample);
}

/// Discards every sample
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl DiagSink for NullSink {
    fn consume(&mut self, _sample: DiagSample) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_packs_flag_kind_and_value() {
        let s = DiagSample {
            source: DiagSource::Helper,
            kind: DiagKind::Err,
            value: -1,
            last: true,
        };
        assert_eq!(s.encode(), 0x8000_0000 | (0x21 << 24) | 0x00ff_ffff);

        let s = DiagSample {
            source: DiagSource::External,
            kind: DiagKind::Y,
            value: 32768,
            last: false,
        };
        assert_eq!(s.encode(), (0x10 << 24) | 32768);
    }

    #[test]
    fn kind_codes_match_register_format() {
        let word = |source, kind| {
            DiagSample {
                source,
                kind,
                value: 0,
                last: false,
            }
            .encode()
                >> 24
        };
        assert_eq!(word(DiagSource::MainPrelock, DiagKind::Period), 0x43);
        assert_eq!(word(DiagSource::Helper, DiagKind::Ref), 0x25);
        assert_eq!(word(DiagSource::External, DiagKind::SampleId), 0x16);
        assert_eq!(word(DiagSource::Main, DiagKind::Event), 0x04);
        assert_eq!(word(DiagSource::Main, DiagKind::Setpoint), 0x07);
    }
}
