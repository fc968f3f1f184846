//! Sink forwarding diagnostic samples over a bounded channel

use crossbeam::channel::{Receiver, Sender, TrySendError, bounded};

use super::{DiagSample, DiagSink};

/// Forwards samples to a bounded crossbeam channel, dropping samples
/// rather than blocking when the reader falls behind
pub struct ChannelSink {
    tx: Sender<DiagSample>,
    dropped: u64,
}

impl ChannelSink {
    /// Create a sink and the receiving end for a reader thread
    pub fn bounded(capacity: usize) -> (Self, Receiver<DiagSample>) {
        let (tx, rx) = bounded(capacity);
        (Self { tx, dropped: 0 }, rx)
    }

    /// Samples discarded because the channel was full or closed
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl DiagSink for ChannelSink {
    fn consume(&mut self, sample: DiagSample) {
        match self.tx.try_send(sample) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped += 1;
            }
        }
    }
}
