//! Timestamped PCM output: the shared ring and the sink that owns ring
//! lifecycle across sample-rate changes.

pub mod ring;

pub use ring::{Block, OutputRing, RingConsumer, RingError, RingFormat, SlotReservation};

use std::sync::Arc;

use tracing::{debug, warn};

/// Creates and tears down output rings on behalf of the decode session.
///
/// A new ring is requested when the first frame syncs and again on every
/// sample-rate change; `destroy` must wake any consumer parked on the old
/// ring before the session moves on.
pub trait OutputSink: Send {
    fn create(&mut self, format: RingFormat, capacity: usize)
        -> Result<Arc<OutputRing>, RingError>;

    fn destroy(&mut self, ring: Arc<OutputRing>) {
        ring.close();
    }
}

/// Default sink: hands each new ring's consumer end to the playback side
/// over a channel, so the consumer thread picks up replacement rings as the
/// stream's rate changes.
pub struct ChannelSink {
    consumer_tx: flume::Sender<RingConsumer>,
}

impl ChannelSink {
    pub fn new() -> (Self, flume::Receiver<RingConsumer>) {
        let (consumer_tx, consumer_rx) = flume::unbounded();
        (Self { consumer_tx }, consumer_rx)
    }
}

impl OutputSink for ChannelSink {
    fn create(
        &mut self,
        format: RingFormat,
        capacity: usize,
    ) -> Result<Arc<OutputRing>, RingError> {
        let ring = OutputRing::create(capacity, format)?;
        debug!(
            "created output ring: {} Hz, {} ch, {} slots",
            format.sample_rate, format.channels, capacity
        );
        if self.consumer_tx.send(ring.consumer()).is_err() {
            // Playback side is gone; a ring nobody will read is useless.
            warn!("consumer side disconnected, refusing to create an orphan ring");
            ring.close();
            return Err(RingError::Closed);
        }
        Ok(ring)
    }

    fn destroy(&mut self, ring: Arc<OutputRing>) {
        debug!("destroying output ring at {} Hz", ring.sample_rate());
        ring.close();
    }
}
