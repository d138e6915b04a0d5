//! Presentation packets and the source feeding them to the decoder.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use flume::RecvTimeoutError;
use thiserror::Error;

use crate::common::Micros;
use crate::constants::STOP_POLL_MS;

/// One demultiplexed chunk of the compressed elementary stream.
#[derive(Debug, Clone)]
pub struct Packet {
    pub data: Bytes,
    /// Presentation time of the first byte, if the demuxer knew it.
    pub pts: Option<Micros>,
    /// True when this packet opens a new demux unit. The first two payload
    /// bytes of such a packet hold the big-endian sync pointer.
    pub pes_start: bool,
}

/// Errors raised while waiting for or reading stream data.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The source is drained; no more packets will ever arrive.
    #[error("no more packets will arrive")]
    UpstreamEnded,
    /// The stop signal fired while blocked.
    #[error("stop signal observed while blocked")]
    Interrupted,
    /// The packet source itself hit a fatal condition.
    #[error("packet source failed: {0}")]
    Upstream(String),
}

/// Produces presentation packets for one decode session.
///
/// `next_packet` blocks until a packet is available, the `stop` flag is
/// raised ([`StreamError::Interrupted`]) or the source is done
/// ([`StreamError::UpstreamEnded`]).
pub trait PacketSource: Send {
    fn next_packet(&mut self, stop: &AtomicBool) -> Result<Packet, StreamError>;
}

/// What a demuxer pushes into a [`ChannelPacketSource`].
#[derive(Debug, Clone)]
pub enum SourceItem {
    Packet(Packet),
    /// The demuxer hit a condition it cannot recover from.
    Fatal(String),
}

/// Channel-backed [`PacketSource`]: the demuxer sends [`SourceItem`]s from
/// its own thread, the decoder pulls them here. Dropping the sender ends the
/// stream.
pub struct ChannelPacketSource {
    rx: flume::Receiver<SourceItem>,
}

/// Create a connected (sender, source) pair.
pub fn source_channel() -> (flume::Sender<SourceItem>, ChannelPacketSource) {
    let (tx, rx) = flume::unbounded();
    (tx, ChannelPacketSource { rx })
}

impl PacketSource for ChannelPacketSource {
    fn next_packet(&mut self, stop: &AtomicBool) -> Result<Packet, StreamError> {
        loop {
            if stop.load(Ordering::Acquire) {
                return Err(StreamError::Interrupted);
            }
            match self.rx.recv_timeout(Duration::from_millis(STOP_POLL_MS)) {
                Ok(SourceItem::Packet(p)) => return Ok(p),
                Ok(SourceItem::Fatal(msg)) => return Err(StreamError::Upstream(msg)),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Err(StreamError::UpstreamEnded),
            }
        }
    }
}

/// Replays a fixed packet script; for unit tests only.
#[cfg(test)]
pub(crate) struct ScriptedSource {
    packets: std::collections::VecDeque<Packet>,
}

#[cfg(test)]
impl ScriptedSource {
    pub(crate) fn new(packets: Vec<Packet>) -> Self {
        Self {
            packets: packets.into(),
        }
    }
}

#[cfg(test)]
impl PacketSource for ScriptedSource {
    fn next_packet(&mut self, stop: &AtomicBool) -> Result<Packet, StreamError> {
        if stop.load(Ordering::Acquire) {
            return Err(StreamError::Interrupted);
        }
        self.packets.pop_front().ok_or(StreamError::UpstreamEnded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn channel_source_delivers_in_order() {
        let (tx, mut source) = source_channel();
        let stop = AtomicBool::new(false);

        tx.send(SourceItem::Packet(Packet {
            data: Bytes::from_static(b"ab"),
            pts: Some(100),
            pes_start: true,
        }))
        .unwrap();
        tx.send(SourceItem::Packet(Packet {
            data: Bytes::from_static(b"cd"),
            pts: None,
            pes_start: false,
        }))
        .unwrap();

        let first = source.next_packet(&stop).unwrap();
        assert_eq!(&first.data[..], b"ab");
        assert_eq!(first.pts, Some(100));
        assert!(first.pes_start);

        let second = source.next_packet(&stop).unwrap();
        assert!(!second.pes_start);

        drop(tx);
        assert!(matches!(
            source.next_packet(&stop),
            Err(StreamError::UpstreamEnded)
        ));
    }

    #[test]
    fn channel_source_reports_fatal() {
        let (tx, mut source) = source_channel();
        let stop = AtomicBool::new(false);

        tx.send(SourceItem::Fatal("demux died".into())).unwrap();
        match source.next_packet(&stop) {
            Err(StreamError::Upstream(msg)) => assert_eq!(msg, "demux died"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn blocked_source_honors_stop_flag() {
        let (_tx, mut source) = source_channel();
        let stop = Arc::new(AtomicBool::new(false));

        let flag = stop.clone();
        let waker = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            flag.store(true, Ordering::Release);
        });

        assert!(matches!(
            source.next_packet(&stop),
            Err(StreamError::Interrupted)
        ));
        waker.join().unwrap();
    }
}
