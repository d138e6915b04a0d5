//! Bounds-checked bit/byte reader over a sequence of presentation packets.
//!
//! The cursor pulls packets from its [`PacketSource`] lazily: any read that
//! runs past the current packet fetches the next one, blocking inside the
//! source until data arrives or the stop flag fires. Bits are extracted
//! MSB-first through a small accumulator that never holds more than one
//! partial byte after a read completes.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;

use crate::common::Micros;
use crate::stream::packet::{PacketSource, StreamError};

pub struct StreamCursor {
    source: Box<dyn PacketSource>,
    stop: Arc<AtomicBool>,

    current: Bytes,
    byte_pos: usize,
    /// Total bytes consumed since session start, for diagnostics.
    total_bytes: u64,

    /// Bit accumulator, MSB-first. Holds at most 7 unread bits once a
    /// `read_bits` call returns.
    cache: u64,
    cache_bits: u32,

    /// Presentation time of the current packet, claimable once.
    pending_pts: Option<Micros>,
    /// Whether the current packet opens a demux unit.
    unit_start: bool,
}

impl StreamCursor {
    pub fn new(source: Box<dyn PacketSource>, stop: Arc<AtomicBool>) -> Self {
        Self {
            source,
            stop,
            current: Bytes::new(),
            byte_pos: 0,
            total_bytes: 0,
            cache: 0,
            cache_bits: 0,
            pending_pts: None,
            unit_start: false,
        }
    }

    /// Discard the current packet remainder and load the next one.
    ///
    /// Used by sync recovery to walk the stream packet by packet; ordinary
    /// reads fetch implicitly instead.
    pub fn next_packet(&mut self) -> Result<(), StreamError> {
        self.fetch()
    }

    /// True when the cursor sits at the head of a packet that opens a demux
    /// unit, i.e. where a sync pointer can be read.
    pub fn at_unit_start(&self) -> bool {
        self.unit_start && self.byte_pos == 0
    }

    /// Claim the presentation time attached to the packet currently being
    /// consumed. Each packet's time is handed out at most once, to the first
    /// frame whose header bytes start inside it.
    pub fn take_pts(&mut self) -> Option<Micros> {
        self.pending_pts.take()
    }

    /// Drop any partially-consumed bits and reset the accumulator so the
    /// next read starts on a byte boundary.
    pub fn align_to_byte(&mut self) {
        self.cache = 0;
        self.cache_bits = 0;
    }

    /// Read `n` bits (1..=32), MSB-first, fetching packets as needed.
    pub fn read_bits(&mut self, n: u32) -> Result<u32, StreamError> {
        debug_assert!((1..=32).contains(&n));
        while self.cache_bits < n {
            let byte = self.next_byte_raw()?;
            self.cache = (self.cache << 8) | u64::from(byte);
            self.cache_bits += 8;
        }
        self.cache_bits -= n;
        Ok(((self.cache >> self.cache_bits) & ((1u64 << n) - 1)) as u32)
    }

    pub fn read_byte(&mut self) -> Result<u8, StreamError> {
        Ok(self.read_bits(8)? as u8)
    }

    /// Read a big-endian 16-bit field.
    pub fn read_u16(&mut self) -> Result<u16, StreamError> {
        // Aligned fast path: both bytes already sit in the current packet.
        if self.cache_bits == 0 && self.byte_pos + 2 <= self.current.len() {
            let v = BigEndian::read_u16(&self.current[self.byte_pos..]);
            self.byte_pos += 2;
            self.total_bytes += 2;
            return Ok(v);
        }
        Ok(self.read_bits(16)? as u16)
    }

    /// Advance `n` bytes, crossing packet boundaries as needed. Whole bytes
    /// still buffered in the accumulator are skipped first.
    pub fn seek_forward(&mut self, n: usize) -> Result<(), StreamError> {
        let mut remaining = n;
        while remaining > 0 && self.cache_bits >= 8 {
            self.cache_bits -= 8;
            remaining -= 1;
        }
        while remaining > 0 {
            let avail = self.current.len() - self.byte_pos;
            if avail == 0 {
                self.fetch()?;
                continue;
            }
            let step = remaining.min(avail);
            self.byte_pos += step;
            self.total_bytes += step as u64;
            remaining -= step;
        }
        Ok(())
    }

    /// Total bytes consumed since the cursor was created.
    pub fn position(&self) -> u64 {
        self.total_bytes
    }

    fn next_byte_raw(&mut self) -> Result<u8, StreamError> {
        while self.byte_pos >= self.current.len() {
            self.fetch()?;
        }
        let b = self.current[self.byte_pos];
        self.byte_pos += 1;
        self.total_bytes += 1;
        Ok(b)
    }

    fn fetch(&mut self) -> Result<(), StreamError> {
        let packet = self.source.next_packet(&self.stop)?;
        self.unit_start = packet.pes_start;
        self.pending_pts = packet.pts;
        self.current = packet.data;
        self.byte_pos = 0;
        Ok(())
    }
}
