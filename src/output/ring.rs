//! Fixed-capacity ring of timestamped PCM blocks shared between the decode
//! thread (producer) and the playback thread (consumer).
//!
//! Capacity is a power of two so index arithmetic is a bitmask. One mutex
//! plus two condvars guard the indices and the slot hand-off: the consumer
//! parks on `readable`, the producer parks on `writable` when every slot is
//! occupied (back-pressure instead of overwriting unconsumed audio). A slot
//! is fully written before the write index advances, and the ring is closed
//! with a broadcast so nobody stays parked on a dead ring.

use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::common::Pts;
use crate::constants::STOP_POLL_MS;

/// Output format a ring is created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingFormat {
    pub sample_rate: u32,
    pub channels: usize,
    pub frame_samples: usize,
}

impl RingFormat {
    /// Interleaved i16 samples per slot.
    pub fn block_len(&self) -> usize {
        self.frame_samples * self.channels
    }
}

#[derive(Debug, Error)]
pub enum RingError {
    /// Slot or index storage could not be allocated.
    #[error("output ring allocation failed")]
    Allocation,
    #[error("ring capacity {0} is not a power of two")]
    BadCapacity(usize),
    /// The ring was closed while the producer waited for a free slot, or at
    /// creation time when the consumer side is already gone.
    #[error("output ring closed")]
    Closed,
    /// The stop signal fired while the producer waited for a free slot.
    #[error("stop signal observed while waiting for a free slot")]
    Interrupted,
}

struct Slot {
    pcm: Vec<i16>,
    pts: Pts,
}

struct RingState {
    slots: Vec<Slot>,
    write_idx: usize,
    read_idx: usize,
    occupied: usize,
    closed: bool,
}

pub struct OutputRing {
    format: RingFormat,
    mask: usize,
    state: Mutex<RingState>,
    readable: Condvar,
    writable: Condvar,
}

impl OutputRing {
    /// Allocate a ring with `capacity` slots (a power of two), each sized
    /// for one block of `format`.
    pub fn create(capacity: usize, format: RingFormat) -> Result<Arc<Self>, RingError> {
        if capacity == 0 || !capacity.is_power_of_two() {
            return Err(RingError::BadCapacity(capacity));
        }
        let block = format.block_len();
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(capacity)
            .map_err(|_| RingError::Allocation)?;
        for _ in 0..capacity {
            let mut pcm = Vec::new();
            pcm.try_reserve_exact(block).map_err(|_| RingError::Allocation)?;
            pcm.resize(block, 0);
            slots.push(Slot {
                pcm,
                pts: Pts::Continuation,
            });
        }
        Ok(Arc::new(Self {
            format,
            mask: capacity - 1,
            state: Mutex::new(RingState {
                slots,
                write_idx: 0,
                read_idx: 0,
                occupied: 0,
                closed: false,
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
        }))
    }

    pub fn format(&self) -> &RingFormat {
        &self.format
    }

    pub fn sample_rate(&self) -> u32 {
        self.format.sample_rate
    }

    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Current write index, already reduced modulo capacity.
    pub fn write_index(&self) -> usize {
        self.state.lock().write_idx
    }

    pub fn read_index(&self) -> usize {
        self.state.lock().read_idx
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Consumer handle for this ring.
    pub fn consumer(self: &Arc<Self>) -> RingConsumer {
        RingConsumer { ring: self.clone() }
    }

    /// Take the next write slot's buffer out of the ring for decoding.
    ///
    /// Blocks while the ring is full, re-checking `stop` on a short condvar
    /// interval so shutdown cannot deadlock against a stalled consumer. The
    /// reservation must be finished with [`SlotReservation::publish`] or
    /// [`SlotReservation::abandon`].
    pub fn reserve(&self, stop: &AtomicBool) -> Result<SlotReservation<'_>, RingError> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(RingError::Closed);
            }
            if state.occupied <= self.mask {
                break;
            }
            if stop.load(Ordering::Acquire) {
                return Err(RingError::Interrupted);
            }
            self.writable
                .wait_for(&mut state, Duration::from_millis(STOP_POLL_MS));
        }
        let idx = state.write_idx;
        let mut pcm = mem::take(&mut state.slots[idx].pcm);
        drop(state);

        // Slots keep their size for the ring's lifetime; only an abandoned
        // reservation that was dropped on a panic path can leave one short.
        let block = self.format.block_len();
        if pcm.len() != block {
            pcm.resize(block, 0);
        }
        Ok(SlotReservation {
            ring: self,
            pcm,
            pts: Pts::Continuation,
        })
    }

    /// Close the ring and wake everyone parked on it. Idempotent.
    ///
    /// Buffered slots stay readable; the consumer sees end-of-ring once it
    /// has drained them.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if !state.closed {
            state.closed = true;
            self.readable.notify_all();
            self.writable.notify_all();
        }
    }

    fn publish_slot(&self, pcm: Vec<i16>, pts: Pts) {
        let mut state = self.state.lock();
        let idx = state.write_idx;
        state.slots[idx] = Slot { pcm, pts };
        state.write_idx = (idx + 1) & self.mask;
        state.occupied += 1;
        self.readable.notify_one();
    }

    fn return_slot(&self, pcm: Vec<i16>) {
        let mut state = self.state.lock();
        let idx = state.write_idx;
        state.slots[idx].pcm = pcm;
        // Write index untouched: nothing was published.
        self.writable.notify_one();
    }
}

/// An in-progress write into the ring's next slot.
pub struct SlotReservation<'a> {
    ring: &'a OutputRing,
    pcm: Vec<i16>,
    pts: Pts,
}

impl SlotReservation<'_> {
    pub fn set_pts(&mut self, pts: Pts) {
        self.pts = pts;
    }

    /// The slot's sample buffer, sized for exactly one block.
    pub fn pcm_mut(&mut self) -> &mut [i16] {
        &mut self.pcm
    }

    /// Hand the fully-written slot to the consumer: advance the write index
    /// and signal.
    pub fn publish(self) {
        self.ring.publish_slot(self.pcm, self.pts);
    }

    /// Give the buffer back without publishing; the write index does not
    /// move and the consumer never sees this slot.
    pub fn abandon(self) {
        self.ring.return_slot(self.pcm);
    }
}

/// A decoded, timestamped PCM block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub pcm: Vec<i16>,
    pub pts: Pts,
}

/// Consumer end of an [`OutputRing`].
pub struct RingConsumer {
    ring: Arc<OutputRing>,
}

impl RingConsumer {
    pub fn format(&self) -> &RingFormat {
        self.ring.format()
    }

    pub fn sample_rate(&self) -> u32 {
        self.ring.sample_rate()
    }

    pub fn ring(&self) -> &Arc<OutputRing> {
        &self.ring
    }

    /// Copy the next block into `dst` and return its timestamp.
    ///
    /// Blocks until a slot is published. Returns `None` once the ring is
    /// closed and drained.
    pub fn recv_into(&self, dst: &mut Vec<i16>) -> Option<Pts> {
        let mut state = self.ring.state.lock();
        while state.occupied == 0 {
            if state.closed {
                return None;
            }
            self.ring.readable.wait(&mut state);
        }
        let idx = state.read_idx;
        dst.clear();
        dst.extend_from_slice(&state.slots[idx].pcm);
        let pts = state.slots[idx].pts;
        state.read_idx = (idx + 1) & self.ring.mask;
        state.occupied -= 1;
        self.ring.writable.notify_one();
        Some(pts)
    }

    /// Non-blocking variant of [`recv_into`](Self::recv_into): `None` when
    /// no slot is ready right now.
    pub fn try_recv_into(&self, dst: &mut Vec<i16>) -> Option<Pts> {
        let mut state = self.ring.state.lock();
        if state.occupied == 0 {
            return None;
        }
        let idx = state.read_idx;
        dst.clear();
        dst.extend_from_slice(&state.slots[idx].pcm);
        let pts = state.slots[idx].pts;
        state.read_idx = (idx + 1) & self.ring.mask;
        state.occupied -= 1;
        self.ring.writable.notify_one();
        Some(pts)
    }

    /// Blocking receive that allocates a fresh [`Block`].
    pub fn recv(&self) -> Option<Block> {
        let mut pcm = Vec::new();
        let pts = self.recv_into(&mut pcm)?;
        Some(Block { pcm, pts })
    }
}
