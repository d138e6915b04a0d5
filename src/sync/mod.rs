//! Frame synchronization and recovery.
//!
//! The elementary stream carries no external framing: after a corrupt frame
//! or at session start the only way back in is the per-unit sync pointer.
//! Recovery walks packets until it reaches the head of a demux unit, skips
//! the pointed-to offset, realigns, and test-parses one header. A failed
//! parse keeps hunting with the next unit; recovery never converges on its
//! own if the stream stays garbage, so every blocking step stays
//! interruptible through the cursor's stop flag.

use tracing::{debug, trace};

use crate::frame::{FrameDecodeEngine, FrameSyncInfo, HeaderError};
use crate::stream::{StreamCursor, StreamError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No lock on the stream; a hunt is required before decoding.
    Unsynced,
    /// Walking the stream looking for a parsable frame header.
    Hunting,
    /// Locked: the cursor sits on frame boundaries.
    Synced,
}

pub struct SyncRecovery {
    state: SyncState,
}

impl Default for SyncRecovery {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncRecovery {
    pub fn new() -> Self {
        Self {
            state: SyncState::Unsynced,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn is_synced(&self) -> bool {
        self.state == SyncState::Synced
    }

    /// Drop back to [`SyncState::Unsynced`] after a header or payload
    /// failure.
    pub fn mark_lost(&mut self) {
        self.state = SyncState::Unsynced;
    }

    /// Hunt until a frame header parses, returning that frame's sync info.
    ///
    /// Only stream-level conditions (stop, end of input, upstream fault)
    /// abort the hunt; rejected headers simply move it to the next demux
    /// unit.
    pub fn reacquire(
        &mut self,
        cursor: &mut StreamCursor,
        engine: &mut dyn FrameDecodeEngine,
    ) -> Result<FrameSyncInfo, StreamError> {
        self.state = SyncState::Hunting;
        loop {
            // Walk to the head of the next demux unit; its first two bytes
            // are the offset of the first frame start within the unit.
            loop {
                cursor.next_packet()?;
                if cursor.at_unit_start() {
                    break;
                }
                trace!("hunt: skipping mid-unit packet");
            }
            cursor.align_to_byte();
            let sync_ptr = cursor.read_u16()?;
            cursor.seek_forward(sync_ptr as usize)?;

            match engine.parse_header(cursor) {
                Ok(info) => {
                    self.state = SyncState::Synced;
                    debug!(
                        "synchronized at byte {}: {} Hz, {} samples/frame",
                        cursor.position(),
                        info.sample_rate,
                        info.frame_samples
                    );
                    return Ok(info);
                }
                Err(HeaderError::Stream(err)) => return Err(err),
                Err(HeaderError::Invalid(reason)) => {
                    debug!("hunt: header rejected ({reason}), trying next unit");
                }
            }
        }
    }
}
