//! The decode session and its orchestration loop.
//!
//! One session per decode thread: it owns the stream cursor, the sync
//! recovery state, the bound engine pair and the live output ring, and runs
//! the per-frame cycle of header parse, ring upkeep, slot reservation,
//! timestamp stamping, payload decode and publish. Per-frame failures are
//! absorbed by resynchronization; session-level failures (engine or ring
//! acquisition, upstream fault) end the run.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tracing::{Level, debug, error, info, span, warn};

use crate::common::{FourCc, Pts};
use crate::config::DecoderConfig;
use crate::constants::OUTPUT_CHANNELS;
use crate::engine::{EngineError, EngineLifecycleManager, EnginePair};
use crate::frame::{DecodeError, FrameDecodeEngine, FrameSyncInfo, HeaderError};
use crate::output::{OutputRing, OutputSink, RingError, RingFormat};
use crate::stream::{PacketSource, StreamCursor, StreamError};
use crate::sync::SyncRecovery;

#[derive(Debug, Error)]
pub enum SessionError {
    /// The demuxer handed us a stream this decoder does not speak.
    #[error("unsupported codec tag {0}")]
    UnsupportedCodec(FourCc),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Ring(#[from] RingError),
    /// The packet source reported a fatal condition.
    #[error("upstream failure: {0}")]
    Upstream(String),
}

pub struct DecoderSession {
    cursor: StreamCursor,
    recovery: SyncRecovery,
    engines: EnginePair,
    frame_engine: Box<dyn FrameDecodeEngine>,
    sink: Box<dyn OutputSink>,
    ring: Option<Arc<OutputRing>>,
    ring_capacity: usize,
    stop: Arc<AtomicBool>,
}

impl DecoderSession {
    /// Bind engines and wire up a session for one elementary stream.
    ///
    /// Engine acquisition happens here, atomically as a pair; on any failure
    /// nothing stays bound and the error is returned as-is.
    pub fn new(
        source: Box<dyn PacketSource>,
        codec: FourCc,
        frame_engine: Box<dyn FrameDecodeEngine>,
        sink: Box<dyn OutputSink>,
        lifecycle: &EngineLifecycleManager,
        config: &DecoderConfig,
    ) -> Result<Self, SessionError> {
        if codec != FourCc::A52 {
            return Err(SessionError::UnsupportedCodec(codec));
        }
        let engines = lifecycle.acquire_pair(
            config.engines.transform.as_deref(),
            config.engines.downmix.as_deref(),
        )?;
        info!(
            "decode session ready: transform `{}`, downmix `{}`",
            engines.transform.name(),
            engines.downmix.name()
        );
        let stop = Arc::new(AtomicBool::new(false));
        let cursor = StreamCursor::new(source, stop.clone());
        Ok(Self {
            cursor,
            recovery: SyncRecovery::new(),
            engines,
            frame_engine,
            sink,
            ring: None,
            ring_capacity: config.output.ring_capacity,
            stop,
        })
    }

    /// Shared stop flag; raising it unwinds any blocked wait inside the
    /// session within one poll interval.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Run the decode loop until the stream ends, the stop flag fires, or a
    /// fatal error surfaces. The output ring is torn down (and its consumer
    /// woken) on every exit path; the engine pair is released when the
    /// session is dropped.
    pub fn run(&mut self) -> Result<(), SessionError> {
        let _span = span!(Level::DEBUG, "decode_session").entered();
        let result = self.decode_loop();
        self.teardown();
        result
    }

    fn decode_loop(&mut self) -> Result<(), SessionError> {
        loop {
            if self.stop.load(Ordering::Acquire) {
                info!("stop signal received");
                return Ok(());
            }

            // Frame header, either in lock-step or through a full re-hunt.
            let info = if self.recovery.is_synced() {
                match self.frame_engine.parse_header(&mut self.cursor) {
                    Ok(info) => info,
                    Err(HeaderError::Invalid(reason)) => {
                        warn!("frame header rejected: {reason}");
                        self.recovery.mark_lost();
                        continue;
                    }
                    Err(HeaderError::Stream(err)) => return self.stream_end(err),
                }
            } else {
                match self
                    .recovery
                    .reacquire(&mut self.cursor, &mut *self.frame_engine)
                {
                    Ok(info) => info,
                    Err(err) => return self.stream_end(err),
                }
            };

            let ring = self.ensure_ring(&info)?;

            let mut slot = match ring.reserve(&self.stop) {
                Ok(slot) => slot,
                Err(RingError::Interrupted) => {
                    info!("stop signal received while waiting for a free slot");
                    return Ok(());
                }
                Err(RingError::Closed) => {
                    info!("output ring closed, ending session");
                    return Ok(());
                }
                Err(err) => return Err(err.into()),
            };

            // Presentation time of the bits this frame started on; when the
            // demuxer had none, the slot still gets stamped.
            slot.set_pts(match self.cursor.take_pts() {
                Some(t) => Pts::Known(t),
                None => Pts::Continuation,
            });

            match self.frame_engine.decode_payload(
                &mut self.cursor,
                &mut self.engines.transform,
                &mut self.engines.downmix,
                slot.pcm_mut(),
            ) {
                Ok(()) => slot.publish(),
                Err(DecodeError::Corrupt(reason)) => {
                    warn!("frame dropped: {reason}");
                    slot.abandon();
                    self.recovery.mark_lost();
                    continue;
                }
                Err(DecodeError::Stream(err)) => {
                    slot.abandon();
                    return self.stream_end(err);
                }
            }

            self.cursor.align_to_byte();
        }
    }

    /// Keep the live ring matched to the stream's sample rate, rebuilding it
    /// on a change. Creation failure is fatal for the session.
    fn ensure_ring(&mut self, info: &FrameSyncInfo) -> Result<Arc<OutputRing>, SessionError> {
        match self.ring.take() {
            Some(ring) if ring.sample_rate() == info.sample_rate => {
                self.ring = Some(ring.clone());
                return Ok(ring);
            }
            Some(old) => {
                info!(
                    "sample rate changed {} Hz -> {} Hz, rebuilding output ring",
                    old.sample_rate(),
                    info.sample_rate
                );
                // Wakes the consumer before the ring goes away.
                self.sink.destroy(old);
            }
            None => {}
        }

        let format = RingFormat {
            sample_rate: info.sample_rate,
            channels: OUTPUT_CHANNELS,
            frame_samples: info.frame_samples,
        };
        let ring = match self.sink.create(format, self.ring_capacity) {
            Ok(ring) => ring,
            Err(err) => {
                error!("failed to create output ring: {err}");
                return Err(err.into());
            }
        };
        self.ring = Some(ring.clone());
        Ok(ring)
    }

    fn stream_end(&self, err: StreamError) -> Result<(), SessionError> {
        match err {
            StreamError::Interrupted => {
                info!("decode interrupted by stop signal");
                Ok(())
            }
            StreamError::UpstreamEnded => {
                info!("packet source drained");
                Ok(())
            }
            StreamError::Upstream(msg) => {
                error!("upstream failure: {msg}");
                Err(SessionError::Upstream(msg))
            }
        }
    }

    fn teardown(&mut self) {
        if let Some(ring) = self.ring.take() {
            self.sink.destroy(ring);
        }
        debug!("decode session ended at byte {}", self.cursor.position());
    }
}
