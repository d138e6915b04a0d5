//! Contracts for the pluggable frame decode engine.
//!
//! The orchestrator never interprets the compressed bitstream itself: a
//! [`FrameDecodeEngine`] parses headers and decodes payloads, using the
//! transform and downmix engines bound to the session.

use thiserror::Error;

use crate::engine::{DownmixEngine, EngineHandle, TransformEngine};
use crate::stream::{StreamCursor, StreamError};

/// Result of a successful frame header parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSyncInfo {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Decoded samples per channel in this frame.
    pub frame_samples: usize,
    /// Channel configuration tag, opaque to the orchestrator.
    pub channel_tag: u8,
}

#[derive(Debug, Error)]
pub enum HeaderError {
    /// The bytes at the cursor are not a valid frame header.
    #[error("invalid frame header: {0}")]
    Invalid(&'static str),
    #[error(transparent)]
    Stream(#[from] StreamError),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    /// The frame payload failed to decode; no output was produced.
    #[error("corrupt frame payload: {0}")]
    Corrupt(&'static str),
    #[error(transparent)]
    Stream(#[from] StreamError),
}

/// Parses and decodes one frame format.
///
/// `parse_header` is called with the cursor synchronized on what should be a
/// frame start; `decode_payload` immediately afterwards with a sample buffer
/// sized for the frame. Both may pull more packets through the cursor.
pub trait FrameDecodeEngine: Send {
    fn parse_header(&mut self, cursor: &mut StreamCursor) -> Result<FrameSyncInfo, HeaderError>;

    fn decode_payload(
        &mut self,
        cursor: &mut StreamCursor,
        transform: &mut EngineHandle<dyn TransformEngine>,
        downmix: &mut EngineHandle<dyn DownmixEngine>,
        out: &mut [i16],
    ) -> Result<(), DecodeError>;
}
