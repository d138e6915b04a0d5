//! Decode stage for frame-oriented compressed audio elementary streams.
//!
//! The crate turns an unreliable, self-describing byte stream of demuxed
//! presentation packets into timestamped PCM blocks for a playback thread:
//!
//! ```text
//! PacketSource -> StreamCursor -> SyncRecovery -> FrameDecodeEngine
//!                                                       |
//!                          OutputRing <- publish <- decode (transform + downmix)
//! ```
//!
//! The decode loop lives in [`decode::DecoderSession`]. It keeps itself
//! synchronized on frame boundaries through [`sync::SyncRecovery`], binds a
//! transform/downmix engine pair from an [`engine::EngineRegistry`], and
//! publishes into an [`output::OutputRing`] that is rebuilt whenever the
//! stream's sample rate changes. Codec bit-grammar and transform maths stay
//! behind the [`frame::FrameDecodeEngine`] and engine traits; this crate
//! only orchestrates them.

pub mod common;
pub mod config;
pub mod constants;
pub mod decode;
pub mod engine;
pub mod frame;
pub mod output;
pub mod stream;
pub mod sync;

pub use common::{FourCc, Micros, Pts};
pub use config::DecoderConfig;
pub use decode::{DecoderSession, SessionError, SessionHandle, spawn};
pub use engine::{
    AlignedBuf, DownmixEngine, EngineError, EngineHandle, EngineLifecycleManager, EnginePair,
    EngineRegistry, TransformEngine,
};
pub use engine::registry::{DownmixProvider, TransformProvider};
pub use frame::{DecodeError, FrameDecodeEngine, FrameSyncInfo, HeaderError};
pub use output::{Block, ChannelSink, OutputRing, OutputSink, RingConsumer, RingError, RingFormat};
pub use stream::{
    ChannelPacketSource, Packet, PacketSource, SourceItem, StreamCursor, StreamError,
    source_channel,
};
pub use sync::{SyncRecovery, SyncState};
