//! Pluggable transform/downmix capability providers.
//!
//! The decode path does no frequency-domain maths of its own. It binds one
//! transform engine and one downmix engine per session, resolved by name
//! (with a priority-ordered fallback) from an [`EngineRegistry`], each with
//! its own set of aligned scratch buffers. See [`registry`] for acquisition
//! and release.

pub mod registry;
pub mod scratch;

pub use registry::{EngineLifecycleManager, EngineRegistry};
pub use scratch::AlignedBuf;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum EngineError {
    /// No registered provider could be bound for the capability.
    #[error("no suitable {0} engine")]
    NoSuitableProvider(&'static str),
    /// Scratch-buffer allocation failed.
    #[error("scratch allocation failed")]
    OutOfMemory,
    /// A provider refused to instantiate.
    #[error("engine `{name}` failed to start: {reason}")]
    InitFailed { name: String, reason: String },
}

/// Frequency-to-time-domain conversion engine.
pub trait TransformEngine: Send {
    fn name(&self) -> &str;

    /// Sizes, in f32 words, of the aligned scratch buffers this engine
    /// needs bound for its lifetime.
    fn scratch_words(&self) -> &[usize];

    /// Convert one frame's frequency-domain coefficients to time-domain
    /// samples, in place.
    fn inverse_transform(&mut self, coeffs: &mut [f32], channels: usize, scratch: &mut [AlignedBuf]);
}

/// Channel-count reduction engine: folds decoded channel lanes into
/// interleaved stereo output.
pub trait DownmixEngine: Send {
    fn name(&self) -> &str;

    fn scratch_words(&self) -> &[usize];

    fn downmix(&mut self, samples: &[f32], channels: usize, out: &mut [i16], scratch: &mut [AlignedBuf]);
}

/// A bound capability provider instance plus its exclusively-owned scratch
/// buffers.
///
/// Field order matters: scratch buffers are declared first so they are freed
/// before the engine on drop, the reverse of acquisition order.
pub struct EngineHandle<E: ?Sized> {
    scratch: Vec<AlignedBuf>,
    engine: Box<E>,
    name: String,
    capability: &'static str,
    bound: Arc<AtomicUsize>,
}

impl<E: ?Sized> EngineHandle<E> {
    pub(crate) fn bind(
        engine: Box<E>,
        scratch: Vec<AlignedBuf>,
        name: String,
        capability: &'static str,
        bound: Arc<AtomicUsize>,
    ) -> Self {
        bound.fetch_add(1, Ordering::AcqRel);
        debug!("bound {capability} engine `{name}`");
        Self {
            scratch,
            engine,
            name,
            capability,
            bound,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Split borrow so the engine can be driven against its own scratch.
    pub fn engine_and_scratch(&mut self) -> (&mut E, &mut [AlignedBuf]) {
        (&mut *self.engine, &mut self.scratch)
    }
}

impl<E: ?Sized> Drop for EngineHandle<E> {
    fn drop(&mut self) {
        self.bound.fetch_sub(1, Ordering::AcqRel);
        debug!("released {} engine `{}`", self.capability, self.name);
    }
}

/// The two engines a session binds, acquired and released as a unit.
///
/// Declared transform-first so drop order (transform, then downmix) reverses
/// the acquisition order (downmix, then transform).
pub struct EnginePair {
    pub transform: EngineHandle<dyn TransformEngine>,
    pub downmix: EngineHandle<dyn DownmixEngine>,
}
