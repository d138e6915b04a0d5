//! Central constants for the decode pipeline.
//!
//! All magic numbers in the decode path live here so they can be tuned in
//! one place and remain consistent across modules.

// ── Frame geometry ───────────────────────────────────────────────────────────

/// Decoded samples per frame, per channel (fixed by the frame format).
pub const FRAME_SAMPLES: usize = 1536;

/// Output channel count: every frame is downmixed to stereo.
pub const OUTPUT_CHANNELS: usize = 2;

/// Interleaved i16 samples in one published block.
pub const BLOCK_SAMPLES: usize = FRAME_SAMPLES * OUTPUT_CHANNELS;

// ── Transform engines ────────────────────────────────────────────────────────

/// Transform order: coefficients per transform block.
pub const TRANSFORM_ORDER: usize = 512;

/// Coefficient lane size shared by transform engines: 6 blocks of 256
/// samples, consumed per frame.
pub const COEFF_WORDS: usize = 6 * 256;

/// Required scratch-buffer alignment, driven by vectorized transform maths.
pub const SCRATCH_ALIGN: usize = 16;

// ── Output ring ──────────────────────────────────────────────────────────────

/// Default ring capacity in slots. Must stay a power of two.
pub const DEFAULT_RING_CAPACITY: usize = 8;

// ── Blocking waits ───────────────────────────────────────────────────────────

/// Milliseconds a blocked wait parks on its condvar before re-checking the
/// stop flag.
pub const STOP_POLL_MS: u64 = 50;
