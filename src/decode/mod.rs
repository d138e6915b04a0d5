pub mod handle;
pub mod orchestrator;

pub use handle::{SessionHandle, spawn};
pub use orchestrator::{DecoderSession, SessionError};
