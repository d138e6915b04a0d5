//! Thread spawn helper for decode sessions.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use tracing::error;

use crate::decode::orchestrator::{DecoderSession, SessionError};

/// Control handle for a decode session running on its own thread.
pub struct SessionHandle {
    stop: Arc<AtomicBool>,
    error_rx: flume::Receiver<SessionError>,
    join: Option<JoinHandle<()>>,
}

impl SessionHandle {
    /// Ask the session to stop; it unwinds within one poll interval.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// A fatal error the session reported, if any has surfaced yet.
    pub fn fatal_error(&self) -> Option<SessionError> {
        self.error_rx.try_recv().ok()
    }

    /// Wait for the thread to finish, returning its fatal error if it ended
    /// in one.
    pub fn join(mut self) -> Option<SessionError> {
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
        self.error_rx.try_recv().ok()
    }
}

/// Run `session` on a dedicated thread.
pub fn spawn(mut session: DecoderSession) -> SessionHandle {
    let stop = session.stop_flag();
    let (error_tx, error_rx) = flume::bounded(1);

    let join = std::thread::spawn(move || {
        if let Err(err) = session.run() {
            error!("decode session failed: {err}");
            let _ = error_tx.send(err);
        }
    });

    SessionHandle {
        stop,
        error_rx,
        join: Some(join),
    }
}
