//! Playback orchestration: the decoder contract and the engine driving it.

pub mod engine;
pub mod interruption;
pub mod progress;
pub mod retry;
pub mod symphonia;

#[cfg(test)]
pub(crate) mod tests;

use tokio::sync::mpsc::UnboundedSender;

use crate::error::DecoderError;

pub use engine::{PlaybackEngine, PlaybackEngineBuilder};
pub use interruption::{InterruptionMonitor, InterruptionSink, ManualInterruptionMonitor};
pub use progress::ProgressLoop;
pub use retry::{BudgetTick, RetryBudget};
pub use symphonia::SymphoniaDecoder;

/// Identifies one prepare attempt. Callbacks from older sessions are ignored.
pub type SessionId = u64;

/// Asynchronous notifications raised by a decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderEvent {
    Prepared,
    Completed,
    Error { code: i32, extra: i32 },
    Buffering(u8),
}

/// Everything the engine's event pump consumes
#[derive(Debug)]
pub(crate) enum EngineMessage {
    Decoder {
        session: SessionId,
        event: DecoderEvent,
    },
    Telephony {
        offhook_or_ringing: bool,
    },
}

/// Callback handle given to a decoder. Sending never blocks, so it may be
/// used from decoder threads or from inside decoder calls.
#[derive(Clone)]
pub struct DecoderSink {
    tx: UnboundedSender<EngineMessage>,
}

impl DecoderSink {
    pub(crate) fn new(tx: UnboundedSender<EngineMessage>) -> Self {
        Self { tx }
    }

    fn send(&self, session: SessionId, event: DecoderEvent) {
        if self.tx.send(EngineMessage::Decoder { session, event }).is_err() {
            log::debug!("Engine gone, dropping {:?} for session {}", event, session);
        }
    }

    pub fn prepared(&self, session: SessionId) {
        self.send(session, DecoderEvent::Prepared);
    }

    pub fn completed(&self, session: SessionId) {
        self.send(session, DecoderEvent::Completed);
    }

    pub fn error(&self, session: SessionId, code: i32, extra: i32) {
        self.send(session, DecoderEvent::Error { code, extra });
    }

    pub fn decoder_error(&self, session: SessionId, error: &DecoderError) {
        let (code, extra) = error.codes();
        self.error(session, code, extra);
    }

    pub fn buffering(&self, session: SessionId, percent: u8) {
        self.send(session, DecoderEvent::Buffering(percent.min(100)));
    }
}

/// Media decode/render backend driven by the engine.
///
/// Every method must return promptly; preparation happens in the background
/// and is reported through the [`DecoderSink`].
pub trait Decoder: Send {
    fn set_event_sink(&mut self, sink: DecoderSink);

    /// Drop the current source and any session state
    fn reset(&mut self);

    fn set_data_source(&mut self, url: &str) -> Result<(), DecoderError>;

    /// Start preparing the data source; completion arrives as `Prepared` or `Error`
    fn prepare_async(&mut self, session: SessionId) -> Result<(), DecoderError>;

    fn start(&mut self);

    fn pause(&mut self);

    fn stop(&mut self);

    fn seek_to(&mut self, position_ms: u64);

    fn current_position(&self) -> u64;

    /// Duration in milliseconds, 0 when unknown
    fn duration(&self) -> u64;

    fn is_playing(&self) -> bool;

    /// Free every resource; the decoder is not used afterwards
    fn release(&mut self);
}
