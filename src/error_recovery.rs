use crate::error::PlaybackError;
use crate::logging::{PlaybackEventType, PlaybackLogger};
use log::{info, warn};

/// What the engine does after an entry failed to play
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryResult {
    /// Move on to the next manifest chunk or playlist entry
    Advance(String),
    /// Stop advancing; the engine goes idle
    GiveUp(String),
}

/// Tracks consecutive playback failures so one broken feed cannot spin the queue forever
pub struct ErrorRecoveryManager {
    logger: PlaybackLogger,
    consecutive_failures: u32,
    max_consecutive_failures: u32,
}

impl ErrorRecoveryManager {
    pub fn new(logger: PlaybackLogger, max_consecutive_failures: u32) -> Self {
        Self {
            logger,
            consecutive_failures: 0,
            max_consecutive_failures: max_consecutive_failures.max(1),
        }
    }

    /// Decide how to continue after the current entry failed
    pub fn on_entry_failed(&mut self, error: &PlaybackError) -> RecoveryResult {
        self.consecutive_failures += 1;

        if self.consecutive_failures >= self.max_consecutive_failures {
            warn!(
                "{} consecutive playback failures, last: {}",
                self.consecutive_failures, error
            );
            self.logger.log_event(
                PlaybackEventType::QueueExhausted,
                format!(
                    "Giving up after {} failed items",
                    self.consecutive_failures
                ),
            );
            self.consecutive_failures = 0;
            return RecoveryResult::GiveUp("Too many consecutive failures".to_string());
        }

        let reason = match error {
            PlaybackError::PrepareTimeout { waited_ms } => {
                format!("Source did not start within {} ms, skipping", waited_ms)
            }
            PlaybackError::Decoder { code, extra } => {
                format!("Decoder rejected the source ({}, {}), skipping", code, extra)
            }
            PlaybackError::Network(msg) => format!("Source unreachable ({}), skipping", msg),
            PlaybackError::EmptyManifest { url } => format!("Manifest {} is empty, skipping", url),
            other => format!("{}, skipping", other),
        };
        info!("Recovery (failure {}): {}", self.consecutive_failures, reason);
        RecoveryResult::Advance(reason)
    }

    /// Playback started successfully; forget earlier failures
    pub fn on_entry_started(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}
