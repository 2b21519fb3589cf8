use log::{debug, error, info, warn};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use chrono::{DateTime, Utc};

/// Environment variable selecting the log level
pub const LOG_LEVEL_ENV: &str = "STORYCAST_LOG_LEVEL";

/// Playback lifecycle event recorded for diagnostics
#[derive(Debug, Clone)]
pub struct PlaybackLogEntry {
    pub timestamp: DateTime<Utc>,
    pub event_type: PlaybackEventType,
    pub details: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEventType {
    ListenRequested,
    ManifestResolved,
    RelayStarted,
    RelayStopped,
    PrepareStarted,
    PrepareWaiting,
    PrepareTimeout,
    PlaybackStarted,
    PlaybackPaused,
    PlaybackStopped,
    TrackChanged,
    DecoderError,
    CallInterruption,
    QueueExhausted,
}

impl PlaybackEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackEventType::ListenRequested => "LISTEN_REQUESTED",
            PlaybackEventType::ManifestResolved => "MANIFEST_RESOLVED",
            PlaybackEventType::RelayStarted => "RELAY_STARTED",
            PlaybackEventType::RelayStopped => "RELAY_STOPPED",
            PlaybackEventType::PrepareStarted => "PREPARE_STARTED",
            PlaybackEventType::PrepareWaiting => "PREPARE_WAITING",
            PlaybackEventType::PrepareTimeout => "PREPARE_TIMEOUT",
            PlaybackEventType::PlaybackStarted => "PLAYBACK_STARTED",
            PlaybackEventType::PlaybackPaused => "PLAYBACK_PAUSED",
            PlaybackEventType::PlaybackStopped => "PLAYBACK_STOPPED",
            PlaybackEventType::TrackChanged => "TRACK_CHANGED",
            PlaybackEventType::DecoderError => "DECODER_ERROR",
            PlaybackEventType::CallInterruption => "CALL_INTERRUPTION",
            PlaybackEventType::QueueExhausted => "QUEUE_EXHAUSTED",
        }
    }
}

/// Logger for playback operations and debugging
#[derive(Clone)]
pub struct PlaybackLogger {
    events: Arc<Mutex<VecDeque<PlaybackLogEntry>>>,
    max_events: usize,
}

impl Default for PlaybackLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackLogger {
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    pub fn with_capacity(max_events: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::new())),
            max_events,
        }
    }

    /// Initialize logging system with appropriate log level
    pub fn init() -> Result<(), Box<dyn std::error::Error>> {
        let log_level = std::env::var(LOG_LEVEL_ENV)
            .unwrap_or_else(|_| "info".to_string());

        let mut builder = env_logger::Builder::new();

        builder.format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{}] [{}:{}] {}",
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        });

        builder.filter_level(parse_level(&log_level));
        builder.try_init()?;

        info!("Storycast logging initialized with level: {}", log_level);
        Ok(())
    }

    fn events(&self) -> MutexGuard<'_, VecDeque<PlaybackLogEntry>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record an event and forward it to the log facade
    pub fn log_event(&self, event_type: PlaybackEventType, details: String) {
        match event_type {
            PlaybackEventType::PrepareWaiting
            | PlaybackEventType::PrepareStarted
            | PlaybackEventType::RelayStarted
            | PlaybackEventType::RelayStopped => {
                debug!("[{}] {}", event_type.as_str(), details);
            }
            PlaybackEventType::PrepareTimeout | PlaybackEventType::CallInterruption => {
                warn!("[{}] {}", event_type.as_str(), details);
            }
            PlaybackEventType::DecoderError => {
                error!("[{}] {}", event_type.as_str(), details);
            }
            _ => {
                info!("[{}] {}", event_type.as_str(), details);
            }
        }

        let mut events = self.events();
        events.push_back(PlaybackLogEntry {
            timestamp: Utc::now(),
            event_type,
            details,
        });
        while events.len() > self.max_events {
            events.pop_front();
        }
    }

    pub fn log_listen_requested(&self, title: &str, url: &str, as_stream: bool) {
        self.log_event(
            PlaybackEventType::ListenRequested,
            format!("Listen to '{}' at {} (stream: {})", title, url, as_stream),
        );
    }

    pub fn log_prepare_waiting(&self, url: &str, waited: Duration) {
        self.log_event(
            PlaybackEventType::PrepareWaiting,
            format!("Still waiting for {} after {:.1}s", url, waited.as_secs_f64()),
        );
    }

    pub fn log_playback_paused(&self, position_ms: u64) {
        self.log_event(
            PlaybackEventType::PlaybackPaused,
            format!("Playback paused at position: {:.2}s", position_ms as f64 / 1000.0),
        );
    }

    pub fn log_playback_stopped(&self, reason: &str) {
        self.log_event(
            PlaybackEventType::PlaybackStopped,
            format!("Playback stopped: {}", reason),
        );
    }

    pub fn log_track_changed(&self, from_track: Option<&str>, to_track: &str) {
        let details = match from_track {
            Some(from) => format!("Track changed from '{}' to '{}'", from, to_track),
            None => format!("Track loaded: '{}'", to_track),
        };
        self.log_event(PlaybackEventType::TrackChanged, details);
    }

    pub fn log_decoder_error(&self, code: i32, extra: i32, prepared: bool) {
        let details = if prepared {
            format!("Decoder error ({}, {}) during playback", code, extra)
        } else {
            format!("Decoder refused the current item ({}, {})", code, extra)
        };
        self.log_event(PlaybackEventType::DecoderError, details);
    }

    /// Get recent events for debugging, oldest first
    pub fn get_recent_events(&self, count: usize) -> Vec<PlaybackLogEntry> {
        let events = self.events();
        let skip = events.len().saturating_sub(count);
        events.iter().skip(skip).cloned().collect()
    }

    pub fn count(&self, event_type: PlaybackEventType) -> usize {
        self.events()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    pub fn clear_events(&self) {
        self.events().clear();
    }
}

fn parse_level(level: &str) -> log::LevelFilter {
    match level.to_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "info" => log::LevelFilter::Info,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        "off" => log::LevelFilter::Off,
        _ => log::LevelFilter::Info,
    }
}
