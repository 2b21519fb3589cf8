use thiserror::Error;

/// Main player error type
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),

    #[error("Playlist store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Decoder error: {0}")]
    Decoder(#[from] DecoderError),

    #[error("File error: {0}")]
    File(#[from] std::io::Error),

    #[error("CLI parse error: {0}")]
    Parse(#[from] crate::cli::ParseError),
}

impl PlayerError {
    /// Get user-friendly error message with suggested solutions
    pub fn user_message(&self) -> String {
        match self {
            PlayerError::Playback(err) => err.user_message(),
            PlayerError::Store(err) => err.user_message(),
            PlayerError::Config(err) => err.user_message(),
            PlayerError::Decoder(err) => err.user_message(),
            PlayerError::File(err) => format!("File system error: {}", err),
            PlayerError::Parse(err) => format!("Command error: {}", err),
        }
    }

    /// Get suggested recovery actions for the error
    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            PlayerError::Playback(err) => err.recovery_suggestions(),
            PlayerError::Store(err) => err.recovery_suggestions(),
            PlayerError::Config(err) => err.recovery_suggestions(),
            PlayerError::Decoder(err) => err.recovery_suggestions(),
            PlayerError::File(_) => vec!["Check file permissions and free disk space".to_string()],
            PlayerError::Parse(_) => vec!["Type 'help' to see available commands".to_string()],
        }
    }

    pub fn is_recoverable(&self) -> bool {
        match self {
            PlayerError::Playback(err) => err.is_recoverable(),
            PlayerError::Store(err) => err.is_recoverable(),
            PlayerError::Config(err) => err.is_recoverable(),
            PlayerError::Decoder(err) => err.is_recoverable(),
            PlayerError::File(_) => false,
            PlayerError::Parse(_) => false,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            PlayerError::Playback(PlaybackError::Cancelled) => ErrorSeverity::Info,
            PlayerError::Playback(PlaybackError::EmptyManifest { .. }) => ErrorSeverity::Warning,
            PlayerError::Playback(PlaybackError::PrepareTimeout { .. }) => ErrorSeverity::Warning,
            PlayerError::Playback(_) => ErrorSeverity::Error,
            PlayerError::Store(_) => ErrorSeverity::Error,
            PlayerError::Config(_) => ErrorSeverity::Warning,
            PlayerError::Decoder(DecoderError::Output(_)) => ErrorSeverity::Critical,
            PlayerError::Decoder(_) => ErrorSeverity::Error,
            PlayerError::File(_) => ErrorSeverity::Error,
            PlayerError::Parse(_) => ErrorSeverity::Info,
        }
    }
}

/// Error severity levels for logging and user feedback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl ErrorSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSeverity::Info => "INFO",
            ErrorSeverity::Warning => "WARNING",
            ErrorSeverity::Error => "ERROR",
            ErrorSeverity::Critical => "CRITICAL",
        }
    }

    pub fn log_level(&self) -> log::Level {
        match self {
            ErrorSeverity::Info => log::Level::Info,
            ErrorSeverity::Warning => log::Level::Warn,
            ErrorSeverity::Error => log::Level::Error,
            ErrorSeverity::Critical => log::Level::Error,
        }
    }
}

/// Errors returned to the caller of a listen request
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("Manifest {url} contains no playable entries")]
    EmptyManifest { url: String },

    #[error("Decoder did not become ready within {waited_ms} ms")]
    PrepareTimeout { waited_ms: u64 },

    #[error("Decoder reported error ({code}, {extra})")]
    Decoder { code: i32, extra: i32 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Listen request was superseded")]
    Cancelled,

    #[error("Invalid data source: {0}")]
    InvalidDataSource(String),

    #[error("Playlist store error: {0}")]
    Store(#[from] StoreError),

    #[error("Playback engine has been shut down")]
    ShutDown,

    #[error("No async runtime available: {0}")]
    Runtime(String),
}

impl PlaybackError {
    pub fn user_message(&self) -> String {
        match self {
            PlaybackError::EmptyManifest { url } => {
                format!("The playlist at {} did not list any audio", url)
            }
            PlaybackError::PrepareTimeout { waited_ms } => {
                format!("Audio did not start after {:.1}s", *waited_ms as f64 / 1000.0)
            }
            PlaybackError::Decoder { code, extra } => {
                format!("The audio could not be played (error {}/{})", code, extra)
            }
            PlaybackError::Network(msg) => format!("Could not reach the audio source: {}", msg),
            PlaybackError::Cancelled => "Playback request was replaced by a newer one".to_string(),
            PlaybackError::InvalidDataSource(msg) => format!("Audio source rejected: {}", msg),
            PlaybackError::Store(err) => err.user_message(),
            PlaybackError::ShutDown => "The player is shutting down".to_string(),
            PlaybackError::Runtime(msg) => format!("The player could not start: {}", msg),
        }
    }

    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            PlaybackError::EmptyManifest { .. } => vec![
                "The station may be offline; try again later".to_string(),
                "Pick another station or story".to_string(),
            ],
            PlaybackError::PrepareTimeout { .. } => vec![
                "Check your network connection".to_string(),
                "Try the stream again; slow servers may need several attempts".to_string(),
            ],
            PlaybackError::Decoder { .. } => vec![
                "The next item in the playlist will be played automatically".to_string(),
            ],
            PlaybackError::Network(_) => vec![
                "Check your network connection".to_string(),
                "Verify the URL is reachable".to_string(),
            ],
            PlaybackError::Cancelled => Vec::new(),
            PlaybackError::InvalidDataSource(_) => vec![
                "Check the URL of the item".to_string(),
            ],
            PlaybackError::Store(err) => err.recovery_suggestions(),
            PlaybackError::ShutDown => vec!["Restart the player".to_string()],
            PlaybackError::Runtime(_) => vec!["Create the engine from within a tokio runtime".to_string()],
        }
    }

    pub fn is_recoverable(&self) -> bool {
        match self {
            PlaybackError::EmptyManifest { .. } => false,
            PlaybackError::PrepareTimeout { .. } => true,
            PlaybackError::Decoder { .. } => true,
            PlaybackError::Network(_) => true,
            PlaybackError::Cancelled => true,
            PlaybackError::InvalidDataSource(_) => false,
            PlaybackError::Store(err) => err.is_recoverable(),
            PlaybackError::ShutDown => false,
            PlaybackError::Runtime(_) => false,
        }
    }
}

/// Manifest (M3U/PLS) download and parse errors
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported manifest type: {0}")]
    Unsupported(String),

    #[error("Manifest {url} lists no entries")]
    Empty { url: String },
}

impl From<ManifestError> for PlaybackError {
    fn from(err: ManifestError) -> Self {
        match err {
            ManifestError::Empty { url } => PlaybackError::EmptyManifest { url },
            other => PlaybackError::Network(other.to_string()),
        }
    }
}

/// Loopback relay errors
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Cannot bind relay listener: {0}")]
    Bind(std::io::Error),

    #[error("Cannot connect to {host}: {reason}")]
    Connect { host: String, reason: String },

    #[error("Unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Invalid relay request: {0}")]
    InvalidRequest(String),

    #[error("Relay stopped while starting")]
    Stopped,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<RelayError> for PlaybackError {
    fn from(err: RelayError) -> Self {
        PlaybackError::Network(err.to_string())
    }
}

/// Playlist persistence errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Entry not found: {id}")]
    NotFound { id: i64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn user_message(&self) -> String {
        match self {
            StoreError::Database(err) => format!("The playlist database failed: {}", err),
            StoreError::NotFound { id } => format!("Playlist item {} no longer exists", id),
            StoreError::Io(err) => format!("Cannot access the playlist database: {}", err),
        }
    }

    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            StoreError::Database(_) => vec![
                "Delete the playlist database to start with an empty playlist".to_string(),
            ],
            StoreError::NotFound { .. } => vec![
                "Use 'queue list' to see the current playlist".to_string(),
            ],
            StoreError::Io(_) => vec![
                "Check permissions of the data directory".to_string(),
                "Ensure the disk is not full".to_string(),
            ],
        }
    }

    pub fn is_recoverable(&self) -> bool {
        match self {
            StoreError::Database(_) => false,
            StoreError::NotFound { .. } => true,
            StoreError::Io(_) => true,
        }
    }
}

/// Errors raised inside a decoder implementation
#[derive(Debug, Error)]
pub enum DecoderError {
    #[error("No data source set")]
    NoDataSource,

    #[error("Cannot open source: {0}")]
    Open(String),

    #[error("Unsupported format: {0}")]
    Unsupported(String),

    #[error("Decode failed: {0}")]
    Decode(String),

    #[error("Audio output failed: {0}")]
    Output(String),
}

// Codes reported through `DecoderEvent::Error { code, extra }`.
pub const MEDIA_ERROR_UNKNOWN: i32 = 1;
pub const MEDIA_ERROR_IO: i32 = -1004;
pub const MEDIA_ERROR_MALFORMED: i32 = -1007;
pub const MEDIA_ERROR_UNSUPPORTED: i32 = -1010;
pub const MEDIA_ERROR_OUTPUT: i32 = -1100;

impl DecoderError {
    /// `(code, extra)` pair delivered through the decoder error callback
    pub fn codes(&self) -> (i32, i32) {
        match self {
            DecoderError::NoDataSource => (MEDIA_ERROR_UNKNOWN, MEDIA_ERROR_IO),
            DecoderError::Open(_) => (MEDIA_ERROR_UNKNOWN, MEDIA_ERROR_IO),
            DecoderError::Unsupported(_) => (MEDIA_ERROR_UNKNOWN, MEDIA_ERROR_UNSUPPORTED),
            DecoderError::Decode(_) => (MEDIA_ERROR_UNKNOWN, MEDIA_ERROR_MALFORMED),
            DecoderError::Output(_) => (MEDIA_ERROR_UNKNOWN, MEDIA_ERROR_OUTPUT),
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            DecoderError::NoDataSource => "No audio source was selected".to_string(),
            DecoderError::Open(msg) => format!("Cannot open the audio source: {}", msg),
            DecoderError::Unsupported(msg) => format!("Audio format is not supported: {}", msg),
            DecoderError::Decode(msg) => format!("Audio data is damaged: {}", msg),
            DecoderError::Output(msg) => format!("Audio output device failed: {}", msg),
        }
    }

    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            DecoderError::Output(_) => vec![
                "Check that your audio device is connected".to_string(),
                "Set 'preferred_device' in the configuration file".to_string(),
            ],
            _ => vec!["The next item in the playlist will be played automatically".to_string()],
        }
    }

    pub fn is_recoverable(&self) -> bool {
        !matches!(self, DecoderError::Output(_))
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found")]
    ConfigDirNotFound,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] toml::ser::Error),

    #[error("Deserialization error: {0}")]
    DeserializationError(#[from] toml::de::Error),
}

impl ConfigError {
    pub fn user_message(&self) -> String {
        match self {
            ConfigError::ConfigDirNotFound => {
                "Cannot find or create configuration directory".to_string()
            }
            ConfigError::IoError(err) => {
                format!("Cannot access configuration file: {}", err)
            }
            ConfigError::SerializationError(_) => {
                "Failed to save configuration settings".to_string()
            }
            ConfigError::DeserializationError(_) => {
                "Configuration file is corrupted or has invalid format".to_string()
            }
        }
    }

    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            ConfigError::ConfigDirNotFound => vec![
                "Check that you have write permissions to your home directory".to_string(),
            ],
            ConfigError::IoError(_) => vec![
                "Check file permissions for the configuration directory".to_string(),
                "Ensure the disk is not full".to_string(),
            ],
            ConfigError::SerializationError(_) => vec![
                "Configuration will use default values".to_string(),
            ],
            ConfigError::DeserializationError(_) => vec![
                "Delete the configuration file to reset to defaults".to_string(),
                "Check the configuration file format manually".to_string(),
            ],
        }
    }

    pub fn is_recoverable(&self) -> bool {
        true
    }
}
