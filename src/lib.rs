pub mod audio;
pub mod cli;
pub mod config;
pub mod error;
pub mod error_recovery;
pub mod events;
pub mod logging;
pub mod manifest;
pub mod models;
pub mod playback;
pub mod queue;
pub mod relay;


pub use error::*;
pub use models::*;
pub use playback::{PlaybackEngine, PlaybackEngineBuilder};
