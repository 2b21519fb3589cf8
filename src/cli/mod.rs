use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::models::EntryId;

pub mod status;
pub use status::StatusDisplay;

/// Story, podcast and station player
#[derive(Parser)]
#[command(name = "storycast")]
#[command(about = "Plays stories, podcasts and live station streams from the command line")]
#[command(version = "0.1.0")]
pub struct CliApp {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands
#[derive(Debug, PartialEq, Subcommand)]
pub enum Commands {
    /// Play a URL now, replacing whatever is playing
    Listen {
        /// Audio file, stream or M3U/PLS playlist URL (local paths work too)
        url: String,
        /// Title shown while playing
        #[arg(long)]
        title: Option<String>,
        /// Treat the URL as a live station stream
        #[arg(long)]
        stream: bool,
    },
    /// Append a URL to the stored playlist
    Enqueue {
        url: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        stream: bool,
        /// Story this entry belongs to
        #[arg(long)]
        story: Option<String>,
    },
    /// Resume playback
    Play,
    /// Pause playback while preserving position
    Pause,
    /// Stop playback
    Stop,
    /// Skip to the next unread playlist entry
    Next,
    /// Seek to specific time position
    Seek {
        /// Time offset (e.g., "1:30", "90", "90s")
        position: String,
    },
    /// Display current player status
    Status,
    /// Simulate a phone call interrupting playback
    Call {
        #[command(subcommand)]
        action: CallAction,
    },
    /// Stored playlist management
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
    /// Audio output device management
    Device {
        #[command(subcommand)]
        action: DeviceAction,
    },
}

/// Stored playlist subcommands
#[derive(Debug, PartialEq, Subcommand)]
pub enum QueueAction {
    /// List every stored entry
    List,
    /// Remove entries that were already played
    ClearRead,
    /// Remove every entry
    Clear,
    /// Remove one entry by id
    Remove { id: EntryId },
}

/// Call simulation subcommands
#[derive(Debug, PartialEq, Subcommand)]
pub enum CallAction {
    /// A call rings or goes off-hook
    Start,
    /// The call ended
    End,
}

/// Device management subcommands
#[derive(Debug, PartialEq, Subcommand)]
pub enum DeviceAction {
    /// List available audio output devices
    List,
    /// Set audio output device
    Set {
        /// Device name
        device: String,
    },
}

/// URL and options shared by `listen` and `enqueue`
#[derive(Debug, Default)]
struct EntryArgs {
    url: Option<String>,
    title: Option<String>,
    stream: bool,
    story: Option<String>,
}

impl CliApp {
    /// Parse command line arguments
    pub fn parse() -> Self {
        <Self as clap::Parser>::parse()
    }

    /// Expand tilde (~) in path to home directory
    pub fn expand_path(path: &str) -> PathBuf {
        if let Some(rest) = path.strip_prefix("~/") {
            if let Some(home_dir) = dirs::home_dir() {
                home_dir.join(rest)
            } else {
                PathBuf::from(path)
            }
        } else if path == "~" {
            dirs::home_dir().unwrap_or_else(|| PathBuf::from(path))
        } else {
            PathBuf::from(path)
        }
    }

    /// Turn user input into a URL the decoder understands. Anything with a
    /// scheme is kept; everything else is a local path.
    pub fn normalize_url(input: &str) -> String {
        if input.contains("://") {
            input.to_string()
        } else {
            Self::expand_path(input).to_string_lossy().into_owned()
        }
    }

    /// Parse command from string (for interactive mode)
    pub fn parse_command(input: &str) -> Result<Commands, ParseError> {
        let args: Vec<&str> = input.split_whitespace().collect();
        if args.is_empty() {
            return Err(ParseError::EmptyCommand);
        }

        match args[0] {
            "listen" | "enqueue" => {
                let entry = Self::parse_entry_args(args[0], &args[1..])?;
                let url = entry.url.ok_or_else(|| ParseError::MissingArgument {
                    command: args[0].to_string(),
                    argument: "url".to_string(),
                })?;
                if args[0] == "listen" {
                    if entry.story.is_some() {
                        return Err(ParseError::UnknownCommand {
                            command: "listen --story".to_string(),
                        });
                    }
                    Ok(Commands::Listen {
                        url,
                        title: entry.title,
                        stream: entry.stream,
                    })
                } else {
                    Ok(Commands::Enqueue {
                        url,
                        title: entry.title,
                        stream: entry.stream,
                        story: entry.story,
                    })
                }
            }
            "play" | "resume" => Ok(Commands::Play),
            "pause" => Ok(Commands::Pause),
            "stop" => Ok(Commands::Stop),
            "next" | "skip" => Ok(Commands::Next),
            "seek" => {
                if args.len() > 1 {
                    Ok(Commands::Seek {
                        position: args[1].to_string(),
                    })
                } else {
                    Err(ParseError::MissingArgument {
                        command: "seek".to_string(),
                        argument: "position".to_string(),
                    })
                }
            }
            "status" => Ok(Commands::Status),
            "call" => match args.get(1) {
                Some(&"start") => Ok(Commands::Call {
                    action: CallAction::Start,
                }),
                Some(&"end") => Ok(Commands::Call {
                    action: CallAction::End,
                }),
                Some(other) => Err(ParseError::InvalidArgument {
                    argument: "call action".to_string(),
                    value: other.to_string(),
                    expected: "start or end".to_string(),
                }),
                None => Err(ParseError::MissingArgument {
                    command: "call".to_string(),
                    argument: "action".to_string(),
                }),
            },
            "queue" => {
                if args.len() < 2 {
                    return Err(ParseError::MissingArgument {
                        command: "queue".to_string(),
                        argument: "action".to_string(),
                    });
                }
                match args[1] {
                    "list" => Ok(Commands::Queue {
                        action: QueueAction::List,
                    }),
                    "clear-read" => Ok(Commands::Queue {
                        action: QueueAction::ClearRead,
                    }),
                    "clear" => Ok(Commands::Queue {
                        action: QueueAction::Clear,
                    }),
                    "remove" => {
                        let raw = args.get(2).ok_or_else(|| ParseError::MissingArgument {
                            command: "queue remove".to_string(),
                            argument: "id".to_string(),
                        })?;
                        let id = raw.parse::<EntryId>().map_err(|_| ParseError::InvalidArgument {
                            argument: "entry id".to_string(),
                            value: raw.to_string(),
                            expected: "number".to_string(),
                        })?;
                        Ok(Commands::Queue {
                            action: QueueAction::Remove { id },
                        })
                    }
                    _ => Err(ParseError::UnknownCommand {
                        command: format!("queue {}", args[1]),
                    }),
                }
            }
            "device" => {
                if args.len() < 2 {
                    return Err(ParseError::MissingArgument {
                        command: "device".to_string(),
                        argument: "action".to_string(),
                    });
                }
                match args[1] {
                    "list" => Ok(Commands::Device {
                        action: DeviceAction::List,
                    }),
                    "set" => {
                        if args.len() > 2 {
                            Ok(Commands::Device {
                                action: DeviceAction::Set {
                                    device: args[2..].join(" "),
                                },
                            })
                        } else {
                            Err(ParseError::MissingArgument {
                                command: "device set".to_string(),
                                argument: "device".to_string(),
                            })
                        }
                    }
                    _ => Err(ParseError::UnknownCommand {
                        command: format!("device {}", args[1]),
                    }),
                }
            }
            "help" => Err(ParseError::HelpRequested),
            _ => Err(ParseError::UnknownCommand {
                command: args[0].to_string(),
            }),
        }
    }

    /// `<url> [--stream] [--story <id>] [--title <words...>]`; the title
    /// takes every word up to the next flag.
    fn parse_entry_args(command: &str, args: &[&str]) -> Result<EntryArgs, ParseError> {
        let mut entry = EntryArgs::default();
        let mut i = 0;
        while i < args.len() {
            match args[i] {
                "--stream" => {
                    entry.stream = true;
                    i += 1;
                }
                "--title" => {
                    let words: Vec<&str> = args[i + 1..]
                        .iter()
                        .take_while(|word| !word.starts_with("--"))
                        .copied()
                        .collect();
                    if words.is_empty() {
                        return Err(ParseError::MissingArgument {
                            command: format!("{} --title", command),
                            argument: "title".to_string(),
                        });
                    }
                    i += 1 + words.len();
                    entry.title = Some(words.join(" "));
                }
                "--story" => {
                    let story = args.get(i + 1).ok_or_else(|| ParseError::MissingArgument {
                        command: format!("{} --story", command),
                        argument: "story".to_string(),
                    })?;
                    entry.story = Some(story.to_string());
                    i += 2;
                }
                flag if flag.starts_with("--") => {
                    return Err(ParseError::UnknownCommand {
                        command: format!("{} {}", command, flag),
                    });
                }
                word => {
                    if entry.url.is_some() {
                        return Err(ParseError::InvalidArgument {
                            argument: "url".to_string(),
                            value: word.to_string(),
                            expected: "a single URL; use --title for names".to_string(),
                        });
                    }
                    entry.url = Some(Self::normalize_url(word));
                    i += 1;
                }
            }
        }
        Ok(entry)
    }

    /// Display help information
    pub fn display_help() {
        println!("storycast - Available Commands:");
        println!();
        println!("Playback Control:");
        println!("  listen <url> [--stream] [--title <name>]  - Play a URL now");
        println!("  play            - Resume playback");
        println!("  pause           - Pause playback");
        println!("  stop            - Stop playback");
        println!("  next            - Skip to the next unread playlist entry");
        println!("  seek <time>     - Seek to position (e.g., '1:30', '90s')");
        println!();
        println!("Information:");
        println!("  status          - Show current player status");
        println!();
        println!("Playlist:");
        println!("  enqueue <url> [--stream] [--story <id>] [--title <name>]");
        println!("                      - Append to the stored playlist");
        println!("  queue list          - List playlist contents");
        println!("  queue clear-read    - Remove entries already played");
        println!("  queue clear         - Remove every entry");
        println!("  queue remove <id>   - Remove one entry");
        println!();
        println!("Interruptions:");
        println!("  call start      - Pause as if a phone call came in");
        println!("  call end        - Resume after the call");
        println!();
        println!("Device Management:");
        println!("  device list         - List available audio devices");
        println!("  device set <name>   - Set audio output device");
        println!();
        println!("General:");
        println!("  help            - Show this help message");
        println!("  exit, quit      - Exit the player");
    }

    /// Parse time string to Duration with enhanced validation
    pub fn parse_time(time_str: &str) -> Result<Duration, ParseError> {
        let trimmed = time_str.trim();
        let invalid = || ParseError::InvalidTimeFormat {
            input: time_str.to_string(),
        };

        if trimmed.is_empty() {
            return Err(invalid());
        }

        // "1:30", "1:30.5", "1:02:03", "90", "90s"
        if trimmed.contains(':') {
            let parts: Vec<&str> = trimmed.split(':').collect();
            if parts.len() > 3 {
                return Err(invalid());
            }

            let (whole, last) = parts.split_at(parts.len() - 1);
            let mut total_seconds = 0f64;
            for part in whole {
                let value: u64 = part.parse().map_err(|_| invalid())?;
                total_seconds = total_seconds * 60.0 + value as f64;
            }

            let seconds_f64: f64 = last[0].parse().map_err(|_| invalid())?;
            if !(0.0..60.0).contains(&seconds_f64) {
                return Err(invalid());
            }

            Ok(Duration::from_secs_f64(total_seconds * 60.0 + seconds_f64))
        } else {
            let seconds_str = trimmed.trim_end_matches('s');
            let seconds_f64: f64 = seconds_str.parse().map_err(|_| invalid())?;

            if !seconds_f64.is_finite() || seconds_f64 < 0.0 {
                return Err(invalid());
            }

            Ok(Duration::from_secs_f64(seconds_f64))
        }
    }

    /// Validate seek position against the item duration, when one is known
    pub fn validate_seek_time(position: Duration, duration: Option<Duration>) -> Result<Duration, ParseError> {
        if let Some(item_duration) = duration {
            if position > item_duration {
                return Err(ParseError::SeekBeyondDuration {
                    position: position.as_secs_f64(),
                    duration: item_duration.as_secs_f64(),
                });
            }
        }
        Ok(position)
    }

    /// Format duration for display
    pub fn format_duration(duration: Duration) -> String {
        StatusDisplay::format_duration(duration)
    }
}

/// Command parsing errors
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Empty command")]
    EmptyCommand,

    #[error("Unknown command: {command}")]
    UnknownCommand { command: String },

    #[error("Missing argument for {command}: {argument}")]
    MissingArgument { command: String, argument: String },

    #[error("Invalid argument {argument}: got '{value}', expected {expected}")]
    InvalidArgument {
        argument: String,
        value: String,
        expected: String,
    },

    #[error("Invalid time format: {input}")]
    InvalidTimeFormat { input: String },

    #[error("Seek position {position:.2}s exceeds item duration {duration:.2}s")]
    SeekBeyondDuration { position: f64, duration: f64 },

    #[error("Help requested")]
    HelpRequested,
}

#[cfg(test)]
mod tests;
