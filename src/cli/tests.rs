use std::time::Duration;

use clap::Parser;

use super::{CallAction, CliApp, Commands, DeviceAction, ParseError, QueueAction};

#[test]
fn test_parse_command_listen() {
    let result = CliApp::parse_command("listen http://example.org/story.mp3");
    assert_eq!(
        result.unwrap(),
        Commands::Listen {
            url: "http://example.org/story.mp3".to_string(),
            title: None,
            stream: false,
        }
    );

    let result = CliApp::parse_command("listen http://radio.example.org/live --stream --title Morning Edition");
    assert_eq!(
        result.unwrap(),
        Commands::Listen {
            url: "http://radio.example.org/live".to_string(),
            title: Some("Morning Edition".to_string()),
            stream: true,
        }
    );

    // Title first, flags in any order
    let result = CliApp::parse_command("listen --title All Things --stream http://x/live");
    assert_eq!(
        result.unwrap(),
        Commands::Listen {
            url: "http://x/live".to_string(),
            title: Some("All Things".to_string()),
            stream: true,
        }
    );
}

#[test]
fn test_parse_command_listen_errors() {
    assert!(matches!(
        CliApp::parse_command("listen"),
        Err(ParseError::MissingArgument { ref argument, .. }) if argument == "url"
    ));
    assert!(matches!(
        CliApp::parse_command("listen http://x/a.mp3 --title"),
        Err(ParseError::MissingArgument { .. })
    ));
    assert!(matches!(
        CliApp::parse_command("listen http://x/a.mp3 http://x/b.mp3"),
        Err(ParseError::InvalidArgument { .. })
    ));
    assert!(matches!(
        CliApp::parse_command("listen http://x/a.mp3 --loud"),
        Err(ParseError::UnknownCommand { .. })
    ));
}

#[test]
fn test_parse_command_enqueue() {
    let result = CliApp::parse_command("enqueue http://x/ep1.mp3 --story 1234 --title Episode One");
    assert_eq!(
        result.unwrap(),
        Commands::Enqueue {
            url: "http://x/ep1.mp3".to_string(),
            title: Some("Episode One".to_string()),
            stream: false,
            story: Some("1234".to_string()),
        }
    );

    assert!(matches!(
        CliApp::parse_command("enqueue --story"),
        Err(ParseError::MissingArgument { .. })
    ));
}

#[test]
fn test_local_paths_are_expanded() {
    if let Some(home) = dirs::home_dir() {
        match CliApp::parse_command("listen ~/audio/story.mp3").unwrap() {
            Commands::Listen { url, .. } => {
                assert_eq!(url, home.join("audio/story.mp3").to_string_lossy());
            }
            other => panic!("Expected Listen command, got {:?}", other),
        }
    }
    assert_eq!(CliApp::normalize_url("file:///tmp/a.mp3"), "file:///tmp/a.mp3");
    assert_eq!(CliApp::normalize_url("/tmp/a.mp3"), "/tmp/a.mp3");
}

#[test]
fn test_parse_command_basic_controls() {
    assert_eq!(CliApp::parse_command("play").unwrap(), Commands::Play);
    assert_eq!(CliApp::parse_command("resume").unwrap(), Commands::Play);
    assert_eq!(CliApp::parse_command("pause").unwrap(), Commands::Pause);
    assert_eq!(CliApp::parse_command("stop").unwrap(), Commands::Stop);
    assert_eq!(CliApp::parse_command("next").unwrap(), Commands::Next);
    assert_eq!(CliApp::parse_command("  status  ").unwrap(), Commands::Status);
}

#[test]
fn test_parse_command_seek() {
    assert_eq!(
        CliApp::parse_command("seek 1:30").unwrap(),
        Commands::Seek {
            position: "1:30".to_string()
        }
    );
    assert!(matches!(
        CliApp::parse_command("seek"),
        Err(ParseError::MissingArgument { ref command, .. }) if command == "seek"
    ));
}

#[test]
fn test_parse_command_call() {
    assert_eq!(
        CliApp::parse_command("call start").unwrap(),
        Commands::Call {
            action: CallAction::Start
        }
    );
    assert_eq!(
        CliApp::parse_command("call end").unwrap(),
        Commands::Call {
            action: CallAction::End
        }
    );
    assert!(matches!(
        CliApp::parse_command("call later"),
        Err(ParseError::InvalidArgument { .. })
    ));
    assert!(matches!(
        CliApp::parse_command("call"),
        Err(ParseError::MissingArgument { .. })
    ));
}

#[test]
fn test_parse_command_queue() {
    assert_eq!(
        CliApp::parse_command("queue list").unwrap(),
        Commands::Queue {
            action: QueueAction::List
        }
    );
    assert_eq!(
        CliApp::parse_command("queue clear-read").unwrap(),
        Commands::Queue {
            action: QueueAction::ClearRead
        }
    );
    assert_eq!(
        CliApp::parse_command("queue clear").unwrap(),
        Commands::Queue {
            action: QueueAction::Clear
        }
    );
    assert_eq!(
        CliApp::parse_command("queue remove 12").unwrap(),
        Commands::Queue {
            action: QueueAction::Remove { id: 12 }
        }
    );
    assert!(matches!(
        CliApp::parse_command("queue remove twelve"),
        Err(ParseError::InvalidArgument { .. })
    ));
    assert!(matches!(
        CliApp::parse_command("queue"),
        Err(ParseError::MissingArgument { .. })
    ));
    assert!(matches!(
        CliApp::parse_command("queue shuffle"),
        Err(ParseError::UnknownCommand { ref command }) if command == "queue shuffle"
    ));
}

#[test]
fn test_parse_command_device() {
    assert_eq!(
        CliApp::parse_command("device list").unwrap(),
        Commands::Device {
            action: DeviceAction::List
        }
    );
    assert_eq!(
        CliApp::parse_command("device set USB Audio DAC").unwrap(),
        Commands::Device {
            action: DeviceAction::Set {
                device: "USB Audio DAC".to_string()
            }
        }
    );
    assert!(matches!(
        CliApp::parse_command("device set"),
        Err(ParseError::MissingArgument { .. })
    ));
}

#[test]
fn test_parse_command_errors() {
    assert!(matches!(CliApp::parse_command(""), Err(ParseError::EmptyCommand)));
    assert!(matches!(CliApp::parse_command("   "), Err(ParseError::EmptyCommand)));
    assert!(matches!(CliApp::parse_command("help"), Err(ParseError::HelpRequested)));
    assert!(matches!(
        CliApp::parse_command("rewind"),
        Err(ParseError::UnknownCommand { ref command }) if command == "rewind"
    ));
}

#[test]
fn test_parse_time_formats() {
    assert_eq!(CliApp::parse_time("90").unwrap(), Duration::from_secs(90));
    assert_eq!(CliApp::parse_time("90s").unwrap(), Duration::from_secs(90));
    assert_eq!(CliApp::parse_time("1:30").unwrap(), Duration::from_secs(90));
    assert_eq!(CliApp::parse_time("1:30.5").unwrap(), Duration::from_millis(90_500));
    assert_eq!(CliApp::parse_time("1:02:03").unwrap(), Duration::from_secs(3723));
    assert_eq!(CliApp::parse_time("2.5").unwrap(), Duration::from_millis(2500));
}

#[test]
fn test_parse_time_invalid() {
    for input in ["", "abc", "1:60", "-5", "1:2:3:4", "x:30", "1:-1"] {
        assert!(
            matches!(CliApp::parse_time(input), Err(ParseError::InvalidTimeFormat { .. })),
            "accepted {:?}",
            input
        );
    }
}

#[test]
fn test_validate_seek_time() {
    let position = Duration::from_secs(100);
    assert_eq!(CliApp::validate_seek_time(position, None).unwrap(), position);
    assert_eq!(
        CliApp::validate_seek_time(position, Some(Duration::from_secs(200))).unwrap(),
        position
    );
    assert!(matches!(
        CliApp::validate_seek_time(position, Some(Duration::from_secs(50))),
        Err(ParseError::SeekBeyondDuration { .. })
    ));
}

#[test]
fn test_clap_subcommands() {
    let cli = CliApp::try_parse_from(["storycast", "listen", "http://x/live", "--stream", "--title", "Live"]).unwrap();
    assert_eq!(
        cli.command,
        Some(Commands::Listen {
            url: "http://x/live".to_string(),
            title: Some("Live".to_string()),
            stream: true,
        })
    );

    let cli = CliApp::try_parse_from(["storycast", "queue", "clear-read"]).unwrap();
    assert_eq!(
        cli.command,
        Some(Commands::Queue {
            action: QueueAction::ClearRead
        })
    );

    let cli = CliApp::try_parse_from(["storycast"]).unwrap();
    assert!(cli.command.is_none());
}

#[test]
fn test_parse_error_display() {
    let err = ParseError::MissingArgument {
        command: "seek".to_string(),
        argument: "position".to_string(),
    };
    assert_eq!(err.to_string(), "Missing argument for seek: position");

    let err = ParseError::SeekBeyondDuration {
        position: 100.0,
        duration: 50.0,
    };
    assert!(err.to_string().contains("100.00s"));
}
