use std::time::Duration;

use crate::error::{ErrorSeverity, PlaybackError, PlayerError, StoreError};
use crate::events::UpdateEvent;
use crate::models::{PlaybackPhase, PlaybackStatus};
use crate::queue::StoredEntry;

/// Status display formatter for the CLI
pub struct StatusDisplay;

impl StatusDisplay {
    /// Display player status with the current item and progress
    pub fn display_full_status(status: &PlaybackStatus, device: Option<&str>) {
        println!("┌─ Player Status ─────────────────────────────────────────┐");

        match &status.current {
            Some(entry) => {
                println!("│ Title: {}", Self::truncate(entry.display_name(), 50));
                println!("│ URL: {}", Self::truncate(&entry.url, 52));
                if let Some(story) = &entry.story_ref {
                    println!("│ Story: {}", Self::truncate(story, 50));
                }
                if entry.is_stream {
                    println!("│ Type: Live stream");
                }
                Self::display_playback_info(status);
            }
            None => {
                println!("│ Nothing loaded");
                println!("│ Status: {}", status.phase.as_str());
            }
        }

        if status.pending_manifest_urls > 0 {
            println!("│ Playlist parts left: {}", status.pending_manifest_urls);
        }
        if status.paused_for_call {
            println!("│ Paused for a phone call");
        }

        println!("│");
        match device {
            Some(device) => println!("│ Device: {}", Self::truncate(device, 49)),
            None => println!("│ Device: Default"),
        }
        println!("└─────────────────────────────────────────────────────────┘");
    }

    /// Display compact status information
    pub fn display_compact_status(status: &PlaybackStatus) {
        match &status.current {
            Some(entry) => {
                println!(
                    "{} | {} | {}/{} ({}%)",
                    status.phase.as_str(),
                    Self::truncate(entry.display_name(), 40),
                    Self::format_millis(status.position_ms),
                    Self::format_millis(status.duration_ms),
                    (status.progress() * 100.0) as u8
                );
            }
            None => {
                println!("{} | Nothing loaded", status.phase.as_str());
            }
        }
    }

    fn display_playback_info(status: &PlaybackStatus) {
        println!("│");
        println!("│ Status: {}", status.phase.as_str());

        if status.duration_ms == 0 {
            println!("│ Position: {} (live)", Self::format_millis(status.position_ms));
            return;
        }

        println!(
            "│ Position: {} / {}",
            Self::format_millis(status.position_ms),
            Self::format_millis(status.duration_ms)
        );
        println!("│ Progress: [{}] {:.1}%", Self::progress_bar(status.progress(), 40), status.progress() * 100.0);
        if status.buffered_percent < 100 && status.phase != PlaybackPhase::Idle {
            println!("│ Buffered: {}%", status.buffered_percent);
        }
    }

    /// Single line progress, redrawn in place
    pub fn display_position_update(update: &UpdateEvent) {
        let progress = if update.duration_ms > 0 {
            (update.position_ms as f32 / update.duration_ms as f32).min(1.0)
        } else {
            0.0
        };

        print!(
            "\r[{}] {}/{} ",
            Self::progress_bar(progress, 30),
            Self::format_millis(update.position_ms),
            Self::format_millis(update.duration_ms)
        );

        use std::io::{self, Write};
        let _ = io::stdout().flush();
    }

    /// Display the stored playlist
    pub fn display_queue(entries: &[StoredEntry]) {
        if entries.is_empty() {
            println!("Playlist is empty");
            return;
        }

        println!("Playlist ({} entries):", entries.len());
        for stored in entries {
            let entry = &stored.entry;
            println!(
                "  {:>4} {} {}{}",
                entry.id.unwrap_or_default(),
                if stored.is_read { "✓" } else { " " },
                Self::truncate(entry.display_name(), 50),
                if entry.is_stream { " [stream]" } else { "" }
            );
        }
    }

    fn progress_bar(progress: f32, width: usize) -> String {
        let filled = ((progress.clamp(0.0, 1.0) * width as f32) as usize).min(width);
        format!("{}{}", "█".repeat(filled), "░".repeat(width - filled))
    }

    /// Display error message with formatting and recovery suggestions
    pub fn display_error(error: &PlayerError) {
        let severity = error.severity();
        let severity_icon = match severity {
            ErrorSeverity::Info => "ℹ",
            ErrorSeverity::Warning => "⚠",
            ErrorSeverity::Error => "✗",
            ErrorSeverity::Critical => "🔥",
        };

        eprintln!("┌─ {} {} ─────────────────────────────────────────────────┐",
            severity_icon, severity.as_str());

        for line in Self::wrap_text(&error.user_message(), 55) {
            eprintln!("│ {}", line);
        }

        let suggestions = error.recovery_suggestions();
        if !suggestions.is_empty() {
            eprintln!("│");
            eprintln!("│ Suggestions:");
            for suggestion in suggestions.iter().take(3) {
                for line in Self::wrap_text(&format!("• {}", suggestion), 53) {
                    eprintln!("│   {}", line);
                }
            }
        }

        Self::display_error_context(error);

        eprintln!("└─────────────────────────────────────────────────────────┘");
    }

    fn display_error_context(error: &PlayerError) {
        match error {
            PlayerError::Playback(PlaybackError::EmptyManifest { .. }) => {
                eprintln!("│");
                eprintln!("│ Playlists must list at least one audio URL");
            }
            PlayerError::Playback(PlaybackError::PrepareTimeout { .. }) => {
                eprintln!("│");
                eprintln!("│ The next playlist entry is tried automatically");
            }
            PlayerError::Store(StoreError::NotFound { .. }) => {
                eprintln!("│");
                eprintln!("│ Use 'queue list' to see entry ids");
            }
            PlayerError::Config(_) => {
                eprintln!("│");
                eprintln!("│ Configuration will use default values");
            }
            _ => {}
        }
    }

    /// Wrap text to fit within specified width
    fn wrap_text(text: &str, width: usize) -> Vec<String> {
        let mut lines = Vec::new();
        let mut current_line = String::new();

        for word in text.split_whitespace() {
            if current_line.is_empty() {
                current_line = word.to_string();
            } else if current_line.chars().count() + word.chars().count() < width {
                current_line.push(' ');
                current_line.push_str(word);
            } else {
                lines.push(current_line);
                current_line = word.to_string();
            }
        }

        if !current_line.is_empty() {
            lines.push(current_line);
        }

        lines
    }

    /// Display a simple error message for non-interactive contexts
    pub fn display_simple_error(error: &PlayerError) {
        eprintln!("[{}] {}", error.severity().as_str(), error.user_message());

        if let Some(suggestion) = error.recovery_suggestions().first() {
            eprintln!("Suggestion: {}", suggestion);
        }
    }

    /// Format duration as MM:SS or HH:MM:SS for longer items
    pub fn format_duration(duration: Duration) -> String {
        let total_seconds = duration.as_secs();
        let hours = total_seconds / 3600;
        let minutes = (total_seconds % 3600) / 60;
        let seconds = total_seconds % 60;

        if hours > 0 {
            format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
        } else {
            format!("{:02}:{:02}", minutes, seconds)
        }
    }

    pub fn format_millis(millis: u64) -> String {
        Self::format_duration(Duration::from_millis(millis))
    }

    /// Truncate string to fit display width
    pub fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{}...", kept)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(StatusDisplay::format_duration(Duration::from_secs(0)), "00:00");
        assert_eq!(StatusDisplay::format_duration(Duration::from_secs(90)), "01:30");
        assert_eq!(StatusDisplay::format_duration(Duration::from_secs(3725)), "01:02:05");
        assert_eq!(StatusDisplay::format_millis(61_999), "01:01");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(StatusDisplay::truncate("short", 10), "short");
        assert_eq!(StatusDisplay::truncate("abcdefghijkl", 8), "abcde...");
        assert_eq!(StatusDisplay::truncate("ééééééééé", 6), "ééé...");
    }

    #[test]
    fn test_progress_bar_is_fixed_width() {
        assert_eq!(StatusDisplay::progress_bar(0.0, 4), "░░░░");
        assert_eq!(StatusDisplay::progress_bar(0.5, 4), "██░░");
        assert_eq!(StatusDisplay::progress_bar(1.5, 4), "████");
    }

    #[test]
    fn test_wrap_text() {
        let lines = StatusDisplay::wrap_text("one two three four", 9);
        assert_eq!(lines, vec!["one two", "three", "four"]);
    }
}
