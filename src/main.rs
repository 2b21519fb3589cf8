use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};

use storycast::audio::DeviceManager;
use storycast::cli::{CallAction, CliApp, Commands, DeviceAction, ParseError, QueueAction, StatusDisplay};
use storycast::config::ConfigManager;
use storycast::error::{ErrorSeverity, PlayerError, StoreError};
use storycast::events::{EngineEvent, Subscription};
use storycast::logging::PlaybackLogger;
use storycast::manifest::HttpManifestResolver;
use storycast::models::{PlaybackPhase, PlaylistEntry};
use storycast::playback::{ManualInterruptionMonitor, PlaybackEngine, SymphoniaDecoder};
use storycast::queue::{PlaylistStore, SqlitePlaylistStore};
use storycast::relay::IcyRelayFactory;

const LOG_LEVEL_ENV: &str = "STORYCAST_LOG_LEVEL";

/// Main application controller that coordinates all components
pub struct AppController {
    engine: PlaybackEngine,
    store: Arc<dyn PlaylistStore>,
    monitor: Arc<ManualInterruptionMonitor>,
    config_manager: ConfigManager,
    shutdown_flag: Arc<AtomicBool>,
    interactive: bool,
}

impl AppController {
    /// Create a new application controller. Must run inside the tokio runtime.
    pub fn new() -> Result<Self, PlayerError> {
        // Initialize logging first (default to 'warn' if unspecified)
        if std::env::var(LOG_LEVEL_ENV).is_err() {
            std::env::set_var(LOG_LEVEL_ENV, "warn");
        }
        if let Err(e) = PlaybackLogger::init() {
            eprintln!("Warning: Failed to initialize logging: {}", e);
        }

        let config_manager = ConfigManager::new()?;
        let config = config_manager.get_config().clone();

        let store: Arc<dyn PlaylistStore> = Arc::new(SqlitePlaylistStore::open(&config.database_path)?);
        let monitor = Arc::new(ManualInterruptionMonitor::new());
        let decoder = SymphoniaDecoder::new(config.preferred_device.clone());

        let engine = PlaybackEngine::builder(Box::new(decoder))
            .config(config.playback.clone())
            .store(Arc::clone(&store))
            .manifest_resolver(Arc::new(HttpManifestResolver::new(config.cache_directory.clone())))
            .relay_factory(Arc::new(IcyRelayFactory::new(config.relay.clone())))
            .interruption_monitor(monitor.clone())
            .logger(PlaybackLogger::new())
            .build()?;

        info!("Application controller initialized successfully");

        Ok(Self {
            engine,
            store,
            monitor,
            config_manager,
            shutdown_flag: install_interrupt_handler(),
            interactive: false,
        })
    }

    /// Execute a single command
    pub async fn execute_command(&mut self, command: Commands) -> Result<(), PlayerError> {
        match command {
            Commands::Listen { url, title, stream } => {
                let entry = PlaylistEntry::new(url, title.unwrap_or_default(), stream);
                let name = entry.display_name().to_string();
                if self.interactive {
                    self.engine.submit_listen(entry, stream)?;
                    println!("Loading: {}", name);
                } else {
                    self.engine.listen(entry, stream).await?;
                    println!("Playing: {}", name);
                }
            }
            Commands::Enqueue { url, title, stream, story } => {
                let mut entry = PlaylistEntry::new(url, title.unwrap_or_default(), stream);
                if let Some(story) = story {
                    entry = entry.with_story_ref(story);
                }
                let id = self.store.insert(&entry)?;
                println!("OK: Added {} as #{}", entry.display_name(), id);
            }
            Commands::Play => {
                self.engine.play();
                println!("OK: Playing");
            }
            Commands::Pause => {
                self.engine.pause();
                println!("OK: Paused");
            }
            Commands::Stop => {
                self.engine.stop();
                println!("OK: Stopped");
            }
            Commands::Next => {
                self.engine.next()?;
                println!("OK: Next");
            }
            Commands::Seek { position } => {
                let target = CliApp::parse_time(&position)?;
                let duration_ms = self.engine.duration();
                let known = (duration_ms > 0).then(|| Duration::from_millis(duration_ms));
                let target = CliApp::validate_seek_time(target, known)?;
                self.engine.seek_to(target.as_millis() as i64);
                println!("Seeked to: {}", CliApp::format_duration(target));
            }
            Commands::Status => {
                let config = self.config_manager.get_config();
                StatusDisplay::display_full_status(&self.engine.status(), config.preferred_device.as_deref());
            }
            Commands::Call { action } => match action {
                CallAction::Start => {
                    self.monitor.notify(true);
                    println!("OK: Call started");
                }
                CallAction::End => {
                    self.monitor.notify(false);
                    println!("OK: Call ended");
                }
            },
            Commands::Queue { action } => self.execute_queue_action(action)?,
            Commands::Device { action } => match action {
                DeviceAction::List => {
                    let devices = DeviceManager::new()?;
                    let names = devices.list_devices();
                    if names.is_empty() {
                        println!("No output devices found");
                    }
                    for name in names {
                        match devices.get_capabilities(&name) {
                            Some(caps) => println!(
                                "  {} ({} Hz, {} ch, {}-bit)",
                                name, caps.sample_rate, caps.channels, caps.bit_depth
                            ),
                            None => println!("  {}", name),
                        }
                    }
                }
                DeviceAction::Set { device } => {
                    self.config_manager.set_preferred_device(Some(device.clone()))?;
                    println!("OK: Output device set to {} (used from the next restart)", device);
                }
            },
        }

        Ok(())
    }

    fn execute_queue_action(&self, action: QueueAction) -> Result<(), PlayerError> {
        match action {
            QueueAction::List => {
                StatusDisplay::display_queue(&self.store.list()?);
            }
            QueueAction::ClearRead => {
                let removed = self.store.delete_where(true)?;
                println!("OK: Removed {} played entries", removed);
            }
            QueueAction::Clear => {
                let removed = self.store.delete_where(true)? + self.store.delete_where(false)?;
                println!("OK: Removed {} entries", removed);
            }
            QueueAction::Remove { id } => {
                if self.store.get(id)?.is_none() {
                    return Err(StoreError::NotFound { id }.into());
                }
                self.store.delete(id)?;
                println!("OK: Removed #{}", id);
            }
        }
        Ok(())
    }

    /// Block until playback goes idle or the user interrupts, showing progress
    pub async fn wait_for_playback(&self) {
        let mut subscription = self.engine.subscribe();
        let mut interval = tokio::time::interval(Duration::from_millis(250));
        // `next` starts on the worker, so the engine may still be idle here
        let mut started = false;

        loop {
            interval.tick().await;
            if self.shutdown_flag.load(Ordering::Relaxed) {
                println!();
                break;
            }

            self.announce_events(&mut subscription);
            let idle = self.engine.phase() == PlaybackPhase::Idle;
            started |= !idle;
            if subscription.closed() || (started && idle) {
                println!();
                break;
            }
            if let Some(update) = subscription.update() {
                StatusDisplay::display_position_update(&update);
            }
        }
    }

    fn announce_events(&self, subscription: &mut Subscription) {
        for event in subscription.drain_events() {
            match event {
                EngineEvent::Prepared { title } => println!("\nNow playing: {}", title),
                EngineEvent::Diagnostic { code, extra } => {
                    eprintln!("\nCould not play item (error {}/{}), moving on", code, extra);
                }
                _ => {}
            }
        }
    }

    /// Run interactive mode
    pub async fn run_interactive_mode(&mut self) -> Result<(), PlayerError> {
        self.interactive = true;
        println!("storycast v0.1.0");
        println!("Type 'help' for available commands, 'exit' or 'quit' to quit.");
        println!();

        // Non-blocking input with 100ms polling using a dedicated stdin thread
        let mut interval = tokio::time::interval(Duration::from_millis(100));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            let mut line = String::new();
            loop {
                line.clear();
                match stdin.read_line(&mut line) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        if tx.send(line.trim().to_string()).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        let mut subscription = self.engine.subscribe();
        let mut awaiting_input = false;
        let mut announced_close = subscription.closed();

        loop {
            if self.shutdown_flag.load(Ordering::Relaxed) {
                break;
            }

            if !awaiting_input {
                print!("> ");
                let _ = std::io::Write::flush(&mut std::io::stdout());
                awaiting_input = true;
            }

            tokio::select! {
                biased;

                line = rx.recv() => {
                    awaiting_input = false;
                    let Some(line) = line else {
                        // EOF
                        println!();
                        break;
                    };
                    if line.is_empty() {
                        continue;
                    }
                    if line == "exit" || line == "quit" {
                        println!("Goodbye!");
                        break;
                    }
                    match CliApp::parse_command(&line) {
                        Ok(command) => {
                            if let Err(e) = self.execute_command(command).await {
                                report_error(&e);
                            }
                        }
                        Err(ParseError::HelpRequested) => CliApp::display_help(),
                        Err(e) => {
                            eprintln!("Error: {}", e);
                            println!("Type 'help' for available commands.");
                        }
                    }
                }

                _ = interval.tick() => {
                    self.announce_events(&mut subscription);
                    let closed = subscription.closed();
                    if closed && !announced_close {
                        println!("\nPlaylist finished");
                        awaiting_input = false;
                    }
                    announced_close = closed;
                }
            }
        }

        Ok(())
    }

    /// Release the decoder and relay, then wait for background tasks
    pub async fn shutdown(&mut self) {
        println!("Shutting down...");
        self.engine.shutdown().await;
        println!("Shutdown complete.");
    }
}

fn install_interrupt_handler() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&flag);
    if let Err(e) = ctrlc::set_handler(move || {
        println!("\nReceived interrupt signal. Shutting down gracefully...");
        handler_flag.store(true, Ordering::Relaxed);
    }) {
        warn!("Cannot install Ctrl-C handler: {}", e);
    }
    flag
}

/// Log an error at its severity and show it to the user
fn report_error(error: &PlayerError) {
    let severity = error.severity();
    log::log!(severity.log_level(), "{}", error);
    match severity {
        ErrorSeverity::Info | ErrorSeverity::Warning => StatusDisplay::display_simple_error(error),
        ErrorSeverity::Error | ErrorSeverity::Critical => StatusDisplay::display_error(error),
    }
}

#[tokio::main]
async fn main() {
    let cli = CliApp::parse();

    let mut app = match AppController::new() {
        Ok(app) => app,
        Err(e) => {
            error!("Failed to initialize application: {}", e);
            StatusDisplay::display_simple_error(&e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Some(command) => {
            let plays = matches!(command, Commands::Listen { .. } | Commands::Next);
            match app.execute_command(command).await {
                Ok(()) if plays => {
                    app.wait_for_playback().await;
                    Ok(())
                }
                other => other,
            }
        }
        None => app.run_interactive_mode().await,
    };

    app.shutdown().await;

    if let Err(e) = result {
        report_error(&e);
        std::process::exit(1);
    }

    info!("Application shutdown complete");
}
