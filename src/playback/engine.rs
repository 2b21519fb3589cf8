//! The playback engine: one state struct behind one mutex, mutated by the
//! control API, by an event pump fed from decoder/telephony callbacks, and by
//! a worker that runs listen requests and queue advancement.
//!
//! The mutex is never held across an `.await`. Manifest downloads, relay
//! startup and the prepare wait all run unlocked and re-check the session
//! before touching state again.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use log::{debug, info, warn};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use super::interruption::{InterruptionMonitor, InterruptionSink, ManualInterruptionMonitor};
use super::progress::{join_bounded, ProgressLoop};
use super::retry::{BudgetTick, RetryBudget};
use super::{Decoder, DecoderEvent, DecoderSink, EngineMessage, SessionId};
use crate::config::{EngineConfig, RelayConfig};
use crate::error::PlaybackError;
use crate::error_recovery::{ErrorRecoveryManager, RecoveryResult};
use crate::events::{ChangeEvent, EngineEvent, EventBus, Subscription, UpdateEvent};
use crate::logging::{PlaybackEventType, PlaybackLogger};
use crate::manifest::{is_manifest_url, HttpManifestResolver, ManifestResolver};
use crate::models::{EntryId, PlaybackPhase, PlaybackStatus, PlaylistEntry, UNORDERED};
use crate::queue::{MemoryPlaylistStore, PlaylistStore};
use crate::relay::{IcyRelayFactory, RelayFactory, StreamRelay};

/// Work executed on the engine's worker task
enum EngineCommand {
    Listen {
        entry: PlaylistEntry,
        as_stream: bool,
    },
    /// Move past the item of `session`; `failure` is set when it did not play
    Advance {
        session: SessionId,
        failure: Option<PlaybackError>,
    },
}

/// How a prepare attempt ended when it was not cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PrepareOutcome {
    Prepared,
    DecoderFailed { code: i32, extra: i32 },
}

struct EngineState {
    decoder: Box<dyn Decoder>,
    session: SessionId,
    current: Option<PlaylistEntry>,
    current_as_stream: bool,
    phase: PlaybackPhase,
    pending_manifest_urls: VecDeque<String>,
    prepared: bool,
    prepare_error: Option<(i32, i32)>,
    buffered_percent: u8,
    paused_for_call: bool,
    relay: Option<Arc<dyn StreamRelay>>,
    progress: Option<ProgressLoop>,
    recovery: ErrorRecoveryManager,
}

impl EngineState {
    /// Release everything tied to the running attempt. `current` and the
    /// manifest queue are left alone.
    fn teardown(&mut self) {
        if let Some(mut progress) = self.progress.take() {
            // Detached; the loop exits at its next check
            drop(progress.cancel());
        }
        if let Some(relay) = self.relay.take() {
            relay.stop();
        }
        self.decoder.stop();
        self.decoder.reset();
        self.prepared = false;
        self.prepare_error = None;
        self.buffered_percent = 0;
    }

    fn next_session(&mut self) -> SessionId {
        self.session += 1;
        self.teardown();
        self.session
    }
}

struct EngineInner {
    config: EngineConfig,
    runtime: Handle,
    state: Mutex<EngineState>,
    store: Arc<dyn PlaylistStore>,
    resolver: Arc<dyn ManifestResolver>,
    relays: Arc<dyn RelayFactory>,
    monitor: Arc<dyn InterruptionMonitor>,
    events: EventBus,
    logger: PlaybackLogger,
    commands: UnboundedSender<EngineCommand>,
    shut_down: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl EngineInner {
    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_phase(&self, state: &mut EngineState, phase: PlaybackPhase) {
        if state.phase != phase {
            debug!("Phase {} -> {}", state.phase, phase);
            state.phase = phase;
            self.events.emit(EngineEvent::PhaseChanged(phase));
        }
    }

    /// Nothing left to play: go idle and clear the sticky signals
    fn enter_idle(&self, state: &mut EngineState) {
        state.teardown();
        state.pending_manifest_urls.clear();
        state.paused_for_call = false;
        self.set_phase(state, PlaybackPhase::Idle);
        self.events.publish_close();
    }

    fn schedule_advance(&self, session: SessionId, failure: Option<PlaybackError>) {
        if self
            .commands
            .send(EngineCommand::Advance { session, failure })
            .is_err()
        {
            debug!("Worker gone, not advancing session {}", session);
        }
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        self.monitor.unregister();
        let tasks = self.tasks.get_mut().unwrap_or_else(|p| p.into_inner());
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

/// Builder for [`PlaybackEngine`]; every collaborator except the decoder has a default
pub struct PlaybackEngineBuilder {
    decoder: Box<dyn Decoder>,
    config: EngineConfig,
    runtime: Option<Handle>,
    store: Option<Arc<dyn PlaylistStore>>,
    resolver: Option<Arc<dyn ManifestResolver>>,
    relays: Option<Arc<dyn RelayFactory>>,
    monitor: Option<Arc<dyn InterruptionMonitor>>,
    logger: Option<PlaybackLogger>,
}

impl PlaybackEngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn store(mut self, store: Arc<dyn PlaylistStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn manifest_resolver(mut self, resolver: Arc<dyn ManifestResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn relay_factory(mut self, relays: Arc<dyn RelayFactory>) -> Self {
        self.relays = Some(relays);
        self
    }

    pub fn interruption_monitor(mut self, monitor: Arc<dyn InterruptionMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn logger(mut self, logger: PlaybackLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Spawn the engine's tasks. Without an explicit runtime the current one is used.
    pub fn build(self) -> Result<PlaybackEngine, PlaybackError> {
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|e| PlaybackError::Runtime(e.to_string()))?,
        };

        let logger = self.logger.unwrap_or_default();
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryPlaylistStore::new()));
        let resolver = self.resolver.unwrap_or_else(|| {
            Arc::new(HttpManifestResolver::new(PlaybackEngine::default_cache_dir()))
        });
        let relays = self
            .relays
            .unwrap_or_else(|| Arc::new(IcyRelayFactory::new(RelayConfig::default())));
        let monitor = self
            .monitor
            .unwrap_or_else(|| Arc::new(ManualInterruptionMonitor::new()));

        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let mut decoder = self.decoder;
        decoder.set_event_sink(DecoderSink::new(message_tx.clone()));

        let state = EngineState {
            decoder,
            session: 0,
            current: None,
            current_as_stream: false,
            phase: PlaybackPhase::Idle,
            pending_manifest_urls: VecDeque::new(),
            prepared: false,
            prepare_error: None,
            buffered_percent: 0,
            paused_for_call: false,
            relay: None,
            progress: None,
            recovery: ErrorRecoveryManager::new(
                logger.clone(),
                self.config.max_consecutive_failures,
            ),
        };

        let inner = Arc::new(EngineInner {
            config: self.config,
            runtime: runtime.clone(),
            state: Mutex::new(state),
            store,
            resolver,
            relays,
            monitor,
            events: EventBus::new(),
            logger,
            commands: command_tx,
            shut_down: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        });

        let pump = runtime.spawn(run_event_pump(Arc::downgrade(&inner), message_rx));
        let worker = runtime.spawn(run_worker(Arc::downgrade(&inner), command_rx));
        inner
            .tasks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .extend([pump, worker]);

        inner.monitor.register(InterruptionSink::new(message_tx));
        info!(
            "Playback engine ready (native stream support: {})",
            inner.config.native_stream_support
        );
        Ok(PlaybackEngine { inner })
    }
}

async fn run_event_pump(engine: Weak<EngineInner>, mut messages: UnboundedReceiver<EngineMessage>) {
    while let Some(message) = messages.recv().await {
        let Some(inner) = engine.upgrade() else {
            break;
        };
        let engine = PlaybackEngine { inner };
        match message {
            EngineMessage::Decoder { session, event } => {
                if let Some(id) = engine.handle_decoder_event(session, event) {
                    engine.mark_read(id).await;
                }
            }
            EngineMessage::Telephony { offhook_or_ringing } => {
                engine.on_telephony_state_changed(offhook_or_ringing)
            }
        }
    }
}

async fn run_worker(engine: Weak<EngineInner>, mut commands: UnboundedReceiver<EngineCommand>) {
    while let Some(command) = commands.recv().await {
        let Some(inner) = engine.upgrade() else {
            break;
        };
        let engine = PlaybackEngine { inner };
        match command {
            EngineCommand::Listen { entry, as_stream } => {
                match engine.listen(entry, as_stream).await {
                    Ok(()) | Err(PlaybackError::Cancelled) => {}
                    Err(e) => warn!("Queued listen failed: {}", e),
                }
            }
            EngineCommand::Advance { session, failure } => engine.advance(session, failure).await,
        }
    }
}

/// Cloneable handle to the playback engine
#[derive(Clone)]
pub struct PlaybackEngine {
    inner: Arc<EngineInner>,
}

impl PlaybackEngine {
    pub fn builder(decoder: Box<dyn Decoder>) -> PlaybackEngineBuilder {
        PlaybackEngineBuilder {
            decoder,
            config: EngineConfig::default(),
            runtime: None,
            store: None,
            resolver: None,
            relays: None,
            monitor: None,
            logger: None,
        }
    }

    pub fn subscribe(&self) -> Subscription {
        self.inner.events.subscribe()
    }

    pub fn store(&self) -> Arc<dyn PlaylistStore> {
        Arc::clone(&self.inner.store)
    }

    pub fn logger(&self) -> &PlaybackLogger {
        &self.inner.logger
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    fn ensure_running(&self) -> Result<(), PlaybackError> {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            Err(PlaybackError::ShutDown)
        } else {
            Ok(())
        }
    }

    /// Play `entry`, superseding whatever is playing or preparing.
    ///
    /// Returns once the decoder is prepared, or with the error that kept the
    /// entry from starting. A decoder error during prepare is not returned;
    /// it is reported as [`EngineEvent::Diagnostic`] and the queue advances.
    pub async fn listen(&self, entry: PlaylistEntry, as_stream: bool) -> Result<(), PlaybackError> {
        self.ensure_running()?;
        let Some(session) = self.begin_listen(&entry, as_stream) else {
            return Ok(());
        };

        match self.run_listen(session, &entry, as_stream).await {
            Ok(PrepareOutcome::Prepared) => Ok(()),
            Ok(PrepareOutcome::DecoderFailed { code, extra }) => {
                self.inner.schedule_advance(
                    session,
                    Some(PlaybackError::Decoder { code, extra }),
                );
                Ok(())
            }
            Err(PlaybackError::PrepareTimeout { waited_ms }) => {
                self.inner.schedule_advance(
                    session,
                    Some(PlaybackError::PrepareTimeout { waited_ms }),
                );
                Err(PlaybackError::PrepareTimeout { waited_ms })
            }
            Err(PlaybackError::Cancelled) => Err(PlaybackError::Cancelled),
            Err(e) => {
                self.abandon(session, &e);
                Err(e)
            }
        }
    }

    /// Queue a listen on the engine's worker and return immediately
    pub fn submit_listen(&self, entry: PlaylistEntry, as_stream: bool) -> Result<(), PlaybackError> {
        self.ensure_running()?;
        self.inner
            .commands
            .send(EngineCommand::Listen { entry, as_stream })
            .map_err(|_| PlaybackError::ShutDown)
    }

    /// Skip to the next manifest chunk or playlist entry
    pub fn next(&self) -> Result<(), PlaybackError> {
        self.ensure_running()?;
        let session = self.inner.lock_state().session;
        self.inner.schedule_advance(session, None);
        Ok(())
    }

    /// Start a new session for `entry`. `None` when there is nothing to play.
    fn begin_listen(&self, entry: &PlaylistEntry, as_stream: bool) -> Option<SessionId> {
        let inner = &self.inner;
        inner
            .logger
            .log_listen_requested(entry.display_name(), &entry.url, as_stream);

        let mut state = inner.lock_state();
        let session = state.next_session();
        state.pending_manifest_urls.clear();
        state.paused_for_call = false;
        state.current_as_stream = as_stream;

        let previous = state.current.replace(entry.clone());
        inner.logger.log_track_changed(
            previous.as_ref().map(|p| p.display_name()),
            entry.display_name(),
        );

        if entry.url.trim().is_empty() {
            info!("Entry '{}' has no URL, staying idle", entry.display_name());
            inner.set_phase(&mut state, PlaybackPhase::Idle);
            return None;
        }

        inner.set_phase(&mut state, PlaybackPhase::Preparing);
        Some(session)
    }

    /// Manifest resolution followed by the prepare of the first URL
    async fn run_listen(
        &self,
        session: SessionId,
        entry: &PlaylistEntry,
        as_stream: bool,
    ) -> Result<PrepareOutcome, PlaybackError> {
        let inner = &self.inner;
        let is_manifest = is_manifest_url(&entry.url, &inner.config.manifest_extensions);
        if is_manifest || as_stream {
            inner.events.emit(EngineEvent::BufferingStateChanged(true));
        }

        let mut url = entry.url.clone();
        if is_manifest {
            let mut urls: VecDeque<String> = inner.resolver.resolve(&entry.url).await?.into();
            let first = urls.pop_front().ok_or_else(|| PlaybackError::EmptyManifest {
                url: entry.url.clone(),
            })?;

            let mut state = inner.lock_state();
            if state.session != session {
                return Err(PlaybackError::Cancelled);
            }
            inner.logger.log_event(
                PlaybackEventType::ManifestResolved,
                format!("{} -> {} (+{} queued)", entry.url, first, urls.len()),
            );
            state.pending_manifest_urls = urls;
            url = first;
        }

        self.prepare_source(session, &url, as_stream).await
    }

    /// Route through a relay when needed, prepare, and wait for the decoder
    async fn prepare_source(
        &self,
        session: SessionId,
        url: &str,
        as_stream: bool,
    ) -> Result<PrepareOutcome, PlaybackError> {
        let inner = &self.inner;
        let mut target = url.to_string();

        if as_stream && !inner.config.native_stream_support {
            let relay = inner.relays.create();
            // Registered before starting so a newer session's teardown stops it
            {
                let mut state = inner.lock_state();
                if state.session != session {
                    return Err(PlaybackError::Cancelled);
                }
                if let Some(old) = state.relay.replace(Arc::clone(&relay)) {
                    old.stop();
                }
            }
            let started = relay.start().await;

            let mut state = inner.lock_state();
            if state.session != session {
                relay.stop();
                return Err(PlaybackError::Cancelled);
            }
            if let Err(e) = started {
                relay.stop();
                state.relay = None;
                return Err(e.into());
            }
            let Some(local) = relay.local_url(url) else {
                relay.stop();
                state.relay = None;
                return Err(PlaybackError::Network("relay has no port".to_string()));
            };
            inner.logger.log_event(
                PlaybackEventType::RelayStarted,
                format!("{} via {}", url, local),
            );
            target = local;
        }

        {
            let mut state = inner.lock_state();
            if state.session != session {
                return Err(PlaybackError::Cancelled);
            }
            state.decoder.reset();
            state.prepared = false;
            state.prepare_error = None;
            state
                .decoder
                .set_data_source(&target)
                .map_err(|e| PlaybackError::InvalidDataSource(e.to_string()))?;
            state
                .decoder
                .prepare_async(session)
                .map_err(|e| PlaybackError::InvalidDataSource(e.to_string()))?;
            inner.set_phase(&mut state, PlaybackPhase::Preparing);
            inner.logger.log_event(
                PlaybackEventType::PrepareStarted,
                format!("Session {} preparing {}", session, target),
            );
        }
        inner.events.emit(EngineEvent::BufferingStateChanged(false));

        self.wait_for_prepare(session, &target).await
    }

    async fn wait_for_prepare(
        &self,
        session: SessionId,
        target: &str,
    ) -> Result<PrepareOutcome, PlaybackError> {
        let inner = &self.inner;
        let mut budget = RetryBudget::new(&inner.config.retry);

        loop {
            {
                let state = inner.lock_state();
                if state.session != session {
                    return Err(PlaybackError::Cancelled);
                }
                if state.prepared {
                    return Ok(PrepareOutcome::Prepared);
                }
                if let Some((code, extra)) = state.prepare_error {
                    return Ok(PrepareOutcome::DecoderFailed { code, extra });
                }
            }

            tokio::time::sleep(budget.poll_interval()).await;

            match budget.tick() {
                BudgetTick::Continue => {}
                BudgetTick::StillWaiting { .. } => {
                    inner.logger.log_prepare_waiting(target, budget.waited());
                }
                BudgetTick::Exhausted => {
                    let waited_ms = budget.waited().as_millis() as u64;
                    let mut state = inner.lock_state();
                    if state.session != session {
                        return Err(PlaybackError::Cancelled);
                    }
                    if state.prepared {
                        return Ok(PrepareOutcome::Prepared);
                    }
                    state.teardown();
                    inner.set_phase(&mut state, PlaybackPhase::Error);
                    inner.logger.log_event(
                        PlaybackEventType::PrepareTimeout,
                        format!("{} not prepared after {} ms", target, waited_ms),
                    );
                    return Err(PlaybackError::PrepareTimeout { waited_ms });
                }
            }
        }
    }

    /// A listen failed before playback could start; the caller gets the error
    fn abandon(&self, session: SessionId, error: &PlaybackError) {
        let mut state = self.inner.lock_state();
        if state.session != session {
            return;
        }
        warn!("Listen failed: {}", error);
        self.inner.enter_idle(&mut state);
    }

    /// Continue after the item of `session` finished or failed
    async fn advance(&self, session: SessionId, failure: Option<PlaybackError>) {
        let inner = &self.inner;
        {
            let mut state = inner.lock_state();
            if state.session != session || inner.shut_down.load(Ordering::SeqCst) {
                debug!("Ignoring advance for stale session {}", session);
                return;
            }
            if let Some(error) = failure {
                if let RecoveryResult::GiveUp(reason) = state.recovery.on_entry_failed(&error) {
                    warn!("{}", reason);
                    inner.enter_idle(&mut state);
                    return;
                }
            }
        }

        let mut session = session;
        loop {
            let next_manifest_url = {
                let mut state = inner.lock_state();
                if state.session != session {
                    return;
                }
                match state.pending_manifest_urls.pop_front() {
                    Some(url) => {
                        let as_stream = state.current_as_stream;
                        let next = state.next_session();
                        inner.set_phase(&mut state, PlaybackPhase::Preparing);
                        Some((next, url, as_stream))
                    }
                    None => None,
                }
            };

            let result = match next_manifest_url {
                Some((next, url, as_stream)) => {
                    debug!("Continuing manifest with {}", url);
                    session = next;
                    if as_stream {
                        inner.events.emit(EngineEvent::BufferingStateChanged(true));
                    }
                    self.prepare_source(next, &url, as_stream).await
                }
                None => {
                    let order = {
                        let state = inner.lock_state();
                        state.current.as_ref().map_or(UNORDERED, |c| c.order)
                    };
                    let store = Arc::clone(&inner.store);
                    let lookup =
                        tokio::task::spawn_blocking(move || store.next_unread_after(order)).await;
                    let next_entry = match lookup {
                        Ok(Ok(next_entry)) => next_entry,
                        Ok(Err(e)) => {
                            warn!("Cannot read the playlist: {}", e);
                            None
                        }
                        Err(e) => {
                            warn!("Playlist lookup task failed: {}", e);
                            None
                        }
                    };
                    let Some(entry) = next_entry else {
                        let mut state = inner.lock_state();
                        if state.session == session {
                            info!("Playlist exhausted");
                            inner.logger.log_event(
                                PlaybackEventType::QueueExhausted,
                                "No unread entries left".to_string(),
                            );
                            inner.enter_idle(&mut state);
                        }
                        return;
                    };

                    {
                        let state = inner.lock_state();
                        if state.session != session {
                            return;
                        }
                    }
                    let as_stream = entry.is_stream;
                    let Some(next) = self.begin_listen(&entry, as_stream) else {
                        return;
                    };
                    session = next;
                    self.run_listen(next, &entry, as_stream).await
                }
            };

            let error = match result {
                Ok(PrepareOutcome::Prepared) | Err(PlaybackError::Cancelled) => return,
                Ok(PrepareOutcome::DecoderFailed { code, extra }) => {
                    PlaybackError::Decoder { code, extra }
                }
                Err(e) => e,
            };

            {
                let mut state = inner.lock_state();
                if state.session != session {
                    return;
                }
                match state.recovery.on_entry_failed(&error) {
                    RecoveryResult::Advance(reason) => debug!("{}", reason),
                    RecoveryResult::GiveUp(reason) => {
                        warn!("{}", reason);
                        inner.enter_idle(&mut state);
                        return;
                    }
                }
            }
        }
    }

    /// Apply a decoder callback; returns the playlist id that just started
    fn handle_decoder_event(&self, session: SessionId, event: DecoderEvent) -> Option<EntryId> {
        let inner = &self.inner;
        let mut mark_read = None;
        {
            let mut state = inner.lock_state();
            if state.session != session {
                debug!("Dropping {:?} from stale session {}", event, session);
                return None;
            }

            match event {
                DecoderEvent::Prepared => {
                    if state.prepared || state.phase != PlaybackPhase::Preparing {
                        return None;
                    }
                    state.prepared = true;
                    state.decoder.start();
                    inner.set_phase(&mut state, PlaybackPhase::Playing);
                    state.recovery.on_entry_started();

                    if let Some(current) = state.current.clone() {
                        mark_read = current.id;
                        inner.events.publish_change(ChangeEvent {
                            title: current.title.clone(),
                            story_ref: current.story_ref.clone(),
                        });
                        inner.events.emit(EngineEvent::Prepared {
                            title: current.title.clone(),
                        });
                        inner.logger.log_event(
                            PlaybackEventType::PlaybackStarted,
                            format!("Playing '{}'", current.display_name()),
                        );
                    }

                    if let Some(mut old) = state.progress.take() {
                        drop(old.cancel());
                    }
                    state.progress = Some(self.spawn_progress(session));
                }
                DecoderEvent::Completed => {
                    if !state.prepared {
                        return None;
                    }
                    if let Some(mut progress) = state.progress.take() {
                        drop(progress.cancel());
                    }
                    let title = state
                        .current
                        .as_ref()
                        .map(|c| c.title.clone())
                        .unwrap_or_default();
                    info!("Finished '{}'", title);
                    inner.events.emit(EngineEvent::Completed { title });
                    inner.schedule_advance(session, None);
                }
                DecoderEvent::Error { code, extra } => {
                    inner.logger.log_decoder_error(code, extra, state.prepared);
                    inner.events.emit(EngineEvent::Diagnostic { code, extra });
                    if let Some(mut progress) = state.progress.take() {
                        drop(progress.cancel());
                    }
                    inner.set_phase(&mut state, PlaybackPhase::Error);
                    if state.prepared {
                        state.prepared = false;
                        inner.schedule_advance(
                            session,
                            Some(PlaybackError::Decoder { code, extra }),
                        );
                    } else {
                        // The waiting listen picks this up
                        state.prepare_error = Some((code, extra));
                    }
                }
                DecoderEvent::Buffering(percent) => {
                    state.buffered_percent = percent.min(100);
                    if state.prepared {
                        let update = progress_update(&state);
                        inner.events.publish_update(update);
                    }
                }
            }
        }

        mark_read
    }

    /// Flag a started entry as read off the async threads
    async fn mark_read(&self, id: EntryId) {
        let store = Arc::clone(&self.inner.store);
        match tokio::task::spawn_blocking(move || store.mark_read(id)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Cannot mark entry {} as read: {}", id, e),
            Err(e) => warn!("Mark-read task for entry {} failed: {}", id, e),
        }
    }

    fn spawn_progress(&self, session: SessionId) -> ProgressLoop {
        let engine = Arc::downgrade(&self.inner);
        ProgressLoop::spawn(&self.inner.runtime, &self.inner.config.progress, move || {
            let Some(inner) = engine.upgrade() else {
                return false;
            };
            let state = inner.lock_state();
            if state.session != session {
                return false;
            }
            if state.prepared && state.decoder.is_playing() {
                inner.events.publish_update(progress_update(&state));
            }
            true
        })
    }

    pub fn play(&self) {
        let inner = &self.inner;
        let mut state = inner.lock_state();
        state.paused_for_call = false;
        match state.phase {
            PlaybackPhase::Paused if state.prepared => {
                state.decoder.start();
                inner.set_phase(&mut state, PlaybackPhase::Playing);
                inner.logger.log_event(
                    PlaybackEventType::PlaybackStarted,
                    "Playback resumed".to_string(),
                );
            }
            phase => debug!("Play ignored while {}", phase),
        }
    }

    pub fn pause(&self) {
        let inner = &self.inner;
        let mut state = inner.lock_state();
        if state.phase != PlaybackPhase::Playing {
            debug!("Pause ignored while {}", state.phase);
            return;
        }
        state.decoder.pause();
        inner.set_phase(&mut state, PlaybackPhase::Paused);
        let position = state.decoder.current_position();
        inner.logger.log_playback_paused(position);
    }

    /// Stop playback and release the relay and decoder; `current` is kept
    pub fn stop(&self) {
        let inner = &self.inner;
        let mut state = inner.lock_state();
        let was = state.phase;
        state.next_session();
        state.pending_manifest_urls.clear();
        state.paused_for_call = false;
        inner.set_phase(&mut state, PlaybackPhase::Idle);
        if was != PlaybackPhase::Idle {
            inner.events.publish_close();
            inner.logger.log_playback_stopped("stop requested");
        }
    }

    /// Seek within the prepared item; clamped to the known duration
    pub fn seek_to(&self, position_ms: i64) {
        let mut state = self.inner.lock_state();
        if !state.phase.is_active() || !state.prepared {
            debug!("Seek ignored while {}", state.phase);
            return;
        }
        let mut target = position_ms.max(0) as u64;
        let duration = state.decoder.duration();
        if duration > 0 {
            target = target.min(duration);
        }
        state.decoder.seek_to(target);
    }

    pub fn position(&self) -> u64 {
        let state = self.inner.lock_state();
        if state.prepared {
            state.decoder.current_position()
        } else {
            0
        }
    }

    pub fn duration(&self) -> u64 {
        let state = self.inner.lock_state();
        if state.prepared {
            state.decoder.duration()
        } else {
            0
        }
    }

    pub fn is_playing(&self) -> bool {
        let state = self.inner.lock_state();
        state.prepared && state.decoder.is_playing()
    }

    pub fn phase(&self) -> PlaybackPhase {
        self.inner.lock_state().phase
    }

    pub fn current(&self) -> Option<PlaylistEntry> {
        self.inner.lock_state().current.clone()
    }

    pub fn status(&self) -> PlaybackStatus {
        let state = self.inner.lock_state();
        let (position_ms, duration_ms) = if state.prepared {
            (state.decoder.current_position(), state.decoder.duration())
        } else {
            (0, 0)
        };
        PlaybackStatus {
            phase: state.phase,
            current: state.current.clone(),
            position_ms,
            duration_ms,
            buffered_percent: state.buffered_percent,
            pending_manifest_urls: state.pending_manifest_urls.len(),
            paused_for_call: state.paused_for_call,
        }
    }

    /// Pause for an incoming/active call; resume slightly rewound once it ends
    pub fn on_telephony_state_changed(&self, offhook_or_ringing: bool) {
        let inner = &self.inner;
        let mut state = inner.lock_state();

        if offhook_or_ringing {
            if state.phase == PlaybackPhase::Playing {
                state.decoder.pause();
                state.paused_for_call = true;
                inner.set_phase(&mut state, PlaybackPhase::Paused);
                inner.logger.log_event(
                    PlaybackEventType::CallInterruption,
                    format!("Paused for call at {} ms", state.decoder.current_position()),
                );
            }
            return;
        }

        if !state.paused_for_call {
            return;
        }
        state.paused_for_call = false;
        if state.phase == PlaybackPhase::Paused && state.prepared {
            let resume_at = state
                .decoder
                .current_position()
                .saturating_sub(inner.config.resume_rewind_ms);
            state.decoder.seek_to(resume_at);
            state.decoder.start();
            inner.set_phase(&mut state, PlaybackPhase::Playing);
            inner.logger.log_event(
                PlaybackEventType::CallInterruption,
                format!("Call ended, resuming at {} ms", resume_at),
            );
        }
    }

    /// Cancel the progress loop, release the decoder and relay, and stop all
    /// engine tasks. Later calls do nothing.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        if inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down playback engine");

        let (progress, relay) = {
            let mut state = inner.lock_state();
            let was = state.phase;
            state.session += 1;
            let progress = state.progress.take();
            let relay = state.relay.take();
            state.decoder.stop();
            state.decoder.release();
            state.prepared = false;
            state.pending_manifest_urls.clear();
            state.paused_for_call = false;
            inner.set_phase(&mut state, PlaybackPhase::Idle);
            if was != PlaybackPhase::Idle {
                inner.events.publish_close();
            }
            (progress, relay)
        };

        if let Some(relay) = relay {
            relay.stop();
            inner
                .logger
                .log_event(PlaybackEventType::RelayStopped, "Engine shutdown".to_string());
        }
        if let Some(mut progress) = progress {
            if let Some(task) = progress.cancel() {
                join_bounded(task, inner.config.progress.shutdown_join()).await;
            }
        }

        inner.monitor.unregister();
        let tasks: Vec<_> = inner
            .tasks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .drain(..)
            .collect();
        for task in tasks {
            task.abort();
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    /// Cache directory used by the default manifest resolver
    pub fn default_cache_dir() -> PathBuf {
        std::env::temp_dir().join("storycast")
    }
}

fn progress_update(state: &EngineState) -> UpdateEvent {
    let position_ms = state.decoder.current_position();
    let duration_ms = state.decoder.duration();
    UpdateEvent {
        position_ms,
        duration_ms,
        downloaded_ms: duration_ms * state.buffered_percent as u64 / 100,
    }
}
