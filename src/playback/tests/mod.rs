
pub(crate) use fakes::{CannedResolver, CountingRelayFactory, FakeDecoder, FakeDecoderHandle, FAKE_RELAY_PORT};

use std::sync::Arc;
use std::time::Duration;

use crate::config::{EngineConfig, ProgressConfig, RetryConfig};
use crate::error::PlaybackError;
use crate::events::EngineEvent;
use crate::logging::PlaybackEventType;
use crate::models::{PlaybackPhase, PlaylistEntry, UNORDERED};
use crate::playback::{ManualInterruptionMonitor, PlaybackEngine};
use crate::queue::{MemoryPlaylistStore, PlaylistStore};

pub(crate) fn fast_config() -> EngineConfig {
    EngineConfig {
        retry: RetryConfig {
            poll_interval_ms: 5,
            max_wait_ticks: 4,
            max_retries: 3,
        },
        progress: ProgressConfig {
            initial_delay_ms: 10,
            interval_ms: 10,
            shutdown_join_ms: 500,
        },
        ..EngineConfig::default()
    }
}

/// Poll `condition` until it holds or two seconds pass
pub(crate) async fn wait_until<F: FnMut() -> bool>(mut condition: F) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

struct Harness {
    engine: PlaybackEngine,
    decoder: FakeDecoderHandle,
    relays: Arc<CountingRelayFactory>,
    store: Arc<MemoryPlaylistStore>,
    monitor: Arc<ManualInterruptionMonitor>,
    resolver: Arc<CannedResolver>,
}

fn harness_with(config: EngineConfig, auto_prepare: bool, resolver: CannedResolver) -> Harness {
    let (decoder, handle) = FakeDecoder::new(auto_prepare);
    let relays = Arc::new(CountingRelayFactory::default());
    let store = Arc::new(MemoryPlaylistStore::new());
    let monitor = Arc::new(ManualInterruptionMonitor::new());
    let resolver = Arc::new(resolver);

    let engine = PlaybackEngine::builder(Box::new(decoder))
        .config(config)
        .store(store.clone())
        .relay_factory(relays.clone())
        .interruption_monitor(monitor.clone())
        .manifest_resolver(resolver.clone())
        .build()
        .unwrap();

    Harness {
        engine,
        decoder: handle,
        relays,
        store,
        monitor,
        resolver,
    }
}

fn harness() -> Harness {
    harness_with(fast_config(), true, CannedResolver::default())
}

fn story(name: &str) -> PlaylistEntry {
    PlaylistEntry::new(format!("http://x/{}.mp3", name), name, false)
}

#[tokio::test]
async fn test_file_plays_without_relay() {
    let h = harness();
    let sub = h.engine.subscribe();

    h.engine.listen(story("a").with_story_ref("1001"), false).await.unwrap();

    assert_eq!(h.engine.phase(), PlaybackPhase::Playing);
    assert!(h.engine.is_playing());
    assert_eq!(h.relays.created(), 0);
    assert_eq!(h.decoder.prepared_sources(), vec!["http://x/a.mp3"]);
    let change = sub.change().unwrap();
    assert_eq!(change.title, "a");
    assert_eq!(change.story_ref.as_deref(), Some("1001"));
}

#[tokio::test]
async fn test_stream_is_routed_through_relay() {
    let h = harness();
    let mut sub = h.engine.subscribe();
    let station = PlaylistEntry::new("http://x/stream", "Station", true);

    h.engine.listen(station, true).await.unwrap();

    assert_eq!(
        h.decoder.prepared_sources(),
        vec![format!("http://127.0.0.1:{}/http://x/stream", FAKE_RELAY_PORT)]
    );
    assert_eq!(h.relays.alive(), 1);
    assert!(h.engine.is_playing());
    assert_eq!(sub.change().unwrap().title, "Station");

    let events = sub.drain_events();
    let on = events
        .iter()
        .position(|e| *e == EngineEvent::BufferingStateChanged(true))
        .unwrap();
    let off = events
        .iter()
        .position(|e| *e == EngineEvent::BufferingStateChanged(false))
        .unwrap();
    assert!(on < off);
}

#[tokio::test]
async fn test_native_stream_support_skips_relay() {
    let config = EngineConfig {
        native_stream_support: true,
        ..fast_config()
    };
    let h = harness_with(config, true, CannedResolver::default());

    h.engine
        .listen(PlaylistEntry::new("http://x/stream", "Station", true), true)
        .await
        .unwrap();

    assert_eq!(h.relays.created(), 0);
    assert_eq!(h.decoder.prepared_sources(), vec!["http://x/stream"]);
}

#[tokio::test]
async fn test_at_most_one_relay_alive() {
    let h = harness();
    for name in ["one", "two", "three"] {
        let url = format!("http://x/{}", name);
        h.engine
            .listen(PlaylistEntry::new(url, name, true), true)
            .await
            .unwrap();
        assert_eq!(h.relays.alive(), 1);
    }
    assert_eq!(h.relays.created(), 3);
    assert_eq!(h.relays.max_alive(), 1);

    h.engine.stop();
    assert_eq!(h.relays.alive(), 0);
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let h = harness();
    let sub = h.engine.subscribe();
    h.engine.listen(story("a"), false).await.unwrap();

    h.engine.stop();
    h.engine.stop();

    assert_eq!(h.engine.phase(), PlaybackPhase::Idle);
    assert!(!h.engine.is_playing());
    assert!(sub.closed());
    assert!(sub.change().is_none());
    assert_eq!(h.engine.logger().count(PlaybackEventType::PlaybackStopped), 1);
    // The entry stays current for status displays
    assert_eq!(h.engine.current().unwrap().title, "a");
}

#[tokio::test]
async fn test_pause_and_play() {
    let h = harness();
    h.engine.listen(story("a"), false).await.unwrap();

    h.engine.pause();
    assert_eq!(h.engine.phase(), PlaybackPhase::Paused);
    assert!(!h.engine.is_playing());

    h.engine.play();
    assert_eq!(h.engine.phase(), PlaybackPhase::Playing);
    assert!(h.engine.is_playing());
}

#[tokio::test]
async fn test_call_pauses_and_resumes_rewound() {
    let h = harness();
    h.engine.listen(story("a"), false).await.unwrap();
    h.decoder.set_position(10_000);

    h.monitor.notify(true);
    assert!(wait_until(|| h.engine.phase() == PlaybackPhase::Paused).await);
    assert!(h.engine.status().paused_for_call);

    h.monitor.notify(false);
    assert!(wait_until(|| h.engine.phase() == PlaybackPhase::Playing).await);
    assert_eq!(h.decoder.state().seeks, vec![7_000]);
    assert!(!h.engine.status().paused_for_call);

    // Near the start the rewind stops at zero
    h.decoder.set_position(2_000);
    h.monitor.notify(true);
    assert!(wait_until(|| h.engine.phase() == PlaybackPhase::Paused).await);
    h.monitor.notify(false);
    assert!(wait_until(|| h.engine.phase() == PlaybackPhase::Playing).await);
    assert_eq!(h.decoder.state().seeks, vec![7_000, 0]);
}

#[tokio::test]
async fn test_call_end_does_not_undo_user_pause() {
    let h = harness();
    h.engine.listen(story("a"), false).await.unwrap();
    h.engine.pause();

    h.monitor.notify(true);
    h.monitor.notify(false);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(h.engine.phase(), PlaybackPhase::Paused);
    assert!(h.decoder.state().seeks.is_empty());
}

#[tokio::test]
async fn test_manual_play_during_call_is_not_resumed_again() {
    let h = harness();
    h.engine.listen(story("a"), false).await.unwrap();
    h.decoder.set_position(10_000);

    h.monitor.notify(true);
    assert!(wait_until(|| h.engine.phase() == PlaybackPhase::Paused).await);

    h.engine.play();
    assert_eq!(h.engine.phase(), PlaybackPhase::Playing);
    assert!(!h.engine.status().paused_for_call);

    h.monitor.notify(false);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(h.engine.phase(), PlaybackPhase::Playing);
    assert!(h.decoder.state().seeks.is_empty());
    // One start for the prepare, one for the manual play
    assert_eq!(h.decoder.count_calls("start"), 2);
}

#[tokio::test]
async fn test_superseded_relay_start_keeps_one_relay_alive() {
    let (decoder, _handle) = FakeDecoder::new(true);
    let relays = Arc::new(CountingRelayFactory::with_start_delay(Duration::from_millis(200)));
    let engine = PlaybackEngine::builder(Box::new(decoder))
        .config(fast_config())
        .relay_factory(relays.clone())
        .build()
        .unwrap();

    let (first, second) = tokio::join!(
        engine.listen(PlaylistEntry::new("http://x/one", "One", true), true),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            engine
                .listen(PlaylistEntry::new("http://x/two", "Two", true), true)
                .await
        }
    );

    assert!(matches!(first, Err(PlaybackError::Cancelled)));
    second.unwrap();
    assert_eq!(relays.created(), 2);
    assert_eq!(relays.max_alive(), 1);
    assert_eq!(relays.alive(), 1);
    assert_eq!(engine.current().unwrap().title, "Two");
    assert_eq!(engine.phase(), PlaybackPhase::Playing);

    engine.shutdown().await;
    assert_eq!(relays.alive(), 0);
}

#[tokio::test]
async fn test_manifest_chunks_play_before_playlist() {
    let resolver = CannedResolver::default().with(
        "http://x/show.m3u",
        &["http://x/part1.mp3", "http://x/part2.mp3"],
    );
    let h = harness_with(fast_config(), true, resolver);
    h.store.insert(&story("later")).unwrap();

    h.engine
        .listen(PlaylistEntry::new("http://x/show.m3u", "Show", false), false)
        .await
        .unwrap();
    assert_eq!(h.decoder.prepared_sources(), vec!["http://x/part1.mp3"]);
    assert_eq!(h.engine.status().pending_manifest_urls, 1);

    h.decoder.fire_completed();
    assert!(
        wait_until(|| h.decoder.prepared_sources().len() == 2 && h.engine.is_playing()).await
    );
    assert_eq!(h.decoder.prepared_sources()[1], "http://x/part2.mp3");
    assert_eq!(h.resolver.calls(), 1);
    assert_eq!(h.engine.status().pending_manifest_urls, 0);

    h.decoder.fire_completed();
    assert!(
        wait_until(|| h.decoder.prepared_sources().len() == 3 && h.engine.is_playing()).await
    );
    assert_eq!(h.decoder.prepared_sources()[2], "http://x/later.mp3");
}

#[tokio::test]
async fn test_playlist_advances_and_marks_read() {
    let h = harness();
    let a = h.store.insert(&story("a")).unwrap();
    let b = h.store.insert(&story("b")).unwrap();

    let first = h.store.next_unread_after(UNORDERED).unwrap().unwrap();
    h.engine.listen(first, false).await.unwrap();
    assert!(wait_until(|| h.store.get(a).unwrap().unwrap().is_read).await);

    h.decoder.fire_completed();
    assert!(wait_until(|| h.store.get(b).unwrap().unwrap().is_read).await);
    assert_eq!(h.engine.current().unwrap().title, "b");
}

#[tokio::test]
async fn test_exhausted_playlist_goes_idle_and_closes() {
    let h = harness();
    let sub = h.engine.subscribe();
    h.engine.listen(story("only"), false).await.unwrap();
    assert!(sub.change().is_some());

    h.decoder.fire_completed();
    assert!(wait_until(|| h.engine.phase() == PlaybackPhase::Idle && sub.closed()).await);
    assert!(sub.change().is_none());
    assert_eq!(h.engine.current().unwrap().title, "only");
    assert_eq!(h.engine.logger().count(PlaybackEventType::QueueExhausted), 1);
}

#[tokio::test]
async fn test_prepare_timeout_then_idle() {
    let h = harness_with(fast_config(), false, CannedResolver::default());
    let mut sub = h.engine.subscribe();

    let result = h.engine.listen(story("slow"), false).await;
    assert!(matches!(result, Err(PlaybackError::PrepareTimeout { .. })));
    assert_eq!(h.engine.phase(), PlaybackPhase::Error);
    assert_eq!(h.engine.logger().count(PlaybackEventType::PrepareTimeout), 1);

    assert!(wait_until(|| h.engine.phase() == PlaybackPhase::Idle && sub.closed()).await);
    let phases: Vec<_> = sub
        .drain_events()
        .into_iter()
        .filter_map(|e| match e {
            EngineEvent::PhaseChanged(phase) => Some(phase),
            _ => None,
        })
        .collect();
    assert_eq!(
        phases,
        vec![PlaybackPhase::Preparing, PlaybackPhase::Error, PlaybackPhase::Idle]
    );
}

#[tokio::test]
async fn test_decoder_refusal_moves_to_next_entry() {
    let h = harness();
    let mut sub = h.engine.subscribe();
    h.decoder.fail_source("http://x/broken.mp3");
    h.store.insert(&story("broken")).unwrap();
    let good = h.store.insert(&story("good")).unwrap();

    let first = h.store.next_unread_after(UNORDERED).unwrap().unwrap();
    h.engine.listen(first, false).await.unwrap();

    assert!(wait_until(|| h.store.get(good).unwrap().unwrap().is_read).await);
    assert_eq!(h.engine.phase(), PlaybackPhase::Playing);
    assert!(sub
        .drain_events()
        .contains(&EngineEvent::Diagnostic { code: 1, extra: -1004 }));
}

#[tokio::test]
async fn test_error_during_playback_advances() {
    let h = harness();
    h.store.insert(&story("a")).unwrap();
    let b = h.store.insert(&story("b")).unwrap();

    let first = h.store.next_unread_after(UNORDERED).unwrap().unwrap();
    h.engine.listen(first, false).await.unwrap();
    h.decoder.fire_error(100, 0);

    assert!(wait_until(|| h.store.get(b).unwrap().unwrap().is_read).await);
    assert_eq!(h.engine.logger().count(PlaybackEventType::DecoderError), 1);
}

#[tokio::test]
async fn test_consecutive_failures_are_capped() {
    let config = EngineConfig {
        max_consecutive_failures: 3,
        ..fast_config()
    };
    let h = harness_with(config, true, CannedResolver::default());
    let sub = h.engine.subscribe();
    for i in 0..5 {
        let entry = story(&format!("bad{}", i));
        h.decoder.fail_source(&entry.url);
        h.store.insert(&entry).unwrap();
    }

    let first = h.store.next_unread_after(UNORDERED).unwrap().unwrap();
    h.engine.listen(first, false).await.unwrap();

    assert!(wait_until(|| h.engine.phase() == PlaybackPhase::Idle && sub.closed()).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.decoder.prepared_sources().len(), 3);
}

#[tokio::test]
async fn test_stale_prepared_is_ignored() {
    let config = EngineConfig {
        retry: RetryConfig {
            poll_interval_ms: 5,
            max_wait_ticks: 20,
            max_retries: 20,
        },
        ..fast_config()
    };
    let h = harness_with(config, false, CannedResolver::default());

    let engine = h.engine.clone();
    let first = tokio::spawn(async move { engine.listen(story("a"), false).await });
    assert!(wait_until(|| h.decoder.state().sessions.len() == 1).await);
    let stale = h.decoder.last_session();

    let engine = h.engine.clone();
    let second = tokio::spawn(async move { engine.listen(story("b"), false).await });
    assert!(wait_until(|| h.decoder.state().sessions.len() == 2).await);
    assert!(matches!(first.await.unwrap(), Err(PlaybackError::Cancelled)));

    h.decoder.fire_prepared_for(stale);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(h.engine.phase(), PlaybackPhase::Preparing);
    assert!(!h.engine.is_playing());

    h.decoder.fire_prepared();
    second.await.unwrap().unwrap();
    assert_eq!(h.engine.phase(), PlaybackPhase::Playing);
    assert_eq!(h.engine.current().unwrap().title, "b");
}

#[tokio::test]
async fn test_empty_manifest_fails_listen() {
    let resolver = CannedResolver::default().with("http://x/empty.pls", &[]);
    let h = harness_with(fast_config(), true, resolver);
    let sub = h.engine.subscribe();

    let result = h
        .engine
        .listen(PlaylistEntry::new("http://x/empty.pls", "Empty", false), false)
        .await;

    assert!(matches!(result, Err(PlaybackError::EmptyManifest { .. })));
    assert_eq!(h.engine.phase(), PlaybackPhase::Idle);
    assert!(sub.closed());
    assert!(h.decoder.prepared_sources().is_empty());
}

#[tokio::test]
async fn test_unresolvable_manifest_is_network_error() {
    let h = harness();
    let result = h
        .engine
        .listen(PlaylistEntry::new("http://x/missing.m3u", "Gone", false), false)
        .await;
    assert!(matches!(result, Err(PlaybackError::Network(_))));
    assert_eq!(h.engine.phase(), PlaybackPhase::Idle);
}

#[tokio::test]
async fn test_empty_url_stays_idle() {
    let h = harness();
    h.engine
        .listen(PlaylistEntry::new("", "Nothing", false), false)
        .await
        .unwrap();
    assert_eq!(h.engine.phase(), PlaybackPhase::Idle);
    assert!(h.decoder.prepared_sources().is_empty());
}

#[tokio::test]
async fn test_seek_is_clamped() {
    let h = harness();
    h.decoder.set_duration(60_000);
    h.engine.listen(story("a"), false).await.unwrap();

    h.engine.seek_to(-5);
    h.engine.seek_to(90_000);
    h.engine.seek_to(30_000);
    assert_eq!(h.decoder.state().seeks, vec![0, 60_000, 30_000]);

    h.decoder.set_duration(0);
    h.engine.seek_to(90_000);
    assert_eq!(h.decoder.state().seeks.last(), Some(&90_000));

    h.engine.stop();
    h.engine.seek_to(1_000);
    assert_eq!(h.decoder.state().seeks.len(), 4);
}

#[tokio::test]
async fn test_progress_updates_include_buffered_amount() {
    let h = harness();
    let sub = h.engine.subscribe();
    h.decoder.set_duration(60_000);
    h.decoder.set_position(1_234);
    h.engine.listen(story("a"), false).await.unwrap();

    h.decoder.fire_buffering(50);
    assert!(
        wait_until(|| sub
            .update()
            .map_or(false, |u| u.position_ms == 1_234 && u.downloaded_ms == 30_000))
        .await
    );

    h.decoder.set_position(5_000);
    assert!(wait_until(|| sub.update().map_or(false, |u| u.position_ms == 5_000)).await);
    assert_eq!(h.engine.status().buffered_percent, 50);
}

#[tokio::test]
async fn test_next_skips_current_entry() {
    let h = harness();
    h.store.insert(&story("a")).unwrap();
    let b = h.store.insert(&story("b")).unwrap();

    let first = h.store.next_unread_after(UNORDERED).unwrap().unwrap();
    h.engine.listen(first, false).await.unwrap();
    h.engine.next().unwrap();

    assert!(wait_until(|| h.store.get(b).unwrap().unwrap().is_read).await);
}

#[tokio::test]
async fn test_submit_listen_runs_on_worker() {
    let h = harness();
    h.engine.submit_listen(story("queued"), false).unwrap();
    assert!(wait_until(|| h.engine.is_playing()).await);
    assert_eq!(h.engine.current().unwrap().title, "queued");
}

#[tokio::test]
async fn test_shutdown_releases_everything_once() {
    let h = harness();
    let sub = h.engine.subscribe();
    h.engine
        .listen(PlaylistEntry::new("http://x/stream", "Station", true), true)
        .await
        .unwrap();
    assert!(h.monitor.is_registered());

    h.engine.shutdown().await;
    h.engine.shutdown().await;

    assert!(h.engine.is_shut_down());
    assert_eq!(h.relays.alive(), 0);
    assert!(h.decoder.state().released);
    assert_eq!(h.decoder.count_calls("release"), 1);
    assert!(!h.monitor.is_registered());
    assert!(sub.closed());
    assert_eq!(h.engine.phase(), PlaybackPhase::Idle);
    assert!(matches!(
        h.engine.listen(story("late"), false).await,
        Err(PlaybackError::ShutDown)
    ));
}

#[test]
fn test_build_without_runtime_fails() {
    let (decoder, _handle) = FakeDecoder::new(true);
    let result = PlaybackEngine::builder(Box::new(decoder)).build();
    assert!(matches!(result, Err(PlaybackError::Runtime(_))));
}
