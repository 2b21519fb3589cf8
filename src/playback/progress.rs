use std::time::Duration;

use log::{debug, warn};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::ProgressConfig;

/// Periodic progress task. The tick callback returns `false` to end the loop.
pub struct ProgressLoop {
    cancel: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl ProgressLoop {
    pub fn spawn<F>(runtime: &Handle, config: &ProgressConfig, mut tick: F) -> Self
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let (cancel, mut cancelled) = watch::channel(false);
        let initial_delay = config.initial_delay();
        let interval = config.interval();

        let task = runtime.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(initial_delay) => {}
                _ = cancelled.changed() => return,
            }

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = cancelled.changed() => break,
                    _ = ticker.tick() => {
                        if !tick() {
                            break;
                        }
                    }
                }
            }
            debug!("Progress loop finished");
        });

        Self {
            cancel,
            task: Some(task),
        }
    }

    /// Ask the loop to stop at its next check; the handle can be joined
    pub fn cancel(&mut self) -> Option<JoinHandle<()>> {
        self.cancel.send_replace(true);
        self.task.take()
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |task| task.is_finished())
    }
}

impl Drop for ProgressLoop {
    fn drop(&mut self) {
        self.cancel.send_replace(true);
    }
}

/// Wait for a cancelled loop, aborting it once `limit` elapses
pub async fn join_bounded(task: JoinHandle<()>, limit: Duration) -> bool {
    let abort = task.abort_handle();
    match tokio::time::timeout(limit, task).await {
        Ok(_) => true,
        Err(_) => {
            warn!("Progress loop did not stop within {:?}, aborting", limit);
            abort.abort();
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fast_config() -> ProgressConfig {
        ProgressConfig {
            initial_delay_ms: 20,
            interval_ms: 10,
            shutdown_join_ms: 500,
        }
    }

    #[tokio::test]
    async fn test_first_tick_is_delayed() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let config = ProgressConfig {
            initial_delay_ms: 200,
            ..fast_config()
        };
        let mut progress = ProgressLoop::spawn(&Handle::current(), &config, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
        let task = progress.cancel().unwrap();
        assert!(join_bounded(task, Duration::from_millis(500)).await);
    }

    #[tokio::test]
    async fn test_ticks_until_cancelled() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let mut progress = ProgressLoop::spawn(&Handle::current(), &fast_config(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        });

        tokio::time::sleep(Duration::from_millis(120)).await;
        let task = progress.cancel().unwrap();
        assert!(join_bounded(task, Duration::from_millis(500)).await);
        assert!(progress.is_finished());

        let seen = ticks.load(Ordering::SeqCst);
        assert!(seen >= 2, "only {} ticks", seen);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn test_callback_can_end_loop() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let progress = ProgressLoop::spawn(&Handle::current(), &fast_config(), move || {
            counter.fetch_add(1, Ordering::SeqCst) < 2
        });

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
        assert!(progress.is_finished());
    }
}
