use std::sync::{Mutex, MutexGuard};

use tokio::sync::mpsc::UnboundedSender;

use super::EngineMessage;

/// Handle through which a monitor reports call state to the engine
#[derive(Clone)]
pub struct InterruptionSink {
    tx: UnboundedSender<EngineMessage>,
}

impl InterruptionSink {
    pub(crate) fn new(tx: UnboundedSender<EngineMessage>) -> Self {
        Self { tx }
    }

    /// `true` when a call starts ringing or goes off-hook, `false` when it ends
    pub fn call_state_changed(&self, offhook_or_ringing: bool) {
        if self
            .tx
            .send(EngineMessage::Telephony { offhook_or_ringing })
            .is_err()
        {
            log::debug!("Engine gone, dropping call state change");
        }
    }
}

/// Source of telephony interruptions
pub trait InterruptionMonitor: Send + Sync {
    fn register(&self, sink: InterruptionSink);

    /// Stop delivering events. Safe to call repeatedly.
    fn unregister(&self);
}

/// Monitor driven by explicit calls, used by the CLI and tests
#[derive(Default)]
pub struct ManualInterruptionMonitor {
    sink: Mutex<Option<InterruptionSink>>,
}

impl ManualInterruptionMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    fn sink(&self) -> MutexGuard<'_, Option<InterruptionSink>> {
        self.sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_registered(&self) -> bool {
        self.sink().is_some()
    }

    /// Forward a call state change; ignored while unregistered
    pub fn notify(&self, offhook_or_ringing: bool) {
        if let Some(sink) = self.sink().as_ref() {
            sink.call_state_changed(offhook_or_ringing);
        }
    }
}

impl InterruptionMonitor for ManualInterruptionMonitor {
    fn register(&self, sink: InterruptionSink) {
        *self.sink() = Some(sink);
    }

    fn unregister(&self) {
        self.sink().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_notify_reaches_registered_sink_only() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let monitor = ManualInterruptionMonitor::new();

        monitor.notify(true);
        assert!(rx.try_recv().is_err());

        monitor.register(InterruptionSink::new(tx));
        assert!(monitor.is_registered());
        monitor.notify(true);
        assert!(matches!(
            rx.try_recv(),
            Ok(EngineMessage::Telephony { offhook_or_ringing: true })
        ));

        monitor.unregister();
        monitor.unregister();
        monitor.notify(false);
        assert!(rx.try_recv().is_err());
    }
}
