//! Event sink for incremental provenance.

use agentnet_core::EngineEvent;
use tokio::sync::mpsc;

/// Where a request reports progress. Sending never blocks the engine; a
/// request started without a listener drops its events.
#[derive(Clone, Default)]
pub struct EventSink(Option<mpsc::UnboundedSender<EngineEvent>>);

impl EventSink {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self(Some(tx)), rx)
    }

    pub fn emit(&self, event: EngineEvent) {
        if let Some(tx) = &self.0 {
            // Receiver gone means nobody is listening any more.
            let _ = tx.send(event);
        }
    }
}
