use crate::domain::events::TerminalEvent;
use crate::domain::ports::{EventSink, HostContext};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Forwards every event into an unbounded channel.
///
/// Emitting never blocks; events are dropped once the receiver is gone.
#[derive(Clone)]
pub struct ChannelEventSink {
    events: mpsc::UnboundedSender<TerminalEvent>,
}

impl ChannelEventSink {
    /// Creates a sink together with the receiving end of its channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TerminalEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (Self { events }, rx)
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: TerminalEvent) {
        let _ = self.events.send(event);
    }
}

/// A host with a fixed origin and credential, as configured at startup.
#[derive(Debug, Clone, Default)]
pub struct StaticHostContext {
    origin: Option<String>,
    cookie: Option<String>,
}

impl StaticHostContext {
    pub fn new(origin: Option<String>, cookie: Option<String>) -> Self {
        Self { origin, cookie }
    }
}

#[async_trait]
impl HostContext for StaticHostContext {
    async fn resolve_origin(&self) -> Option<String> {
        self.origin.clone()
    }

    fn credential_for(&self, _origin: &str) -> Option<String> {
        self.cookie.clone()
    }
}
