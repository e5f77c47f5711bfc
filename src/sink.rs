//! Notification sink, receives connectivity changes and server messages.

use crate::message::Payload;

/// Receiver of connection notifications.
///
/// Connection holds the sink weakly, notifications stop when the sink is
/// dropped. All notifications of a connection are delivered one by one from
/// the same task, in the order they happened.
#[async_trait::async_trait]
pub trait NotificationSink: Send + Sync {
    /// connection entered or left registered state
    async fn on_connectivity_changed(&self, connected: bool);

    /// server pushed a single record message
    async fn on_message(&self, _payload: Payload) {}

    /// server pushed an aggregated record message
    async fn on_aggregation(&self, _payload: Payload) {}
}
