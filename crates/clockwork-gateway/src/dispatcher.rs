use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{RwLock, broadcast};
use tracing::{debug, trace};

use clockwork_types::events::GatewayEvent;

/// Per-group buffer. A subscriber that falls further behind than this skips ahead.
const GROUP_CAPACITY: usize = 256;

/// In-process channel layer: named groups, each a broadcast channel.
///
/// Everything currently joined to a group receives every event sent to it.
/// Groups are created on first join and dropped once their last member leaves.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// group name -> sender
    groups: RwLock<HashMap<String, broadcast::Sender<GatewayEvent>>>,

    /// Live WebSocket connections across all groups
    connections: AtomicUsize,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                groups: RwLock::new(HashMap::new()),
                connections: AtomicUsize::new(0),
            }),
        }
    }

    /// Join a group. Returns a receiver for every event sent to it from now on.
    pub async fn group_add(&self, group: &str) -> broadcast::Receiver<GatewayEvent> {
        let mut groups = self.inner.groups.write().await;
        let tx = groups
            .entry(group.to_string())
            .or_insert_with(|| broadcast::channel(GROUP_CAPACITY).0);
        debug!("joined group {} ({} members)", group, tx.receiver_count() + 1);
        tx.subscribe()
    }

    /// Send an event to every member of a group. Returns the number of members
    /// reached; a group with no members silently drops the event.
    pub async fn group_send(&self, group: &str, event: GatewayEvent) -> usize {
        let groups = self.inner.groups.read().await;
        match groups.get(group) {
            Some(tx) => tx.send(event).unwrap_or(0),
            None => {
                trace!("group_send to empty group {}", group);
                0
            }
        }
    }

    /// Forget a group once nobody is listening any more. Callers drop their
    /// receiver first, then call this.
    pub async fn group_discard(&self, group: &str) {
        let mut groups = self.inner.groups.write().await;
        if let Some(tx) = groups.get(group) {
            if tx.receiver_count() == 0 {
                groups.remove(group);
                debug!("group {} discarded", group);
            }
        }
    }

    pub async fn group_size(&self, group: &str) -> usize {
        self.inner
            .groups
            .read()
            .await
            .get(group)
            .map_or(0, |tx| tx.receiver_count())
    }

    pub fn connection_opened(&self) -> usize {
        self.inner.connections.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn connection_closed(&self) -> usize {
        self.inner.connections.fetch_sub(1, Ordering::Relaxed).saturating_sub(1)
    }

    pub fn connections(&self) -> usize {
        self.inner.connections.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(message: &str) -> GatewayEvent {
        GatewayEvent::SendNotification {
            message: message.to_string(),
        }
    }

    #[tokio::test]
    async fn test_group_send_reaches_all_members() {
        let dispatcher = Dispatcher::new();
        let mut a = dispatcher.group_add("notification_broadcast").await;
        let mut b = dispatcher.group_add("notification_broadcast").await;
        let mut other = dispatcher.group_add("notification_other").await;

        let reached = dispatcher.group_send("notification_broadcast", note("hello")).await;
        assert_eq!(reached, 2);
        assert_eq!(a.recv().await.unwrap(), note("hello"));
        assert_eq!(b.recv().await.unwrap(), note("hello"));
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_to_missing_group_is_noop() {
        let dispatcher = Dispatcher::new();
        assert_eq!(dispatcher.group_send("nobody", note("lost")).await, 0);
    }

    #[tokio::test]
    async fn test_discard_only_when_empty() {
        let dispatcher = Dispatcher::new();
        let rx = dispatcher.group_add("g").await;
        dispatcher.group_discard("g").await;
        assert_eq!(dispatcher.group_size("g").await, 1);

        drop(rx);
        dispatcher.group_discard("g").await;
        assert_eq!(dispatcher.group_size("g").await, 0);
    }

    #[test]
    fn test_connection_counter() {
        let dispatcher = Dispatcher::new();
        assert_eq!(dispatcher.connection_opened(), 1);
        assert_eq!(dispatcher.connection_opened(), 2);
        assert_eq!(dispatcher.connection_closed(), 1);
        assert_eq!(dispatcher.connections(), 1);
    }
}
