use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::{broadcast, mpsc};
use tracing::trace;
use uuid::Uuid;

use hearth_types::events::{EventSink, GatewayEvent, channel_key};

/// Manages all connected sessions and delivers events to them.
///
/// A user may hold several live sessions at once (phone and desktop); every
/// one of them is addressed by the user's channel key and receives targeted
/// events. Presence flips online with the first session and offline with the
/// last.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Broadcast channel for global events (presence); all sessions receive these
    broadcast_tx: broadcast::Sender<GatewayEvent>,

    /// Live sessions: user_id -> (conn_id -> sender)
    sessions: RwLock<HashMap<Uuid, HashMap<Uuid, mpsc::UnboundedSender<GatewayEvent>>>>,

    /// Track online users: user_id -> username
    online_users: RwLock<HashMap<Uuid, String>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                sessions: RwLock::new(HashMap::new()),
                online_users: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to global gateway events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to all connected sessions.
    pub fn broadcast(&self, event: GatewayEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Register a new session for a user. Returns (conn_id, receiver).
    pub fn register_session(&self, user_id: Uuid) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .sessions
            .write()
            .expect("session lock poisoned")
            .entry(user_id)
            .or_default()
            .insert(conn_id, tx);
        (conn_id, rx)
    }

    /// Register a user as online. Broadcasts presence only for the first
    /// session; further sessions join silently.
    pub fn user_online(&self, user_id: Uuid, username: String) {
        let first = {
            let mut online = self
                .inner
                .online_users
                .write()
                .expect("presence lock poisoned");
            online.insert(user_id, username.clone()).is_none()
        };

        if first {
            self.broadcast(GatewayEvent::PresenceUpdate {
                user_id,
                username,
                online: true,
            });
        }
    }

    /// Drop one session. Presence goes offline only when the last session is
    /// gone, and a stale conn_id never evicts a newer session.
    pub fn user_offline(&self, user_id: Uuid, conn_id: Uuid) {
        let last = {
            let mut sessions = self.inner.sessions.write().expect("session lock poisoned");
            match sessions.get_mut(&user_id) {
                Some(conns) => {
                    conns.remove(&conn_id);
                    if conns.is_empty() {
                        sessions.remove(&user_id);
                        true
                    } else {
                        false
                    }
                }
                None => true,
            }
        };

        if !last {
            return;
        }

        let username = self
            .inner
            .online_users
            .write()
            .expect("presence lock poisoned")
            .remove(&user_id)
            .unwrap_or_default();

        self.broadcast(GatewayEvent::PresenceUpdate {
            user_id,
            username,
            online: false,
        });
    }

    /// Get list of online users.
    pub fn online_users(&self) -> Vec<(Uuid, String)> {
        self.inner
            .online_users
            .read()
            .expect("presence lock poisoned")
            .iter()
            .map(|(id, name)| (*id, name.clone()))
            .collect()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for Dispatcher {
    /// Fire-and-forget delivery to every live session of the receiver. No
    /// session means no work; a send onto a closing session is dropped and
    /// cleaned up with the connection.
    fn publish(&self, receiver_id: Uuid, event: GatewayEvent) {
        let sessions = self.inner.sessions.read().expect("session lock poisoned");

        let Some(conns) = sessions.get(&receiver_id) else {
            trace!("no live sessions on {}", channel_key(receiver_id));
            return;
        };

        for tx in conns.values() {
            let _ = tx.send(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_types::models::{NotificationKind, UserSummary};

    fn uid(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn notification_event() -> GatewayEvent {
        GatewayEvent::NotificationNew {
            id: uid(100),
            kind: NotificationKind::Comment,
            body: "commented on your post".into(),
            sender: UserSummary {
                id: uid(2),
                username: "ben".into(),
                profile: None,
            },
            metadata: serde_json::Value::Null,
            created_at: chrono::DateTime::default(),
        }
    }

    #[test]
    fn publish_without_sessions_is_a_noop() {
        let dispatcher = Dispatcher::new();
        // Nothing registered, nothing to deliver, nothing to panic about
        dispatcher.publish(uid(1), notification_event());
    }

    #[test]
    fn publish_reaches_every_live_session() {
        let dispatcher = Dispatcher::new();
        let (_c1, mut rx1) = dispatcher.register_session(uid(1));
        let (_c2, mut rx2) = dispatcher.register_session(uid(1));
        let (_c3, mut rx3) = dispatcher.register_session(uid(2));

        dispatcher.publish(uid(1), notification_event());

        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
        // Not addressed to user 2
        assert!(rx3.try_recv().is_err());
    }

    #[test]
    fn stale_disconnect_does_not_evict_a_newer_session() {
        let dispatcher = Dispatcher::new();
        let (old_conn, _old_rx) = dispatcher.register_session(uid(1));
        dispatcher.user_online(uid(1), "ann".into());

        let (_new_conn, mut new_rx) = dispatcher.register_session(uid(1));
        dispatcher.user_offline(uid(1), old_conn);

        // The newer session is still addressable and the user is still online
        dispatcher.publish(uid(1), notification_event());
        assert!(new_rx.try_recv().is_ok());
        assert_eq!(dispatcher.online_users().len(), 1);
    }

    #[test]
    fn presence_follows_the_last_session() {
        let dispatcher = Dispatcher::new();
        let mut events = dispatcher.subscribe();

        let (c1, _rx1) = dispatcher.register_session(uid(1));
        dispatcher.user_online(uid(1), "ann".into());
        let (c2, _rx2) = dispatcher.register_session(uid(1));
        dispatcher.user_online(uid(1), "ann".into());

        // Only the first session broadcast presence
        assert!(matches!(
            events.try_recv(),
            Ok(GatewayEvent::PresenceUpdate { online: true, .. })
        ));
        assert!(events.try_recv().is_err());

        dispatcher.user_offline(uid(1), c1);
        assert!(events.try_recv().is_err());

        dispatcher.user_offline(uid(1), c2);
        assert!(matches!(
            events.try_recv(),
            Ok(GatewayEvent::PresenceUpdate { online: false, .. })
        ));
        assert!(dispatcher.online_users().is_empty());
    }
}
