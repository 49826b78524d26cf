//! The subscription manager (SPEC_FULL.md §4.4).
//!
//! Owns the channel table, the action table, and per-channel subscriber
//! sets. All subscription-state mutation is confined to this module's
//! methods — user code and the dispatcher never touch the maps directly.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::RegistrationError;
use crate::registry::{ActionHandler, ChannelHandler};
use crate::socket::SocketHandle;

struct ChannelEntry {
    handler: Arc<ChannelHandler>,
    sockets: RwLock<HashSet<SocketHandle>>,
}

/// Owns channels, actions, and subscription state; the only thing allowed
/// to mutate a channel's subscriber set.
#[derive(Default)]
pub struct SubscriptionManager {
    channels: RwLock<HashMap<String, ChannelEntry>>,
    actions: RwLock<HashMap<String, Arc<ActionHandler>>>,
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager").finish_non_exhaustive()
    }
}

impl SubscriptionManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a channel. Fails if `name` is already a channel or action.
    ///
    /// Not callable at runtime — only ever called during application setup
    /// before the transport starts accepting connections.
    pub(crate) async fn create_channel(
        &self,
        name: &str,
        handler: Arc<ChannelHandler>,
    ) -> Result<(), RegistrationError> {
        self.check_name_free(name).await?;
        self.channels.write().await.insert(
            name.to_string(),
            ChannelEntry {
                handler,
                sockets: RwLock::new(HashSet::new()),
            },
        );
        Ok(())
    }

    /// Register an action. Symmetric with `create_channel`.
    pub(crate) async fn create_action(
        &self,
        name: &str,
        handler: Arc<ActionHandler>,
    ) -> Result<(), RegistrationError> {
        self.check_name_free(name).await?;
        self.actions.write().await.insert(name.to_string(), handler);
        Ok(())
    }

    async fn check_name_free(&self, name: &str) -> Result<(), RegistrationError> {
        if self.channels.read().await.contains_key(name) {
            return Err(RegistrationError::DuplicateName(name.to_string(), "channel"));
        }
        if self.actions.read().await.contains_key(name) {
            return Err(RegistrationError::DuplicateName(name.to_string(), "action"));
        }
        Ok(())
    }

    /// Subscribe `socket` to `channel`, sending the acknowledgement and
    /// (when applicable) the initial data frame.
    ///
    /// Unknown channel: an error frame is sent and subscription state is
    /// left untouched.
    pub async fn subscribe(&self, channel: &str, socket: &SocketHandle, data: Value) {
        let handler = {
            let channels = self.channels.read().await;
            match channels.get(channel) {
                Some(entry) => {
                    entry.sockets.write().await.insert(socket.clone());
                    entry.handler.clone()
                }
                None => {
                    self.error(socket, &format!("Channel '{channel}' not found."))
                        .await;
                    return;
                }
            }
        };
        self.send(socket, "subscribed", channel, None).await;
        handler.send_initial_data(self, socket, data).await;
    }

    /// Remove `socket` from `channel`'s subscriber set if present, then
    /// acknowledge unconditionally (SPEC_FULL.md §9, "always acknowledge;
    /// never error").
    pub async fn unsubscribe(&self, channel: &str, socket: &SocketHandle) {
        if let Some(entry) = self.channels.read().await.get(channel) {
            entry.sockets.write().await.remove(socket);
        }
        self.send(socket, "unsubscribed", channel, None).await;
    }

    /// Look up and invoke the named action.
    pub async fn action(&self, name: &str, socket: &SocketHandle, data: Value) {
        let handler = self.actions.read().await.get(name).cloned();
        match handler {
            Some(handler) => handler.invoke(self, socket, data).await,
            None => {
                self.error(socket, &format!("Action '{name}' not found."))
                    .await;
            }
        }
    }

    /// Remove `socket` from every channel's subscriber set. Called on
    /// transport disconnect and on any send failure.
    pub async fn unsubscribe_all(&self, socket: &SocketHandle) {
        let channels = self.channels.read().await;
        for entry in channels.values() {
            entry.sockets.write().await.remove(socket);
        }
    }

    /// A snapshot of the sockets currently subscribed to `channel`, taken
    /// under the channel's own lock and then released — broadcast iterates
    /// this copy, never the live set (SPEC_FULL.md §4.2, §5).
    pub(crate) async fn snapshot(&self, channel: &str) -> Vec<SocketHandle> {
        match self.channels.read().await.get(channel) {
            Some(entry) => entry.sockets.read().await.iter().cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Number of sockets currently subscribed to `channel` — used by tests
    /// asserting the eviction invariants in SPEC_FULL.md §8.
    pub async fn subscriber_count(&self, channel: &str) -> usize {
        match self.channels.read().await.get(channel) {
            Some(entry) => entry.sockets.read().await.len(),
            None => 0,
        }
    }

    /// Compose `{type, channel}` (plus `data` when present) and send it,
    /// evicting the socket from every subscription on failure.
    pub(crate) async fn send(
        &self,
        socket: &SocketHandle,
        frame_type: &str,
        channel: &str,
        data: Option<Value>,
    ) {
        let mut payload = serde_json::Map::new();
        payload.insert("type".to_string(), Value::String(frame_type.to_string()));
        payload.insert("channel".to_string(), Value::String(channel.to_string()));
        if let Some(data) = data {
            payload.insert("data".to_string(), data);
        }
        self.send_json_safe(socket, Value::Object(payload)).await;
    }

    /// Compose the action reply frame: `{type: "action", channel: name,
    /// status: "completed"}`, augmented with `data` when the action
    /// returned a non-null value.
    pub(crate) async fn action_reply(&self, socket: &SocketHandle, name: &str, data: Option<Value>) {
        let mut payload = serde_json::Map::new();
        payload.insert("type".to_string(), Value::String("action".to_string()));
        payload.insert("channel".to_string(), Value::String(name.to_string()));
        payload.insert("status".to_string(), Value::String("completed".to_string()));
        if let Some(data) = data {
            payload.insert("data".to_string(), data);
        }
        self.send_json_safe(socket, Value::Object(payload)).await;
    }

    /// Compose `{type: "error", message}` and send it.
    pub(crate) async fn error(&self, socket: &SocketHandle, message: &str) {
        self.send_json_safe(
            socket,
            serde_json::json!({ "type": "error", "message": message }),
        )
        .await;
    }

    /// Attempt a JSON send; on any failure, evict the socket from every
    /// subscription. This is the sole mechanism by which dead sockets are
    /// reaped mid-broadcast (SPEC_FULL.md §4.4).
    pub(crate) async fn send_json_safe(&self, socket: &SocketHandle, obj: Value) {
        if socket.send_json(obj).is_err() {
            self.unsubscribe_all(socket).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{FnHandler, HandlerFuture};
    use crate::schema::ArgMap;
    use crate::socket::new_socket;

    fn echo_channel(name: &str, manager: &Arc<SubscriptionManager>, default_response: bool) -> Arc<ChannelHandler> {
        let inner = Arc::new(FnHandler::new(name, vec![], |_args: ArgMap| -> HandlerFuture {
            Box::pin(async move { Ok(serde_json::json!({"message": "Welcome"})) })
        }));
        Arc::new(ChannelHandler::new(name, inner, Arc::downgrade(manager), default_response))
    }

    #[tokio::test]
    async fn unknown_channel_subscribe_sends_not_found_and_touches_nothing() {
        let manager = SubscriptionManager::new();
        let (socket, mut rx) = new_socket();
        manager.subscribe("chat", &socket, serde_json::json!({})).await;

        assert_eq!(manager.subscriber_count("chat").await, 0);
        let frame = rx.try_recv().unwrap();
        match frame {
            crate::socket::Frame::Json(v) => {
                assert_eq!(v["message"], serde_json::json!("Channel 'chat' not found."));
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[tokio::test]
    async fn subscribe_then_disconnect_clears_subscription() {
        let manager = SubscriptionManager::new();
        let handler = echo_channel("chat", &manager, false);
        manager.create_channel("chat", handler).await.unwrap();

        let (socket, _rx) = new_socket();
        manager.subscribe("chat", &socket, serde_json::json!({})).await;
        assert_eq!(manager.subscriber_count("chat").await, 1);

        manager.unsubscribe_all(&socket).await;
        assert_eq!(manager.subscriber_count("chat").await, 0);
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let manager = SubscriptionManager::new();
        let handler = echo_channel("chat", &manager, false);
        manager.create_channel("chat", handler.clone()).await.unwrap();
        let err = manager.create_channel("chat", handler).await.unwrap_err();
        assert!(matches!(err, RegistrationError::DuplicateName(name, "channel") if name == "chat"));
    }

    #[tokio::test]
    async fn send_failure_evicts_socket() {
        let manager = SubscriptionManager::new();
        let handler = echo_channel("chat", &manager, false);
        manager.create_channel("chat", handler.clone()).await.unwrap();

        let (socket, rx) = new_socket();
        manager.subscribe("chat", &socket, serde_json::json!({})).await;
        assert_eq!(manager.subscriber_count("chat").await, 1);

        // Simulate a dead writer task.
        drop(rx);

        handler.invoke(ArgMap::new()).await.unwrap();
        assert_eq!(manager.subscriber_count("chat").await, 0);
    }
}
