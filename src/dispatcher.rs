//! Per-connection message loop: envelope validation and routing to the
//! subscription manager (SPEC_FULL.md §4.5, §6).

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::manager::SubscriptionManager;
use crate::schema::empty_payload;
use crate::socket::SocketHandle;

/// Validate one inbound envelope and dispatch it to the manager.
///
/// `type` and `channel` are the only envelope fields every message needs;
/// `data` defaults to an empty object when absent.
pub async fn dispatch_message(manager: &SubscriptionManager, socket: &SocketHandle, message: &Value) {
    let msg_type = match message.get("type").and_then(Value::as_str) {
        Some(t) => t,
        None => {
            manager.error(socket, "Message type is required.").await;
            return;
        }
    };
    let channel = match message.get("channel").and_then(Value::as_str) {
        Some(c) => c,
        None => {
            manager.error(socket, "Channel is required.").await;
            return;
        }
    };
    let data = message.get("data").cloned().unwrap_or_else(empty_payload);

    match msg_type {
        "subscribe" => manager.subscribe(channel, socket, data).await,
        "unsubscribe" => manager.unsubscribe(channel, socket).await,
        "action" => manager.action(channel, socket, data).await,
        other => {
            manager.error(socket, &format!("Unknown message type: {other}.")).await;
        }
    }
}

/// Drive one connection: read inbound frames until the channel closes, then
/// evict the socket from every subscription (SPEC_FULL.md §6, "on
/// disconnect, `unsubscribeAll` is called unconditionally").
pub async fn run(manager: Arc<SubscriptionManager>, socket: SocketHandle, mut inbound: UnboundedReceiver<Value>) {
    while let Some(message) = inbound.recv().await {
        dispatch_message(&manager, &socket, &message).await;
    }
    manager.unsubscribe_all(&socket).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{FnHandler, HandlerFuture};
    use crate::schema::ArgMap;
    use crate::socket::{new_socket, Frame};

    async fn manager_with_chat() -> Arc<SubscriptionManager> {
        let manager = SubscriptionManager::new();
        let inner = Arc::new(FnHandler::new("chat", vec![], |_args: ArgMap| -> HandlerFuture {
            Box::pin(async move { Ok(serde_json::json!({"message": "Welcome"})) })
        }));
        let handler = Arc::new(crate::registry::ChannelHandler::new(
            "chat",
            inner,
            Arc::downgrade(&manager),
            true,
        ));
        manager.create_channel("chat", handler).await.unwrap();
        manager
    }

    #[tokio::test]
    async fn missing_type_yields_envelope_error() {
        let manager = SubscriptionManager::new();
        let (socket, mut rx) = new_socket();
        dispatch_message(&manager, &socket, &serde_json::json!({"channel": "chat"})).await;
        let frame = rx.try_recv().unwrap();
        assert!(matches!(frame, Frame::Json(v) if v["message"] == "Message type is required."));
    }

    #[tokio::test]
    async fn missing_channel_yields_envelope_error() {
        let manager = SubscriptionManager::new();
        let (socket, mut rx) = new_socket();
        dispatch_message(&manager, &socket, &serde_json::json!({"type": "subscribe"})).await;
        let frame = rx.try_recv().unwrap();
        assert!(matches!(frame, Frame::Json(v) if v["message"] == "Channel is required."));
    }

    #[tokio::test]
    async fn unknown_type_yields_envelope_error() {
        let manager = SubscriptionManager::new();
        let (socket, mut rx) = new_socket();
        dispatch_message(&manager, &socket, &serde_json::json!({"type": "frobnicate", "channel": "chat"})).await;
        let frame = rx.try_recv().unwrap();
        assert!(matches!(frame, Frame::Json(v) if v["message"] == "Unknown message type: frobnicate."));
    }

    #[tokio::test]
    async fn disconnect_evicts_socket_from_all_subscriptions() {
        let manager = manager_with_chat().await;
        let (socket, rx) = new_socket();
        let (tx, inbound) = tokio::sync::mpsc::unbounded_channel();
        tx.send(serde_json::json!({"type": "subscribe", "channel": "chat"})).unwrap();
        drop(tx);

        run(manager.clone(), socket, inbound).await;
        drop(rx);
        assert_eq!(manager.subscriber_count("chat").await, 0);
    }
}
