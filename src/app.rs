//! `SocketApi`: the application object that owns the manager and exposes
//! channel/action registration plus router inclusion (SPEC_FULL.md §4,
//! §4.6, §6).

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::dispatcher;
use crate::error::RegistrationError;
use crate::handler::Handler;
use crate::manager::SubscriptionManager;
use crate::registry::{ActionHandler, ChannelHandler, Registration, Router};
use crate::socket::SocketHandle;

/// Top-level application: one manager, plus the registration surface used
/// to build it up before the transport starts accepting connections.
#[derive(Clone, Debug)]
pub struct SocketApi {
    manager: Arc<SubscriptionManager>,
}

impl Default for SocketApi {
    fn default() -> Self {
        Self::new()
    }
}

impl SocketApi {
    #[must_use]
    pub fn new() -> Self {
        Self {
            manager: SubscriptionManager::new(),
        }
    }

    #[must_use]
    pub fn manager(&self) -> &Arc<SubscriptionManager> {
        &self.manager
    }

    /// Register a channel directly on this application.
    ///
    /// `default_response` controls whether a fresh subscriber is sent the
    /// handler's return value immediately after subscribing
    /// (SPEC_FULL.md §4.2).
    pub async fn channel(
        &self,
        name: impl Into<String>,
        default_response: bool,
        handler: Arc<dyn Handler>,
    ) -> Result<Arc<ChannelHandler>, RegistrationError> {
        let name = name.into();
        let channel_handler = Arc::new(ChannelHandler::new(
            name.clone(),
            handler,
            Arc::downgrade(&self.manager),
            default_response,
        ));
        self.manager.create_channel(&name, channel_handler.clone()).await?;
        Ok(channel_handler)
    }

    /// Register an action directly on this application.
    pub async fn action(
        &self,
        name: impl Into<String>,
        handler: Arc<dyn Handler>,
    ) -> Result<Arc<ActionHandler>, RegistrationError> {
        let name = name.into();
        let action_handler = Arc::new(ActionHandler::new(name.clone(), handler));
        self.manager.create_action(&name, action_handler.clone()).await?;
        Ok(action_handler)
    }

    /// Fold a detached `Router`'s registrations into this application,
    /// rebinding every `HandlerRef` it handed out so later calls through
    /// those references broadcast/reply exactly like a directly-registered
    /// handler (SPEC_FULL.md §9, "Router late binding").
    pub async fn include_router(&self, router: Router) -> Result<(), RegistrationError> {
        for registration in router.take_registrations() {
            match registration {
                Registration::Channel {
                    name,
                    handler,
                    default_response,
                    handler_ref,
                } => {
                    let channel_handler = self.channel(name, default_response, handler).await?;
                    handler_ref.rebind_channel(channel_handler).await;
                }
                Registration::Action {
                    name,
                    handler,
                    handler_ref,
                } => {
                    let action_handler = self.action(name, handler).await?;
                    handler_ref.rebind_action(action_handler).await;
                }
            }
        }
        Ok(())
    }

    /// Drive one connection to completion: dispatch every inbound frame
    /// until `inbound` closes, then evict the socket from every
    /// subscription.
    pub async fn serve_connection(&self, socket: SocketHandle, inbound: UnboundedReceiver<Value>) {
        dispatcher::run(self.manager.clone(), socket, inbound).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{FnHandler, HandlerFuture};
    use crate::schema::{ArgMap, Param};
    use crate::socket::{new_socket, Frame};

    fn handler(name: &str, schema: crate::schema::Schema, ret: Value) -> Arc<dyn Handler> {
        Arc::new(FnHandler::new(name, schema, move |_args: ArgMap| -> HandlerFuture {
            let ret = ret.clone();
            Box::pin(async move { Ok(ret) })
        }))
    }

    #[tokio::test]
    async fn subscribe_then_action_round_trip() {
        let app = SocketApi::new();
        app.channel(
            "chat",
            true,
            handler("chat", vec![], serde_json::json!({"message": "Welcome"})),
        )
        .await
        .unwrap();
        app.action(
            "simple_action",
            handler("simple_action", vec![Param::int("x")], serde_json::json!(null)),
        )
        .await
        .unwrap();

        let (socket, mut rx) = new_socket();
        app.manager()
            .subscribe("chat", &socket, serde_json::json!({}))
            .await;

        let subscribed = rx.try_recv().unwrap();
        assert!(matches!(subscribed, Frame::Json(v) if v["type"] == "subscribed"));
        let data = rx.try_recv().unwrap();
        assert!(matches!(data, Frame::Json(v) if v["data"]["message"] == "Welcome"));
    }

    #[tokio::test]
    async fn router_inclusion_rebinds_refs_to_broadcast() {
        let router = Router::new();
        let handler_ref = router.channel(
            "chat",
            false,
            handler("chat", vec![], serde_json::json!({"message": "hi"})),
        );

        let app = SocketApi::new();
        app.include_router(router).await.unwrap();

        let (socket, mut rx) = new_socket();
        app.manager()
            .subscribe("chat", &socket, serde_json::json!({}))
            .await;
        rx.try_recv().unwrap(); // subscribed ack

        handler_ref.call(ArgMap::new()).await.unwrap();
        let broadcast = rx.try_recv().unwrap();
        assert!(matches!(broadcast, Frame::Json(v) if v["data"]["message"] == "hi"));
    }
}
