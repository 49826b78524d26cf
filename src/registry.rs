//! `ChannelHandler`, `ActionHandler`, and the `Router`/`HandlerRef` late
//! binding machinery (SPEC_FULL.md §4.2, §4.3, §4.6).

use std::sync::{Arc, Mutex, Weak};

use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::HandlerError;
use crate::handler::Handler;
use crate::manager::SubscriptionManager;
use crate::schema::{ArgMap, Schema};
use crate::socket::SocketHandle;
use crate::validator::validate;

/// A named pub/sub topic: wraps a user function, the `defaultResponse`
/// flag, and a back-reference to the manager used for broadcasting.
pub struct ChannelHandler {
    name: String,
    inner: Arc<dyn Handler>,
    manager: Weak<SubscriptionManager>,
    default_response: bool,
}

impl ChannelHandler {
    pub(crate) fn new(
        name: impl Into<String>,
        inner: Arc<dyn Handler>,
        manager: Weak<SubscriptionManager>,
        default_response: bool,
    ) -> Self {
        Self {
            name: name.into(),
            inner,
            manager,
            default_response,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// User-facing broadcast trigger: run the wrapped function, then send
    /// its return value to every socket in a snapshot of the current
    /// subscriber set.
    ///
    /// New subscribers added during the broadcast are not included; a
    /// socket that fails to receive the frame is evicted from every
    /// subscription by the manager, not just this channel's.
    pub async fn invoke(&self, args: ArgMap) -> Result<Value, HandlerError> {
        let data = self.inner.call(args).await?;
        if let Some(manager) = self.manager.upgrade() {
            for socket in manager.snapshot(&self.name).await {
                manager.send(&socket, "data", &self.name, Some(data.clone())).await;
            }
        }
        Ok(data)
    }

    /// Called by the manager immediately after a successful subscribe.
    ///
    /// A validation failure here is surfaced as an action-style error to
    /// the subscribing socket; the socket remains subscribed either way.
    pub(crate) async fn send_initial_data(
        &self,
        manager: &SubscriptionManager,
        socket: &SocketHandle,
        payload: Value,
    ) {
        if !self.default_response {
            return;
        }
        match validate(self.inner.as_ref(), &payload, true).await {
            Ok(args) => match self.inner.call(args).await {
                Ok(data) => manager.send(socket, "data", &self.name, Some(data)).await,
                Err(e) => {
                    log::error!("channel '{}' initial send failed: {e}", self.name);
                }
            },
            Err(e) => {
                log::warn!("channel '{}' rejected subscribe payload: {}", self.name, e.reason);
                manager
                    .error(socket, &format!("Invalid parameters for action '{}'", self.name))
                    .await;
            }
        }
    }
}

impl std::fmt::Debug for ChannelHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelHandler")
            .field("name", &self.name)
            .field("default_response", &self.default_response)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl Handler for ChannelHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> &Schema {
        self.inner.schema()
    }

    async fn call(&self, args: ArgMap) -> Result<Value, HandlerError> {
        self.inner.call(args).await
    }
}

/// A named request/response procedure with no subscriber state.
pub struct ActionHandler {
    name: String,
    inner: Arc<dyn Handler>,
}

impl ActionHandler {
    pub(crate) fn new(name: impl Into<String>, inner: Arc<dyn Handler>) -> Self {
        Self {
            name: name.into(),
            inner,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Validate `payload`, call the user function, and reply to `socket`.
    ///
    /// The action handler's only observable output is this reply — it has
    /// no subscriber set of its own.
    pub(crate) async fn invoke(&self, manager: &SubscriptionManager, socket: &SocketHandle, payload: Value) {
        let args = match validate(self.inner.as_ref(), &payload, false).await {
            Ok(args) => args,
            Err(e) => {
                log::warn!("action '{}' rejected payload: {}", self.name, e.reason);
                manager
                    .error(socket, &format!("Invalid parameters for action '{}'", self.name))
                    .await;
                return;
            }
        };

        match self.inner.call(args).await {
            Ok(data) => {
                let data = if data.is_null() { None } else { Some(data) };
                manager.action_reply(socket, &self.name, data).await;
            }
            Err(e) => {
                // A user-function error is not a send error: no reply is
                // sent and the socket is not evicted (SPEC_FULL.md §7).
                log::error!("action '{}' handler failed: {e}", self.name);
            }
        }
    }
}

impl std::fmt::Debug for ActionHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionHandler").field("name", &self.name).finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl Handler for ActionHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> &Schema {
        self.inner.schema()
    }

    async fn call(&self, args: ArgMap) -> Result<Value, HandlerError> {
        self.inner.call(args).await
    }
}

/// The rebindable forwarder a `Router` hands back at decoration time
/// (SPEC_FULL.md §4.6, §9 "Router late binding").
///
/// Before the owning router is included in an application, calling it
/// invokes the bare user function directly. After inclusion, it is
/// indistinguishable from a directly-registered handler — in particular, a
/// channel reference broadcasts to subscribers.
enum RefTarget {
    Bare(Arc<dyn Handler>),
    Channel(Arc<ChannelHandler>),
    Action(Arc<ActionHandler>),
}

pub struct HandlerRef {
    target: RwLock<RefTarget>,
}

impl std::fmt::Debug for HandlerRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRef").finish_non_exhaustive()
    }
}

impl HandlerRef {
    fn bare(handler: Arc<dyn Handler>) -> Arc<Self> {
        Arc::new(Self {
            target: RwLock::new(RefTarget::Bare(handler)),
        })
    }

    /// Invoke whatever this reference currently points at.
    pub async fn call(&self, args: ArgMap) -> Result<Value, HandlerError> {
        match &*self.target.read().await {
            RefTarget::Bare(handler) => handler.call(args).await,
            RefTarget::Channel(handler) => handler.invoke(args).await,
            RefTarget::Action(handler) => handler.inner_call(args).await,
        }
    }

    pub(crate) async fn rebind_channel(&self, handler: Arc<ChannelHandler>) {
        *self.target.write().await = RefTarget::Channel(handler);
    }

    pub(crate) async fn rebind_action(&self, handler: Arc<ActionHandler>) {
        *self.target.write().await = RefTarget::Action(handler);
    }
}

impl ActionHandler {
    async fn inner_call(&self, args: ArgMap) -> Result<Value, HandlerError> {
        self.inner.call(args).await
    }
}

/// One entry collected by `Router::channel`/`Router::action` before the
/// router has been included in an application.
pub(crate) enum Registration {
    Channel {
        name: String,
        handler: Arc<dyn Handler>,
        default_response: bool,
        handler_ref: Arc<HandlerRef>,
    },
    Action {
        name: String,
        handler: Arc<dyn Handler>,
        handler_ref: Arc<HandlerRef>,
    },
}

/// A detached registration surface. Collects `{name, func, default_response}`
/// entries; becomes real handlers bound to an application's manager only
/// when `SocketApi::include_router` is called.
#[derive(Default)]
pub struct Router {
    registrations: Mutex<Vec<Registration>>,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router").finish_non_exhaustive()
    }
}

impl Router {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a channel on this router. Returns a `HandlerRef` that
    /// forwards to the bare function until the router is included.
    pub fn channel(
        &self,
        name: impl Into<String>,
        default_response: bool,
        handler: Arc<dyn Handler>,
    ) -> Arc<HandlerRef> {
        let handler_ref = HandlerRef::bare(handler.clone());
        self.registrations.lock().unwrap().push(Registration::Channel {
            name: name.into(),
            handler,
            default_response,
            handler_ref: handler_ref.clone(),
        });
        handler_ref
    }

    /// Declare an action on this router.
    pub fn action(&self, name: impl Into<String>, handler: Arc<dyn Handler>) -> Arc<HandlerRef> {
        let handler_ref = HandlerRef::bare(handler.clone());
        self.registrations.lock().unwrap().push(Registration::Action {
            name: name.into(),
            handler,
            handler_ref: handler_ref.clone(),
        });
        handler_ref
    }

    pub(crate) fn take_registrations(&self) -> Vec<Registration> {
        std::mem::take(&mut self.registrations.lock().unwrap())
    }
}
