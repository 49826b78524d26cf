//! A WebSocket pub/sub and RPC framework: channels are server-pushed
//! topics with subscriber sets; actions are stateless request/response
//! procedures. Both are backed by signature-driven payload validation with
//! recursive dependency injection.
//!
//! See `SubscriptionManager` for the core fan-out/eviction semantics and
//! `SocketApi` for the application-facing registration surface.

pub mod app;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod manager;
pub mod registry;
pub mod schema;
pub mod socket;
pub mod transport;
pub mod validator;

pub use app::SocketApi;
pub use config::ServerConfig;
pub use error::{HandlerError, RegistrationError, ValidationError};
pub use handler::{FnHandler, Handler, HandlerFuture};
pub use registry::{ActionHandler, ChannelHandler, HandlerRef, Router};
pub use schema::{ArgMap, LeafType, Param, ParamKind, Schema};
pub use socket::{Frame, SendFailure, SocketHandle, SocketId};
pub use transport::Server;
