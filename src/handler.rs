//! The `Handler` trait: a wrapped user function bound to a name and schema.
//!
//! `ChannelHandler` and `ActionHandler` (module `registry`) both wrap an
//! inner `Handler`; `Depends(D)` schema nodes (module `schema`) hold an
//! `Arc<dyn Handler>` directly, so a plain function handler, a channel, and
//! an action are all interchangeable dependency targets.

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

use crate::error::HandlerError;
use crate::schema::{ArgMap, Schema};

/// Boxed future returned by a handler's closure.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, HandlerError>> + Send>>;

/// A callable, named, schema-carrying unit of user logic.
///
/// This is the Rust stand-in for "introspect `H`'s parameters": rather than
/// reflecting over a function signature, a `Handler` carries its `Schema`
/// explicitly, built once at registration time.
#[async_trait::async_trait]
pub trait Handler: Send + Sync {
    /// The channel, action, or dependency function's declared name.
    fn name(&self) -> &str;

    /// The declared shape of this handler's parameters.
    fn schema(&self) -> &Schema;

    /// Invoke the wrapped user function with already-validated arguments.
    async fn call(&self, args: ArgMap) -> Result<Value, HandlerError>;
}

/// A `Handler` built from a plain closure plus an explicit `Schema`.
///
/// This is what a bare dependency function (one with no channel/action
/// registration of its own, e.g. `common` and `nested` in SPEC_FULL.md
/// §8 scenario 3) is wrapped in.
pub struct FnHandler<F> {
    name: String,
    schema: Schema,
    func: F,
}

impl<F> FnHandler<F>
where
    F: Fn(ArgMap) -> HandlerFuture + Send + Sync,
{
    pub fn new(name: impl Into<String>, schema: Schema, func: F) -> Self {
        Self {
            name: name.into(),
            schema,
            func,
        }
    }
}

impl<F> std::fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnHandler").field("name", &self.name).finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl<F> Handler for FnHandler<F>
where
    F: Fn(ArgMap) -> HandlerFuture + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn call(&self, args: ArgMap) -> Result<Value, HandlerError> {
        (self.func)(args).await
    }
}
