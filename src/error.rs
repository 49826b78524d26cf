//! Typed errors for the core dispatcher/manager/validator/registry.
//!
//! Library-internal code returns these typed variants; the example binary
//! (and any embedder) collapses them into `anyhow::Error` at its boundary.

use thiserror::Error;

/// Raised when two handlers try to claim the same name.
///
/// Registration only happens during application setup, before the
/// transport starts accepting connections — there is no runtime path that
/// can produce this error.
#[derive(Debug, Error)]
pub enum RegistrationError {
    /// A channel or action with this name is already registered.
    #[error("'{0}' is already registered as a {1}")]
    DuplicateName(String, &'static str),
}

/// Raised by the validator when a payload does not satisfy a handler's
/// declared schema.
#[derive(Debug, Error)]
#[error("Invalid parameters for action '{handler}'")]
pub struct ValidationError {
    /// Name of the handler whose schema rejected the payload.
    pub handler: String,
    /// Internal diagnostic detail — never sent over the wire, only logged.
    pub reason: String,
}

impl ValidationError {
    pub(crate) fn new(handler: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            handler: handler.into(),
            reason: reason.into(),
        }
    }
}

/// Error returned by a user-supplied handler closure.
///
/// Boxed as `anyhow::Error` so user code can return any error type. Never
/// serialized to the socket — logged via `log::error!` and the dispatcher
/// continues (see SPEC_FULL.md §7, "User-function error").
pub type HandlerError = anyhow::Error;
