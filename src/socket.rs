//! The opaque connection handle the core references sockets through.
//!
//! SPEC_FULL.md §3 calls for a handle the core only touches by identity and
//! through `sendJson`/`close`. `SocketHandle` is that handle: a cheap,
//! `Clone + Eq + Hash` reference into an `mpsc` channel feeding a writer
//! task owned by the transport (or, in tests, a plain receiver the test
//! reads from directly). Sending never blocks and never holds any manager
//! lock — exactly the property SPEC_FULL.md §5 requires ("no lock is held
//! across user-function invocation" extends naturally to transport I/O).

use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Opaque per-connection identity.
pub type SocketId = u64;

/// One outbound frame queued for a socket's writer task.
#[derive(Debug, Clone)]
pub enum Frame {
    /// A JSON object to serialize and write to the wire.
    Json(Value),
    /// Close the connection.
    Close,
}

/// Failure sending to a socket — its writer task is gone (disconnected, or
/// the connection otherwise died). The manager's sole response to this is
/// `unsubscribe_all` (SPEC_FULL.md §4.4, `sendJsonSafe`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendFailure;

/// A cloneable handle to one connected socket.
///
/// Identity (`Eq`/`Hash`) is by `id` alone, so a `SocketHandle` can be used
/// directly as a `HashSet`/`HashMap` key for subscription sets even though
/// the underlying `UnboundedSender` is not itself comparable.
#[derive(Debug, Clone)]
pub struct SocketHandle {
    id: SocketId,
    outbound: UnboundedSender<Frame>,
}

impl SocketHandle {
    /// This socket's opaque identity.
    #[must_use]
    pub fn id(&self) -> SocketId {
        self.id
    }

    /// Queue a JSON frame for delivery.
    ///
    /// # Errors
    ///
    /// Returns `SendFailure` if the writer task has already gone away.
    pub fn send_json(&self, value: Value) -> Result<(), SendFailure> {
        self.outbound.send(Frame::Json(value)).map_err(|_| SendFailure)
    }

    /// Request the connection be closed.
    pub fn close(&self) {
        let _ = self.outbound.send(Frame::Close);
    }
}

impl PartialEq for SocketHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SocketHandle {}

impl Hash for SocketHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Allocate a fresh socket identity and its paired writer-side channel.
///
/// The transport (or a test) owns the returned `UnboundedReceiver` and is
/// responsible for actually writing frames to the wire (or to an in-memory
/// buffer).
#[must_use]
pub fn new_socket() -> (SocketHandle, UnboundedReceiver<Frame>) {
    static NEXT_ID: AtomicU64 = AtomicU64::new(1);
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    let (tx, rx) = mpsc::unbounded_channel();
    (SocketHandle { id, outbound: tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_with_same_id_are_equal() {
        let (handle, _rx) = new_socket();
        let cloned = handle.clone();
        assert_eq!(handle, cloned);
        assert_eq!(handle.id(), cloned.id());
    }

    #[test]
    fn distinct_sockets_get_distinct_ids() {
        let (a, _) = new_socket();
        let (b, _) = new_socket();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn send_after_receiver_dropped_fails() {
        let (handle, rx) = new_socket();
        drop(rx);
        assert_eq!(handle.send_json(serde_json::json!({})), Err(SendFailure));
    }
}
