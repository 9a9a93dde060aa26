//! Core traits for talking to the component bus.

use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use crate::{AsyncValue, context::Claims};

/// Session identifier.
pub type SessionId = Uuid;

/// A JSON document exchanged with remote procedures.
pub type Document = Value;

/// Call side of the message bus.
///
/// Implementations own the transport; timeouts and disconnects must be
/// reported through the returned value as [`Error::Timeout`],
/// [`Error::TransportLost`], [`Error::CallException`] or
/// [`Error::Application`](crate::Error::Application).
///
/// [`Error::Timeout`]: crate::Error::Timeout
/// [`Error::TransportLost`]: crate::Error::TransportLost
/// [`Error::CallException`]: crate::Error::CallException
pub trait RpcSurface: Send + Sync {
    /// Call a remote procedure.
    fn call(&self, procedure: &str, args: Document, claims: Claims) -> AsyncValue<Document>;
}

impl<R: RpcSurface + ?Sized> RpcSurface for Arc<R> {
    fn call(&self, procedure: &str, args: Document, claims: Claims) -> AsyncValue<Document> {
        (**self).call(procedure, args, claims)
    }
}
