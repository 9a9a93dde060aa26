//! Database verbs and their remote implementation.

use std::sync::Arc;

use mdstudio_core::{
    AsyncValue, ClaimKind, ClaimsContext, ConnectionType, Document, Error, Result, RpcSurface,
};
use serde_json::{Value, json};

use crate::cursor::CursorId;

/// The fixed verb set exposed by the database component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DbVerb {
    More,
    Rewind,
    Count,
    InsertOne,
    InsertMany,
    ReplaceOne,
    UpdateOne,
    UpdateMany,
    FindOne,
    FindMany,
    FindOneAndUpdate,
    FindOneAndReplace,
    FindOneAndDelete,
    Distinct,
    Aggregate,
    DeleteOne,
    DeleteMany,
    CreateIndexes,
    DropAllIndexes,
    DropIndexes,
}

impl DbVerb {
    /// Endpoint name of this verb.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::More => "more",
            Self::Rewind => "rewind",
            Self::Count => "count",
            Self::InsertOne => "insert_one",
            Self::InsertMany => "insert_many",
            Self::ReplaceOne => "replace_one",
            Self::UpdateOne => "update_one",
            Self::UpdateMany => "update_many",
            Self::FindOne => "find_one",
            Self::FindMany => "find_many",
            Self::FindOneAndUpdate => "find_one_and_update",
            Self::FindOneAndReplace => "find_one_and_replace",
            Self::FindOneAndDelete => "find_one_and_delete",
            Self::Distinct => "distinct",
            Self::Aggregate => "aggregate",
            Self::DeleteOne => "delete_one",
            Self::DeleteMany => "delete_many",
            Self::CreateIndexes => "create_indexes",
            Self::DropAllIndexes => "drop_all_indexes",
            Self::DropIndexes => "drop_indexes",
        }
    }

    /// Fully qualified procedure this verb is served on.
    #[must_use]
    pub fn procedure(self) -> String {
        format!("mdstudio.db.endpoint.{}", self.as_str())
    }
}

/// Anything that can execute database verbs.
///
/// Every verb answers with an envelope document; see [`extract`] and
/// [`transform`] for unwrapping it.
pub trait Database: Send + Sync {
    /// Execute `verb` with the given request document.
    fn execute(&self, verb: DbVerb, request: Document) -> AsyncValue<Document>;

    /// Fetch the next page of a cursor: `{cursorId?, alive, results}`.
    fn more(&self, cursor_id: &CursorId) -> AsyncValue<Document> {
        self.execute(DbVerb::More, json!({ "cursorId": cursor_id }))
    }

    /// Reset a cursor to its first page: `{cursorId, alive, results}`.
    fn rewind(&self, cursor_id: &CursorId) -> AsyncValue<Document> {
        self.execute(DbVerb::Rewind, json!({ "cursorId": cursor_id }))
    }

    /// Count the documents behind a cursor: `{total}`.
    fn count_cursor(&self, cursor_id: &CursorId, with_limit_and_skip: bool) -> AsyncValue<Document> {
        self.execute(
            DbVerb::Count,
            json!({ "cursorId": cursor_id, "withLimitAndSkip": with_limit_and_skip }),
        )
    }
}

impl<D: Database + ?Sized> Database for Arc<D> {
    fn execute(&self, verb: DbVerb, request: Document) -> AsyncValue<Document> {
        (**self).execute(verb, request)
    }
}

/// Database reached through the component bus.
pub struct RemoteDatabase<R> {
    rpc: R,
    context: ClaimsContext,
    connection_type: ConnectionType,
}

impl<R: RpcSurface> RemoteDatabase<R> {
    /// Create a database client acting as `context`.
    ///
    /// The connection type defaults to the context's own scope.
    #[must_use]
    pub fn new(rpc: R, context: ClaimsContext) -> Self {
        let connection_type = context.scope();
        Self {
            rpc,
            context,
            connection_type,
        }
    }

    /// Use a narrower connection type than the context's own scope.
    #[must_use]
    pub const fn with_connection_type(mut self, connection_type: ConnectionType) -> Self {
        self.connection_type = connection_type;
        self
    }

    /// Claims context used for every call.
    #[must_use]
    pub const fn context(&self) -> &ClaimsContext {
        &self.context
    }
}

impl<R: RpcSurface> Database for RemoteDatabase<R> {
    fn execute(&self, verb: DbVerb, request: Document) -> AsyncValue<Document> {
        let claims = match self.context.claims(ClaimKind::Db(self.connection_type)) {
            Ok(claims) => claims,
            Err(e) => return AsyncValue::failed(e),
        };
        tracing::debug!(verb = verb.as_str(), "Calling database endpoint");
        self.rpc.call(&verb.procedure(), request, claims)
    }
}

/// Unwrap a single field of a verb envelope.
pub fn extract(envelope: AsyncValue<Document>, key: &str) -> AsyncValue<Document> {
    envelope.get(key)
}

/// Convert an envelope with `f`, passing `null` through as `None`.
pub fn transform<T, F>(envelope: AsyncValue<Document>, f: F) -> AsyncValue<Option<T>>
where
    T: Send + 'static,
    F: FnOnce(Document) -> Result<T> + Send + 'static,
{
    envelope.try_map(|document| match document {
        Value::Null => Ok(None),
        document => f(document).map(Some),
    })
}

/// Deserialize an envelope into `T`, mapping decode failures to
/// [`Error::MalformedResponse`].
pub fn decode<T>(document: Document) -> Result<T>
where
    T: serde::de::DeserializeOwned,
{
    serde_json::from_value(document).map_err(|e| Error::MalformedResponse(e.to_string()))
}
