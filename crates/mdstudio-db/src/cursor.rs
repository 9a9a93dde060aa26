//! Lazy client-side cursor over server-paginated results.
//!
//! A [`Cursor`] holds the documents already fetched and the remote handle
//! needed to fetch more. Items are handed out strictly in order; when the local
//! buffer runs dry a single `more` request is issued and awaited before the
//! next item can be produced.

use std::{collections::VecDeque, fmt, future::Future, sync::Arc};

use futures::{StreamExt, stream::BoxStream};
use mdstudio_core::{AsyncValue, Document, Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::database::{Database, decode};

/// Opaque remote cursor handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CursorId(Value);

impl From<i64> for CursorId {
    fn from(id: i64) -> Self {
        Self(id.into())
    }
}

impl From<&str> for CursorId {
    fn from(id: &str) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for CursorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One page of results as returned by `find_many`, `more` and `rewind`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorPage {
    #[serde(default)]
    pub cursor_id: Option<CursorId>,
    #[serde(default)]
    pub alive: bool,
    #[serde(default)]
    pub results: Vec<Document>,
}

#[derive(Deserialize)]
struct CountResponse {
    total: u64,
}

/// Per-document normaliser applied as items leave the cursor.
pub type FieldTransform = Arc<dyn Fn(Document) -> Document + Send + Sync>;

/// Observable cursor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// Items are buffered or the remote side has more pages.
    Active,
    /// A `more` request is outstanding.
    Refreshing,
    /// Nothing buffered and the remote side is done.
    Exhausted,
}

/// Cursor over a remote result set.
pub struct Cursor {
    database: Arc<dyn Database>,
    id: CursorId,
    alive: bool,
    buffer: VecDeque<Document>,
    transform: Option<FieldTransform>,
    refill: Option<AsyncValue<Document>>,
}

impl Cursor {
    /// Create a cursor from its first page.
    #[must_use]
    pub fn new(database: Arc<dyn Database>, page: CursorPage) -> Self {
        Self {
            database,
            id: page.cursor_id.unwrap_or(CursorId(Value::Null)),
            alive: page.alive,
            buffer: page.results.into(),
            transform: None,
            refill: None,
        }
    }

    /// Create a cursor from a raw page document.
    ///
    /// # Errors
    /// Returns [`Error::MalformedResponse`] if the document is not a page.
    pub fn from_document(database: Arc<dyn Database>, document: Document) -> Result<Self> {
        Ok(Self::new(database, decode(document)?))
    }

    /// Apply `transform` to every document as it is handed out.
    #[must_use]
    pub fn with_field_transform(mut self, transform: FieldTransform) -> Self {
        self.transform = Some(transform);
        self
    }

    /// Replace the field transform; buffered documents pick up the new one.
    pub fn set_field_transform(&mut self, transform: Option<FieldTransform>) {
        self.transform = transform;
    }

    /// Current remote handle.
    #[must_use]
    pub const fn id(&self) -> &CursorId {
        &self.id
    }

    /// Whether the remote side reported more pages.
    #[must_use]
    pub const fn alive(&self) -> bool {
        self.alive
    }

    /// Number of documents available without a round trip.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Current state of the cursor.
    #[must_use]
    pub fn state(&self) -> CursorState {
        if self.refill.is_some() {
            CursorState::Refreshing
        } else if self.buffer.is_empty() && !self.alive {
            CursorState::Exhausted
        } else {
            CursorState::Active
        }
    }

    /// Produce the next document, fetching a new page when needed.
    ///
    /// Returns `Ok(None)` once the cursor is exhausted, and keeps doing so
    /// until [`rewind`](Self::rewind). A failed fetch leaves the cursor where
    /// it was so the call can be retried.
    ///
    /// # Errors
    /// Returns the failure of the `more` request.
    pub async fn next(&mut self) -> Result<Option<Document>> {
        loop {
            if let Some(document) = self.buffer.pop_front() {
                return Ok(Some(self.apply_transform(document)));
            }
            if !self.alive {
                return Ok(None);
            }

            // An interrupted call leaves its request here; resume it instead of
            // asking again.
            let refill = self
                .refill
                .get_or_insert_with(|| self.database.more(&self.id));
            let outcome = refill.await;
            self.refill = None;
            self.apply_page(outcome?)?;
        }
    }

    /// Produce the next document without waiting.
    ///
    /// # Errors
    /// Returns [`Error::CursorRefreshing`] if a page must be fetched first; the
    /// request stays in flight and later calls pick up its result.
    pub fn try_next(&mut self) -> Result<Option<Document>> {
        Ok(self.try_next_raw()?.map(|document| self.apply_transform(document)))
    }

    /// Drain the cursor without waiting.
    ///
    /// # Errors
    /// Returns [`Error::CursorRefreshing`] if a page must be fetched first. No
    /// documents are consumed in that case.
    pub fn try_to_list(&mut self) -> Result<Vec<Document>> {
        let mut raw = Vec::new();
        loop {
            match self.try_next_raw() {
                Ok(Some(document)) => raw.push(document),
                Ok(None) => break,
                Err(e) => {
                    for document in raw.into_iter().rev() {
                        self.buffer.push_front(document);
                    }
                    return Err(e);
                }
            }
        }
        Ok(raw
            .into_iter()
            .map(|document| self.apply_transform(document))
            .collect())
    }

    /// Drain the remaining documents in order.
    ///
    /// # Errors
    /// Returns the first failed fetch.
    pub async fn to_list(&mut self) -> Result<Vec<Document>> {
        let mut documents = Vec::with_capacity(self.buffer.len());
        while let Some(document) = self.next().await? {
            documents.push(document);
        }
        Ok(documents)
    }

    /// Call `f` on every remaining document in order.
    ///
    /// # Errors
    /// Returns the first failed fetch.
    pub async fn for_each<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(Document),
    {
        while let Some(document) = self.next().await? {
            f(document);
        }
        Ok(())
    }

    /// Await `f` on every remaining document in order.
    ///
    /// The next page is not requested before `f` finishes with the current
    /// document.
    ///
    /// # Errors
    /// Returns the first failed fetch.
    pub async fn for_each_async<F, Fut>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(Document) -> Fut,
        Fut: Future<Output = ()>,
    {
        while let Some(document) = self.next().await? {
            f(document).await;
        }
        Ok(())
    }

    /// Start a local query over the remaining documents.
    pub fn query(&mut self) -> Query<'_, Document> {
        Query {
            cursor: self,
            pipeline: Box::new(Some),
        }
    }

    /// Ask the remote side how many documents this cursor covers.
    ///
    /// The returned value does not borrow the cursor, so it can be awaited or
    /// spawned independently. It fails with the failure of the `count` request.
    pub fn count(&self, with_limit_and_skip: bool) -> AsyncValue<u64> {
        self.database
            .count_cursor(&self.id, with_limit_and_skip)
            .try_map(|response| Ok(decode::<CountResponse>(response)?.total))
    }

    /// Number of documents after skip and limit are applied.
    pub fn len(&self) -> AsyncValue<u64> {
        self.count(true)
    }

    /// Restart from the first page.
    ///
    /// An outstanding `more` request is awaited and its result discarded
    /// first, so the remote side never sees overlapping requests.
    ///
    /// # Errors
    /// Returns the failure of the `rewind` request.
    pub async fn rewind(&mut self) -> Result<&mut Self> {
        if let Some(pending) = self.refill.take() {
            if let Err(e) = pending.await {
                tracing::debug!(cursor = %self.id, "Discarding failed refill before rewind: {e}");
            }
        }

        let page: CursorPage = decode(self.database.rewind(&self.id).await?)?;
        if let Some(id) = page.cursor_id {
            self.id = id;
        }
        self.alive = page.alive;
        self.buffer = page.results.into();
        Ok(self)
    }

    /// Turn the cursor into a stream of documents.
    #[must_use]
    pub fn into_stream(self) -> BoxStream<'static, Result<Document>> {
        futures::stream::unfold(self, |mut cursor| async move {
            match cursor.next().await {
                Ok(Some(document)) => Some((Ok(document), cursor)),
                Ok(None) => None,
                Err(e) => Some((Err(e), cursor)),
            }
        })
        .boxed()
    }

    fn try_next_raw(&mut self) -> Result<Option<Document>> {
        loop {
            if let Some(document) = self.buffer.pop_front() {
                return Ok(Some(document));
            }
            if !self.alive {
                return Ok(None);
            }

            let refill = self
                .refill
                .take()
                .unwrap_or_else(|| self.database.more(&self.id));
            match refill.try_now() {
                Ok(outcome) => self.apply_page(outcome?)?,
                Err(pending) => {
                    self.refill = Some(pending);
                    return Err(Error::CursorRefreshing);
                }
            }
        }
    }

    fn apply_page(&mut self, document: Document) -> Result<()> {
        let page: CursorPage = decode(document)?;
        if let Some(id) = page.cursor_id {
            self.id = id;
        }
        self.alive = page.alive;
        tracing::debug!(
            cursor = %self.id,
            alive = self.alive,
            fetched = page.results.len(),
            "Refilled cursor"
        );
        self.buffer.extend(page.results);
        Ok(())
    }

    fn apply_transform(&self, document: Document) -> Document {
        match &self.transform {
            Some(transform) => transform(document),
            None => document,
        }
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("id", &self.id)
            .field("alive", &self.alive)
            .field("buffered", &self.buffer.len())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Local transformation over the documents a cursor produces.
///
/// Nothing is evaluated until [`to_list`](Self::to_list) or
/// [`first`](Self::first) drives the cursor.
pub struct Query<'c, T> {
    cursor: &'c mut Cursor,
    pipeline: Box<dyn FnMut(Document) -> Option<T> + Send + 'c>,
}

impl<'c, T: 'c> Query<'c, T> {
    /// Map every produced item.
    pub fn select<U, F>(self, mut f: F) -> Query<'c, U>
    where
        F: FnMut(T) -> U + Send + 'c,
    {
        let mut previous = self.pipeline;
        Query {
            cursor: self.cursor,
            pipeline: Box::new(move |document| previous(document).map(&mut f)),
        }
    }

    /// Keep only items matching `predicate`.
    #[must_use]
    pub fn filter<P>(self, mut predicate: P) -> Self
    where
        P: FnMut(&T) -> bool + Send + 'c,
    {
        let mut previous = self.pipeline;
        Self {
            cursor: self.cursor,
            pipeline: Box::new(move |document| previous(document).filter(|item| predicate(item))),
        }
    }

    /// Realise the query.
    ///
    /// # Errors
    /// Returns the first failed fetch.
    pub async fn to_list(mut self) -> Result<Vec<T>> {
        let mut items = Vec::new();
        while let Some(document) = self.cursor.next().await? {
            if let Some(item) = (self.pipeline)(document) {
                items.push(item);
            }
        }
        Ok(items)
    }

    /// First item of the query, consuming documents only up to it.
    ///
    /// # Errors
    /// Returns the first failed fetch.
    pub async fn first(mut self) -> Result<Option<T>> {
        while let Some(document) = self.cursor.next().await? {
            if let Some(item) = (self.pipeline)(document) {
                return Ok(Some(item));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use futures::TryStreamExt;
    use serde_json::json;
    use tokio_test::{assert_pending, task};

    use super::*;
    use crate::{database::DbVerb, testing::ScriptedDatabase};

    fn values() -> Vec<Document> {
        vec![json!({ "test": 5 }), json!({ "test2": 2 })]
    }

    fn first_page() -> Document {
        json!({ "cursorId": 1234, "alive": true, "results": values() })
    }

    fn cursor(db: &Arc<ScriptedDatabase>) -> Cursor {
        Cursor::from_document(Arc::clone(db) as Arc<dyn Database>, first_page()).unwrap()
    }

    #[test]
    fn test_construction() {
        let db = Arc::new(ScriptedDatabase::default());
        let cursor = cursor(&db);
        assert_eq!(cursor.id(), &CursorId::from(1234));
        assert!(cursor.alive());
        assert_eq!(cursor.buffered(), 2);
        assert_eq!(cursor.state(), CursorState::Active);
    }

    #[test]
    fn test_malformed_page() {
        let db: Arc<dyn Database> = Arc::new(ScriptedDatabase::default());
        let err = Cursor::from_document(db, json!({ "alive": "yes" })).unwrap_err();
        assert!(matches!(err, Error::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_next_walks_pages_in_order() {
        let db = Arc::new(ScriptedDatabase::default());
        db.push(DbVerb::More, json!({ "cursorId": 1234, "alive": true, "results": [] }));
        db.push(DbVerb::More, json!({ "alive": false, "results": [{ "test3": 6 }] }));

        let mut cursor = cursor(&db);
        assert_eq!(cursor.next().await.unwrap(), Some(json!({ "test": 5 })));
        assert_eq!(cursor.next().await.unwrap(), Some(json!({ "test2": 2 })));
        assert_eq!(cursor.next().await.unwrap(), Some(json!({ "test3": 6 })));
        assert_eq!(cursor.next().await.unwrap(), None);
        assert_eq!(cursor.next().await.unwrap(), None);
        assert_eq!(cursor.state(), CursorState::Exhausted);
        assert_eq!(db.calls(DbVerb::More).len(), 2);
    }

    #[tokio::test]
    async fn test_to_list() {
        let db = Arc::new(ScriptedDatabase::default());
        db.push(DbVerb::More, json!({ "cursorId": 1234, "alive": false, "results": [{ "test6": 2 }] }));

        let mut expected = values();
        expected.push(json!({ "test6": 2 }));
        assert_eq!(cursor(&db).to_list().await.unwrap(), expected);
    }

    #[test]
    fn test_list_while_refreshing() {
        let db = Arc::new(ScriptedDatabase::default());
        let (resolver, pending) = AsyncValue::pending();
        db.push_value(DbVerb::More, pending);

        let mut cursor = cursor(&db);
        assert!(matches!(cursor.try_to_list(), Err(Error::CursorRefreshing)));
        assert_eq!(cursor.state(), CursorState::Refreshing);
        assert_eq!(cursor.buffered(), 2);

        // Still refreshing; the same request is reused.
        assert!(matches!(cursor.try_to_list(), Err(Error::CursorRefreshing)));
        assert_eq!(db.calls(DbVerb::More).len(), 1);

        resolver
            .resolve(json!({ "alive": false, "results": [{ "test3": 6 }] }))
            .unwrap();
        let all = cursor.try_to_list().unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[2], json!({ "test3": 6 }));
        assert_eq!(cursor.state(), CursorState::Exhausted);
    }

    #[test]
    fn test_interrupted_next_resumes_refill() {
        let db = Arc::new(ScriptedDatabase::default());
        let (resolver, pending) = AsyncValue::pending();
        db.push_value(DbVerb::More, pending);

        let mut cursor = Cursor::from_document(
            Arc::clone(&db) as Arc<dyn Database>,
            json!({ "cursorId": 1, "alive": true, "results": [] }),
        )
        .unwrap();

        {
            let mut next = task::spawn(cursor.next());
            assert_pending!(next.poll());
        }
        assert_eq!(cursor.state(), CursorState::Refreshing);

        resolver
            .resolve(json!({ "alive": false, "results": [{ "a": 1 }] }))
            .unwrap();
        let mut next = task::spawn(cursor.next());
        match next.poll() {
            std::task::Poll::Ready(Ok(Some(document))) => assert_eq!(document, json!({ "a": 1 })),
            other => panic!("unexpected poll result: {other:?}"),
        }
        drop(next);
        assert_eq!(db.calls(DbVerb::More).len(), 1);
    }

    #[tokio::test]
    async fn test_new_cursor_id_is_used() {
        let db = Arc::new(ScriptedDatabase::default());
        db.push(DbVerb::More, json!({ "cursorId": 1244, "alive": true, "results": [{ "test3": 8 }] }));
        db.push(DbVerb::More, json!({ "cursorId": 1234, "alive": false, "results": [{ "test6": 2 }] }));
        db.push(DbVerb::Count, json!({ "total": 4 }));

        let mut cursor = cursor(&db);
        cursor.next().await.unwrap();
        cursor.next().await.unwrap();
        assert_eq!(cursor.next().await.unwrap(), Some(json!({ "test3": 8 })));
        assert_eq!(cursor.id(), &CursorId::from(1244));
        assert_eq!(cursor.next().await.unwrap(), Some(json!({ "test6": 2 })));

        let more = db.calls(DbVerb::More);
        assert_eq!(more[0], json!({ "cursorId": 1234 }));
        assert_eq!(more[1], json!({ "cursorId": 1244 }));

        assert_eq!(cursor.count(false).await.unwrap(), 4);
        assert_eq!(
            db.calls(DbVerb::Count)[0],
            json!({ "cursorId": 1234, "withLimitAndSkip": false })
        );
    }

    #[tokio::test]
    async fn test_failed_refill_keeps_position() {
        let db = Arc::new(ScriptedDatabase::default());
        db.push_value(DbVerb::More, AsyncValue::failed(Error::Timeout("more".into())));
        db.push(DbVerb::More, json!({ "alive": false, "results": [{ "test3": 6 }] }));

        let mut cursor = cursor(&db);
        cursor.next().await.unwrap();
        cursor.next().await.unwrap();
        assert!(matches!(cursor.next().await, Err(Error::Timeout(_))));
        assert_eq!(cursor.state(), CursorState::Active);
        assert_eq!(cursor.next().await.unwrap(), Some(json!({ "test3": 6 })));
    }

    #[tokio::test]
    async fn test_for_each() {
        let db = Arc::new(ScriptedDatabase::default());
        db.push(DbVerb::More, json!({ "cursorId": 1234, "alive": false, "results": [] }));

        let mut hist = std::collections::HashMap::new();
        cursor(&db)
            .for_each(|document| {
                for (k, v) in document.as_object().unwrap() {
                    *hist.entry(k.clone()).or_insert(0) += v.as_i64().unwrap();
                }
            })
            .await
            .unwrap();
        assert_eq!(hist["test"], 5);
        assert_eq!(hist["test2"], 2);
    }

    #[tokio::test]
    async fn test_for_each_async_fetches_after_callback() {
        let db = Arc::new(ScriptedDatabase::default());
        db.push(DbVerb::More, json!({ "alive": false, "results": [{ "test3": 6 }] }));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let db_view = Arc::clone(&db);
        let mut cursor = cursor(&db);
        cursor
            .for_each_async(|document| {
                let seen = Arc::clone(&seen);
                let fetched = db_view.calls(DbVerb::More).len();
                async move {
                    tokio::task::yield_now().await;
                    seen.lock().unwrap().push((document, fetched));
                }
            })
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        // No page was requested while the buffered documents were processed.
        assert_eq!(seen[0].1, 0);
        assert_eq!(seen[1].1, 0);
        assert_eq!(seen[2].1, 1);
    }

    #[tokio::test]
    async fn test_query_select() {
        let db = Arc::new(ScriptedDatabase::default());
        db.push(DbVerb::More, json!({ "cursorId": 1234, "alive": false, "results": [] }));

        let mut cursor = cursor(&db);
        let results = cursor
            .query()
            .select(|document| document.get("test").is_some())
            .to_list()
            .await
            .unwrap();
        assert_eq!(results, vec![true, false]);
    }

    #[tokio::test]
    async fn test_query_filter_and_first() {
        let db = Arc::new(ScriptedDatabase::default());
        let mut cursor = cursor(&db);
        let first = cursor
            .query()
            .filter(|document| document.get("test2").is_some())
            .select(|document| document["test2"].as_i64())
            .first()
            .await
            .unwrap();
        assert_eq!(first, Some(Some(2)));
        assert!(db.calls(DbVerb::More).is_empty());
    }

    #[tokio::test]
    async fn test_count_and_len() {
        let db = Arc::new(ScriptedDatabase::default());
        db.push(DbVerb::Count, json!({ "total": 2 }));
        db.push(DbVerb::Count, json!({ "total": 2 }));

        let cursor = cursor(&db);
        assert_eq!(cursor.count(true).await.unwrap(), 2);
        assert_eq!(cursor.len().await.unwrap(), 2);
        for call in db.calls(DbVerb::Count) {
            assert_eq!(call, json!({ "cursorId": 1234, "withLimitAndSkip": true }));
        }
    }

    #[tokio::test]
    async fn test_cursor_work_can_be_spawned() {
        let db = Arc::new(ScriptedDatabase::default());
        db.push(DbVerb::Count, json!({ "total": 3 }));
        db.push(DbVerb::Count, json!({ "total": 3 }));
        db.push(DbVerb::More, json!({ "alive": false, "results": [{ "test3": 6 }] }));

        let mut cursor = cursor(&db);
        assert_eq!(tokio::spawn(cursor.len()).await.unwrap().unwrap(), 3);

        let handle = tokio::spawn(async move {
            let total = cursor.len().await?;
            let documents = cursor.to_list().await?;
            Ok::<_, Error>((total, documents.len()))
        });
        assert_eq!(handle.await.unwrap().unwrap(), (3, 3));
    }

    #[tokio::test]
    async fn test_rewind_restarts_sequence() {
        let db = Arc::new(ScriptedDatabase::default());
        db.push(DbVerb::More, json!({ "alive": false, "results": [{ "test3": 6 }] }));
        db.push(DbVerb::Rewind, first_page());

        let mut cursor = cursor(&db);
        let original = cursor.to_list().await.unwrap();
        assert_eq!(cursor.state(), CursorState::Exhausted);

        db.push(DbVerb::More, json!({ "alive": false, "results": [{ "test3": 6 }] }));
        let rewound = cursor.rewind().await.unwrap();
        assert_eq!(rewound.state(), CursorState::Active);
        assert_eq!(rewound.to_list().await.unwrap(), original);
    }

    #[tokio::test]
    async fn test_field_transform_applied_on_pop() {
        let db = Arc::new(ScriptedDatabase::default());
        let mut cursor = cursor(&db).with_field_transform(Arc::new(|mut document: Document| {
            document["seen"] = json!(true);
            document
        }));

        assert_eq!(
            cursor.next().await.unwrap(),
            Some(json!({ "test": 5, "seen": true }))
        );

        cursor.set_field_transform(None);
        assert_eq!(cursor.next().await.unwrap(), Some(json!({ "test2": 2 })));
    }

    #[tokio::test]
    async fn test_into_stream() {
        let db = Arc::new(ScriptedDatabase::default());
        db.push(DbVerb::More, json!({ "alive": false, "results": [{ "test3": 6 }] }));

        let documents: Vec<Document> = cursor(&db).into_stream().try_collect().await.unwrap();
        assert_eq!(documents.len(), 3);
    }
}
