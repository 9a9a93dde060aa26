//! Collection-bound access to the database verbs.

use std::sync::Arc;

use mdstudio_core::{AsyncValue, Document, Error};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Value, json};

use crate::{
    cursor::{Cursor, FieldTransform},
    database::{Database, DbVerb, decode, extract, transform},
};

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortMode {
    Asc,
    Desc,
}

impl Serialize for SortMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i8(match self {
            Self::Asc => 1,
            Self::Desc => -1,
        })
    }
}

/// Index definition for `create_indexes` / `drop_indexes`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Index {
    pub keys: Vec<(String, SortMode)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub unique: bool,
}

/// Options shared by the find verbs.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FindOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projection: Option<Document>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<Vec<(String, SortMode)>>,
}

/// Outcome of an update or replace.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResponse {
    pub matched: u64,
    pub modified: u64,
    #[serde(default)]
    pub upserted_id: Option<String>,
}

/// Outcome of a replace; same envelope as an update.
pub type ReplaceResponse = UpdateResponse;

/// A collection on a database, optionally with a field transform applied to
/// every document read from it.
#[derive(Clone)]
pub struct Model {
    database: Arc<dyn Database>,
    collection: String,
    transform: Option<FieldTransform>,
}

impl Model {
    /// Bind `collection` on `database`.
    #[must_use]
    pub fn new(database: Arc<dyn Database>, collection: impl Into<String>) -> Self {
        Self {
            database,
            collection: collection.into(),
            transform: None,
        }
    }

    /// Normalise every document read through this model.
    #[must_use]
    pub fn with_field_transform(mut self, transform: FieldTransform) -> Self {
        self.transform = Some(transform);
        self
    }

    /// Name of the bound collection.
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Insert one document; resolves to its id.
    pub fn insert_one(&self, insert: Document) -> AsyncValue<Document> {
        extract(self.call(DbVerb::InsertOne, json!({ "insert": insert })), "id")
    }

    /// Insert many documents; resolves to their ids.
    pub fn insert_many(&self, insert: Vec<Document>) -> AsyncValue<Document> {
        extract(self.call(DbVerb::InsertMany, json!({ "insert": insert })), "ids")
    }

    /// Replace the first document matching `filter`.
    pub fn replace_one(
        &self,
        filter: Document,
        replacement: Document,
        upsert: bool,
    ) -> AsyncValue<ReplaceResponse> {
        self.call(
            DbVerb::ReplaceOne,
            json!({ "filter": filter, "replacement": replacement, "upsert": upsert }),
        )
        .try_map(decode)
    }

    /// Count the documents matching `filter`.
    pub fn count(&self, filter: Option<Document>, skip: Option<u64>, limit: Option<u64>) -> AsyncValue<u64> {
        self.call(
            DbVerb::Count,
            json!({ "filter": filter, "skip": skip, "limit": limit }),
        )
        .get("total")
        .try_map(decode)
    }

    /// Update the first document matching `filter`.
    pub fn update_one(&self, filter: Document, update: Document, upsert: bool) -> AsyncValue<UpdateResponse> {
        self.call(
            DbVerb::UpdateOne,
            json!({ "filter": filter, "update": update, "upsert": upsert }),
        )
        .try_map(decode)
    }

    /// Update every document matching `filter`.
    pub fn update_many(&self, filter: Document, update: Document, upsert: bool) -> AsyncValue<UpdateResponse> {
        self.call(
            DbVerb::UpdateMany,
            json!({ "filter": filter, "update": update, "upsert": upsert }),
        )
        .try_map(decode)
    }

    /// First document matching `filter`, if any.
    pub fn find_one(&self, filter: Document, options: &FindOptions) -> AsyncValue<Option<Document>> {
        let request = with_options(json!({ "filter": filter }), options);
        self.single_result(self.call(DbVerb::FindOne, request))
    }

    /// Cursor over every document matching `filter`.
    pub fn find_many(&self, filter: Document, options: &FindOptions) -> AsyncValue<Cursor> {
        let request = with_options(json!({ "filter": filter }), options);
        self.make_cursor(self.call(DbVerb::FindMany, request))
    }

    /// Update the first match and return it (before or after the update).
    pub fn find_one_and_update(
        &self,
        filter: Document,
        update: Document,
        upsert: bool,
        return_updated: bool,
        options: &FindOptions,
    ) -> AsyncValue<Option<Document>> {
        let request = with_options(
            json!({
                "filter": filter,
                "update": update,
                "upsert": upsert,
                "returnUpdated": return_updated,
            }),
            options,
        );
        self.single_result(self.call(DbVerb::FindOneAndUpdate, request))
    }

    /// Replace the first match and return it (before or after the replace).
    pub fn find_one_and_replace(
        &self,
        filter: Document,
        replacement: Document,
        upsert: bool,
        return_updated: bool,
        options: &FindOptions,
    ) -> AsyncValue<Option<Document>> {
        let request = with_options(
            json!({
                "filter": filter,
                "replacement": replacement,
                "upsert": upsert,
                "returnUpdated": return_updated,
            }),
            options,
        );
        self.single_result(self.call(DbVerb::FindOneAndReplace, request))
    }

    /// Delete the first match and return it.
    pub fn find_one_and_delete(&self, filter: Document, options: &FindOptions) -> AsyncValue<Option<Document>> {
        let request = with_options(json!({ "filter": filter }), options);
        self.single_result(self.call(DbVerb::FindOneAndDelete, request))
    }

    /// Distinct values of `field` among documents matching `filter`.
    pub fn distinct(&self, field: &str, filter: Option<Document>) -> AsyncValue<Vec<Document>> {
        self.call(DbVerb::Distinct, json!({ "field": field, "filter": filter }))
            .get("results")
            .try_map(decode)
    }

    /// Cursor over the output of an aggregation pipeline.
    ///
    /// The field transform is not applied; aggregation output has its own shape.
    pub fn aggregate(&self, pipeline: Vec<Document>) -> AsyncValue<Cursor> {
        let database = Arc::clone(&self.database);
        self.call(DbVerb::Aggregate, json!({ "pipeline": pipeline }))
            .try_map(move |page| Cursor::from_document(database, page))
    }

    /// Delete the first match; resolves to the number deleted.
    pub fn delete_one(&self, filter: Document) -> AsyncValue<u64> {
        self.call(DbVerb::DeleteOne, json!({ "filter": filter }))
            .get("count")
            .try_map(decode)
    }

    /// Delete every match; resolves to the number deleted.
    pub fn delete_many(&self, filter: Document) -> AsyncValue<u64> {
        self.call(DbVerb::DeleteMany, json!({ "filter": filter }))
            .get("count")
            .try_map(decode)
    }

    /// Create indexes; resolves to their names.
    pub fn create_indexes(&self, indexes: &[Index]) -> AsyncValue<Vec<String>> {
        self.call(DbVerb::CreateIndexes, json!({ "indexes": indexes }))
            .get("names")
            .try_map(decode)
    }

    /// Drop every index on the collection.
    pub fn drop_all_indexes(&self) -> AsyncValue<()> {
        self.call(DbVerb::DropAllIndexes, json!({})).map(drop)
    }

    /// Drop the given indexes.
    pub fn drop_indexes(&self, indexes: &[Index]) -> AsyncValue<()> {
        self.call(DbVerb::DropIndexes, json!({ "indexes": indexes }))
            .map(drop)
    }

    /// Wrap the first page of a result set in a [`Cursor`].
    pub fn make_cursor(&self, first_page: AsyncValue<Document>) -> AsyncValue<Cursor> {
        let database = Arc::clone(&self.database);
        let field_transform = self.transform.clone();
        first_page.try_map(move |page| {
            let cursor = Cursor::from_document(database, page)?;
            Ok(match field_transform {
                Some(t) => cursor.with_field_transform(t),
                None => cursor,
            })
        })
    }

    fn single_result(&self, envelope: AsyncValue<Document>) -> AsyncValue<Option<Document>> {
        let field_transform = self.transform.clone();
        transform(extract(envelope, "result"), move |document| {
            Ok(match &field_transform {
                Some(t) => t(document),
                None => document,
            })
        })
    }

    fn call(&self, verb: DbVerb, body: Value) -> AsyncValue<Document> {
        let Value::Object(mut request) = body else {
            return AsyncValue::failed(Error::failed("request body must be an object"));
        };
        request.insert("collection".to_string(), self.collection.clone().into());
        self.database.execute(verb, Value::Object(request))
    }
}

fn with_options(mut request: Value, options: &FindOptions) -> Value {
    if let (Some(object), Ok(Value::Object(extra))) =
        (request.as_object_mut(), serde_json::to_value(options))
    {
        object.extend(extra);
    }
    request
}
