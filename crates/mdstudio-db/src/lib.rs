//! Remote database access for MDStudio components.
//!
//! Provides:
//! - `Database` - The fixed verb set, and `RemoteDatabase` over the component bus
//! - `Model` - Collection-bound verbs with envelope unwrapping
//! - `Cursor` - Lazy consumption of paginated results

pub mod cursor;
pub mod database;
pub mod model;

#[cfg(test)]
pub(crate) mod testing;

pub use cursor::{Cursor, CursorId, CursorPage, CursorState, FieldTransform, Query};
pub use database::{Database, DbVerb, RemoteDatabase, extract, transform};
pub use model::{FindOptions, Index, Model, ReplaceResponse, SortMode, UpdateResponse};
