//! AccessStore - the document store every actor talks through
//!
//! Client, console and store never share memory; all coordination happens
//! through the primitives of this trait:
//! - overwrite (`set`) and merge (`update`) writes
//! - all-or-none multi-document `transact`
//! - live `subscribe` streams that deliver the current value first and then
//!   every later change, in order per key, at least once
//!
//! Consumers must treat every delivery as a full snapshot. The same snapshot
//! may arrive twice and intermediate states may be skipped.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

use crate::error::{Error, Result, StoreError, StoreResult};
use crate::path::{CollectionPath, DocumentPath};

mod subscription;

pub use subscription::{Subscription, SubscriptionSink, DEFAULT_BUFFER};

/// A stored document: a JSON object
pub type Document = serde_json::Map<String, serde_json::Value>;

/// One write inside a transaction
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    /// Replace the whole document, creating it if needed
    Set {
        /// Target document
        path: DocumentPath,
        /// Full new value
        value: Document,
    },
    /// Merge fields into an existing document; aborts the transaction if absent
    Update {
        /// Target document
        path: DocumentPath,
        /// Fields to overwrite
        fields: Document,
    },
    /// Merge fields, creating the document if absent
    Merge {
        /// Target document
        path: DocumentPath,
        /// Fields to overwrite
        fields: Document,
    },
    /// Require the document to exist and hold these field values; writes nothing
    ///
    /// A mismatch aborts the transaction with `StoreError::Conflict`.
    Expect {
        /// Target document
        path: DocumentPath,
        /// Field values the document must hold at commit time
        fields: Document,
    },
}

impl Write {
    /// Target document of this write
    #[must_use]
    pub fn path(&self) -> &DocumentPath {
        match self {
            Self::Set { path, .. }
            | Self::Update { path, .. }
            | Self::Merge { path, .. }
            | Self::Expect { path, .. } => path,
        }
    }
}

/// Key-addressed document store with transactions and live subscriptions
#[async_trait]
pub trait AccessStore: Send + Sync {
    /// One-shot read
    async fn get(&self, path: &DocumentPath) -> StoreResult<Option<Document>>;

    /// Overwrite a document
    async fn set(&self, path: &DocumentPath, value: Document) -> StoreResult<()>;

    /// Merge fields into an existing document
    async fn update(&self, path: &DocumentPath, fields: Document) -> StoreResult<()>;

    /// Commit all writes atomically, or none of them
    async fn transact(&self, writes: Vec<Write>) -> StoreResult<()>;

    /// Watch one document; `None` snapshots mean the document is absent
    async fn subscribe(&self, path: &DocumentPath) -> StoreResult<Subscription<Option<Document>>>;

    /// Watch every document of a collection; each delivery is the full set
    async fn subscribe_collection(
        &self,
        path: &CollectionPath,
    ) -> StoreResult<Subscription<Vec<Document>>>;
}

/// Store handle injected into every component
pub type SharedStore = Arc<dyn AccessStore>;

/// Encode a record as a document
pub fn encode<T: Serialize>(record: &T) -> Result<Document> {
    match serde_json::to_value(record)? {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(Error::Serialization(format!(
            "record must encode to an object, got {}",
            other
        ))),
    }
}

/// Decode a document into a record
pub fn decode<T: DeserializeOwned>(document: Document) -> Result<T> {
    Ok(serde_json::from_value(serde_json::Value::Object(document))?)
}

/// Shallow merge used by adapters for `Update` and `Merge`
pub fn merge_fields(target: &mut Document, fields: Document) {
    for (key, value) in fields {
        target.insert(key, value);
    }
}

/// Check an `Expect` precondition against the document as staged so far
///
/// # Errors
///
/// `Conflict` when the document is absent or any expected field differs.
pub fn check_expected(key: &str, current: Option<&Document>, fields: &Document) -> StoreResult<()> {
    let Some(current) = current else {
        return Err(StoreError::Conflict(format!("{} is absent", key)));
    };
    for (field, expected) in fields {
        if current.get(field) != Some(expected) {
            return Err(StoreError::Conflict(format!("{}: {} changed", key, field)));
        }
    }
    Ok(())
}


#[cfg(test)]
mod tests;
