//! Typed documents and their raw stored form.

use chrono::{DateTime, Utc};
use driftwood_core::DocumentId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Identity and timestamp metadata carried by every stored document.
///
/// Flattened into the document body, so the persisted JSON has `id`,
/// `createdAt`, and `updatedAt` at the top level. `createdAt` is immutable
/// after creation; `updatedAt` is refreshed on every successful mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMeta {
    /// Unique identifier, assigned by the repository at creation.
    pub id: DocumentId,
    /// Creation timestamp, stamped once.
    pub created_at: DateTime<Utc>,
    /// Last-mutation timestamp, non-decreasing.
    pub updated_at: DateTime<Utc>,
}

impl DocumentMeta {
    /// Metadata for a document that has not been persisted yet.
    ///
    /// The repository replaces all three fields when the document is created,
    /// so the values here are placeholders.
    #[must_use]
    pub fn unsaved() -> Self {
        let now = Utc::now();
        Self {
            id: DocumentId::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Stamp this metadata for insertion: fresh identity, both timestamps
    /// set to `now`.
    pub fn stamp_created(&mut self, now: DateTime<Utc>) {
        self.id = DocumentId::new();
        self.created_at = now;
        self.updated_at = now;
    }
}

impl Default for DocumentMeta {
    fn default() -> Self {
        Self::unsaved()
    }
}

/// A serde-serializable type stored in a named collection.
///
/// Implementors embed a [`DocumentMeta`] with `#[serde(flatten)]` and expose
/// it through `meta`/`meta_mut`; the repository owns stamping and never
/// trusts caller-supplied metadata on create.
pub trait Document: Serialize + DeserializeOwned + Send + Sync {
    /// Collection this document type lives in.
    const COLLECTION: &'static str;

    /// Read access to identity and timestamps.
    fn meta(&self) -> &DocumentMeta;

    /// Write access to identity and timestamps.
    fn meta_mut(&mut self) -> &mut DocumentMeta;

    /// The document's identifier.
    fn id(&self) -> DocumentId {
        self.meta().id
    }
}

/// The raw executor-level document shape: identifier plus the full JSON body
/// (metadata fields included).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDocument {
    /// Primary key; duplicated inside `body` as `id`.
    pub id: DocumentId,
    /// Entire document as stored.
    pub body: serde_json::Value,
}

impl RawDocument {
    /// Serialize a typed document into its raw form.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corruption`] if the document does not serialize
    /// to a JSON object.
    pub fn from_doc<T: Document>(doc: &T) -> Result<Self, StoreError> {
        let body = serde_json::to_value(doc)
            .map_err(|e| StoreError::Corruption(format!("failed to serialize document: {e}")))?;
        if !body.is_object() {
            return Err(StoreError::Corruption(
                "document must serialize to a JSON object".to_owned(),
            ));
        }
        Ok(Self {
            id: doc.id(),
            body,
        })
    }

    /// Deserialize the raw body back into a typed document.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corruption`] if the stored body no longer
    /// matches the document type.
    pub fn into_doc<T: Document>(self) -> Result<T, StoreError> {
        serde_json::from_value(self.body).map_err(|e| {
            StoreError::Corruption(format!(
                "invalid document in collection {}: {e}",
                T::COLLECTION
            ))
        })
    }
}
