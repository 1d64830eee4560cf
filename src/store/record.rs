use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Caller-supplied key/value data attached to a document; opaque to the store
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// One indexed file. `id` is also the document's position in the vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: u64,
    pub file_path: String,
    pub metadata: Metadata,
    /// Leading characters of the extracted text
    pub snippet: String,
    pub timestamp: DateTime<Utc>,
}

/// A ranked hit returned from a search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub file_path: String,
    /// `1 / (1 + distance)`, in `(0, 1]`
    pub score: f32,
    pub snippet: String,
    pub metadata: Metadata,
}

/// Convert an index distance into a similarity score in `(0, 1]`
#[inline]
pub fn score_for_distance(distance: f32) -> f32 {
    1.0 / (1.0 + distance.max(0.0))
}
