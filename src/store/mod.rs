// Vector store module
// Owns the flat similarity index, the document records and their snapshots


pub mod index;
pub mod persistence;
pub mod record;

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::IndexingConfig;
use crate::embeddings::{Embedder, Embedding, truncate_chars};

pub use index::{FlatIndex, Neighbor};
pub use record::{DocumentRecord, Metadata, SearchResult, score_for_distance};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(
        "vector store is corrupted: doc_count={doc_count}, records={records}, vectors={vectors}"
    )]
    Corrupted {
        doc_count: u64,
        records: usize,
        vectors: usize,
    },
    #[error("vector has {actual} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
    #[error("snapshot checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { stored: u32, computed: u32 },
    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u32),
    #[error("snapshot serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Tunables for a [`VectorStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    /// A snapshot is written after every `snapshot_interval` inserts
    pub snapshot_interval: u64,
    /// Number of leading characters kept as the document snippet
    pub snippet_chars: usize,
}

impl Default for StoreOptions {
    #[inline]
    fn default() -> Self {
        Self {
            snapshot_interval: 50,
            snippet_chars: 1000,
        }
    }
}

impl From<&IndexingConfig> for StoreOptions {
    #[inline]
    fn from(config: &IndexingConfig) -> Self {
        Self {
            snapshot_interval: config.snapshot_interval.max(1),
            snippet_chars: config.snippet_chars,
        }
    }
}

struct StoreState {
    index: FlatIndex,
    documents: BTreeMap<u64, DocumentRecord>,
    doc_count: u64,
}

impl StoreState {
    fn empty(dimension: usize) -> Self {
        Self {
            index: FlatIndex::new(dimension),
            documents: BTreeMap::new(),
            doc_count: 0,
        }
    }

    fn check_consistency(&self) -> Result<(), StoreError> {
        let records = self.documents.len();
        let vectors = self.index.len();
        if self.doc_count as usize != records || records != vectors {
            error!(
                "Vector store invariant violated: doc_count={}, records={}, vectors={}",
                self.doc_count, records, vectors
            );
            return Err(StoreError::Corrupted {
                doc_count: self.doc_count,
                records,
                vectors,
            });
        }
        Ok(())
    }

    fn encode(&self) -> Result<Vec<u8>, StoreError> {
        persistence::encode(&self.index, &self.documents, self.doc_count)
    }
}

#[derive(Default)]
struct PersistState {
    /// `doc_count` of the newest snapshot on disk
    last_written: Option<u64>,
}

/// Similarity index plus document records, safe to share across tasks
///
/// All mutations take the write lock for the full append/record/count step,
/// so index position and document id always agree. Searches share the read
/// lock.
pub struct VectorStore {
    embedder: Embedder,
    dir: PathBuf,
    options: StoreOptions,
    state: RwLock<StoreState>,
    persist: Arc<Mutex<PersistState>>,
    /// Bumped by every reset; snapshots taken under an older generation are dropped
    generation: Arc<AtomicU64>,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl VectorStore {
    /// Create a store in `dir`, restoring the persisted snapshot if one exists
    ///
    /// A missing, unreadable or inconsistent snapshot leaves the store empty.
    #[inline]
    pub async fn open(embedder: Embedder, dir: impl Into<PathBuf>, options: StoreOptions) -> Self {
        let dir = dir.into();
        let store = Self {
            state: RwLock::new(StoreState::empty(embedder.dimension())),
            embedder,
            dir,
            options,
            persist: Arc::new(Mutex::new(PersistState::default())),
            generation: Arc::new(AtomicU64::new(0)),
            pending: Mutex::new(Vec::new()),
        };

        match store.load().await {
            Ok(true) => {}
            Ok(false) => debug!("No vector store snapshot in {}", store.dir.display()),
            Err(e) => error!("Loading vector store failed: {}", e),
        }

        store
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.embedder.dimension()
    }

    #[inline]
    pub fn embedder(&self) -> &Embedder {
        &self.embedder
    }

    #[inline]
    pub fn store_dir(&self) -> &Path {
        &self.dir
    }

    /// Number of stored documents
    #[inline]
    pub async fn len(&self) -> u64 {
        self.state.read().await.doc_count
    }

    #[inline]
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    #[inline]
    pub async fn document(&self, id: u64) -> Option<DocumentRecord> {
        self.state.read().await.documents.get(&id).cloned()
    }

    /// Fail if the count, the record map and the index disagree
    #[inline]
    pub async fn verify_consistency(&self) -> Result<(), StoreError> {
        self.state.read().await.check_consistency()
    }

    /// Embed `content` and store it as a new document
    ///
    /// Returns `false` if the embedding or the insert fails; the error is
    /// logged, not returned.
    #[inline]
    pub async fn add_document(&self, file_path: &str, content: &str, metadata: Metadata) -> bool {
        let embedding = match self.embedder.embed(content).await {
            Ok(embedding) => embedding,
            Err(e) => {
                error!("Error adding document {}: {}", file_path, e);
                return false;
            }
        };

        match self
            .insert_embedding(file_path, content, metadata, embedding)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                error!("Error adding document {}: {}", file_path, e);
                false
            }
        }
    }

    /// Store a document with a precomputed embedding, returning its id
    #[inline]
    pub async fn insert_embedding(
        &self,
        file_path: &str,
        content: &str,
        metadata: Metadata,
        embedding: Embedding,
    ) -> Result<u64, StoreError> {
        let vector = self.embedder.reconcile(embedding).normalized();
        let snippet = truncate_chars(content, self.options.snippet_chars).to_string();

        let (id, snapshot) = {
            let mut state = self.state.write().await;
            state.check_consistency()?;

            state.index.add(vector.as_slice())?;
            let id = state.doc_count;
            state.documents.insert(
                id,
                DocumentRecord {
                    id,
                    file_path: file_path.to_string(),
                    metadata,
                    snippet,
                    timestamp: Utc::now(),
                },
            );
            state.doc_count += 1;

            let snapshot = if state.doc_count % self.options.snapshot_interval.max(1) == 0 {
                match state.encode() {
                    Ok(bytes) => Some((
                        bytes,
                        state.doc_count,
                        self.generation.load(Ordering::SeqCst),
                    )),
                    Err(e) => {
                        error!("Encoding periodic snapshot failed: {}", e);
                        None
                    }
                }
            } else {
                None
            };

            (id, snapshot)
        };

        debug!("Stored document {} as id {}", file_path, id);

        if let Some((bytes, doc_count, generation)) = snapshot {
            self.spawn_snapshot(bytes, doc_count, generation).await;
        }

        Ok(id)
    }

    /// Write a snapshot on a background task; stale snapshots are discarded
    async fn spawn_snapshot(&self, bytes: Vec<u8>, doc_count: u64, generation: u64) {
        debug!("Scheduling snapshot at {} documents", doc_count);

        let dir = self.dir.clone();
        let persist = Arc::clone(&self.persist);
        let current_generation = Arc::clone(&self.generation);

        let handle = tokio::spawn(async move {
            let mut persisted = persist.lock().await;
            if current_generation.load(Ordering::SeqCst) != generation {
                debug!("Discarding snapshot taken before a reset");
                return;
            }
            if persisted.last_written.is_some_and(|written| written > doc_count) {
                debug!("Discarding snapshot older than the one on disk");
                return;
            }
            match persistence::write(&dir, &bytes).await {
                Ok(()) => persisted.last_written = Some(doc_count),
                Err(e) => error!("Saving vector store failed: {}", e),
            }
        });

        let mut pending = self.pending.lock().await;
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }

    /// Wait for every scheduled background snapshot to finish
    #[inline]
    pub async fn flush(&self) {
        let handles: Vec<JoinHandle<()>> = self.pending.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Snapshot task failed: {}", e);
            }
        }
    }

    /// Rank stored documents against a free-text query
    ///
    /// An embedding failure yields an empty result list; corruption is an error.
    #[inline]
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, StoreError> {
        match self.embedder.embed(query).await {
            Ok(embedding) => self.search_by_embedding(embedding, limit).await,
            Err(e) => {
                error!("Search failed: {}", e);
                Ok(Vec::new())
            }
        }
    }

    /// Rank stored documents against the text of another document
    #[inline]
    pub async fn search_by_content(
        &self,
        content: &str,
        limit: usize,
    ) -> Result<Vec<SearchResult>, StoreError> {
        match self.embedder.embed(content).await {
            Ok(embedding) => self.search_by_embedding(embedding, limit).await,
            Err(e) => {
                error!("Search by content failed: {}", e);
                Ok(Vec::new())
            }
        }
    }

    /// Rank stored documents against a precomputed embedding
    ///
    /// Fetches `2 * limit` neighbors, then drops entries without a record,
    /// files that no longer exist and repeated paths, keeping the closest.
    #[inline]
    pub async fn search_by_embedding(
        &self,
        embedding: Embedding,
        limit: usize,
    ) -> Result<Vec<SearchResult>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let query = self.embedder.reconcile(embedding).normalized();

        let candidates: Vec<(f32, DocumentRecord)> = {
            let state = self.state.read().await;
            state.check_consistency()?;

            if state.index.is_empty() {
                return Ok(Vec::new());
            }

            let k = limit.saturating_mul(2).min(state.index.len());
            state
                .index
                .search(query.as_slice(), k)?
                .into_iter()
                .filter(|neighbor| (neighbor.position as u64) < state.doc_count)
                .filter_map(|neighbor| {
                    state
                        .documents
                        .get(&(neighbor.position as u64))
                        .map(|doc| (neighbor.distance, doc.clone()))
                })
                .collect()
        };

        let mut seen: HashSet<String> = HashSet::new();
        let mut results = Vec::with_capacity(limit);

        for (distance, doc) in candidates {
            if seen.contains(&doc.file_path) {
                continue;
            }
            if !tokio::fs::try_exists(&doc.file_path).await.unwrap_or(false) {
                debug!("Skipping stale result, file is gone: {}", doc.file_path);
                continue;
            }
            seen.insert(doc.file_path.clone());

            results.push(SearchResult {
                file_path: doc.file_path,
                score: score_for_distance(distance),
                snippet: doc.snippet,
                metadata: doc.metadata,
            });

            if results.len() >= limit {
                break;
            }
        }

        Ok(results)
    }

    /// Drop every document and delete the persisted snapshot
    #[inline]
    pub async fn reset(&self) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        self.generation.fetch_add(1, Ordering::SeqCst);
        *state = StoreState::empty(self.dimension());

        let mut persisted = self.persist.lock().await;
        persisted.last_written = None;
        persistence::remove(&self.dir).await?;

        info!("Vector store reset");
        Ok(())
    }

    /// Write a full snapshot of the current state
    #[inline]
    pub async fn save(&self) -> Result<(), StoreError> {
        let (bytes, doc_count, generation) = {
            let state = self.state.read().await;
            state.check_consistency()?;
            (
                state.encode()?,
                state.doc_count,
                self.generation.load(Ordering::SeqCst),
            )
        };

        let mut persisted = self.persist.lock().await;
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!("Store was reset during save; skipping write");
            return Ok(());
        }
        persistence::write(&self.dir, &bytes).await?;
        persisted.last_written = Some(doc_count);
        Ok(())
    }

    /// Replace the in-memory state with the persisted snapshot
    ///
    /// Returns `Ok(false)` when there is no snapshot to load.
    #[inline]
    pub async fn load(&self) -> Result<bool, StoreError> {
        let Some(bytes) = persistence::read(&self.dir).await? else {
            return Ok(false);
        };
        let snapshot = persistence::decode(&bytes, self.dimension())?;

        let mut state = self.state.write().await;
        let mut persisted = self.persist.lock().await;
        *state = StoreState {
            index: snapshot.index,
            documents: snapshot.documents,
            doc_count: snapshot.doc_count,
        };
        persisted.last_written = Some(state.doc_count);

        info!(
            "Loaded {} documents from {}",
            state.doc_count,
            self.dir.display()
        );
        Ok(true)
    }
}
