// Search service module
// The caller-facing operations: index folders, search, related documents, reset

#[cfg(test)]
mod tests;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::Result;
use crate::config::Config;
use crate::embeddings::{Embedder, EmbeddingProvider, OllamaClient};
use crate::extraction::{FileTextExtractor, TextExtractor};
use crate::indexer::{Indexer, IndexingStats};
use crate::store::{SearchResult, StoreOptions, VectorStore};

pub const DEFAULT_SEARCH_LIMIT: usize = 5;
pub const DEFAULT_RELATED_LIMIT: usize = 3;

/// Request validation failures reported back to the caller
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("No folders provided")]
    NoFolders,
    #[error("Invalid folders: {}", display_paths(.0))]
    InvalidFolders(Vec<PathBuf>),
    #[error("No folders indexed yet")]
    NothingIndexed,
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexFoldersResponse {
    /// Number of matched files, including ones that were skipped or failed
    pub indexed_files: usize,
    pub folders: Vec<PathBuf>,
    pub stats: IndexingStats,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub indexed_folders: Vec<PathBuf>,
    pub documents: u64,
    pub dimension: usize,
    pub store_dir: PathBuf,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct FolderState {
    folders: Vec<PathBuf>,
}

/// Owns the store, the indexer and the record of which folders are indexed
pub struct SearchService {
    config: Config,
    store: Arc<VectorStore>,
    extractor: Arc<dyn TextExtractor>,
    indexer: Indexer,
    /// Serializes indexing runs and resets; queries never take it
    indexing: Mutex<()>,
    /// Canonical folder set the current index was built from
    folders: RwLock<Option<BTreeSet<PathBuf>>>,
}

impl SearchService {
    /// Start the service against the configured Ollama instance
    #[inline]
    pub async fn start(config: Config) -> Result<Self> {
        let client = OllamaClient::new(&config.ollama)?;
        Self::with_components(config, Arc::new(client), Arc::new(FileTextExtractor::new())).await
    }

    /// Start the service with explicit embedding and extraction backends
    #[inline]
    pub async fn with_components(
        config: Config,
        provider: Arc<dyn EmbeddingProvider>,
        extractor: Arc<dyn TextExtractor>,
    ) -> Result<Self> {
        config.validate()?;

        let embedder = Embedder::probe(
            provider,
            config.ollama.embedding_dimension as usize,
            Duration::from_secs(config.ollama.timeout_seconds),
        )
        .await
        .with_max_chars(config.indexing.max_embedding_chars);

        let store = Arc::new(
            VectorStore::open(
                embedder,
                config.store_dir(),
                StoreOptions::from(&config.indexing),
            )
            .await,
        );
        let indexer = Indexer::new(
            Arc::clone(&store),
            Arc::clone(&extractor),
            config.indexing.clone(),
        );
        let folders = load_folder_state(&config.state_file_path()).await;

        info!(
            "Search service ready: {} documents, dimension {}",
            store.len().await,
            store.dimension()
        );

        Ok(Self {
            config,
            store,
            extractor,
            indexer,
            indexing: Mutex::new(()),
            folders: RwLock::new(folders),
        })
    }

    /// Show an indexing spinner on the terminal
    #[inline]
    #[must_use]
    pub fn with_progress(mut self) -> Self {
        self.indexer = self.indexer.with_progress();
        self
    }

    #[inline]
    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Index `folders`, wiping the store first if the folder set changed
    #[inline]
    pub async fn index_folders(&self, folders: &[PathBuf]) -> Result<IndexFoldersResponse> {
        if folders.is_empty() {
            return Err(ServiceError::NoFolders.into());
        }

        let invalid: Vec<PathBuf> = folders.iter().filter(|f| !f.is_dir()).cloned().collect();
        if !invalid.is_empty() {
            return Err(ServiceError::InvalidFolders(invalid).into());
        }

        let mut requested = BTreeSet::new();
        for folder in folders {
            requested.insert(tokio::fs::canonicalize(folder).await?);
        }

        let _indexing = self.indexing.lock().await;
        let changed = self
            .folders
            .read()
            .await
            .as_ref()
            .is_some_and(|existing| *existing != requested);
        if changed {
            info!("Folder set changed, resetting the index");
            if let Err(e) = self.store.reset().await {
                error!("Removing the previous snapshot failed: {}", e);
            }
        }

        let roots: Vec<PathBuf> = requested.iter().cloned().collect();
        let stats = self.indexer.process_folders(&roots).await?;

        *self.folders.write().await = Some(requested);

        // Indexed documents stay searchable even if they cannot be persisted
        if let Err(e) = save_folder_state(&self.config.state_file_path(), &roots).await {
            error!("Saving indexed folder list failed: {}", e);
        }
        self.store.flush().await;
        if let Err(e) = self.store.save().await {
            error!("Saving vector store failed: {}", e);
        }

        Ok(IndexFoldersResponse {
            indexed_files: stats.files_processed,
            folders: roots,
            stats,
        })
    }

    /// Rank indexed documents against `query`
    #[inline]
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        if self.folders.read().await.is_none() {
            return Err(ServiceError::NothingIndexed.into());
        }
        Ok(self.store.search(query, limit).await?)
    }

    /// Documents most similar to the file at `file_path`, excluding the file itself
    #[inline]
    pub async fn related_to(&self, file_path: &Path, limit: usize) -> Result<Vec<SearchResult>> {
        if !file_path.is_file() {
            return Err(ServiceError::FileNotFound(file_path.to_path_buf()).into());
        }

        let target = tokio::fs::canonicalize(file_path).await?;
        let content = self.extractor.extract(&target).await?;

        let target = target.to_string_lossy().into_owned();
        let requested = file_path.to_string_lossy();
        let mut results = self
            .store
            .search_by_content(&content, limit.saturating_add(1))
            .await?;
        results.retain(|r| r.file_path != target && r.file_path != requested);
        results.truncate(limit);

        debug!("Found {} documents related to {}", results.len(), target);
        Ok(results)
    }

    /// Forget every indexed document and the recorded folder set
    #[inline]
    pub async fn reset(&self) -> Result<()> {
        let _indexing = self.indexing.lock().await;
        let reset = self.store.reset().await;
        *self.folders.write().await = None;

        match tokio::fs::remove_file(self.config.state_file_path()).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => error!("Removing indexed folder list failed: {}", e),
        }

        reset?;
        Ok(())
    }

    #[inline]
    pub async fn status(&self) -> StatusReport {
        let indexed_folders = self
            .folders
            .read()
            .await
            .as_ref()
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();

        StatusReport {
            indexed_folders,
            documents: self.store.len().await,
            dimension: self.store.dimension(),
            store_dir: self.store.store_dir().to_path_buf(),
        }
    }

    /// Wait for background snapshots and persist the final state
    ///
    /// A failed save is logged; the in-memory index was still usable.
    #[inline]
    pub async fn shutdown(&self) {
        self.store.flush().await;
        if !self.store.is_empty().await
            && let Err(e) = self.store.save().await
        {
            error!("Saving vector store failed: {}", e);
        }
    }
}

async fn load_folder_state(path: &Path) -> Option<BTreeSet<PathBuf>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("Cannot read {}: {}", path.display(), e);
            return None;
        }
    };

    match serde_json::from_slice::<FolderState>(&bytes) {
        Ok(state) => Some(state.folders.into_iter().collect()),
        Err(e) => {
            warn!("Ignoring malformed folder state {}: {}", path.display(), e);
            None
        }
    }
}

async fn save_folder_state(path: &Path, folders: &[PathBuf]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let state = FolderState {
        folders: folders.to_vec(),
    };
    let json = serde_json::to_vec_pretty(&state).map_err(anyhow::Error::from)?;
    tokio::fs::write(path, json).await?;
    Ok(())
}
