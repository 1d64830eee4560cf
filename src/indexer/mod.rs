// Indexer module
// Walks folder trees and feeds extracted text into the vector store

#[cfg(test)]
mod tests;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::{EmbeddingFailurePolicy, IndexingConfig};
use crate::embeddings::Embedding;
use crate::extraction::{TextExtractor, is_supported};
use crate::store::{Metadata, VectorStore};
use crate::{DocseekError, Result};

/// Paths buffered between the directory walk and the workers
const WALK_CHANNEL_CAPACITY: usize = 256;

/// Counters for one `process_folders` run
///
/// `files_processed` counts every matched file, whether or not it ended up
/// in the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexingStats {
    pub files_processed: usize,
    pub documents_indexed: usize,
    pub files_skipped: usize,
    pub files_failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileOutcome {
    Indexed,
    Skipped,
    Failed,
}

#[derive(Default)]
struct StatsCounter {
    processed: AtomicUsize,
    indexed: AtomicUsize,
    skipped: AtomicUsize,
    failed: AtomicUsize,
}

impl StatsCounter {
    fn record(&self, outcome: FileOutcome) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            FileOutcome::Indexed => &self.indexed,
            FileOutcome::Skipped => &self.skipped,
            FileOutcome::Failed => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> IndexingStats {
        IndexingStats {
            files_processed: self.processed.load(Ordering::Relaxed),
            documents_indexed: self.indexed.load(Ordering::Relaxed),
            files_skipped: self.skipped.load(Ordering::Relaxed),
            files_failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Ingestion orchestrator: walk, extract, embed, insert
pub struct Indexer {
    store: Arc<VectorStore>,
    extractor: Arc<dyn TextExtractor>,
    config: IndexingConfig,
    progress: ProgressBar,
}

impl Indexer {
    #[inline]
    pub fn new(
        store: Arc<VectorStore>,
        extractor: Arc<dyn TextExtractor>,
        config: IndexingConfig,
    ) -> Self {
        Self {
            store,
            extractor,
            config,
            progress: ProgressBar::hidden(),
        }
    }

    /// Show a terminal spinner while indexing, if stderr is a terminal
    #[inline]
    #[must_use]
    pub fn with_progress(mut self) -> Self {
        if console::user_attended_stderr() {
            let style = ProgressStyle::with_template("{spinner} [{pos}] Indexing {wide_msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            self.progress = ProgressBar::new_spinner().with_style(style);
            self.progress.enable_steady_tick(Duration::from_millis(120));
        }
        self
    }

    #[inline]
    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    /// Index every supported file below `folders`
    ///
    /// Per-file failures are logged and counted; they never abort the run.
    #[inline]
    pub async fn process_folders(&self, folders: &[PathBuf]) -> Result<IndexingStats> {
        let (tx, rx) = mpsc::channel::<PathBuf>(WALK_CHANNEL_CAPACITY);

        let roots = folders.to_vec();
        let walker = tokio::task::spawn_blocking(move || {
            for root in &roots {
                if !walk_folder(root, &tx) {
                    break;
                }
            }
        });

        let paths = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|path| (path, rx))
        });

        let counter = StatsCounter::default();
        let concurrency = self.config.max_concurrent_files.max(1);

        paths
            .for_each_concurrent(concurrency, |path| {
                let counter = &counter;
                async move {
                    self.progress.set_message(path.display().to_string());
                    let outcome = self.process_file(&path).await;
                    counter.record(outcome);
                    self.progress.inc(1);
                }
            })
            .await;

        walker
            .await
            .map_err(|e| DocseekError::Extraction(format!("folder walk failed: {e}")))?;

        self.progress.finish_and_clear();

        let stats = counter.snapshot();
        info!(
            "Indexing finished: {} files processed, {} indexed, {} skipped, {} failed",
            stats.files_processed, stats.documents_indexed, stats.files_skipped, stats.files_failed
        );
        Ok(stats)
    }

    async fn process_file(&self, path: &Path) -> FileOutcome {
        let timeout = Duration::from_secs(self.config.extraction_timeout_seconds);
        let text = match tokio::time::timeout(timeout, self.extractor.extract(path)).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                error!("Failed to extract {}: {}", path.display(), e);
                return FileOutcome::Failed;
            }
            Err(_) => {
                warn!(
                    "Extraction of {} timed out after {:?}, skipping",
                    path.display(),
                    timeout
                );
                return FileOutcome::Skipped;
            }
        };

        if text.trim().is_empty() {
            debug!("No text extracted from {}, skipping", path.display());
            return FileOutcome::Skipped;
        }

        let embedding = match self.store.embedder().embed(&text).await {
            Ok(embedding) => embedding,
            Err(e) => match self.config.embedding_failure_policy {
                EmbeddingFailurePolicy::Skip => {
                    error!("Failed to embed {}: {}", path.display(), e);
                    return FileOutcome::Failed;
                }
                EmbeddingFailurePolicy::ZeroVector => {
                    warn!(
                        "Failed to embed {} ({}), storing zero vector",
                        path.display(),
                        e
                    );
                    Embedding::zeros(self.store.dimension())
                }
            },
        };

        let file_path = path.to_string_lossy();
        let metadata = file_metadata(path).await;

        match self
            .store
            .insert_embedding(&file_path, &text, metadata, embedding)
            .await
        {
            Ok(id) => {
                debug!("Indexed {} as document {}", file_path, id);
                FileOutcome::Indexed
            }
            Err(e) => {
                error!("Failed to store {}: {}", file_path, e);
                FileOutcome::Failed
            }
        }
    }
}

/// Metadata recorded alongside every document
async fn file_metadata(path: &Path) -> Metadata {
    let mut metadata = Metadata::new();

    if let Some(name) = path.file_name() {
        metadata.insert(
            "filename".to_string(),
            name.to_string_lossy().into_owned().into(),
        );
    }
    metadata.insert(
        "path".to_string(),
        path.to_string_lossy().into_owned().into(),
    );
    if let Some(extension) = path.extension() {
        metadata.insert(
            "extension".to_string(),
            extension.to_string_lossy().to_ascii_lowercase().into(),
        );
    }
    match tokio::fs::metadata(path).await {
        Ok(info) => {
            metadata.insert("size_bytes".to_string(), info.len().into());
        }
        Err(e) => debug!("No size for {}: {}", path.display(), e),
    }

    metadata
}

/// Send every supported file below `root` into `tx`
///
/// Returns `false` once the receiving side has gone away.
fn walk_folder(root: &Path, tx: &mpsc::Sender<PathBuf>) -> bool {
    let root = match root.canonicalize() {
        Ok(root) => root,
        Err(e) => {
            warn!("Cannot resolve folder {}: {}", root.display(), e);
            return true;
        }
    };

    let mut pending = vec![root];
    while let Some(dir) = pending.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot read directory {}: {}", dir.display(), e);
                continue;
            }
        };

        let mut children: Vec<_> = entries.filter_map(std::result::Result::ok).collect();
        children.sort_by_key(std::fs::DirEntry::file_name);

        for entry in children {
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            let path = entry.path();

            if file_type.is_dir() {
                pending.push(path);
                continue;
            }

            // Symlinked files are indexed, symlinked directories are not followed
            let is_file = file_type.is_file() || (file_type.is_symlink() && path.is_file());
            if is_file && is_supported(&path) && tx.blocking_send(path).is_err() {
                return false;
            }
        }
    }

    true
}
