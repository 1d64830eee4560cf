use super::*;
use crate::embeddings::{Embedder, EmbeddingError, EmbeddingProvider};
use crate::extraction::FileTextExtractor;
use crate::store::StoreOptions;
use async_trait::async_trait;
use std::fs;
use tempfile::TempDir;

struct ConstantProvider;

#[async_trait]
impl EmbeddingProvider for ConstantProvider {
    async fn embed(&self, _text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
        Ok(vec![1.0, 0.0, 0.0])
    }
}

struct FailingProvider;

#[async_trait]
impl EmbeddingProvider for FailingProvider {
    async fn embed(&self, _text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::Request("connection refused".to_string()))
    }
}

/// Returns the file name as text; fails for names starting with "broken"
/// and hangs for names starting with "slow"
struct ScriptedExtractor;

#[async_trait]
impl TextExtractor for ScriptedExtractor {
    async fn extract(&self, path: &Path) -> Result<String> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if name.starts_with("broken") {
            return Err(DocseekError::Extraction("unreadable".to_string()));
        }
        if name.starts_with("slow") {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        Ok(name)
    }
}

/// Tracks how many extractions run at the same time
#[derive(Default)]
struct CountingExtractor {
    active: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl TextExtractor for CountingExtractor {
    async fn extract(&self, _path: &Path) -> Result<String> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok("some text".to_string())
    }
}

fn write(dir: &Path, relative: &str, contents: &str) -> PathBuf {
    let path = dir.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("should create parent dirs");
    }
    fs::write(&path, contents).expect("should write file");
    path
}

async fn indexer_with(
    store_dir: &Path,
    provider: Arc<dyn EmbeddingProvider>,
    extractor: Arc<dyn TextExtractor>,
    config: IndexingConfig,
) -> Indexer {
    let embedder = Embedder::with_dimension(provider, 3);
    let store = VectorStore::open(embedder, store_dir, StoreOptions::from(&config)).await;
    Indexer::new(Arc::new(store), extractor, config)
}

#[tokio::test]
async fn indexes_supported_files_recursively() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let docs = temp_dir.path().join("docs");
    write(&docs, "readme.md", "# Readme\n\nHello");
    write(&docs, "nested/deeper/notes.TXT", "deep notes");
    write(&docs, "nested/page.html", "<p>page</p>");
    write(&docs, "archive.zip", "not indexed");
    write(&docs, "Makefile", "all:");

    let indexer = indexer_with(
        &temp_dir.path().join("store"),
        Arc::new(ConstantProvider),
        Arc::new(FileTextExtractor::new()),
        IndexingConfig::default(),
    )
    .await;

    let stats = indexer
        .process_folders(&[docs])
        .await
        .expect("indexing should succeed");

    assert_eq!(
        stats,
        IndexingStats {
            files_processed: 3,
            documents_indexed: 3,
            files_skipped: 0,
            files_failed: 0,
        }
    );
    assert_eq!(indexer.store().len().await, 3);
}

#[tokio::test]
async fn empty_text_is_skipped_but_counted() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let docs = temp_dir.path().join("docs");
    write(&docs, "photo.png", "binary");
    write(&docs, "blank.txt", "   \n\t ");
    write(&docs, "real.txt", "real content");

    let indexer = indexer_with(
        &temp_dir.path().join("store"),
        Arc::new(ConstantProvider),
        Arc::new(FileTextExtractor::new()),
        IndexingConfig::default(),
    )
    .await;

    let stats = indexer
        .process_folders(&[docs])
        .await
        .expect("indexing should succeed");

    assert_eq!(stats.files_processed, 3);
    assert_eq!(stats.documents_indexed, 1);
    assert_eq!(stats.files_skipped, 2);
    assert_eq!(indexer.store().len().await, 1);
}

#[tokio::test]
async fn failing_files_do_not_abort_the_run() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let docs = temp_dir.path().join("docs");
    write(&docs, "broken.pdf", "");
    write(&docs, "fine.pdf", "");
    write(&docs, "also-fine.docx", "");

    let indexer = indexer_with(
        &temp_dir.path().join("store"),
        Arc::new(ConstantProvider),
        Arc::new(ScriptedExtractor),
        IndexingConfig::default(),
    )
    .await;

    let stats = indexer
        .process_folders(&[docs])
        .await
        .expect("indexing should succeed");

    assert_eq!(stats.files_processed, 3);
    assert_eq!(stats.documents_indexed, 2);
    assert_eq!(stats.files_failed, 1);
}

#[tokio::test]
async fn slow_extraction_is_skipped() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let docs = temp_dir.path().join("docs");
    write(&docs, "slow.pptx", "");
    write(&docs, "quick.pptx", "");

    let config = IndexingConfig {
        extraction_timeout_seconds: 1,
        ..IndexingConfig::default()
    };
    let indexer = indexer_with(
        &temp_dir.path().join("store"),
        Arc::new(ConstantProvider),
        Arc::new(ScriptedExtractor),
        config,
    )
    .await;

    let stats = indexer
        .process_folders(&[docs])
        .await
        .expect("indexing should succeed");

    assert_eq!(stats.files_processed, 2);
    assert_eq!(stats.documents_indexed, 1);
    assert_eq!(stats.files_skipped, 1);
}

#[tokio::test]
async fn embedding_failure_follows_policy() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let docs = temp_dir.path().join("docs");
    write(&docs, "a.txt", "alpha");
    write(&docs, "b.txt", "beta");

    let skipping = indexer_with(
        &temp_dir.path().join("skip-store"),
        Arc::new(FailingProvider),
        Arc::new(FileTextExtractor::new()),
        IndexingConfig::default(),
    )
    .await;
    let stats = skipping
        .process_folders(&[docs.clone()])
        .await
        .expect("indexing should succeed");
    assert_eq!(stats.files_processed, 2);
    assert_eq!(stats.files_failed, 2);
    assert!(skipping.store().is_empty().await);

    let zeroing = indexer_with(
        &temp_dir.path().join("zero-store"),
        Arc::new(FailingProvider),
        Arc::new(FileTextExtractor::new()),
        IndexingConfig {
            embedding_failure_policy: EmbeddingFailurePolicy::ZeroVector,
            ..IndexingConfig::default()
        },
    )
    .await;
    let stats = zeroing
        .process_folders(&[docs])
        .await
        .expect("indexing should succeed");
    assert_eq!(stats.files_processed, 2);
    assert_eq!(stats.documents_indexed, 2);
    assert_eq!(zeroing.store().len().await, 2);
}

#[tokio::test]
async fn records_file_metadata() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let docs = temp_dir.path().join("docs");
    let path = write(&docs, "Report.MD", "quarterly numbers");
    let canonical = path.canonicalize().expect("should canonicalize");

    let indexer = indexer_with(
        &temp_dir.path().join("store"),
        Arc::new(ConstantProvider),
        Arc::new(FileTextExtractor::new()),
        IndexingConfig::default(),
    )
    .await;
    indexer
        .process_folders(&[docs])
        .await
        .expect("indexing should succeed");

    let record = indexer
        .store()
        .document(0)
        .await
        .expect("document should be stored");
    assert_eq!(record.file_path, canonical.to_string_lossy());
    assert_eq!(record.metadata["filename"], "Report.MD");
    assert_eq!(record.metadata["extension"], "md");
    assert_eq!(record.metadata["size_bytes"], 17);
    assert_eq!(record.snippet, "quarterly numbers");
}

#[tokio::test]
async fn concurrency_is_bounded() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let docs = temp_dir.path().join("docs");
    for i in 0..12 {
        write(&docs, &format!("file{i}.txt"), "x");
    }

    let extractor = Arc::new(CountingExtractor::default());
    let indexer = indexer_with(
        &temp_dir.path().join("store"),
        Arc::new(ConstantProvider),
        Arc::clone(&extractor) as Arc<dyn TextExtractor>,
        IndexingConfig {
            max_concurrent_files: 3,
            ..IndexingConfig::default()
        },
    )
    .await;

    let stats = indexer
        .process_folders(&[docs])
        .await
        .expect("indexing should succeed");

    assert_eq!(stats.documents_indexed, 12);
    assert!(extractor.peak.load(Ordering::SeqCst) <= 3);
}

#[tokio::test]
async fn missing_folder_yields_no_work() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let indexer = indexer_with(
        &temp_dir.path().join("store"),
        Arc::new(ConstantProvider),
        Arc::new(FileTextExtractor::new()),
        IndexingConfig::default(),
    )
    .await;

    let stats = indexer
        .process_folders(&[temp_dir.path().join("does-not-exist")])
        .await
        .expect("indexing should succeed");
    assert_eq!(stats, IndexingStats::default());
}

#[cfg(unix)]
#[tokio::test]
async fn directory_symlinks_are_not_followed() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let docs = temp_dir.path().join("docs");
    let outside = temp_dir.path().join("outside");
    write(&docs, "inside.txt", "inside");
    write(&outside, "elsewhere.txt", "elsewhere");
    std::os::unix::fs::symlink(&outside, docs.join("link")).expect("should create symlink");
    std::os::unix::fs::symlink(outside.join("elsewhere.txt"), docs.join("linked.txt"))
        .expect("should create symlink");

    let indexer = indexer_with(
        &temp_dir.path().join("store"),
        Arc::new(ConstantProvider),
        Arc::new(FileTextExtractor::new()),
        IndexingConfig::default(),
    )
    .await;

    let stats = indexer
        .process_folders(&[docs])
        .await
        .expect("indexing should succeed");
    assert_eq!(stats.files_processed, 2);
}
