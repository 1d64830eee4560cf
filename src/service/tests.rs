use super::*;
use crate::DocseekError;
use crate::embeddings::EmbeddingError;
use async_trait::async_trait;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;

const BUCKETS: usize = 16;

/// Bag-of-words embedding: each word bumps one of `BUCKETS` slots
struct WordHashProvider;

fn bucket(word: &str) -> usize {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in word.bytes() {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash as usize % BUCKETS
}

#[async_trait]
impl EmbeddingProvider for WordHashProvider {
    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
        let mut vector = vec![0.0; BUCKETS];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            vector[bucket(&word.to_lowercase())] += 1.0;
        }
        Ok(vector)
    }
}

struct UnreachableProvider;

#[async_trait]
impl EmbeddingProvider for UnreachableProvider {
    async fn embed(&self, _text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::Request("connection refused".to_string()))
    }
}

/// Holds "slow*" files until released; other files read as plain text
struct GatedExtractor {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl TextExtractor for GatedExtractor {
    async fn extract(&self, path: &Path) -> Result<String> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if name.starts_with("slow") {
            self.entered.notify_one();
            self.release.notified().await;
        }
        Ok(tokio::fs::read_to_string(path).await?)
    }
}

struct Fixture {
    temp_dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("should create temp dir"),
        }
    }

    fn config(&self) -> Config {
        Config {
            base_dir: self.temp_dir.path().join("base"),
            ..Config::default()
        }
    }

    fn folder(&self, name: &str, files: &[(&str, &str)]) -> PathBuf {
        let dir = self.temp_dir.path().join(name);
        fs::create_dir_all(&dir).expect("should create folder");
        for (file, contents) in files {
            fs::write(dir.join(file), contents).expect("should write file");
        }
        dir.canonicalize().expect("should canonicalize folder")
    }

    async fn service(&self) -> SearchService {
        SearchService::with_components(
            self.config(),
            Arc::new(WordHashProvider),
            Arc::new(FileTextExtractor::new()),
        )
        .await
        .expect("service should start")
    }
}

fn is_inside(result: &SearchResult, folder: &Path) -> bool {
    Path::new(&result.file_path).starts_with(folder)
}

#[tokio::test]
async fn empty_folder_list_is_rejected() {
    let fixture = Fixture::new();
    let service = fixture.service().await;

    let result = service.index_folders(&[]).await;
    assert!(matches!(
        result,
        Err(DocseekError::Validation(ServiceError::NoFolders))
    ));
}

#[tokio::test]
async fn non_directories_are_reported() {
    let fixture = Fixture::new();
    let service = fixture.service().await;
    let good = fixture.folder("good", &[("a.txt", "alpha")]);
    let missing = fixture.temp_dir.path().join("missing");
    let file = good.join("a.txt");

    let result = service
        .index_folders(&[good, missing.clone(), file.clone()])
        .await;
    match result {
        Err(DocseekError::Validation(ServiceError::InvalidFolders(invalid))) => {
            assert_eq!(invalid, vec![missing, file]);
        }
        other => panic!("expected InvalidFolders, got {other:?}"),
    }
    assert!(service.store().is_empty().await);
}

#[tokio::test]
async fn search_requires_an_index() {
    let fixture = Fixture::new();
    let service = fixture.service().await;

    let result = service.search("anything", DEFAULT_SEARCH_LIMIT).await;
    assert!(matches!(
        result,
        Err(DocseekError::Validation(ServiceError::NothingIndexed))
    ));
}

#[tokio::test]
async fn indexed_documents_are_searchable() {
    let fixture = Fixture::new();
    let service = fixture.service().await;
    let folder = fixture.folder(
        "notes",
        &[
            ("rust.txt", "rust ownership borrowing lifetimes"),
            ("garden.md", "# Garden\n\ntomatoes basil compost"),
            ("skip.zip", "ignored"),
        ],
    );

    let response = service
        .index_folders(&[folder.clone()])
        .await
        .expect("indexing should succeed");
    assert_eq!(response.indexed_files, 2);
    assert_eq!(response.stats.documents_indexed, 2);
    assert_eq!(response.folders, vec![folder.clone()]);

    let results = service
        .search("rust ownership borrowing lifetimes", 1)
        .await
        .expect("search should succeed");
    assert_eq!(results.len(), 1);
    assert_eq!(
        results[0].file_path,
        folder.join("rust.txt").to_string_lossy()
    );
    assert!((results[0].score - 1.0).abs() < 1e-5);
}

#[tokio::test]
async fn changing_folder_set_wipes_previous_documents() {
    let fixture = Fixture::new();
    let service = fixture.service().await;
    let first = fixture.folder("first", &[("zebra.txt", "zebra migration savanna")]);
    let second = fixture.folder("second", &[("kettle.txt", "kettle teapot boiling")]);

    service
        .index_folders(&[first.clone()])
        .await
        .expect("first indexing should succeed");
    service
        .index_folders(&[second.clone()])
        .await
        .expect("second indexing should succeed");

    assert_eq!(service.store().len().await, 1);
    let results = service
        .search("zebra migration savanna", DEFAULT_SEARCH_LIMIT)
        .await
        .expect("search should succeed");
    assert!(!results.iter().any(|r| is_inside(r, &first)));
    assert!(results.iter().all(|r| is_inside(r, &second)));
}

#[tokio::test]
async fn same_folder_set_is_not_reset() {
    let fixture = Fixture::new();
    let service = fixture.service().await;
    let folder = fixture.folder("docs", &[("a.txt", "alpha"), ("b.txt", "beta")]);

    service
        .index_folders(&[folder.clone()])
        .await
        .expect("indexing should succeed");
    service
        .index_folders(&[folder.join(".")])
        .await
        .expect("reindexing should succeed");

    // Re-indexing without a reset records every file a second time
    assert_eq!(service.store().len().await, 4);

    let results = service
        .search("alpha", DEFAULT_SEARCH_LIMIT)
        .await
        .expect("search should succeed");
    assert_eq!(results.len(), 2);
    assert_ne!(results[0].file_path, results[1].file_path);
}

#[tokio::test]
async fn related_documents_exclude_the_target() {
    let fixture = Fixture::new();
    let service = fixture.service().await;
    let folder = fixture.folder(
        "docs",
        &[
            ("target.txt", "solar panels battery inverter"),
            ("close.txt", "solar panels battery storage"),
            ("far.txt", "medieval castle siege"),
        ],
    );
    service
        .index_folders(&[folder.clone()])
        .await
        .expect("indexing should succeed");

    let related = service
        .related_to(&folder.join("target.txt"), 1)
        .await
        .expect("related should succeed");
    assert_eq!(related.len(), 1);
    assert_eq!(
        related[0].file_path,
        folder.join("close.txt").to_string_lossy()
    );

    let all = service
        .related_to(&folder.join("target.txt"), DEFAULT_RELATED_LIMIT)
        .await
        .expect("related should succeed");
    assert_eq!(all.len(), 2);
    assert!(all.iter().all(|r| !r.file_path.ends_with("target.txt")));
}

#[tokio::test]
async fn related_to_missing_file_fails() {
    let fixture = Fixture::new();
    let service = fixture.service().await;
    let missing = fixture.temp_dir.path().join("nope.txt");

    let result = service.related_to(&missing, DEFAULT_RELATED_LIMIT).await;
    match result {
        Err(DocseekError::Validation(ServiceError::FileNotFound(path))) => {
            assert_eq!(path, missing);
        }
        other => panic!("expected FileNotFound, got {other:?}"),
    }
}

#[tokio::test]
async fn reset_forgets_folders_and_documents() {
    let fixture = Fixture::new();
    let service = fixture.service().await;
    let folder = fixture.folder("docs", &[("a.txt", "alpha")]);
    service
        .index_folders(&[folder])
        .await
        .expect("indexing should succeed");

    service.reset().await.expect("reset should succeed");

    let status = service.status().await;
    assert!(status.indexed_folders.is_empty());
    assert_eq!(status.documents, 0);
    assert!(!fixture.config().state_file_path().exists());
    assert!(matches!(
        service.search("alpha", 1).await,
        Err(DocseekError::Validation(ServiceError::NothingIndexed))
    ));

    service.reset().await.expect("second reset should succeed");
}

#[tokio::test]
async fn state_survives_restart() {
    let fixture = Fixture::new();
    let folder = fixture.folder("docs", &[("a.txt", "alpha"), ("b.txt", "beta")]);

    {
        let service = fixture.service().await;
        service
            .index_folders(&[folder.clone()])
            .await
            .expect("indexing should succeed");
        service.shutdown().await;
    }

    let restarted = fixture.service().await;
    let status = restarted.status().await;
    assert_eq!(status.indexed_folders, vec![folder.clone()]);
    assert_eq!(status.documents, 2);
    assert_eq!(status.dimension, BUCKETS);
    assert_eq!(status.store_dir, fixture.config().store_dir());

    let results = restarted
        .search("beta", 1)
        .await
        .expect("search should succeed");
    assert_eq!(results[0].file_path, folder.join("b.txt").to_string_lossy());
}

#[tokio::test]
async fn unreachable_model_uses_configured_dimension() {
    let fixture = Fixture::new();
    let mut config = fixture.config();
    config.ollama.embedding_dimension = 12;

    let service = SearchService::with_components(
        config,
        Arc::new(UnreachableProvider),
        Arc::new(FileTextExtractor::new()),
    )
    .await
    .expect("service should start");

    assert_eq!(service.status().await.dimension, 12);
}

#[tokio::test]
async fn unwritable_store_keeps_index_searchable() {
    let fixture = Fixture::new();
    let base = fixture.config().base_dir;
    fs::create_dir_all(&base).expect("should create base dir");
    fs::write(base.join("store"), "not a directory").expect("should write blocker file");

    let service = fixture.service().await;
    let folder = fixture.folder("docs", &[("a.txt", "alpha")]);

    let response = service
        .index_folders(&[folder.clone()])
        .await
        .expect("indexing should succeed without persistence");
    assert_eq!(response.stats.documents_indexed, 1);

    let results = service
        .search("alpha", DEFAULT_SEARCH_LIMIT)
        .await
        .expect("search should succeed");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].file_path, folder.join("a.txt").to_string_lossy());

    service.shutdown().await;
    assert!(base.join("store").is_file());
}

#[tokio::test]
async fn queries_run_while_indexing() {
    let fixture = Fixture::new();
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let service = Arc::new(
        SearchService::with_components(
            fixture.config(),
            Arc::new(WordHashProvider),
            Arc::new(GatedExtractor {
                entered: Arc::clone(&entered),
                release: Arc::clone(&release),
            }),
        )
        .await
        .expect("service should start"),
    );
    let folder = fixture.folder("docs", &[("a.txt", "alpha")]);
    service
        .index_folders(&[folder.clone()])
        .await
        .expect("first indexing should succeed");

    fs::write(folder.join("slow.txt"), "beta").expect("should write file");
    let indexing = {
        let service = Arc::clone(&service);
        let folder = folder.clone();
        tokio::spawn(async move { service.index_folders(&[folder]).await })
    };
    entered.notified().await;

    let results = tokio::time::timeout(
        Duration::from_secs(5),
        service.search("alpha", DEFAULT_SEARCH_LIMIT),
    )
    .await
    .expect("search should not wait for indexing")
    .expect("search should succeed");
    assert_eq!(results[0].file_path, folder.join("a.txt").to_string_lossy());

    let status = tokio::time::timeout(Duration::from_secs(5), service.status())
        .await
        .expect("status should not wait for indexing");
    assert_eq!(status.indexed_folders, vec![folder.clone()]);

    release.notify_one();
    let response = indexing
        .await
        .expect("indexing task should not panic")
        .expect("second indexing should succeed");
    assert_eq!(response.stats.documents_indexed, 2);
}

#[tokio::test]
async fn failed_reset_still_forgets_folders() {
    let fixture = Fixture::new();
    let config = fixture.config();
    // A directory where the snapshot file belongs cannot be removed as a file
    fs::create_dir_all(config.store_dir().join(crate::store::persistence::SNAPSHOT_FILE))
        .expect("should create blocking directory");

    let service = fixture.service().await;
    let folder = fixture.folder("docs", &[("a.txt", "alpha")]);
    service
        .index_folders(&[folder])
        .await
        .expect("indexing should succeed");
    assert!(config.state_file_path().exists());

    assert!(service.reset().await.is_err());

    let status = service.status().await;
    assert!(status.indexed_folders.is_empty());
    assert_eq!(status.documents, 0);
    assert!(!config.state_file_path().exists());
    assert!(matches!(
        service.search("alpha", 1).await,
        Err(DocseekError::Validation(ServiceError::NothingIndexed))
    ));
}
