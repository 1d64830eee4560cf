use thiserror::Error;

pub type Result<T> = std::result::Result<T, DocseekError>;

#[derive(Error, Debug)]
pub enum DocseekError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] embeddings::EmbeddingError),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Store error: {0}")]
    Store(#[from] store::StoreError),

    #[error(transparent)]
    Validation(#[from] service::ServiceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod commands;
pub mod config;
pub mod embeddings;
pub mod extraction;
pub mod indexer;
pub mod service;
pub mod store;
