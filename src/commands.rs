use anyhow::{Context, Result};
use console::style;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::config::Config;
use crate::embeddings::truncate_chars;
use crate::embeddings::ollama::OllamaClient;
use crate::service::SearchService;
use crate::store::SearchResult;

/// Characters of each snippet shown in result listings
const SNIPPET_PREVIEW_CHARS: usize = 200;

async fn start_service(config: Config) -> Result<SearchService> {
    SearchService::start(config)
        .await
        .context("Failed to start search service")
}

/// Write the configuration file, creating it with defaults if needed
#[inline]
pub fn write_config(config: &Config) -> Result<()> {
    let existed = config.config_file_path().exists();
    config.save()?;

    if existed {
        println!("{}", style("Configuration is valid.").green());
    } else {
        println!("{}", style("Created default configuration.").green());
    }
    println!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );
    Ok(())
}

/// Print the effective configuration
#[inline]
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", style("📋 Current Configuration").bold().cyan());
    println!();

    println!("{}", style("Ollama Settings:").bold().yellow());
    println!("  Host: {}", style(&config.ollama.host).cyan());
    println!("  Port: {}", style(config.ollama.port).cyan());
    println!("  Model: {}", style(&config.ollama.model).cyan());
    println!(
        "  Fallback Dimension: {}",
        style(config.ollama.embedding_dimension).cyan()
    );
    println!("  Timeout: {}s", style(config.ollama.timeout_seconds).cyan());
    match config.ollama_url() {
        Ok(url) => println!("  Ollama URL: {}", style(url).cyan()),
        Err(e) => println!("  Ollama URL: {} ({})", style("Invalid").red(), e),
    }

    println!();
    println!("{}", style("Indexing Settings:").bold().yellow());
    let indexing = &config.indexing;
    println!(
        "  Concurrent Files: {}",
        style(indexing.max_concurrent_files).cyan()
    );
    println!(
        "  Extraction Timeout: {}s",
        style(indexing.extraction_timeout_seconds).cyan()
    );
    println!(
        "  Snapshot Interval: {}",
        style(indexing.snapshot_interval).cyan()
    );
    println!(
        "  Embedding Failures: {}",
        style(format!("{:?}", indexing.embedding_failure_policy)).cyan()
    );

    println!();
    println!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );
    println!("Store: {}", style(config.store_dir().display()).dim());

    Ok(())
}

/// Index the given folders, replacing the index if the folder set changed
#[inline]
pub async fn index_folders(config: Config, folders: Vec<PathBuf>) -> Result<()> {
    let service = start_service(config).await?.with_progress();

    let response = service.index_folders(&folders).await?;
    service.shutdown().await;

    println!(
        "{} Indexed {} files from {} folder(s)",
        style("✅").green(),
        style(response.indexed_files).bold(),
        response.folders.len()
    );
    let stats = response.stats;
    println!(
        "   📄 Documents stored: {}",
        style(stats.documents_indexed).cyan()
    );
    if stats.files_skipped > 0 {
        println!(
            "   ⏭️  Skipped (no text): {}",
            style(stats.files_skipped).yellow()
        );
    }
    if stats.files_failed > 0 {
        println!("   ❌ Failed: {}", style(stats.files_failed).red());
    }

    Ok(())
}

/// Search the index and print the ranked results
#[inline]
pub async fn search(config: Config, query: &str, limit: usize) -> Result<()> {
    let service = start_service(config).await?;
    let results = service.search(query, limit).await?;

    println!("🔍 Results for {}", style(query).bold());
    print_results(&results);
    Ok(())
}

/// Print documents similar to `file`
#[inline]
pub async fn related(config: Config, file: &Path, limit: usize) -> Result<()> {
    let service = start_service(config).await?;
    let results = service.related_to(file, limit).await?;

    println!("🔗 Related to {}", style(file.display()).bold());
    print_results(&results);
    Ok(())
}

/// Delete the index and the recorded folder set
#[inline]
pub async fn reset(config: Config) -> Result<()> {
    let service = start_service(config).await?;
    service.reset().await?;
    println!("{}", style("🗑️  Index reset.").green());
    Ok(())
}

/// Print connectivity and index status
#[inline]
pub async fn show_status(config: Config) -> Result<()> {
    println!("📊 Docseek Status Report");
    println!("{}", "=".repeat(50));
    println!();

    println!("🤖 Ollama Status:");
    match OllamaClient::new(&config.ollama) {
        Ok(client) => {
            let probe = client.clone();
            match tokio::task::spawn_blocking(move || probe.health_check()).await {
                Ok(Ok(())) => {
                    println!(
                        "   ✅ Ollama: Connected ({}:{})",
                        config.ollama.host, config.ollama.port
                    );
                    println!("   📋 Model: {}", client.model());
                }
                Ok(Err(e)) => println!("   ⚠️  Ollama: Unhealthy - {}", e),
                Err(e) => println!("   ❌ Ollama: Health check failed - {}", e),
            }
        }
        Err(e) => println!("   ❌ Ollama: Failed to connect - {}", e),
    }

    println!();
    println!("🔍 Index Status:");
    let service = start_service(config).await?;
    let status = service.status().await;

    if status.indexed_folders.is_empty() {
        println!("   💤 No folders indexed");
    } else {
        println!("   📁 Folders:");
        for folder in &status.indexed_folders {
            println!("      {}", folder.display());
        }
    }
    println!("   📄 Documents: {}", status.documents);
    println!("   🔢 Dimension: {}", status.dimension);
    println!("   💾 Store: {}", status.store_dir.display());

    match service.store().verify_consistency().await {
        Ok(()) => println!("   ✅ Index is consistent"),
        Err(e) => {
            warn!("Consistency check failed: {}", e);
            println!("   ⚠️  {}", style(e).red());
        }
    }

    Ok(())
}

fn print_results(results: &[SearchResult]) {
    if results.is_empty() {
        println!("   {}", style("No matching documents.").yellow());
        return;
    }

    for (rank, result) in results.iter().enumerate() {
        println!();
        println!(
            "{}. {} {}",
            rank + 1,
            style(&result.file_path).cyan().bold(),
            style(format!("({:.3})", result.score)).dim()
        );
        let preview = truncate_chars(result.snippet.trim(), SNIPPET_PREVIEW_CHARS);
        if !preview.is_empty() {
            println!("   {}", preview.replace('\n', " "));
        }
    }
}
