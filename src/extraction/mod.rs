// Text extraction module
// Turns supported files into plain text for embedding


use std::path::Path;

use async_trait::async_trait;
use pulldown_cmark::{Event, Parser, TagEnd};
use scraper::{Html, Node};
use tracing::debug;

use crate::{DocseekError, Result};

/// File extensions the indexer will hand to an extractor (compared lowercase)
pub const SUPPORTED_EXTENSIONS: &[&str] =
    &["pdf", "docx", "pptx", "txt", "eml", "html", "md", "jpg", "png"];

/// Whether `path` has one of the supported extensions, ignoring case
#[inline]
pub fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            SUPPORTED_EXTENSIONS
                .iter()
                .any(|supported| ext.eq_ignore_ascii_case(supported))
        })
}

/// Extracts text from a file on disk
///
/// Unsupported or unreadable content should come back as empty text rather
/// than an error; the indexer skips empty documents.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, path: &Path) -> Result<String>;
}

/// Built-in extractor for the text-based formats
///
/// Markdown is flattened with pulldown-cmark and HTML with scraper. Binary
/// formats (PDF, Office documents, images) produce empty text here.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileTextExtractor;

impl FileTextExtractor {
    #[inline]
    pub fn new() -> Self {
        Self
    }

    /// Synchronous extraction; callers on the async runtime should go
    /// through [`TextExtractor::extract`], which offloads this to the
    /// blocking pool.
    #[inline]
    pub fn extract_sync(path: &Path) -> Result<String> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        match extension.as_str() {
            "txt" | "eml" => Ok(read_lossy(path)?),
            "md" => Ok(markdown_to_text(&read_lossy(path)?)),
            "html" => Ok(html_to_text(&read_lossy(path)?)),
            other => {
                debug!(
                    "No built-in text extraction for .{} files: {}",
                    other,
                    path.display()
                );
                Ok(String::new())
            }
        }
    }
}

#[async_trait]
impl TextExtractor for FileTextExtractor {
    async fn extract(&self, path: &Path) -> Result<String> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || Self::extract_sync(&path))
            .await
            .map_err(|e| DocseekError::Extraction(format!("extraction task failed: {e}")))?
    }
}

fn read_lossy(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Flatten markdown to its visible text, one block per line
pub fn markdown_to_text(markdown: &str) -> String {
    let mut text = String::with_capacity(markdown.len());

    for event in Parser::new(markdown) {
        match event {
            Event::Text(t) | Event::Code(t) => text.push_str(&t),
            Event::SoftBreak | Event::HardBreak => text.push(' '),
            Event::End(
                TagEnd::Paragraph
                | TagEnd::Heading(_)
                | TagEnd::Item
                | TagEnd::CodeBlock
                | TagEnd::TableRow
                | TagEnd::BlockQuote(_),
            ) => text.push('\n'),
            _ => {}
        }
    }

    text.trim().to_string()
}

/// Collect the visible text of an HTML document, skipping scripts and styles
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut pieces: Vec<&str> = Vec::new();

    for node in document.tree.root().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };

        let hidden = node.ancestors().any(|ancestor| {
            ancestor.value().as_element().is_some_and(|element| {
                matches!(element.name(), "script" | "style" | "noscript" | "template")
            })
        });
        if hidden {
            continue;
        }

        let trimmed = text.trim();
        if !trimmed.is_empty() {
            pieces.push(trimmed);
        }
    }

    pieces.join(" ")
}
