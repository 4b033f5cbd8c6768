//! Document loaders producing ordered [`TextSegment`]s.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::document::{PAGE_KEY, SOURCE_KEY, TextSegment};
use crate::error::{RagError, Result};

/// A source of ordered text segments.
#[async_trait]
pub trait DocumentLoader: Send + Sync {
    /// Human-readable name of the source, used in errors and metadata.
    fn source_name(&self) -> &str;

    /// Read the document.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::LoadError`] when the source is unreadable or malformed.
    async fn load(&self) -> Result<Vec<TextSegment>>;
}

enum Input {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

async fn read_input(input: &Input, source_name: &str) -> Result<Vec<u8>> {
    match input {
        Input::Path(path) => tokio::fs::read(path).await.map_err(|e| RagError::LoadError {
            source_name: source_name.to_string(),
            message: e.to_string(),
        }),
        Input::Bytes(bytes) => Ok(bytes.clone()),
    }
}

fn name_of(path: &Path) -> String {
    path.display().to_string()
}

/// Loads a PDF, one segment per page.
///
/// Segments carry `page` (0-based) and `source` metadata. Blank pages still
/// produce a segment so page numbers stay aligned with the file.
#[cfg(feature = "pdf")]
pub struct PdfLoader {
    input: Input,
    source_name: String,
}

#[cfg(feature = "pdf")]
impl PdfLoader {
    /// Load the PDF at `path`.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self { source_name: name_of(&path), input: Input::Path(path) }
    }

    /// Load a PDF already held in memory.
    pub fn from_bytes(source_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self { source_name: source_name.into(), input: Input::Bytes(bytes) }
    }
}

#[cfg(feature = "pdf")]
#[async_trait]
impl DocumentLoader for PdfLoader {
    fn source_name(&self) -> &str {
        &self.source_name
    }

    async fn load(&self) -> Result<Vec<TextSegment>> {
        let bytes = read_input(&self.input, &self.source_name).await?;
        let source_name = self.source_name.clone();

        let load_error = |message: String| RagError::LoadError {
            source_name: self.source_name.clone(),
            message,
        };

        let pages =
            tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem_by_pages(&bytes))
                .await
                .map_err(|e| load_error(format!("extraction task failed: {e}")))?
                .map_err(|e| load_error(e.to_string()))?;

        debug!(source = %source_name, page_count = pages.len(), "pdf extracted");
        Ok(pages
            .into_iter()
            .enumerate()
            .map(|(page, text)| {
                TextSegment::new(text)
                    .with_metadata(PAGE_KEY, page.to_string())
                    .with_metadata(SOURCE_KEY, source_name.clone())
            })
            .collect())
    }
}

/// Loads a UTF-8 text file.
///
/// Form feeds split the text into pages, matching how text exports of PDFs
/// mark page breaks; a file without form feeds is a single page.
pub struct TextLoader {
    input: Input,
    source_name: String,
}

impl TextLoader {
    /// Load the text file at `path`.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self { source_name: name_of(&path), input: Input::Path(path) }
    }

    /// Load text already held in memory.
    pub fn from_text(source_name: impl Into<String>, text: impl Into<String>) -> Self {
        Self { source_name: source_name.into(), input: Input::Bytes(text.into().into_bytes()) }
    }
}

#[async_trait]
impl DocumentLoader for TextLoader {
    fn source_name(&self) -> &str {
        &self.source_name
    }

    async fn load(&self) -> Result<Vec<TextSegment>> {
        let bytes = read_input(&self.input, &self.source_name).await?;
        let text = String::from_utf8(bytes).map_err(|e| RagError::LoadError {
            source_name: self.source_name.clone(),
            message: format!("not valid UTF-8: {e}"),
        })?;

        Ok(text
            .split('\u{c}')
            .enumerate()
            .map(|(page, text)| {
                TextSegment::new(text)
                    .with_metadata(PAGE_KEY, page.to_string())
                    .with_metadata(SOURCE_KEY, self.source_name.clone())
            })
            .collect())
    }
}

/// Pick a loader from the file extension: `.pdf` files use [`PdfLoader`],
/// everything else [`TextLoader`].
#[cfg(feature = "pdf")]
pub fn loader_for_path(path: impl Into<PathBuf>) -> Arc<dyn DocumentLoader> {
    let path = path.into();
    if path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("pdf")) {
        Arc::new(PdfLoader::from_path(path))
    } else {
        Arc::new(TextLoader::from_path(path))
    }
}

/// Pick a loader for `path`; without PDF support every file is read as text.
#[cfg(not(feature = "pdf"))]
pub fn loader_for_path(path: impl Into<PathBuf>) -> Arc<dyn DocumentLoader> {
    Arc::new(TextLoader::from_path(path))
}
