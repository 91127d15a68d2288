//! PDF text extraction.
//!
//! Store pages arrive as printed PDFs; this module turns them back into
//! plain UTF-8 text with all pages concatenated in order.

use std::path::Path;

/// Extraction error. Callers decide whether a failure aborts the run.
#[derive(Debug)]
pub enum ExtractError {
    Io(std::io::Error),
    Pdf(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::Io(e) => write!(f, "failed to read PDF: {}", e),
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {}

impl From<std::io::Error> for ExtractError {
    fn from(e: std::io::Error) -> Self {
        ExtractError::Io(e)
    }
}

/// Extract the text of every page of an in-memory PDF.
pub fn pdf_bytes_to_text(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

/// Read a PDF file from disk and extract its text.
pub fn pdf_to_text(path: &Path) -> Result<String, ExtractError> {
    let bytes = std::fs::read(path)?;
    pdf_bytes_to_text(&bytes)
}
