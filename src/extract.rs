//! PDF text extraction for ingestion.
//!
//! Plain text and Markdown files need no extraction; PDFs go through
//! `pdf_extract`, which emits a form feed between pages. Scanned PDFs with
//! no text layer extract to (near-)empty text; callers decide whether that
//! is an error.

use serde_json::json;

use crate::error::{Result, VaultError};

/// Text pulled out of a PDF, with light structural metadata.
#[derive(Debug, Clone)]
pub struct Extracted {
    pub text: String,
    pub page_count: usize,
    pub metadata: serde_json::Value,
}

/// Extract text from PDF bytes.
pub fn extract_pdf(bytes: &[u8]) -> Result<Extracted> {
    let raw = pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| VaultError::Invalid(format!("PDF extraction failed: {}", e)))?;

    // pdf_extract separates pages with form feeds.
    let page_count = raw.matches('\u{c}').count() + 1;
    let text = raw.replace('\u{c}', "\n\n").trim().to_string();

    Ok(Extracted {
        metadata: json!({
            "format": "pdf",
            "pages": page_count,
        }),
        text,
        page_count,
    })
}

/// True when extraction produced no usable text, e.g. a scanned PDF with no
/// text layer.
pub fn is_empty_extraction(extracted: &Extracted) -> bool {
    extracted.text.trim().is_empty()
}
