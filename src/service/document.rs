//! Uploaded document decoding
//!
//! Documents arrive base64 encoded. PDFs are detected by their magic bytes
//! and run through `pdf-extract`; anything else must be UTF-8 text.

use base64::{Engine, engine::general_purpose::STANDARD};

const PDF_MAGIC: &[u8] = b"%PDF";

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DecodeError {
    #[error("File content is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("File content is neither a PDF nor UTF-8 text")]
    NotText,

    #[error("Document is empty or has no extractable text")]
    Empty,
}

/// Decode a base64 upload into plain text
pub fn decode_document(encoded: &str) -> Result<String, DecodeError> {
    let payload = strip_data_url(encoded.trim());
    let bytes = STANDARD.decode(payload.as_bytes())?;

    let text = if bytes.starts_with(PDF_MAGIC) {
        extract_pdf(&bytes)?
    } else {
        String::from_utf8(bytes).map_err(|_| DecodeError::NotText)?
    };

    if text.trim().is_empty() {
        return Err(DecodeError::Empty);
    }

    tracing::debug!(text_len = text.len(), "Decoded document");
    Ok(text)
}

/// Accept `data:<mime>;base64,<payload>` as well as a bare payload
fn strip_data_url(encoded: &str) -> &str {
    match encoded.split_once(";base64,") {
        Some((prefix, payload)) if prefix.starts_with("data:") => payload,
        _ => encoded,
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, DecodeError> {
    // pdf-extract can panic on malformed fonts
    match std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes)) {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(DecodeError::Pdf(e.to_string())),
        Err(_) => {
            tracing::error!(size = bytes.len(), "PDF extraction panicked");
            Err(DecodeError::Pdf("malformed PDF".to_string()))
        }
    }
}
