use tracing::info;

use crate::error::ExtractError;

/// Turn uploaded file bytes into plain text. PDFs go through the
/// text-extraction library (layout and tables are discarded, no OCR);
/// everything else is decoded as UTF-8.
pub fn extract_text(bytes: &[u8], extension: &str) -> Result<String, ExtractError> {
    let text = if extension.eq_ignore_ascii_case("pdf") {
        let extracted = pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| ExtractError::UnsupportedFile(format!("PDF extraction failed: {e}")))?;
        info!("Extracted {} characters from PDF", extracted.len());
        extracted
    } else {
        String::from_utf8(bytes.to_vec())
            .map_err(|_| ExtractError::UnsupportedFile(extension.to_string()))?
    };

    if text.trim().is_empty() {
        return Err(ExtractError::EmptyFile);
    }
    Ok(text)
}
