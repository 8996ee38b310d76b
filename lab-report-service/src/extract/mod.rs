pub mod llm;
pub mod normalize;
pub mod prompt;
pub mod text;

pub use llm::{CompletionBackend, LlmClient, OpenAiBackend};
pub use prompt::EntryPoint;

use serde_json::Value;
use tracing::{info, warn};

use crate::error::ExtractError;
use crate::store::ReportStore;

/// Result of a full upload-parse-persist run.
#[derive(Debug)]
pub struct ParseOutcome {
    /// Number of extracted signals.
    pub record_count: usize,
    /// The canonical parsed document.
    pub parsed: Value,
}

/// Derive the lowercase file extension from an uploaded file name.
pub fn file_extension(file_name: &str) -> String {
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default()
}

/// Display label for a report: the file name with its extension stripped,
/// or "Lab Report" when there is no usable name.
pub fn display_name(file_name: &str) -> String {
    let stripped = match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.contains('/') => stem,
        _ => file_name,
    };
    if stripped.trim().is_empty() {
        "Lab Report".to_string()
    } else {
        stripped.to_string()
    }
}

/// The sequential upload pipeline: text extraction, prompt composition, LLM
/// call, normalization, store write. The LLM call is the only
/// latency-bound step; there is no retry or client-side timeout.
pub async fn run_pipeline(
    llm: &LlmClient,
    store: &dyn ReportStore,
    bytes: &[u8],
    file_name: &str,
) -> Result<ParseOutcome, ExtractError> {
    let extension = file_extension(file_name);
    let report_name = display_name(file_name);

    let content = text::extract_text(bytes, &extension)?;
    info!("Extracted {} characters from {file_name}", content.len());

    let prompt = prompt::compose_prompt(&content, &extension, EntryPoint::Upload);
    let raw = llm.extract(&prompt).await?;
    let parsed = normalize::normalize(raw, &report_name);

    if store.save(&content, &parsed, Some(&report_name)).await?.is_none() {
        warn!("Parsed report for {file_name} had nothing to save");
    }

    let record_count = parsed["signals"].as_array().map_or(0, Vec::len);
    Ok(ParseOutcome {
        record_count,
        parsed,
    })
}
