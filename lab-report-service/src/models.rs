use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A persisted lab report: the original extracted text plus the parsed
/// document derived from it. This is the only entity the service stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicalReport {
    pub id: Uuid,
    pub content: String,
    /// Semi-structured document. Always carries `signals`, `events` and
    /// `reportName` keys; any extra fields from the raw LLM response are
    /// preserved as-is.
    pub parsed: Value,
    pub created_at: DateTime<Utc>,
    pub report_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalStatus {
    Usual,
    Elevated,
    Returning,
}

/// Signal ids are assigned as 1-based numeric indexes at extraction time,
/// but the deletion path rewrites them as strings, so both forms occur in
/// stored documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalId {
    Num(u64),
    Text(String),
}

impl SignalId {
    pub fn as_string(&self) -> String {
        match self {
            SignalId::Num(n) => n.to_string(),
            SignalId::Text(s) => s.clone(),
        }
    }
}

/// A single standardized lab measurement with interpretive metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    pub id: SignalId,
    pub name: String,
    pub technical_name: String,
    pub explanation: String,
    pub interpretation: String,
    pub raw_value: Value,
    pub measurement_method: String,
    pub status: SignalStatus,
}

/// A discrete clinical occurrence (infection, vaccination, medication
/// change) associated with a date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabEvent {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub description: String,
    pub date: Option<String>,
    pub details: Value,
}
