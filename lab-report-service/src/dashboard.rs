use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

static INFLAMMATORY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)crp|wbc|inflamm|neutrophil|esr|ferritin|il-6").expect("inflammatory regex")
});

static REGULATORY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)regulat|il-10|treg|tgf").expect("regulatory regex"));

/// Aggregated overview indicators computed from the deduplicated signal
/// list. Pure view logic; no persisted state of its own.
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub signal_count: usize,
    /// Percentage of inflammatory signals currently elevated.
    pub inflammatory_value: u32,
    /// Percentage of regulatory signals currently elevated.
    pub regulatory_value: u32,
    /// Count of signals with `returning` status.
    pub recovery_value: usize,
    /// Percentage of all signals within the usual range.
    pub stability_value: u32,
}

fn status_of(signal: &Value) -> &str {
    signal.get("status").and_then(Value::as_str).unwrap_or("")
}

fn name_of(signal: &Value) -> &str {
    signal.get("name").and_then(Value::as_str).unwrap_or("")
}

fn elevated_percentage(signals: &[&Value]) -> u32 {
    if signals.is_empty() {
        return 0;
    }
    let elevated = signals.iter().filter(|s| status_of(s) == "elevated").count();
    (elevated as f64 / signals.len() as f64 * 100.0).round() as u32
}

impl DashboardSummary {
    pub fn from_signals(signals: &[Value]) -> Self {
        let inflammatory: Vec<&Value> = signals
            .iter()
            .filter(|s| INFLAMMATORY_RE.is_match(name_of(s)))
            .collect();
        let regulatory: Vec<&Value> = signals
            .iter()
            .filter(|s| REGULATORY_RE.is_match(name_of(s)))
            .collect();

        let usual = signals.iter().filter(|s| status_of(s) == "usual").count();
        let stability_value = if signals.is_empty() {
            0
        } else {
            (usual as f64 / signals.len() as f64 * 100.0).round() as u32
        };

        DashboardSummary {
            signal_count: signals.len(),
            inflammatory_value: elevated_percentage(&inflammatory),
            regulatory_value: elevated_percentage(&regulatory),
            recovery_value: signals.iter().filter(|s| status_of(s) == "returning").count(),
            stability_value,
        }
    }
}
