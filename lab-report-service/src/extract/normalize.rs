use chrono::Utc;
use serde_json::{Value, json};

use crate::models::{LabEvent, Signal, SignalId, SignalStatus};

/// Resolve an arbitrarily-shaped LLM response into the canonical parsed
/// document: the input object with `signals`, `events` and `reportName`
/// written in. Extra top-level fields from the raw response are preserved.
/// Never fails; unrecognizable input just yields empty arrays.
pub fn normalize(raw: Value, report_name: &str) -> Value {
    let mut parsed = match raw {
        Value::Object(map) => Value::Object(map),
        _ => json!({}),
    };

    let signals = extract_signals(&parsed);
    let events = extract_events(&parsed);

    let obj = parsed.as_object_mut().expect("parsed is always an object");
    obj.insert(
        "signals".to_string(),
        serde_json::to_value(signals).unwrap_or_else(|_| json!([])),
    );
    obj.insert(
        "events".to_string(),
        serde_json::to_value(events).unwrap_or_else(|_| json!([])),
    );
    obj.insert("reportName".to_string(), json!(report_name));

    parsed
}

type SignalShape = fn(&Value) -> Option<Vec<Signal>>;

/// Known response shapes in strict priority order. The first shape whose
/// array is structurally present wins exclusively; the rest are not tried.
const SIGNAL_SHAPES: &[SignalShape] = &[
    lab_report_tests,
    top_level_tests,
    report_results,
    top_level_results,
    pascal_lab_report_results,
    lab_results,
    fallback_signal_scan,
];

pub fn extract_signals(parsed: &Value) -> Vec<Signal> {
    SIGNAL_SHAPES
        .iter()
        .find_map(|shape| shape(parsed))
        .unwrap_or_default()
}

/// `{ lab_report: { tests: [...] } }` with flag-derived status.
fn lab_report_tests(parsed: &Value) -> Option<Vec<Signal>> {
    let tests = parsed.get("lab_report")?.get("tests")?.as_array()?;
    Some(map_signals(tests, &["test_name", "name"], &["result"], &["units"], full_flag_status))
}

/// `{ tests: [...] }` with flag-derived status.
fn top_level_tests(parsed: &Value) -> Option<Vec<Signal>> {
    let tests = parsed.get("tests")?.as_array()?;
    Some(map_signals(tests, &["test_name", "name"], &["result"], &["units"], full_flag_status))
}

/// `{ report: { results: [...] } }`. No units field; this shape's flag
/// mapping historically omits "Abnormal".
fn report_results(parsed: &Value) -> Option<Vec<Signal>> {
    let results = parsed.get("report")?.get("results")?.as_array()?;
    Some(map_signals(results, &["test_name"], &["result"], &[], reduced_flag_status))
}

/// `{ results: [...] }`. Status is unconditionally `usual`.
fn top_level_results(parsed: &Value) -> Option<Vec<Signal>> {
    let results = parsed.get("results")?.as_array()?;
    Some(map_signals(results, &["test"], &["result"], &["units"], |_| SignalStatus::Usual))
}

/// `{ LabReport: { Results: [...] } }` in PascalCase. Status `usual`.
fn pascal_lab_report_results(parsed: &Value) -> Option<Vec<Signal>> {
    let results = parsed.get("LabReport")?.get("Results")?.as_array()?;
    Some(map_signals(results, &["TestName"], &["Result"], &["Units"], |_| SignalStatus::Usual))
}

/// `{ Lab: { Results: [...] } }` with mixed-case fields. Status `usual`.
fn lab_results(parsed: &Value) -> Option<Vec<Signal>> {
    let results = parsed.get("Lab")?.get("Results")?.as_array()?;
    Some(map_signals(
        results,
        &["Test", "TestName"],
        &["Result", "result"],
        &["Units", "units"],
        |_| SignalStatus::Usual,
    ))
}

/// Last resort: scan every top-level key whose value is a non-empty array
/// of objects and take the first one where some element carries both a
/// test-name-like and a result-like key.
fn fallback_signal_scan(parsed: &Value) -> Option<Vec<Signal>> {
    let obj = parsed.as_object()?;
    for value in obj.values() {
        let Some(arr) = value.as_array() else { continue };
        if arr.is_empty() || !arr[0].is_object() {
            continue;
        }
        let looks_like_results = arr.iter().any(|item| {
            item.as_object().is_some_and(|m| {
                (m.contains_key("test") || m.contains_key("test_name") || m.contains_key("TestName"))
                    && (m.contains_key("result") || m.contains_key("Result"))
            })
        });
        if looks_like_results {
            return Some(map_signals(
                arr,
                &["test", "test_name", "TestName"],
                &["result", "Result"],
                &["units", "Units"],
                |_| SignalStatus::Usual,
            ));
        }
    }
    None
}

fn map_signals(
    items: &[Value],
    name_keys: &[&str],
    value_keys: &[&str],
    unit_keys: &[&str],
    status: fn(&Value) -> SignalStatus,
) -> Vec<Signal> {
    items
        .iter()
        .enumerate()
        .map(|(idx, item)| {
            let name = string_field(item, name_keys).unwrap_or_else(|| "Unknown".to_string());
            Signal {
                id: SignalId::Num(idx as u64 + 1),
                name: name.clone(),
                technical_name: name,
                explanation: String::new(),
                interpretation: String::new(),
                raw_value: value_keys
                    .iter()
                    .find_map(|k| item.get(*k))
                    .cloned()
                    .unwrap_or(Value::Null),
                measurement_method: string_field(item, unit_keys).unwrap_or_default(),
                status: status(item),
            }
        })
        .collect()
}

/// Walk the key priority chain and take the first value that stringifies to
/// something non-empty, matching `a || b || fallback` semantics.
fn string_field(item: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| item.get(*k))
        .find_map(value_to_string)
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn full_flag_status(item: &Value) -> SignalStatus {
    match item.get("flag").and_then(Value::as_str) {
        Some("High") | Some("Higher than normal") | Some("Abnormal") => SignalStatus::Elevated,
        Some("Low") => SignalStatus::Returning,
        _ => SignalStatus::Usual,
    }
}

fn reduced_flag_status(item: &Value) -> SignalStatus {
    match item.get("flag").and_then(Value::as_str) {
        Some("High") | Some("Higher than normal") => SignalStatus::Elevated,
        Some("Low") => SignalStatus::Returning,
        _ => SignalStatus::Usual,
    }
}

/// Event shapes in priority order: top-level `events`, `report.events`,
/// `lab_report.events`, then a fallback scan for any array of objects whose
/// elements carry both a `type` and a `description`.
pub fn extract_events(parsed: &Value) -> Vec<LabEvent> {
    let known = parsed
        .get("events")
        .and_then(Value::as_array)
        .or_else(|| {
            parsed
                .get("report")
                .and_then(|r| r.get("events"))
                .and_then(Value::as_array)
        })
        .or_else(|| {
            parsed
                .get("lab_report")
                .and_then(|r| r.get("events"))
                .and_then(Value::as_array)
        });

    if let Some(events) = known {
        return events
            .iter()
            .enumerate()
            .map(|(idx, item)| map_event(item, idx, true))
            .collect();
    }

    fallback_event_scan(parsed).unwrap_or_default()
}

fn fallback_event_scan(parsed: &Value) -> Option<Vec<LabEvent>> {
    let obj = parsed.as_object()?;
    for value in obj.values() {
        let Some(arr) = value.as_array() else { continue };
        if arr.is_empty() || !arr[0].is_object() {
            continue;
        }
        let looks_like_events = arr.iter().any(|item| {
            item.as_object()
                .is_some_and(|m| m.contains_key("type") && m.contains_key("description"))
        });
        if looks_like_events {
            return Some(
                arr.iter()
                    .enumerate()
                    .map(|(idx, item)| map_event(item, idx, false))
                    .collect(),
            );
        }
    }
    None
}

fn map_event(item: &Value, idx: usize, default_date_to_now: bool) -> LabEvent {
    let date = match item.get("date").and_then(Value::as_str) {
        Some(d) => Some(d.to_string()),
        None if default_date_to_now => Some(Utc::now().to_rfc3339()),
        None => None,
    };
    LabEvent {
        id: string_field(item, &["id"]).unwrap_or_else(|| format!("event-{idx}")),
        title: string_field(item, &["title"]).unwrap_or_default(),
        event_type: string_field(item, &["type"]).unwrap_or_else(|| "event".to_string()),
        description: string_field(item, &["description"]).unwrap_or_default(),
        date,
        details: match item.get("details") {
            Some(Value::Object(details)) => Value::Object(details.clone()),
            _ => json!({}),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(signals: &[Signal]) -> Vec<&str> {
        signals.iter().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn lab_report_tests_shape_with_flags() {
        let parsed = json!({
            "lab_report": { "tests": [
                { "test_name": "CRP", "result": 12.0, "units": "mg/L", "flag": "High" },
                { "name": "WBC", "result": 4.1, "units": "10^9/L", "flag": "Low" },
                { "test_name": "ANA", "result": "positive", "flag": "Abnormal" },
                { "test_name": "Ferritin", "result": 80 }
            ]}
        });
        let signals = extract_signals(&parsed);
        assert_eq!(signals.len(), 4);
        assert_eq!(names(&signals), vec!["CRP", "WBC", "ANA", "Ferritin"]);
        assert_eq!(signals[0].status, SignalStatus::Elevated);
        assert_eq!(signals[1].status, SignalStatus::Returning);
        assert_eq!(signals[2].status, SignalStatus::Elevated);
        assert_eq!(signals[3].status, SignalStatus::Usual);
        assert_eq!(signals[0].measurement_method, "mg/L");
        assert_eq!(signals[0].id, SignalId::Num(1));
    }

    #[test]
    fn top_level_tests_shape_with_flags() {
        let parsed = json!({
            "tests": [
                { "test_name": "IL-6", "result": 9, "units": "pg/mL", "flag": "Higher than normal" },
                { "test_name": "ESR", "result": 10, "units": "mm/hr" }
            ]
        });
        let signals = extract_signals(&parsed);
        assert_eq!(signals.len(), 2);
        assert_eq!(signals[0].status, SignalStatus::Elevated);
        assert_eq!(signals[1].status, SignalStatus::Usual);
    }

    #[test]
    fn report_results_shape_maps_reduced_flag_set() {
        let parsed = json!({
            "report": { "results": [
                { "test_name": "CRP", "result": 20, "flag": "High" },
                { "test_name": "WBC", "result": 3.0, "flag": "Low" },
                { "test_name": "ANA", "result": "positive", "flag": "Abnormal" }
            ]}
        });
        let signals = extract_signals(&parsed);
        assert_eq!(signals.len(), 3);
        assert_eq!(signals[0].status, SignalStatus::Elevated);
        assert_eq!(signals[1].status, SignalStatus::Returning);
        // "Abnormal" is not part of this shape's mapping.
        assert_eq!(signals[2].status, SignalStatus::Usual);
        assert_eq!(signals[0].measurement_method, "");
    }

    #[test]
    fn top_level_results_shape_is_always_usual() {
        let parsed = json!({
            "results": [
                { "test": "CRP", "result": 30, "units": "mg/L", "flag": "High" }
            ]
        });
        let signals = extract_signals(&parsed);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].name, "CRP");
        assert_eq!(signals[0].status, SignalStatus::Usual);
    }

    #[test]
    fn pascal_case_lab_report_shape() {
        let parsed = json!({
            "LabReport": { "Results": [
                { "TestName": "Ferritin", "Result": 250, "Units": "ng/mL" }
            ]}
        });
        let signals = extract_signals(&parsed);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].name, "Ferritin");
        assert_eq!(signals[0].measurement_method, "ng/mL");
        assert_eq!(signals[0].status, SignalStatus::Usual);
    }

    #[test]
    fn lab_results_shape_with_mixed_case_fields() {
        let parsed = json!({
            "Lab": { "Results": [
                { "Test": "TGF-beta", "result": 1.2, "units": "ng/mL" },
                { "TestName": "IL-10", "Result": 3.4, "Units": "pg/mL" }
            ]}
        });
        let signals = extract_signals(&parsed);
        assert_eq!(names(&signals), vec!["TGF-beta", "IL-10"]);
        assert_eq!(signals[0].measurement_method, "ng/mL");
        assert_eq!(signals[1].measurement_method, "pg/mL");
    }

    #[test]
    fn fallback_scan_finds_test_like_arrays() {
        let parsed = json!({
            "summary": "all good",
            "panel": [
                { "test": "CRP", "result": 5, "units": "mg/L" },
                { "test": "WBC", "result": 6.2 }
            ]
        });
        let signals = extract_signals(&parsed);
        assert_eq!(signals.len(), 2);
        assert_eq!(names(&signals), vec!["CRP", "WBC"]);
        assert!(signals.iter().all(|s| s.status == SignalStatus::Usual));
    }

    #[test]
    fn fallback_scan_ignores_arrays_without_result_keys() {
        let parsed = json!({
            "notes": [ { "text": "follow up in 3 months" } ]
        });
        assert!(extract_signals(&parsed).is_empty());
    }

    #[test]
    fn priority_order_is_exclusive() {
        let parsed = json!({
            "lab_report": { "tests": [ { "test_name": "FromLabReport", "result": 1 } ] },
            "tests": [ { "test_name": "FromTests", "result": 2 } ],
            "results": [ { "test": "FromResults", "result": 3 } ]
        });
        let signals = extract_signals(&parsed);
        assert_eq!(names(&signals), vec!["FromLabReport"]);

        let parsed = json!({
            "tests": [ { "test_name": "FromTests", "result": 2 } ],
            "results": [ { "test": "FromResults", "result": 3 } ]
        });
        assert_eq!(names(&extract_signals(&parsed)), vec!["FromTests"]);
    }

    #[test]
    fn missing_name_defaults_to_unknown() {
        let parsed = json!({ "tests": [ { "result": 5 } ] });
        let signals = extract_signals(&parsed);
        assert_eq!(signals[0].name, "Unknown");
        assert_eq!(signals[0].technical_name, "Unknown");
    }

    #[test]
    fn numeric_name_is_stringified() {
        let parsed = json!({ "tests": [ { "test_name": 42, "result": 5 } ] });
        assert_eq!(extract_signals(&parsed)[0].name, "42");
    }

    #[test]
    fn unrecognizable_input_yields_empty_arrays() {
        let normalized = normalize(json!({ "verdict": "inconclusive" }), "Lab Report");
        assert_eq!(normalized["signals"], json!([]));
        assert_eq!(normalized["events"], json!([]));
        assert_eq!(normalized["reportName"], "Lab Report");
        // Extra fields from the raw response are preserved.
        assert_eq!(normalized["verdict"], "inconclusive");
    }

    #[test]
    fn non_object_input_becomes_empty_document() {
        let normalized = normalize(json!([1, 2, 3]), "Lab Report");
        assert_eq!(normalized["signals"], json!([]));
        assert_eq!(normalized["events"], json!([]));
    }

    #[test]
    fn top_level_events_take_precedence() {
        let parsed = json!({
            "events": [
                { "id": "e1", "title": "Positive ANA", "type": "finding", "description": "ANA detected", "date": "2024-05-01" }
            ],
            "report": { "events": [ { "type": "ignored", "description": "ignored" } ] }
        });
        let events = extract_events(&parsed);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, "e1");
        assert_eq!(events[0].event_type, "finding");
        assert_eq!(events[0].date.as_deref(), Some("2024-05-01"));
    }

    #[test]
    fn nested_event_shapes_are_tried_in_order() {
        let parsed = json!({
            "report": { "events": [ { "title": "Med change", "type": "medication", "description": "started X" } ] }
        });
        let events = extract_events(&parsed);
        assert_eq!(events[0].title, "Med change");
        // Known shapes default a missing date to now.
        assert!(events[0].date.is_some());

        let parsed = json!({
            "lab_report": { "events": [ { "type": "infection", "description": "possible infection" } ] }
        });
        let events = extract_events(&parsed);
        assert_eq!(events[0].event_type, "infection");
        assert_eq!(events[0].id, "event-0");
    }

    #[test]
    fn fallback_event_scan_leaves_date_null() {
        let parsed = json!({
            "findings": [
                { "type": "finding", "description": "elevated CRP" },
                { "note": "no type here" }
            ]
        });
        let events = extract_events(&parsed);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].date, None);
        assert_eq!(events[1].event_type, "event");
        assert_eq!(events[1].id, "event-1");
    }

    #[test]
    fn event_defaults_applied() {
        let parsed = json!({ "events": [ {} ] });
        let events = extract_events(&parsed);
        assert_eq!(events[0].id, "event-0");
        assert_eq!(events[0].title, "");
        assert_eq!(events[0].event_type, "event");
        assert_eq!(events[0].description, "");
        assert_eq!(events[0].details, json!({}));
    }

    #[test]
    fn normalize_writes_signals_events_and_report_name() {
        let raw = json!({
            "tests": [ { "test_name": "CRP", "result": 5, "units": "mg/L" } ],
            "events": [ { "type": "finding", "description": "mild elevation" } ]
        });
        let normalized = normalize(raw, "bloodwork-2024");
        assert_eq!(normalized["signals"].as_array().unwrap().len(), 1);
        assert_eq!(normalized["events"].as_array().unwrap().len(), 1);
        assert_eq!(normalized["reportName"], "bloodwork-2024");
        assert_eq!(normalized["signals"][0]["name"], "CRP");
        assert_eq!(normalized["signals"][0]["rawValue"], 5);
        assert_eq!(normalized["signals"][0]["measurementMethod"], "mg/L");
    }
}
