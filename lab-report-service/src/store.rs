use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::MedicalReport;

/// Persistence seam for medical reports. One implementation talks to
/// PostgreSQL, the in-memory one backs tests; both are injected through
/// `AppState` rather than living as module-level singletons.
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Persist a report. Returns `Ok(None)` without touching the table when
    /// `content` is empty or `parsed` is not an object; a database failure
    /// is a distinct `Err`.
    async fn save(
        &self,
        content: &str,
        parsed: &Value,
        report_name: Option<&str>,
    ) -> Result<Option<MedicalReport>, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<MedicalReport>, StoreError>;

    /// All reports, most recent first. `created_at` is the sole ordering
    /// key system-wide.
    async fn list_all(&self) -> Result<Vec<MedicalReport>, StoreError>;

    async fn latest(&self) -> Result<Option<MedicalReport>, StoreError>;

    /// Flatten `parsed.signals` across all reports (newest first) and
    /// dedupe by `name`.
    async fn list_signals(&self) -> Result<Vec<Value>, StoreError> {
        Ok(collect_signals(&self.list_all().await?))
    }

    /// Flatten `parsed.events` across all reports, newest first.
    async fn list_events(&self) -> Result<Vec<Value>, StoreError> {
        Ok(collect_events(&self.list_all().await?))
    }

    /// Remove the signal with the given id (string-coerced comparison)
    /// from every report containing it, rewriting each affected `parsed`
    /// document. Returns `false` when nothing matched.
    async fn delete_signal(&self, id: &str) -> Result<bool, StoreError>;

    /// Remove the event with the given id from every report containing it.
    async fn delete_event(&self, id: &str) -> Result<bool, StoreError>;
}

fn is_savable(content: &str, parsed: &Value) -> bool {
    !content.trim().is_empty() && parsed.is_object()
}

/// Dedupe by name with an unconditional write per signal: iterating newest
/// report first, a later (older) occurrence of a name overwrites the value
/// while keeping the first-seen position.
pub(crate) fn collect_signals(reports: &[MedicalReport]) -> Vec<Value> {
    let mut ordered: Vec<Value> = Vec::new();
    let mut index_by_name: std::collections::HashMap<String, usize> =
        std::collections::HashMap::new();

    for report in reports {
        let Some(signals) = report.parsed.get("signals").and_then(Value::as_array) else {
            continue;
        };
        for signal in signals {
            let name = signal
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            match index_by_name.get(&name) {
                Some(&idx) => ordered[idx] = signal.clone(),
                None => {
                    index_by_name.insert(name, ordered.len());
                    ordered.push(signal.clone());
                }
            }
        }
    }
    ordered
}

pub(crate) fn collect_events(reports: &[MedicalReport]) -> Vec<Value> {
    reports
        .iter()
        .filter_map(|r| r.parsed.get("events").and_then(Value::as_array))
        .flatten()
        .cloned()
        .collect()
}

/// String coercion for mixed numeric/string signal ids.
fn id_as_string(id: &Value) -> Option<String> {
    match id {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Filter a signal out of a parsed document. Returns the rewritten document
/// only if a signal was actually removed; remaining signal ids are
/// string-coerced on rewrite.
pub(crate) fn remove_signal(parsed: &Value, id: &str) -> Option<Value> {
    let signals = parsed.get("signals")?.as_array()?;
    let filtered: Vec<Value> = signals
        .iter()
        .filter(|s| s.get("id").and_then(id_as_string).as_deref() != Some(id))
        .map(|s| {
            let mut s = s.clone();
            if let Some(coerced) = s.get("id").and_then(id_as_string) {
                s["id"] = Value::String(coerced);
            }
            s
        })
        .collect();

    if filtered.len() == signals.len() {
        return None;
    }
    let mut rewritten = parsed.clone();
    rewritten["signals"] = Value::Array(filtered);
    Some(rewritten)
}

pub(crate) fn remove_event(parsed: &Value, id: &str) -> Option<Value> {
    let events = parsed.get("events")?.as_array()?;
    let filtered: Vec<Value> = events
        .iter()
        .filter(|e| e.get("id").and_then(Value::as_str) != Some(id))
        .cloned()
        .collect();

    if filtered.len() == events.len() {
        return None;
    }
    let mut rewritten = parsed.clone();
    rewritten["events"] = Value::Array(filtered);
    Some(rewritten)
}

/// PostgreSQL-backed store over the single `medical_reports` table.
pub struct PostgresReportStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct ReportRow {
    id: Uuid,
    content: String,
    parsed: Value,
    created_at: chrono::DateTime<Utc>,
    report_name: Option<String>,
}

impl From<ReportRow> for MedicalReport {
    fn from(row: ReportRow) -> Self {
        MedicalReport {
            id: row.id,
            content: row.content,
            parsed: row.parsed,
            created_at: row.created_at,
            report_name: row.report_name,
        }
    }
}

impl PostgresReportStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    async fn update_parsed(&self, id: Uuid, parsed: &Value) -> Result<(), StoreError> {
        sqlx::query("UPDATE medical_reports SET parsed = $1 WHERE id = $2")
            .bind(sqlx::types::Json(parsed))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ReportStore for PostgresReportStore {
    async fn save(
        &self,
        content: &str,
        parsed: &Value,
        report_name: Option<&str>,
    ) -> Result<Option<MedicalReport>, StoreError> {
        if !is_savable(content, parsed) {
            warn!("Skipping save: empty content or non-object parsed document");
            return Ok(None);
        }
        let row = sqlx::query_as::<_, ReportRow>(
            r#"
            INSERT INTO medical_reports (content, parsed, report_name)
            VALUES ($1, $2, $3)
            RETURNING id, content, parsed, created_at, report_name
            "#,
        )
        .bind(content)
        .bind(sqlx::types::Json(parsed))
        .bind(report_name)
        .fetch_one(&self.pool)
        .await?;
        Ok(Some(row.into()))
    }

    async fn get(&self, id: Uuid) -> Result<Option<MedicalReport>, StoreError> {
        let row = sqlx::query_as::<_, ReportRow>(
            "SELECT id, content, parsed, created_at, report_name FROM medical_reports WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn list_all(&self) -> Result<Vec<MedicalReport>, StoreError> {
        let rows = sqlx::query_as::<_, ReportRow>(
            "SELECT id, content, parsed, created_at, report_name FROM medical_reports ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn latest(&self) -> Result<Option<MedicalReport>, StoreError> {
        let row = sqlx::query_as::<_, ReportRow>(
            "SELECT id, content, parsed, created_at, report_name FROM medical_reports ORDER BY created_at DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn delete_signal(&self, id: &str) -> Result<bool, StoreError> {
        // Read-then-write per report, no locking; concurrent deletes
        // against the same report can lose one update.
        let mut deleted = false;
        for report in self.list_all().await? {
            if let Some(rewritten) = remove_signal(&report.parsed, id) {
                self.update_parsed(report.id, &rewritten).await?;
                deleted = true;
            }
        }
        Ok(deleted)
    }

    async fn delete_event(&self, id: &str) -> Result<bool, StoreError> {
        let mut deleted = false;
        for report in self.list_all().await? {
            if let Some(rewritten) = remove_event(&report.parsed, id) {
                self.update_parsed(report.id, &rewritten).await?;
                deleted = true;
            }
        }
        Ok(deleted)
    }
}

/// In-memory store for tests. Insertion order doubles as the creation
/// order, so listing just reverses it.
pub struct InMemoryReportStore {
    reports: RwLock<Vec<MedicalReport>>,
}

impl InMemoryReportStore {
    pub fn new() -> Self {
        Self {
            reports: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryReportStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReportStore for InMemoryReportStore {
    async fn save(
        &self,
        content: &str,
        parsed: &Value,
        report_name: Option<&str>,
    ) -> Result<Option<MedicalReport>, StoreError> {
        if !is_savable(content, parsed) {
            return Ok(None);
        }
        let report = MedicalReport {
            id: Uuid::new_v4(),
            content: content.to_string(),
            parsed: parsed.clone(),
            created_at: Utc::now(),
            report_name: report_name.map(str::to_string),
        };
        self.reports.write().await.push(report.clone());
        Ok(Some(report))
    }

    async fn get(&self, id: Uuid) -> Result<Option<MedicalReport>, StoreError> {
        Ok(self
            .reports
            .read()
            .await
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    async fn list_all(&self) -> Result<Vec<MedicalReport>, StoreError> {
        Ok(self.reports.read().await.iter().rev().cloned().collect())
    }

    async fn latest(&self) -> Result<Option<MedicalReport>, StoreError> {
        Ok(self.reports.read().await.last().cloned())
    }

    async fn delete_signal(&self, id: &str) -> Result<bool, StoreError> {
        let mut reports = self.reports.write().await;
        let mut deleted = false;
        for report in reports.iter_mut() {
            if let Some(rewritten) = remove_signal(&report.parsed, id) {
                report.parsed = rewritten;
                deleted = true;
            }
        }
        Ok(deleted)
    }

    async fn delete_event(&self, id: &str) -> Result<bool, StoreError> {
        let mut reports = self.reports.write().await;
        let mut deleted = false;
        for report in reports.iter_mut() {
            if let Some(rewritten) = remove_event(&report.parsed, id) {
                report.parsed = rewritten;
                deleted = true;
            }
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn signal(id: u64, name: &str, raw_value: i64) -> Value {
        json!({
            "id": id,
            "name": name,
            "technicalName": name,
            "explanation": "",
            "interpretation": "",
            "rawValue": raw_value,
            "measurementMethod": "mg/L",
            "status": "usual"
        })
    }

    #[tokio::test]
    async fn save_rejects_empty_content() {
        let store = InMemoryReportStore::new();
        let saved = store.save("   ", &json!({"signals": []}), None).await.unwrap();
        assert!(saved.is_none());
        assert!(store.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_rejects_non_object_parsed() {
        let store = InMemoryReportStore::new();
        assert!(store.save("text", &json!(null), None).await.unwrap().is_none());
        assert!(store.save("text", &json!([1, 2]), None).await.unwrap().is_none());
        assert!(store.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_all_is_newest_first() {
        let store = InMemoryReportStore::new();
        let first = store
            .save("first", &json!({"signals": []}), Some("a"))
            .await
            .unwrap()
            .unwrap();
        let second = store
            .save("second", &json!({"signals": []}), Some("b"))
            .await
            .unwrap()
            .unwrap();

        let all = store.list_all().await.unwrap();
        assert_eq!(all[0].id, second.id);
        assert_eq!(all[1].id, first.id);
        assert_eq!(store.latest().await.unwrap().unwrap().id, second.id);
    }

    #[tokio::test]
    async fn signals_dedupe_by_name() {
        let store = InMemoryReportStore::new();
        store
            .save("old", &json!({"signals": [signal(1, "CRP", 5)]}), None)
            .await
            .unwrap();
        store
            .save(
                "new",
                &json!({"signals": [signal(1, "CRP", 12), signal(2, "WBC", 7)]}),
                None,
            )
            .await
            .unwrap();

        let signals = store.list_signals().await.unwrap();
        let crp: Vec<&Value> = signals.iter().filter(|s| s["name"] == "CRP").collect();
        assert_eq!(crp.len(), 1);
        assert_eq!(signals.len(), 2);
        // The map write is unconditional per iteration (newest report
        // first), so the last-written occurrence wins.
        assert_eq!(crp[0]["rawValue"], 5);
    }

    #[tokio::test]
    async fn delete_signal_removes_from_every_report() {
        let store = InMemoryReportStore::new();
        store
            .save("a", &json!({"signals": [signal(1, "CRP", 5), signal(2, "WBC", 7)]}), None)
            .await
            .unwrap();
        store
            .save("b", &json!({"signals": [signal(1, "ESR", 10)]}), None)
            .await
            .unwrap();

        assert!(store.delete_signal("1").await.unwrap());

        let signals = store.list_signals().await.unwrap();
        assert!(signals.iter().all(|s| s["name"] != "CRP" && s["name"] != "ESR"));
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0]["name"], "WBC");
        // Remaining ids are rewritten as strings.
        assert_eq!(signals[0]["id"], "2");
    }

    #[tokio::test]
    async fn delete_nonexistent_signal_mutates_nothing() {
        let store = InMemoryReportStore::new();
        store
            .save("a", &json!({"signals": [signal(1, "CRP", 5)]}), None)
            .await
            .unwrap();

        assert!(!store.delete_signal("99").await.unwrap());
        assert_eq!(store.list_signals().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_event_by_id() {
        let store = InMemoryReportStore::new();
        store
            .save(
                "a",
                &json!({"events": [
                    { "id": "e1", "type": "infection", "description": "x" },
                    { "id": "e2", "type": "finding", "description": "y" }
                ]}),
                None,
            )
            .await
            .unwrap();

        assert!(store.delete_event("e1").await.unwrap());
        let events = store.list_events().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["id"], "e2");

        assert!(!store.delete_event("e1").await.unwrap());
    }

    #[test]
    fn remove_signal_coerces_numeric_ids() {
        let parsed = json!({"signals": [signal(1, "CRP", 5), signal(2, "WBC", 7)]});
        let rewritten = remove_signal(&parsed, "1").unwrap();
        let signals = rewritten["signals"].as_array().unwrap();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0]["id"], "2");
    }

    #[test]
    fn remove_signal_without_match_is_none() {
        let parsed = json!({"signals": [signal(1, "CRP", 5)]});
        assert!(remove_signal(&parsed, "7").is_none());
        assert!(remove_signal(&json!({"notes": "no signals"}), "1").is_none());
    }
}
