//! SQLite-backed audit trail of LLM requests and responses.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opencore_domain::{RequestId, RequestOutcome, RequesterId};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::infrastructure::ports::{AuditEntry, AuditPort, AuditRequest, AuditResponse, RepoError};

/// SQLite implementation of the audit trail.
///
/// One row per admitted request; the terminal result is written into the same
/// row when the request completes.
pub struct SqliteAuditLog {
    pool: SqlitePool,
}

impl SqliteAuditLog {
    pub async fn new(db_path: &str) -> Result<Self, RepoError> {
        let pool = SqlitePool::connect(&format!("sqlite:{}?mode=rwc", db_path))
            .await
            .map_err(|e| RepoError::database("llm_log", e))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS llm_log (
                request_id TEXT PRIMARY KEY,
                requester_id TEXT,
                policy TEXT,
                prompt TEXT NOT NULL,
                request_time TEXT NOT NULL,
                response TEXT,
                outcome TEXT,
                attempts INTEGER,
                latency_ms INTEGER,
                error TEXT,
                response_time TEXT
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| RepoError::database("llm_log", e))?;

        Ok(Self { pool })
    }

    /// Fetch a single request by id.
    pub async fn get(&self, request_id: RequestId) -> Result<Option<AuditEntry>, RepoError> {
        let row = sqlx::query("SELECT * FROM llm_log WHERE request_id = ?")
            .bind(request_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepoError::database("llm_log", e))?;

        row.map(|r| row_to_entry(&r)).transpose()
    }

    /// Most recent requests first.
    pub async fn recent(&self, limit: u32) -> Result<Vec<AuditEntry>, RepoError> {
        let rows = sqlx::query("SELECT * FROM llm_log ORDER BY request_time DESC LIMIT ?")
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RepoError::database("llm_log", e))?;

        rows.iter().map(row_to_entry).collect()
    }
}

#[async_trait]
impl AuditPort for SqliteAuditLog {
    async fn record_request(&self, entry: &AuditRequest) -> Result<(), RepoError> {
        sqlx::query(
            r#"
            INSERT INTO llm_log (request_id, requester_id, policy, prompt, request_time)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(request_id) DO NOTHING
            "#,
        )
        .bind(entry.request_id.to_string())
        .bind(entry.requester_id.map(|id| id.to_string()))
        .bind(entry.policy.as_deref())
        .bind(&entry.prompt)
        .bind(entry.submitted_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| RepoError::database("llm_log", e))?;

        Ok(())
    }

    async fn record_response(&self, entry: &AuditResponse) -> Result<(), RepoError> {
        let result = sqlx::query(
            r#"
            UPDATE llm_log SET
                response = ?,
                outcome = ?,
                attempts = ?,
                latency_ms = ?,
                error = ?,
                response_time = ?
            WHERE request_id = ?
            "#,
        )
        .bind(entry.response.as_deref())
        .bind(entry.outcome.as_str())
        .bind(i64::from(entry.attempts))
        .bind(entry.latency_ms.map(|ms| ms as i64))
        .bind(entry.error.as_deref())
        .bind(entry.completed_at.to_rfc3339())
        .bind(entry.request_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| RepoError::database("llm_log", e))?;

        if result.rows_affected() == 0 {
            return Err(RepoError::not_found("AuditEntry", entry.request_id));
        }
        Ok(())
    }
}

fn parse_time(value: &str) -> Result<DateTime<Utc>, RepoError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| RepoError::serialization(e))
}

fn parse_uuid(value: &str) -> Result<Uuid, RepoError> {
    Uuid::parse_str(value).map_err(|e| RepoError::serialization(e))
}

fn row_to_entry(row: &SqliteRow) -> Result<AuditEntry, RepoError> {
    let request_id: String = row.get("request_id");
    let requester_id: Option<String> = row.get("requester_id");
    let request_time: String = row.get("request_time");
    let outcome: Option<String> = row.get("outcome");
    let attempts: Option<i64> = row.get("attempts");
    let latency_ms: Option<i64> = row.get("latency_ms");
    let response_time: Option<String> = row.get("response_time");

    Ok(AuditEntry {
        request_id: RequestId::from_uuid(parse_uuid(&request_id)?),
        requester_id: requester_id
            .as_deref()
            .map(parse_uuid)
            .transpose()?
            .map(RequesterId::from_uuid),
        policy: row.get("policy"),
        prompt: row.get("prompt"),
        submitted_at: parse_time(&request_time)?,
        response: row.get("response"),
        outcome: outcome.map(|o| o.parse().unwrap_or(RequestOutcome::Unknown)),
        attempts: attempts.map(|a| a as u32),
        latency_ms: latency_ms.map(|ms| ms as u64),
        error: row.get("error"),
        completed_at: response_time.as_deref().map(parse_time).transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    async fn open_log() -> (tempfile::TempDir, SqliteAuditLog) {
        let temp_dir = tempfile::tempdir().expect("tempdir");
        let db_path = temp_dir.path().join("audit.db");
        let log = SqliteAuditLog::new(&db_path.to_string_lossy())
            .await
            .expect("open audit log");
        (temp_dir, log)
    }

    fn request(prompt: &str, secs: i64) -> AuditRequest {
        AuditRequest {
            request_id: RequestId::new(),
            requester_id: Some(RequesterId::new()),
            policy: Some("chat_analysis".to_string()),
            prompt: prompt.to_string(),
            submitted_at: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn request_then_response_fill_one_row() {
        let (_dir, log) = open_log().await;
        let req = request("analyze this", 0);
        log.record_request(&req).await.expect("record request");

        let pending = log.get(req.request_id).await.expect("get").expect("row");
        assert_eq!(pending.prompt, "analyze this");
        assert_eq!(pending.outcome, None);

        let completed_at = Utc.timestamp_opt(1_700_000_005, 0).unwrap();
        log.record_response(&AuditResponse {
            request_id: req.request_id,
            response: Some("not json".to_string()),
            outcome: RequestOutcome::ValidationFailed,
            attempts: 1,
            latency_ms: Some(850),
            error: Some("expected a JSON object or array".to_string()),
            completed_at,
        })
        .await
        .expect("record response");

        let entry = log.get(req.request_id).await.expect("get").expect("row");
        assert_eq!(entry.requester_id, req.requester_id);
        assert_eq!(entry.policy.as_deref(), Some("chat_analysis"));
        assert_eq!(entry.response.as_deref(), Some("not json"));
        assert_eq!(entry.outcome, Some(RequestOutcome::ValidationFailed));
        assert_eq!(entry.attempts, Some(1));
        assert_eq!(entry.latency_ms, Some(850));
        assert_eq!(entry.completed_at, Some(completed_at));
    }

    #[tokio::test]
    async fn response_without_request_is_not_found() {
        let (_dir, log) = open_log().await;
        let err = log
            .record_response(&AuditResponse {
                request_id: RequestId::new(),
                response: None,
                outcome: RequestOutcome::Failed,
                attempts: 3,
                latency_ms: None,
                error: None,
                completed_at: Utc::now(),
            })
            .await
            .expect_err("no row");
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn recent_lists_newest_first() {
        let (_dir, log) = open_log().await;
        let older = request("first", 0);
        let newer = request("second", 10);
        log.record_request(&older).await.expect("older");
        log.record_request(&newer).await.expect("newer");

        let entries = log.recent(10).await.expect("recent");
        let prompts: Vec<_> = entries.iter().map(|e| e.prompt.as_str()).collect();
        assert_eq!(prompts, vec!["second", "first"]);

        assert_eq!(log.recent(1).await.expect("recent").len(), 1);
    }
}
