//! SQLite inbox for answers whose requester was not around to receive them.
//!
//! Rows are kept after delivery; `delivered` only hides them from
//! [`SqliteResponseInbox::pending`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use opencore_domain::RequesterId;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::infrastructure::ports::{ClockPort, RepoError};
use crate::orchestrator::Continuation;

/// One stored answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredResponse {
    pub id: i64,
    pub requester_id: RequesterId,
    /// Feature that asked, e.g. a policy name
    pub module: Option<String>,
    pub response: String,
    pub created_at: DateTime<Utc>,
    pub delivered: bool,
}

impl StoredResponse {
    /// Text as shown to the requester, tagged with its module.
    pub fn display_text(&self) -> String {
        match self.module.as_deref() {
            Some(module) if !module.is_empty() => format!("[{}] {}", module, self.response),
            _ => self.response.clone(),
        }
    }
}

pub struct SqliteResponseInbox {
    pool: SqlitePool,
    clock: Arc<dyn ClockPort>,
}

impl SqliteResponseInbox {
    pub async fn new(db_path: &str, clock: Arc<dyn ClockPort>) -> Result<Self, RepoError> {
        let pool = SqlitePool::connect(&format!("sqlite:{}?mode=rwc", db_path))
            .await
            .map_err(|e| RepoError::database("llm_responses", e))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS llm_responses (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                requester_id TEXT NOT NULL,
                module TEXT,
                response TEXT NOT NULL,
                created_at TEXT NOT NULL,
                delivered INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| RepoError::database("llm_responses", e))?;

        Ok(Self { pool, clock })
    }

    pub async fn store(
        &self,
        requester: RequesterId,
        module: Option<&str>,
        response: &str,
    ) -> Result<i64, RepoError> {
        let result = sqlx::query(
            r#"
            INSERT INTO llm_responses (requester_id, module, response, created_at, delivered)
            VALUES (?, ?, ?, ?, 0)
            "#,
        )
        .bind(requester.to_string())
        .bind(module)
        .bind(response)
        .bind(self.clock.now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| RepoError::database("llm_responses", e))?;

        Ok(result.last_insert_rowid())
    }

    /// Undelivered answers for the requester, oldest first.
    pub async fn pending(&self, requester: RequesterId) -> Result<Vec<StoredResponse>, RepoError> {
        let rows = sqlx::query(
            "SELECT * FROM llm_responses WHERE requester_id = ? AND delivered = 0 ORDER BY id",
        )
        .bind(requester.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepoError::database("llm_responses", e))?;

        rows.iter().map(row_to_response).collect()
    }

    pub async fn mark_delivered(&self, id: i64) -> Result<(), RepoError> {
        let result = sqlx::query("UPDATE llm_responses SET delivered = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| RepoError::database("llm_responses", e))?;

        if result.rows_affected() == 0 {
            return Err(RepoError::not_found("StoredResponse", id));
        }
        Ok(())
    }

    /// Newest answers for the requester, delivered or not.
    pub async fn recent(
        &self,
        requester: RequesterId,
        limit: u32,
    ) -> Result<Vec<StoredResponse>, RepoError> {
        let rows = sqlx::query(
            "SELECT * FROM llm_responses WHERE requester_id = ? ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(requester.to_string())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepoError::database("llm_responses", e))?;

        rows.iter().map(row_to_response).collect()
    }

    /// Continuation that files a non-empty answer in the inbox.
    ///
    /// Must be fired inside a Tokio runtime; outside one the answer is
    /// dropped with a warning.
    pub fn continuation_for(
        self: &Arc<Self>,
        requester: RequesterId,
        module: Option<String>,
    ) -> Continuation {
        let inbox = Arc::clone(self);
        Continuation::new(move |answer| {
            let Some(text) = answer else {
                return;
            };
            let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                tracing::warn!(requester_id = %requester, "No runtime to store LLM response");
                return;
            };
            runtime.spawn(async move {
                if let Err(e) = inbox.store(requester, module.as_deref(), &text).await {
                    tracing::warn!(
                        requester_id = %requester,
                        error = %e,
                        "Failed to store LLM response"
                    );
                }
            });
        })
    }
}

fn row_to_response(row: &SqliteRow) -> Result<StoredResponse, RepoError> {
    let requester_id: String = row.get("requester_id");
    let created_at: String = row.get("created_at");
    let delivered: i64 = row.get("delivered");

    Ok(StoredResponse {
        id: row.get("id"),
        requester_id: uuid::Uuid::parse_str(&requester_id)
            .map(RequesterId::from_uuid)
            .map_err(RepoError::serialization)?,
        module: row.get("module"),
        response: row.get("response"),
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|t| t.with_timezone(&Utc))
            .map_err(RepoError::serialization)?,
        delivered: delivered != 0,
    })
}
