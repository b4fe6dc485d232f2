use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::TaskError;
use crate::task_store::TaskStore;
use crate::types_tasks::{Task, TaskStatus};

pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), TaskError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| TaskError::Persistence(format!("migrations: {e}")))
    }

    pub async fn ping(&self) -> Result<(), TaskError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TaskRow {
    id: Uuid,
    text: String,
    status: String,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl TryFrom<TaskRow> for Task {
    type Error = TaskError;

    fn try_from(r: TaskRow) -> Result<Self, Self::Error> {
        Ok(Task {
            id: r.id,
            text: r.text,
            status: r.status.parse().map_err(TaskError::Persistence)?,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

async fn append_event_tx(tx: &mut Transaction<'_, Postgres>, task_id: Uuid, event: JsonValue) -> Result<(), TaskError> {
    sqlx::query(r#"INSERT INTO task_events (task_id, event) VALUES ($1, $2)"#)
        .bind(task_id)
        .bind(&event)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn create_task(&self, text: &str) -> Result<Uuid, TaskError> {
        let id = Uuid::new_v4();
        let mut tx = self.pool.begin().await?;

        sqlx::query(r#"INSERT INTO tasks (id, text, status) VALUES ($1, $2, 'pending')"#)
            .bind(id)
            .bind(text)
            .execute(&mut *tx)
            .await?;
        append_event_tx(&mut tx, id, serde_json::json!({ "type": "created", "status": "pending" })).await?;

        tx.commit().await?;
        Ok(id)
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<Task>, TaskError> {
        let row: Option<TaskRow> = sqlx::query_as(
            r#"
            SELECT id, text, status, created_at, updated_at
            FROM tasks
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Task::try_from).transpose()
    }

    async fn update_status(&self, id: Uuid, status: TaskStatus) -> Result<(), TaskError> {
        let mut tx = self.pool.begin().await?;

        // 1) Lock the row and read the current status
        let current: Option<(String,)> = sqlx::query_as(r#"SELECT status FROM tasks WHERE id = $1 FOR UPDATE"#)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some((current,)) = current else {
            return Err(TaskError::NotFound(id));
        };
        let current: TaskStatus = current.parse().map_err(TaskError::Persistence)?;

        if !current.can_transition_to(status) {
            return Err(TaskError::Persistence(format!(
                "illegal transition {} -> {}",
                current.as_str(),
                status.as_str()
            )));
        }

        // 2) Write the transition and its audit event together
        sqlx::query(r#"UPDATE tasks SET status = $2, updated_at = NOW() WHERE id = $1"#)
            .bind(id)
            .bind(status.as_str())
            .execute(&mut *tx)
            .await?;
        append_event_tx(
            &mut tx,
            id,
            serde_json::json!({ "type": "status", "from": current.as_str(), "to": status.as_str() }),
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, TaskError> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            r#"
            SELECT id, text, status, created_at, updated_at
            FROM tasks
            WHERE status = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Task::try_from).collect()
    }
}
