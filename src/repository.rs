use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use crate::message::{Message, Status};

/// Persistence operations for messages. Implemented by the Postgres adapter;
/// the service layer depends only on this trait.
#[async_trait::async_trait]
pub trait Repository: Send + Sync {
    /// Persists a new message.
    async fn save(&self, message: &Message) -> Result<()>;

    /// Returns up to `limit` pending messages, oldest first. The rows are
    /// exclusively claimed for the duration of the fetch so concurrent
    /// fetchers never receive the same message.
    async fn fetch_pending(&self, limit: usize) -> Result<Vec<Message>>;

    /// Returns a page of delivered messages plus the total delivered count.
    async fn fetch_delivered(&self, page: usize, limit: usize) -> Result<(Vec<Message>, i64)>;

    /// Persists the current status and provider metadata of a message.
    async fn update_status(&self, message: &Message) -> Result<()>;
}

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    recipient: String,
    content: String,
    status: String,
    message_id: String,
    raw_response: String,
    sent_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl MessageRow {
    fn into_domain(self) -> Result<Message> {
        let status = Status::parse(&self.status)
            .with_context(|| format!("Unknown message status in db: {}", self.status))?;
        Ok(Message {
            id: self.id,
            to: self.recipient,
            content: self.content,
            status,
            message_id: self.message_id,
            raw_response: self.raw_response,
            sent_at: self.sent_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const MESSAGE_COLUMNS: &str =
    "id, recipient, content, status, message_id, raw_response, sent_at, created_at, updated_at";

/// Postgres-backed repository.
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await
            .context("Failed to connect to Postgres")?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        MIGRATOR
            .run(&self.pool)
            .await
            .context("Failed to run database migrations")?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Repository for PgRepository {
    async fn save(&self, message: &Message) -> Result<()> {
        sqlx::query(
            "INSERT INTO messages \
             (id, recipient, content, status, message_id, raw_response, sent_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(message.id)
        .bind(&message.to)
        .bind(&message.content)
        .bind(message.status.as_str())
        .bind(&message.message_id)
        .bind(&message.raw_response)
        .bind(message.sent_at)
        .bind(message.created_at)
        .bind(message.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert message")?;
        Ok(())
    }

    async fn fetch_pending(&self, limit: usize) -> Result<Vec<Message>> {
        // SKIP LOCKED keeps concurrent fetchers from claiming the same rows.
        let mut tx = self.pool.begin().await.context("Failed to begin fetch")?;

        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE status = $1 \
             ORDER BY created_at ASC \
             LIMIT $2 \
             FOR UPDATE SKIP LOCKED"
        ))
        .bind(Status::Pending.as_str())
        .bind(limit as i64)
        .fetch_all(&mut *tx)
        .await
        .context("Failed to fetch pending messages")?;

        tx.commit().await.context("Failed to commit fetch")?;

        rows.into_iter().map(MessageRow::into_domain).collect()
    }

    async fn fetch_delivered(&self, page: usize, limit: usize) -> Result<(Vec<Message>, i64)> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE status = $1")
            .bind(Status::Success.as_str())
            .fetch_one(&self.pool)
            .await
            .context("Failed to count delivered messages")?;

        let offset = page.saturating_sub(1) * limit;
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE status = $1 \
             ORDER BY sent_at DESC \
             LIMIT $2 OFFSET $3"
        ))
        .bind(Status::Success.as_str())
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch delivered messages")?;

        let messages = rows
            .into_iter()
            .map(MessageRow::into_domain)
            .collect::<Result<Vec<_>>>()?;
        Ok((messages, total))
    }

    async fn update_status(&self, message: &Message) -> Result<()> {
        sqlx::query(
            "UPDATE messages \
             SET status = $1, message_id = $2, raw_response = $3, sent_at = $4, updated_at = $5 \
             WHERE id = $6",
        )
        .bind(message.status.as_str())
        .bind(&message.message_id)
        .bind(&message.raw_response)
        .bind(message.sent_at)
        .bind(message.updated_at)
        .bind(message.id)
        .execute(&self.pool)
        .await
        .context("Failed to update message status")?;
        Ok(())
    }
}
