//! 消息仓储（PostgreSQL）
//!
//! `msg_id` 上有唯一索引；重复投递同一信封时 `ON CONFLICT DO NOTHING`
//! 保证落库是幂等的（投递管道可能因消费重放多次处理同一消息）。

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;

use crate::domain::message::Message;
use crate::domain::repositories::MessageRepository;
use crate::error::{GatewayError, Result};

pub struct PostgresMessageRepository {
    pool: Arc<PgPool>,
}

impl PostgresMessageRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageRepository for PostgresMessageRepository {
    async fn save(&self, message: &Message) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO messages (
                msg_id, conversation_id, sender_id, receiver_type, receiver_id,
                content_type, content, extra, send_time, status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (msg_id) DO NOTHING
            "#,
        )
        .bind(&message.msg_id)
        .bind(&message.conversation_id)
        .bind(message.sender_id as i64)
        .bind(message.receiver_type)
        .bind(message.receiver_id as i64)
        .bind(message.content_type)
        .bind(&message.content)
        .bind(&message.extra)
        .bind(message.send_time)
        .bind(message.status)
        .bind(message.created_at)
        .bind(message.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|err| GatewayError::Persist(err.to_string()))?;

        if result.rows_affected() == 0 {
            debug!(msg_id = %message.msg_id, "duplicate message, store unchanged");
        }
        Ok(())
    }
}
