//! 在线状态镜像（Redis）
//!
//! 将本进程的会话注册/注销写入共享缓存，供其他网关实例定位会话。
//! 键为 `user_online:{user_id}` 的哈希，字段为设备 ID，值为最近一次
//! 可达的秒级时间戳。镜像与本地索引允许短暂不一致，本地索引为准。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::{aio::ConnectionManager, AsyncCommands};
use tokio::time::timeout;

use crate::domain::repositories::PresenceMirror;
use crate::error::{GatewayError, Result};

const USER_ONLINE_PREFIX: &str = "user_online:";

pub struct RedisPresenceMirror {
    client: Arc<redis::Client>,
    op_timeout: Duration,
}

impl RedisPresenceMirror {
    pub fn new(client: Arc<redis::Client>, op_timeout: Duration) -> Self {
        Self { client, op_timeout }
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        ConnectionManager::new(self.client.as_ref().clone())
            .await
            .map_err(|err| GatewayError::Cache(err.to_string()))
    }

    fn online_key(user_id: u64) -> String {
        format!("{}{}", USER_ONLINE_PREFIX, user_id)
    }

    async fn with_timeout<T>(
        &self,
        what: &str,
        op: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        timeout(self.op_timeout, op)
            .await
            .map_err(|_| GatewayError::Cache(format!("presence mirror {what} timed out")))?
    }
}

#[async_trait]
impl PresenceMirror for RedisPresenceMirror {
    async fn mark_online(&self, user_id: u64, device_id: &str) -> Result<()> {
        self.with_timeout("write", async {
            let mut conn = self.connection().await?;
            let _: () = conn
                .hset(
                    Self::online_key(user_id),
                    device_id,
                    Utc::now().timestamp(),
                )
                .await
                .map_err(|err| GatewayError::Cache(err.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn mark_offline(&self, user_id: u64, device_id: &str) -> Result<()> {
        self.with_timeout("delete", async {
            let mut conn = self.connection().await?;
            let _: usize = conn
                .hdel(Self::online_key(user_id), device_id)
                .await
                .map_err(|err| GatewayError::Cache(err.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn is_user_online(&self, user_id: u64) -> Result<bool> {
        self.with_timeout("read", async {
            let mut conn = self.connection().await?;
            let devices: usize = conn
                .hlen(Self::online_key(user_id))
                .await
                .map_err(|err| GatewayError::Cache(err.to_string()))?;
            Ok(devices > 0)
        })
        .await
    }
}
