//! 消息服务
//!
//! 服务端主动发消息的入口（系统通知、业务回调等）：
//! 分配雪花 ID、推导会话 ID、落库，接收者在本实例在线时直接投递。
//! 与客户端上行不同，该路径不经过消息桥。

use std::sync::Arc;

use chrono::Utc;
use tracing::error;

use crate::domain::conversation::derive_conversation_id;
use crate::domain::envelope::{operation, receiver_type, Envelope};
use crate::domain::gateway::MessageGateway;
use crate::domain::message::{status, Message};
use crate::domain::repositories::MessageRepository;
use crate::error::Result;
use crate::infrastructure::snowflake::SnowflakeGenerator;

pub struct MessageService {
    repository: Arc<dyn MessageRepository>,
    gateway: Arc<dyn MessageGateway>,
    id_generator: Arc<SnowflakeGenerator>,
}

impl MessageService {
    pub fn new(
        repository: Arc<dyn MessageRepository>,
        gateway: Arc<dyn MessageGateway>,
        id_generator: Arc<SnowflakeGenerator>,
    ) -> Self {
        Self {
            repository,
            gateway,
            id_generator,
        }
    }

    /// 发送一条服务端消息，返回落库实体
    pub async fn send_message(
        &self,
        sender_id: u64,
        receiver_id: u64,
        content_type: i32,
        content: &str,
    ) -> Result<Message> {
        let msg_id = self.id_generator.generate();
        let conversation_id = derive_conversation_id(sender_id, receiver_id);
        let now = Utc::now();

        let message = Message {
            msg_id: msg_id.clone(),
            conversation_id: conversation_id.clone(),
            sender_id,
            receiver_type: receiver_type::USER,
            receiver_id,
            content_type,
            content: content.to_string(),
            extra: String::new(),
            send_time: now,
            status: status::SENT,
            created_at: now,
            updated_at: now,
        };

        self.repository.save(&message).await?;

        let deliver = Envelope {
            id: msg_id,
            operation: operation::DELIVER,
            sender_id,
            receiver_id,
            receiver_type: receiver_type::USER,
            conversation_id,
            content_type,
            content: content.to_string(),
            timestamp: now.timestamp(),
            ..Default::default()
        };

        match serde_json::to_string(&deliver) {
            Ok(payload) => {
                if self.gateway.is_user_online(receiver_id).await {
                    self.gateway.send_to_user(receiver_id, &payload).await;
                }
            }
            // 落库已经成功，序列化失败只影响即时投递
            Err(err) => error!(?err, msg_id = %message.msg_id, "failed to encode deliver envelope"),
        }

        Ok(message)
    }
}
