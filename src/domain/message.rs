//! 消息实体

use chrono::{DateTime, TimeZone, Utc};

use crate::domain::conversation::derive_conversation_id;
use crate::domain::envelope::{receiver_type, Envelope};

/// 消息状态常量
pub mod status {
    pub const UNSENT: i32 = 0;
    pub const SENT: i32 = 1;
    pub const DELIVERED: i32 = 2;
    pub const READ: i32 = 3;
    pub const RECALLED: i32 = 4;
    pub const DELETED: i32 = 5;
}

/// 落库消息实体，以 `msg_id` 为业务唯一键
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub msg_id: String,
    pub conversation_id: String,
    pub sender_id: u64,
    pub receiver_type: i32,
    pub receiver_id: u64,
    pub content_type: i32,
    pub content: String,
    pub extra: String,
    pub send_time: DateTime<Utc>,
    pub status: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// 由信封构造落库实体
    ///
    /// 会话 ID 缺失时按单聊规则推导；时间字段统一取信封的服务端时间戳。
    pub fn from_envelope(envelope: &Envelope) -> Self {
        let conversation_id = if envelope.conversation_id.is_empty()
            && envelope.receiver_type == receiver_type::USER
        {
            derive_conversation_id(envelope.sender_id, envelope.receiver_id)
        } else {
            envelope.conversation_id.clone()
        };

        let stamped = Utc
            .timestamp_opt(envelope.timestamp, 0)
            .single()
            .unwrap_or_else(Utc::now);

        Self {
            msg_id: envelope.id.clone(),
            conversation_id,
            sender_id: envelope.sender_id,
            receiver_type: envelope.receiver_type,
            receiver_id: envelope.receiver_id,
            content_type: envelope.content_type,
            content: envelope.content.clone(),
            extra: envelope.extra.clone(),
            send_time: stamped,
            status: status::SENT,
            created_at: stamped,
            updated_at: stamped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::envelope::{content_type, operation};

    fn send_envelope() -> Envelope {
        Envelope {
            id: "10_20_1700000000".to_string(),
            operation: operation::SEND,
            sender_id: 10,
            receiver_id: 20,
            content_type: content_type::TEXT,
            content: "hi".to_string(),
            timestamp: 1_700_000_000,
            ..Default::default()
        }
    }

    #[test]
    fn test_from_envelope_derives_conversation_and_status() {
        let message = Message::from_envelope(&send_envelope());
        assert_eq!(message.conversation_id, "10_20");
        assert_eq!(message.status, status::SENT);
        assert_eq!(message.send_time.timestamp(), 1_700_000_000);
        assert_eq!(message.created_at, message.send_time);
        assert_eq!(message.updated_at, message.send_time);
    }

    #[test]
    fn test_from_envelope_keeps_existing_conversation() {
        let mut envelope = send_envelope();
        envelope.conversation_id = "10_20".to_string();
        let message = Message::from_envelope(&envelope);
        assert_eq!(message.conversation_id, "10_20");
    }

    #[test]
    fn test_from_envelope_does_not_derive_for_group() {
        let mut envelope = send_envelope();
        envelope.receiver_type = receiver_type::GROUP;
        let message = Message::from_envelope(&envelope);
        assert!(message.conversation_id.is_empty());
    }
}
