//! 线上消息结构
//!
//! `Envelope` 是 WebSocket 帧与 Kafka 消息共用的自描述 JSON 单元。
//! 字段名与操作码是线上协议的一部分，不得变更。

use serde::{Deserialize, Serialize};

/// 操作类型常量
pub mod operation {
    pub const CONNECT: i32 = 1;
    pub const CONNECT_ACK: i32 = 2;
    pub const HEARTBEAT: i32 = 3;
    pub const HEARTBEAT_ACK: i32 = 4;
    pub const SEND: i32 = 5;
    pub const SEND_ACK: i32 = 6;
    pub const DELIVER: i32 = 7;
    pub const DISCONNECT: i32 = 8;
}

/// 内容类型常量
pub mod content_type {
    pub const TEXT: i32 = 1;
    pub const IMAGE: i32 = 2;
    pub const VOICE: i32 = 3;
    pub const VIDEO: i32 = 4;
    pub const FILE: i32 = 5;
    pub const LOCATION: i32 = 6;
}

/// 接收者类型常量
pub mod receiver_type {
    pub const USER: i32 = 0;
    /// 群聊为预留扩展点，核心只实现单聊
    pub const GROUP: i32 = 1;
}

/// Kafka 主题常量
pub const MESSAGE_SEND_TOPIC: &str = "message_send";
pub const MESSAGE_RECEIVE_TOPIC: &str = "message_receive";

/// WebSocket / Kafka 消息信封
///
/// 未知字段在反序列化时被忽略；可选字段为空时不参与序列化。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub operation: i32,
    #[serde(default)]
    pub sequence: u64,
    #[serde(default)]
    pub sender_id: u64,
    #[serde(default)]
    pub receiver_id: u64,
    #[serde(default, skip_serializing_if = "is_zero_i32")]
    pub receiver_type: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub conversation_id: String,
    #[serde(default, skip_serializing_if = "is_zero_i32")]
    pub content_type: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
    #[serde(default, skip_serializing_if = "is_zero_i64")]
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub extra: String,
}

impl Envelope {
    /// 连接确认帧（升级成功后的首个服务端帧）
    pub fn connect_ack(timestamp: i64) -> Self {
        Self {
            operation: operation::CONNECT_ACK,
            timestamp,
            ..Default::default()
        }
    }

    /// 心跳确认帧
    pub fn heartbeat_ack(timestamp: i64) -> Self {
        Self {
            operation: operation::HEARTBEAT_ACK,
            timestamp,
            ..Default::default()
        }
    }

    /// 发送确认帧，`content` 表明接受或失败
    pub fn send_ack(id: &str, sequence: u64, timestamp: i64, content: &str) -> Self {
        Self {
            id: id.to_string(),
            operation: operation::SEND_ACK,
            sequence,
            timestamp,
            content: content.to_string(),
            ..Default::default()
        }
    }
}

fn is_zero_i32(v: &i32) -> bool {
    *v == 0
}

fn is_zero_i64(v: &i64) -> bool {
    *v == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_field_names_are_stable() {
        let envelope = Envelope {
            id: "m1".to_string(),
            operation: operation::SEND,
            sequence: 7,
            sender_id: 10,
            receiver_id: 20,
            receiver_type: receiver_type::GROUP,
            conversation_id: "10_20".to_string(),
            content_type: content_type::TEXT,
            content: "hi".to_string(),
            timestamp: 1700000000,
            extra: "{}".to_string(),
        };

        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&envelope).unwrap()).unwrap();
        for field in [
            "id",
            "operation",
            "sequence",
            "sender_id",
            "receiver_id",
            "receiver_type",
            "conversation_id",
            "content_type",
            "content",
            "timestamp",
            "extra",
        ] {
            assert!(value.get(field).is_some(), "missing wire field {field}");
        }
    }

    #[test]
    fn test_empty_optional_fields_are_omitted() {
        let envelope = Envelope {
            operation: operation::HEARTBEAT,
            ..Default::default()
        };
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(!json.contains("conversation_id"));
        assert!(!json.contains("content"));
        assert!(!json.contains("timestamp"));
        assert!(!json.contains("extra"));
        assert!(!json.contains("receiver_type"));
    }

    #[test]
    fn test_unknown_fields_are_tolerated() {
        let json = r#"{"operation":5,"receiver_id":20,"content":"hi","trace_id":"abc","nested":{"x":1}}"#;
        let envelope: Envelope = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.operation, operation::SEND);
        assert_eq!(envelope.receiver_id, 20);
        assert_eq!(envelope.content, "hi");
    }

    #[test]
    fn test_roundtrip_preserves_envelope() {
        let envelope = Envelope {
            id: "10_20_1700000000".to_string(),
            operation: operation::DELIVER,
            sequence: 3,
            sender_id: 10,
            receiver_id: 20,
            conversation_id: "10_20".to_string(),
            content_type: content_type::IMAGE,
            content: "https://cdn/img.png".to_string(),
            timestamp: 1700000000,
            ..Default::default()
        };
        let json = serde_json::to_string(&envelope).unwrap();
        let decoded: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_operation_codes_are_stable() {
        assert_eq!(operation::CONNECT, 1);
        assert_eq!(operation::CONNECT_ACK, 2);
        assert_eq!(operation::HEARTBEAT, 3);
        assert_eq!(operation::HEARTBEAT_ACK, 4);
        assert_eq!(operation::SEND, 5);
        assert_eq!(operation::SEND_ACK, 6);
        assert_eq!(operation::DELIVER, 7);
        assert_eq!(operation::DISCONNECT, 8);
        assert_eq!(content_type::TEXT, 1);
        assert_eq!(content_type::LOCATION, 6);
        assert_eq!(receiver_type::USER, 0);
        assert_eq!(receiver_type::GROUP, 1);
    }
}
