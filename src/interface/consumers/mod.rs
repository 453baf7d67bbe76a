//! Kafka 消费者
//!
//! SEND 主题由投递管道的共享消费组消费；RECEIVE 主题每个网关实例
//! 使用独立消费组，保证每条下行消息到达所有实例。
//! 两个消费者都采用手动提交：处理失败时记录错误并照常提交，
//! 避免单条坏消息阻塞整个分区（消息的权威记录在关系存储中）。

pub mod receive_consumer;
pub mod send_consumer;

use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message as _};
use rdkafka::ClientConfig;
use tracing::{debug, warn};

use crate::error::{GatewayError, Result};

/// SEND 主题的共享消费组
pub const DELIVERY_PIPELINE_GROUP: &str = "delivery-pipeline";

pub(crate) fn build_consumer(brokers: &str, group_id: &str) -> Result<StreamConsumer> {
    ClientConfig::new()
        .set("bootstrap.servers", brokers)
        .set("group.id", group_id)
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", "latest")
        .create()
        .map_err(|err| GatewayError::Config(format!("failed to build kafka consumer: {err}")))
}

pub(crate) fn commit_message(consumer: &StreamConsumer, message: &BorrowedMessage<'_>) {
    if let Err(err) = consumer.commit_message(message, CommitMode::Async) {
        warn!(
            ?err,
            offset = message.offset(),
            partition = message.partition(),
            "failed to commit kafka offset"
        );
    } else {
        debug!(
            offset = message.offset(),
            partition = message.partition(),
            "kafka offset committed"
        );
    }
}

/// 连续收包失败时的退避：前 10 次快速重试，之后逐级放缓
pub(crate) fn receive_backoff(consecutive_errors: u32) -> std::time::Duration {
    if consecutive_errors < 10 {
        std::time::Duration::from_millis(100)
    } else if consecutive_errors < 50 {
        std::time::Duration::from_millis(1000)
    } else {
        std::time::Duration::from_secs(5)
    }
}
