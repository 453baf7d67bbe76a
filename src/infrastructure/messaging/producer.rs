//! Kafka 生产者
//!
//! 同步语义：acks=all，内部最多重试 5 次，重试耗尽返回 `Publish` 错误。
//! 发送句柄由互斥锁串行化，保证单实例下分区内按调用顺序写入。

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::ClientConfig;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::domain::repositories::EnvelopePublisher;
use crate::error::{GatewayError, Result};

pub struct KafkaEnvelopeProducer {
    producer: Mutex<FutureProducer>,
    send_timeout: Duration,
}

impl KafkaEnvelopeProducer {
    pub fn new(brokers: &str, send_timeout: Duration) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("acks", "all")
            .set("message.send.max.retries", "5")
            .set("message.timeout.ms", &send_timeout.as_millis().to_string())
            .create()
            .map_err(|err| GatewayError::Config(format!("failed to build kafka producer: {err}")))?;

        Ok(Self {
            producer: Mutex::new(producer),
            send_timeout,
        })
    }

    /// 停机前清空发送队列
    pub async fn shutdown(&self) {
        let producer = self.producer.lock().await;
        if let Err(err) = producer.flush(Timeout::After(self.send_timeout)) {
            warn!(?err, "failed to flush kafka producer on shutdown");
        }
    }
}

#[async_trait]
impl EnvelopePublisher for KafkaEnvelopeProducer {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<()> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        let producer = self.producer.lock().await;
        producer
            .send(record, Timeout::After(self.send_timeout))
            .await
            .map_err(|(err, _)| GatewayError::Publish(err.to_string()))?;

        debug!(topic, key, payload_len = payload.len(), "envelope published");
        Ok(())
    }
}
