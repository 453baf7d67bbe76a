//! SEND 主题消费者
//!
//! 按分区内偏移顺序驱动投递管道。处理失败记录错误并提交偏移：
//! Kafka 日志本身就是重放面，重放时落库以 `msg_id` 幂等。

use std::sync::Arc;

use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message as _;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::application::delivery::DeliveryService;
use crate::domain::envelope::{Envelope, MESSAGE_SEND_TOPIC};
use crate::error::Result;

use super::{build_consumer, commit_message, receive_backoff, DELIVERY_PIPELINE_GROUP};

pub struct SendTopicConsumer {
    consumer: StreamConsumer,
    delivery: Arc<DeliveryService>,
    shutdown: CancellationToken,
}

impl SendTopicConsumer {
    pub fn new(
        brokers: &str,
        delivery: Arc<DeliveryService>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let consumer = build_consumer(brokers, DELIVERY_PIPELINE_GROUP)?;
        Ok(Self {
            consumer,
            delivery,
            shutdown,
        })
    }

    pub async fn run(&self) -> Result<()> {
        self.consumer
            .subscribe(&[MESSAGE_SEND_TOPIC])
            .map_err(|err| crate::error::GatewayError::Config(err.to_string()))?;

        info!(
            topic = MESSAGE_SEND_TOPIC,
            group = DELIVERY_PIPELINE_GROUP,
            "send consumer started"
        );

        let mut consecutive_errors = 0u32;
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                received = self.consumer.recv() => match received {
                    Ok(record) => {
                        consecutive_errors = 0;

                        let Some(payload) = record.payload() else {
                            warn!("empty payload on send topic, skipping");
                            commit_message(&self.consumer, &record);
                            continue;
                        };

                        match serde_json::from_slice::<Envelope>(payload) {
                            Ok(envelope) => {
                                if let Err(err) = self.delivery.process(&envelope).await {
                                    // 提交并丢弃：单条坏消息不得阻塞分区
                                    error!(
                                        ?err,
                                        msg_id = %envelope.id,
                                        offset = record.offset(),
                                        "delivery processing failed, committing offset anyway"
                                    );
                                }
                            }
                            Err(err) => {
                                error!(
                                    ?err,
                                    offset = record.offset(),
                                    partition = record.partition(),
                                    "undecodable envelope on send topic, skipping"
                                );
                            }
                        }
                        commit_message(&self.consumer, &record);
                    }
                    Err(err) => {
                        consecutive_errors += 1;
                        error!(?err, consecutive_errors, "error receiving from send topic");
                        tokio::time::sleep(receive_backoff(consecutive_errors)).await;
                    }
                }
            }
        }

        info!("send consumer stopped");
        Ok(())
    }
}
