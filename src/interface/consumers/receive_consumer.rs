//! RECEIVE 主题消费者
//!
//! 每个网关实例以独立消费组订阅下行主题，把 DELIVER 信封交给网关
//! 做本地投递；接收者不在本实例时静默丢弃。

use std::sync::Arc;

use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message as _;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::domain::envelope::{Envelope, MESSAGE_RECEIVE_TOPIC};
use crate::error::Result;
use crate::interface::ws::gateway::Gateway;

use super::{build_consumer, commit_message, receive_backoff};

pub struct ReceiveTopicConsumer {
    consumer: StreamConsumer,
    gateway: Arc<Gateway>,
    shutdown: CancellationToken,
}

impl ReceiveTopicConsumer {
    /// `instance_id` 唯一标识本网关实例，用于派生独立消费组
    pub fn new(
        brokers: &str,
        instance_id: &str,
        gateway: Arc<Gateway>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let group_id = format!("gateway-{instance_id}");
        let consumer = build_consumer(brokers, &group_id)?;
        Ok(Self {
            consumer,
            gateway,
            shutdown,
        })
    }

    pub async fn run(&self) -> Result<()> {
        self.consumer
            .subscribe(&[MESSAGE_RECEIVE_TOPIC])
            .map_err(|err| crate::error::GatewayError::Config(err.to_string()))?;

        info!(topic = MESSAGE_RECEIVE_TOPIC, "receive consumer started");

        let mut consecutive_errors = 0u32;
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                received = self.consumer.recv() => match received {
                    Ok(record) => {
                        consecutive_errors = 0;

                        let Some(payload) = record.payload() else {
                            warn!("empty payload on receive topic, skipping");
                            commit_message(&self.consumer, &record);
                            continue;
                        };

                        match serde_json::from_slice::<Envelope>(payload) {
                            Ok(envelope) => {
                                let raw = String::from_utf8_lossy(payload);
                                self.gateway.deliver_local(&envelope, &raw).await;
                            }
                            Err(err) => {
                                error!(
                                    ?err,
                                    offset = record.offset(),
                                    "undecodable envelope on receive topic, skipping"
                                );
                            }
                        }
                        commit_message(&self.consumer, &record);
                    }
                    Err(err) => {
                        consecutive_errors += 1;
                        error!(?err, consecutive_errors, "error receiving from receive topic");
                        tokio::time::sleep(receive_backoff(consecutive_errors)).await;
                    }
                }
            }
        }

        info!("receive consumer stopped");
        Ok(())
    }
}
