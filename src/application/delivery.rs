//! 投递管道
//!
//! SEND 消费者驱动的无状态信封处理器：落库，然后向下行主题生产
//! DELIVER 信封（按接收者分区），接收者恰好在本实例在线时再走一次
//! 本地快路径降低时延。消息桥始终是权威投递路径，快路径只是补充，
//! 客户端按 `id` 去重。

use std::sync::Arc;

use tracing::{debug, info};

use crate::domain::conversation::derive_conversation_id;
use crate::domain::envelope::{operation, receiver_type, Envelope, MESSAGE_RECEIVE_TOPIC};
use crate::domain::gateway::MessageGateway;
use crate::domain::message::Message;
use crate::domain::repositories::{EnvelopePublisher, MessageRepository};
use crate::error::Result;

pub struct DeliveryService {
    repository: Arc<dyn MessageRepository>,
    publisher: Arc<dyn EnvelopePublisher>,
    gateway: Arc<dyn MessageGateway>,
}

impl DeliveryService {
    pub fn new(
        repository: Arc<dyn MessageRepository>,
        publisher: Arc<dyn EnvelopePublisher>,
        gateway: Arc<dyn MessageGateway>,
    ) -> Self {
        Self {
            repository,
            publisher,
            gateway,
        }
    }

    /// 处理一条上行信封；重放（同 `msg_id`）时落库为空操作，
    /// DELIVER 会重复生产，由客户端去重
    pub async fn process(&self, envelope: &Envelope) -> Result<()> {
        let mut envelope = envelope.clone();
        if envelope.conversation_id.is_empty() && envelope.receiver_type == receiver_type::USER {
            envelope.conversation_id =
                derive_conversation_id(envelope.sender_id, envelope.receiver_id);
        }

        let message = Message::from_envelope(&envelope);
        self.repository.save(&message).await?;

        let mut deliver = envelope.clone();
        deliver.operation = operation::DELIVER;
        let payload = serde_json::to_string(&deliver)?;

        self.publisher
            .publish(
                MESSAGE_RECEIVE_TOPIC,
                &deliver.receiver_id.to_string(),
                payload.as_bytes(),
            )
            .await?;

        info!(
            msg_id = %deliver.id,
            conversation_id = %deliver.conversation_id,
            receiver_id = deliver.receiver_id,
            "message persisted and deliver envelope published"
        );

        // 快路径：接收者恰好在本实例时直接入队，省一次消息桥往返
        if self.gateway.is_user_online(deliver.receiver_id).await {
            self.gateway.send_to_user(deliver.receiver_id, &payload).await;
            debug!(receiver_id = deliver.receiver_id, "fast path delivery");
        }

        Ok(())
    }
}
