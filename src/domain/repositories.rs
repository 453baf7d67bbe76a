//! 领域仓储与外部协作方接口

use async_trait::async_trait;

use crate::domain::message::Message;
use crate::error::Result;

/// 消息仓储
///
/// 以 `msg_id` 为业务唯一键；重复保存同一 `msg_id` 必须是无副作用的空操作。
#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn save(&self, message: &Message) -> Result<()>;
}

/// 消息桥生产者
#[async_trait]
pub trait EnvelopePublisher: Send + Sync {
    /// 按 key 分区投递已序列化的信封；重试耗尽后返回 `Publish` 错误
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<()>;
}

/// 在线状态镜像
///
/// 写入共享缓存供其他网关实例定位会话；所有操作都是尽力而为，
/// 失败由调用方降级为告警。
#[async_trait]
pub trait PresenceMirror: Send + Sync {
    async fn mark_online(&self, user_id: u64, device_id: &str) -> Result<()>;
    async fn mark_offline(&self, user_id: u64, device_id: &str) -> Result<()>;
    async fn is_user_online(&self, user_id: u64) -> Result<bool>;
}
