//! 消息网关接口
//!
//! 投递管道通过该接口查询本地在线状态并做本地直推，
//! 避免应用层直接依赖 WebSocket 实现。

use async_trait::async_trait;

#[async_trait]
pub trait MessageGateway: Send + Sync {
    /// 用户在本进程是否有在线会话
    async fn is_user_online(&self, user_id: u64) -> bool;

    /// 向用户的所有本地在线设备投递一帧；至少入队成功一个设备时返回 true
    async fn send_to_user(&self, user_id: u64, payload: &str) -> bool;
}
