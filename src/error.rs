//! 统一异常处理模块

use thiserror::Error;

/// 网关错误类型
#[derive(Debug, Error)]
pub enum GatewayError {
    /// 配置错误（启动期校验失败，进程应直接退出）
    #[error("Configuration error: {0}")]
    Config(String),

    /// 认证失败（缺失或无效的令牌）
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// WebSocket 升级失败
    #[error("WebSocket upgrade failed: {0}")]
    UpgradeFailed(String),

    /// Kafka 投递失败（重试耗尽）
    #[error("Broker publish failed: {0}")]
    Publish(String),

    /// 消息落库失败
    #[error("Message persistence failed: {0}")]
    Persist(String),

    /// 共享缓存操作失败
    #[error("Cache operation failed: {0}")]
    Cache(String),

    /// 消息编解码失败
    #[error("Envelope codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
