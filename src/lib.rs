//! 实时消息投递核心
//!
//! 本 crate 实现即时通讯后端的实时投递三件套：
//!
//! 1. **接入网关**（`interface::ws`）：维护用户长连接（WebSocket），
//!    按 (user, device) 维护在线会话索引，接收上行消息并转发到消息桥
//! 2. **消息桥**（`infrastructure::messaging` + `interface::consumers`）：
//!    上行消息写入 Kafka `message_send`，下行消息从 `message_receive` 消费
//!    后经网关推送给本地在线会话
//! 3. **投递管道**（`application::delivery`）：无状态的消息处理器，
//!    负责消息落库与下行消息的生产
//!
//! 持久化存储、Token 签发、共享缓存均作为外部协作方，通过 `domain` 层的
//! trait 接入。

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod interface;
pub mod service;
