//! 在线会话索引
//!
//! 进程内权威的 user → device → session 映射。单把读写锁覆盖内外两层
//! 映射，锁内只做纯内存操作。同一 (user, device) 至多一个会话：
//! 重复注册原子地顶替旧会话并将其返回给调用方关闭。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::interface::ws::session::Session;

#[derive(Default)]
pub struct PresenceIndex {
    inner: RwLock<HashMap<u64, HashMap<String, Arc<Session>>>>,
}

impl PresenceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册会话；若同 (user, device) 已有会话则将其顶替并返回，
    /// 由调用方负责关闭被顶替会话的出站队列
    pub async fn insert(&self, session: Arc<Session>) -> Option<Arc<Session>> {
        let mut guard = self.inner.write().await;
        let devices = guard.entry(session.user_id()).or_default();
        devices.insert(session.device_id().to_string(), session)
    }

    /// 注销会话：仅当存储的正是传入的这个会话时才移除
    /// （晚到的旧会话注销不得挤掉它的顶替者），返回是否真正移除
    pub async fn remove(&self, session: &Arc<Session>) -> bool {
        let mut guard = self.inner.write().await;
        let Some(devices) = guard.get_mut(&session.user_id()) else {
            return false;
        };
        let stored_is_same = devices
            .get(session.device_id())
            .is_some_and(|stored| Arc::ptr_eq(stored, session));
        if !stored_is_same {
            return false;
        }
        devices.remove(session.device_id());
        if devices.is_empty() {
            guard.remove(&session.user_id());
        }
        info!(
            user_id = session.user_id(),
            device_id = %session.device_id(),
            "session deregistered"
        );
        true
    }

    /// 返回用户全部在线设备的快照，调用方在锁外自由迭代
    pub async fn lookup(&self, user_id: u64) -> HashMap<String, Arc<Session>> {
        let guard = self.inner.read().await;
        guard.get(&user_id).cloned().unwrap_or_default()
    }

    pub async fn online(&self, user_id: u64) -> bool {
        let guard = self.inner.read().await;
        guard.get(&user_id).is_some_and(|devices| !devices.is_empty())
    }

    pub async fn count_users(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn count_devices(&self, user_id: u64) -> usize {
        let guard = self.inner.read().await;
        guard.get(&user_id).map_or(0, |devices| devices.len())
    }
}
