//! 会话 ID 推导

/// 单聊会话 ID：较小的用户 ID 在前
pub fn derive_conversation_id(a: u64, b: u64) -> String {
    if a < b {
        format!("{}_{}", a, b)
    } else {
        format!("{}_{}", b, a)
    }
}
