//! 会话
//!
//! 一条长连接对应一个 `Session`，由网关持有。读写泵各自运行在独立任务中，
//! 通过有界出站队列与关闭信号协作。出站队列满时直接丢帧并告警，
//! 绝不因消费端慢而阻塞发送方；丢帧本身不会关闭会话。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// 出站队列容量
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// 未携带 device_id 时的保留设备标识
pub const DEFAULT_DEVICE_ID: &str = "web";

pub struct Session {
    user_id: u64,
    device_id: String,
    outbound: mpsc::Sender<String>,
    closed: CancellationToken,
    close_guard: AtomicBool,
    last_active: Mutex<Instant>,
}

impl Session {
    /// 创建会话，返回会话与出站队列的消费端（交给写泵）
    pub fn new(
        user_id: u64,
        device_id: String,
        shutdown: &CancellationToken,
    ) -> (Self, mpsc::Receiver<String>) {
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let session = Self {
            user_id,
            device_id,
            outbound,
            closed: shutdown.child_token(),
            close_guard: AtomicBool::new(false),
            last_active: Mutex::new(Instant::now()),
        };
        (session, outbound_rx)
    }

    pub fn user_id(&self) -> u64 {
        self.user_id
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// 非阻塞入队；队列满时丢帧并告警，返回是否入队成功
    pub fn enqueue(&self, frame: String) -> bool {
        if self.closed.is_cancelled() {
            return false;
        }
        match self.outbound.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    user_id = self.user_id,
                    device_id = %self.device_id,
                    "outbound queue full, frame dropped"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// 关闭出站队列（恰好一次）；写泵收到信号后发送关闭帧并退出
    pub fn close(&self) {
        if !self.close_guard.swap(true, Ordering::SeqCst) {
            self.closed.cancel();
            debug!(
                user_id = self.user_id,
                device_id = %self.device_id,
                "session closed"
            );
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn close_signal(&self) -> &CancellationToken {
        &self.closed
    }

    /// 刷新活跃时间（读泵在收到任意帧或 pong 时调用）
    pub fn touch(&self) {
        *self.last_active.lock().expect("last_active poisoned") = Instant::now();
    }

    pub fn last_active(&self) -> Instant {
        *self.last_active.lock().expect("last_active poisoned")
    }
}
