//! 接入网关
//!
//! 持有在线会话索引与全部会话，负责：
//! - 升级完成后的会话注册（含同设备顶替）与读写泵的启动
//! - 上行分发：心跳本地回执；SEND 改写发送者身份、打服务端时间戳、
//!   补齐消息 ID 后投递到消息桥，并向来源会话回执
//! - 下行投递：按在线索引向用户的全部本地设备入队
//!
//! 心跳与回执永远不进消息桥，也不落库。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::envelope::{operation, Envelope, MESSAGE_SEND_TOPIC};
use crate::domain::gateway::MessageGateway;
use crate::domain::repositories::{EnvelopePublisher, PresenceMirror};
use crate::interface::ws::presence::PresenceIndex;
use crate::interface::ws::session::Session;

/// 读超时：任意入站帧（含 pong）都会刷新
const READ_DEADLINE: Duration = Duration::from_secs(60);
/// 单帧写超时（含 ping）
const WRITE_DEADLINE: Duration = Duration::from_secs(10);
/// 心跳 ping 间隔
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// SEND 回执内容
const SEND_ACCEPTED: &str = "accepted";
const SEND_FAILED: &str = "failed";

pub struct Gateway {
    presence: PresenceIndex,
    publisher: Arc<dyn EnvelopePublisher>,
    mirror: Arc<dyn PresenceMirror>,
    shutdown: CancellationToken,
}

impl Gateway {
    pub fn new(
        publisher: Arc<dyn EnvelopePublisher>,
        mirror: Arc<dyn PresenceMirror>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            presence: PresenceIndex::new(),
            publisher,
            mirror,
            shutdown,
        }
    }

    /// 升级完成后的入口：注册会话、启动读写泵、下发连接确认
    pub async fn handle_socket(self: Arc<Self>, socket: WebSocket, user_id: u64, device_id: String) {
        let (sink, stream) = socket.split();
        let (session, outbound_rx) = Session::new(user_id, device_id, &self.shutdown);
        let session = Arc::new(session);

        self.register(session.clone()).await;

        {
            let gateway = self.clone();
            let session = session.clone();
            tokio::spawn(async move { gateway.read_pump(session, stream).await });
        }
        tokio::spawn(write_pump(session.clone(), sink, outbound_rx));

        let connect_ack = Envelope::connect_ack(Utc::now().timestamp());
        match serde_json::to_string(&connect_ack) {
            Ok(frame) => {
                session.enqueue(frame);
            }
            Err(err) => error!(?err, "failed to encode connect ack"),
        }
        info!(user_id, device_id = %session.device_id(), "user connected");
    }

    /// 注册会话；同 (user, device) 的旧会话被顶替：
    /// 由顶替方在此处关闭旧会话的出站队列，而不是等旧会话自行退出
    pub async fn register(&self, session: Arc<Session>) {
        if let Some(displaced) = self.presence.insert(session.clone()).await {
            info!(
                user_id = displaced.user_id(),
                device_id = %displaced.device_id(),
                "session displaced by newer connection"
            );
            displaced.close();
        }
        if let Err(err) = self
            .mirror
            .mark_online(session.user_id(), session.device_id())
            .await
        {
            warn!(?err, user_id = session.user_id(), "presence mirror write failed");
        }
    }

    /// 注销会话（比较后移除）；被顶替会话的晚到注销不会影响其顶替者，
    /// 也不会误删镜像中属于顶替者的字段
    pub async fn deregister(&self, session: &Arc<Session>) {
        if self.presence.remove(session).await {
            if let Err(err) = self
                .mirror
                .mark_offline(session.user_id(), session.device_id())
                .await
            {
                warn!(?err, user_id = session.user_id(), "presence mirror delete failed");
            }
        }
    }

    async fn read_pump(self: Arc<Self>, session: Arc<Session>, mut stream: SplitStream<WebSocket>) {
        loop {
            let frame = match timeout(READ_DEADLINE, stream.next()).await {
                Err(_) => {
                    debug!(
                        user_id = session.user_id(),
                        device_id = %session.device_id(),
                        "read deadline exceeded"
                    );
                    break;
                }
                Ok(None) => break,
                Ok(Some(Err(err))) => {
                    debug!(?err, user_id = session.user_id(), "read error");
                    break;
                }
                Ok(Some(Ok(frame))) => frame,
            };

            match frame {
                WsMessage::Text(text) => {
                    session.touch();
                    self.handle_ingress(&session, &text).await;
                }
                WsMessage::Pong(_) | WsMessage::Ping(_) => session.touch(),
                WsMessage::Close(_) => break,
                WsMessage::Binary(_) => {
                    session.touch();
                    debug!(user_id = session.user_id(), "binary frame ignored");
                }
            }
        }

        self.deregister(&session).await;
        session.close();
    }

    /// 上行帧分发
    pub async fn handle_ingress(&self, session: &Arc<Session>, raw: &str) {
        let mut envelope: Envelope = match serde_json::from_str(raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(?err, user_id = session.user_id(), "malformed frame dropped");
                return;
            }
        };

        match envelope.operation {
            operation::HEARTBEAT => {
                let ack = Envelope::heartbeat_ack(Utc::now().timestamp());
                if let Ok(frame) = serde_json::to_string(&ack) {
                    session.enqueue(frame);
                }
            }
            operation::SEND => {
                // 发送者身份以会话的认证结果为准，客户端自称的一律改写
                envelope.sender_id = session.user_id();
                envelope.timestamp = Utc::now().timestamp();
                if envelope.id.is_empty() {
                    envelope.id = format!(
                        "{}_{}_{}",
                        envelope.sender_id, envelope.receiver_id, envelope.timestamp
                    );
                }

                let payload = match serde_json::to_string(&envelope) {
                    Ok(payload) => payload,
                    Err(err) => {
                        error!(?err, "failed to encode ingress envelope");
                        return;
                    }
                };

                let ack_content = match self
                    .publisher
                    .publish(MESSAGE_SEND_TOPIC, &envelope.id, payload.as_bytes())
                    .await
                {
                    Ok(()) => SEND_ACCEPTED,
                    Err(err) => {
                        // 网关不重试；失败通过回执告知客户端后放弃
                        error!(?err, msg_id = %envelope.id, "failed to publish ingress envelope");
                        SEND_FAILED
                    }
                };

                let ack = Envelope::send_ack(
                    &envelope.id,
                    envelope.sequence,
                    Utc::now().timestamp(),
                    ack_content,
                );
                if let Ok(frame) = serde_json::to_string(&ack) {
                    session.enqueue(frame);
                }
            }
            operation::CONNECT
            | operation::CONNECT_ACK
            | operation::HEARTBEAT_ACK
            | operation::SEND_ACK
            | operation::DELIVER
            | operation::DISCONNECT => {
                // 连接随升级隐式完成，断开随套接字关闭隐式完成
                debug!(op = envelope.operation, "ingress operation ignored");
            }
            other => {
                warn!(
                    op = other,
                    user_id = session.user_id(),
                    "unknown operation dropped"
                );
            }
        }
    }

    /// 下行投递入口（RECEIVE 消费者调用）；本地不在线是正常情况，静默丢弃
    pub async fn deliver_local(&self, envelope: &Envelope, raw: &str) {
        if !self.send_to_user(envelope.receiver_id, raw).await {
            debug!(
                receiver_id = envelope.receiver_id,
                msg_id = %envelope.id,
                "recipient not online locally, frame dropped"
            );
        }
    }

    /// 向用户的所有本地设备非阻塞入队；至少成功一个设备返回 true
    pub async fn send_to_user(&self, user_id: u64, payload: &str) -> bool {
        let devices = self.presence.lookup(user_id).await;
        let mut sent = false;
        for session in devices.values() {
            if session.enqueue(payload.to_string()) {
                sent = true;
            }
        }
        sent
    }

    /// 用户是否在线；本地索引为权威，本地缺席时退而查询共享镜像
    pub async fn online(&self, user_id: u64) -> bool {
        if self.presence.online(user_id).await {
            return true;
        }
        match self.mirror.is_user_online(user_id).await {
            Ok(online) => online,
            Err(err) => {
                warn!(?err, user_id, "presence mirror read failed");
                false
            }
        }
    }

    pub async fn online_user_count(&self) -> usize {
        self.presence.count_users().await
    }

    pub async fn user_connection_count(&self, user_id: u64) -> usize {
        self.presence.count_devices(user_id).await
    }
}

#[async_trait]
impl MessageGateway for Gateway {
    async fn is_user_online(&self, user_id: u64) -> bool {
        self.presence.online(user_id).await
    }

    async fn send_to_user(&self, user_id: u64, payload: &str) -> bool {
        Gateway::send_to_user(self, user_id, payload).await
    }
}

async fn write_pump(
    session: Arc<Session>,
    mut sink: SplitSink<WebSocket, WsMessage>,
    mut outbound: mpsc::Receiver<String>,
) {
    let first_tick = tokio::time::Instant::now() + PING_INTERVAL;
    let mut ticker = tokio::time::interval_at(first_tick, PING_INTERVAL);

    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(frame) => {
                    match timeout(WRITE_DEADLINE, sink.send(WsMessage::Text(frame))).await {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => {
                            debug!(?err, user_id = session.user_id(), "write error");
                            break;
                        }
                        Err(_) => {
                            warn!(user_id = session.user_id(), "write deadline exceeded");
                            break;
                        }
                    }
                }
                None => {
                    let _ = timeout(WRITE_DEADLINE, sink.send(WsMessage::Close(None))).await;
                    break;
                }
            },
            _ = ticker.tick() => {
                match timeout(WRITE_DEADLINE, sink.send(WsMessage::Ping(Vec::new()))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        debug!(?err, user_id = session.user_id(), "ping write error");
                        break;
                    }
                    Err(_) => {
                        warn!(user_id = session.user_id(), "ping write deadline exceeded");
                        break;
                    }
                }
            }
            _ = session.close_signal().cancelled() => {
                let _ = timeout(WRITE_DEADLINE, sink.send(WsMessage::Close(None))).await;
                break;
            }
        }
    }

    session.close();
    let _ = sink.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::envelope::content_type;
    use crate::error::{GatewayError, Result};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Mutex;

    struct RecordingPublisher {
        fail: AtomicBool,
        published: Mutex<Vec<(String, String, String)>>,
    }

    impl RecordingPublisher {
        fn new() -> Self {
            Self {
                fail: AtomicBool::new(false),
                published: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            let publisher = Self::new();
            publisher.fail.store(true, Ordering::SeqCst);
            publisher
        }
    }

    #[async_trait]
    impl EnvelopePublisher for RecordingPublisher {
        async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(GatewayError::Publish("broker down".to_string()));
            }
            self.published.lock().await.push((
                topic.to_string(),
                key.to_string(),
                String::from_utf8(payload.to_vec()).unwrap(),
            ));
            Ok(())
        }
    }

    struct StubMirror {
        online: AtomicBool,
        marks: Mutex<Vec<(u64, String, bool)>>,
    }

    impl StubMirror {
        fn new() -> Self {
            Self {
                online: AtomicBool::new(false),
                marks: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PresenceMirror for StubMirror {
        async fn mark_online(&self, user_id: u64, device_id: &str) -> Result<()> {
            self.marks
                .lock()
                .await
                .push((user_id, device_id.to_string(), true));
            Ok(())
        }

        async fn mark_offline(&self, user_id: u64, device_id: &str) -> Result<()> {
            self.marks
                .lock()
                .await
                .push((user_id, device_id.to_string(), false));
            Ok(())
        }

        async fn is_user_online(&self, _user_id: u64) -> Result<bool> {
            Ok(self.online.load(Ordering::SeqCst))
        }
    }

    struct Harness {
        gateway: Arc<Gateway>,
        publisher: Arc<RecordingPublisher>,
        mirror: Arc<StubMirror>,
    }

    fn harness_with(publisher: RecordingPublisher) -> Harness {
        let publisher = Arc::new(publisher);
        let mirror = Arc::new(StubMirror::new());
        let gateway = Arc::new(Gateway::new(
            publisher.clone(),
            mirror.clone(),
            CancellationToken::new(),
        ));
        Harness {
            gateway,
            publisher,
            mirror,
        }
    }

    fn harness() -> Harness {
        harness_with(RecordingPublisher::new())
    }

    fn new_session(user_id: u64, device_id: &str) -> (Arc<Session>, mpsc::Receiver<String>) {
        let (session, rx) = Session::new(user_id, device_id.to_string(), &CancellationToken::new());
        (Arc::new(session), rx)
    }

    async fn next_frame(rx: &mut mpsc::Receiver<String>) -> Envelope {
        serde_json::from_str(&rx.recv().await.unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_send_overwrites_sender_and_stamps_envelope() {
        let h = harness();
        let (session, mut rx) = new_session(10, "web");

        // 客户端自称发送者 99，必须被改写为认证身份 10
        let frame = r#"{"id":"","operation":5,"sequence":1,"sender_id":99,"receiver_id":20,"content_type":1,"content":"hi"}"#;
        h.gateway.handle_ingress(&session, frame).await;

        let published = h.publisher.published.lock().await;
        assert_eq!(published.len(), 1);
        let (topic, key, payload) = &published[0];
        assert_eq!(topic, MESSAGE_SEND_TOPIC);

        let envelope: Envelope = serde_json::from_str(payload).unwrap();
        assert_eq!(envelope.sender_id, 10);
        assert_eq!(envelope.receiver_id, 20);
        assert!(envelope.timestamp > 0);
        assert_eq!(
            envelope.id,
            format!("10_20_{}", envelope.timestamp),
            "missing id must be derived from sender, receiver and timestamp"
        );
        assert_eq!(key, &envelope.id);
        assert_eq!(envelope.content_type, content_type::TEXT);

        let ack = next_frame(&mut rx).await;
        assert_eq!(ack.operation, operation::SEND_ACK);
        assert_eq!(ack.content, SEND_ACCEPTED);
        assert_eq!(ack.id, envelope.id);
        assert_eq!(ack.sequence, 1);
    }

    #[tokio::test]
    async fn test_send_keeps_client_proposed_id() {
        let h = harness();
        let (session, mut rx) = new_session(10, "web");

        let frame = r#"{"id":"client-42","operation":5,"receiver_id":20,"content":"hi"}"#;
        h.gateway.handle_ingress(&session, frame).await;

        let published = h.publisher.published.lock().await;
        assert_eq!(published[0].1, "client-42");
        let ack = next_frame(&mut rx).await;
        assert_eq!(ack.id, "client-42");
    }

    #[tokio::test]
    async fn test_send_publish_failure_acks_failure_and_abandons() {
        let h = harness_with(RecordingPublisher::failing());
        let (session, mut rx) = new_session(10, "web");

        let frame = r#"{"operation":5,"receiver_id":20,"content":"hi"}"#;
        h.gateway.handle_ingress(&session, frame).await;

        let ack = next_frame(&mut rx).await;
        assert_eq!(ack.operation, operation::SEND_ACK);
        assert_eq!(ack.content, SEND_FAILED);
        assert!(h.publisher.published.lock().await.is_empty());
        // 投递失败不会关闭会话
        assert!(!session.is_closed());
    }

    #[tokio::test]
    async fn test_heartbeat_acks_locally_without_broker() {
        let h = harness();
        let (session, mut rx) = new_session(10, "web");

        h.gateway.handle_ingress(&session, r#"{"operation":3}"#).await;

        let ack = next_frame(&mut rx).await;
        assert_eq!(ack.operation, operation::HEARTBEAT_ACK);
        assert!(ack.timestamp > 0);
        assert!(h.publisher.published.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_and_lifecycle_operations_are_dropped() {
        let h = harness();
        let (session, mut rx) = new_session(10, "web");

        for frame in [
            r#"{"operation":1}"#,
            r#"{"operation":8}"#,
            r#"{"operation":7,"receiver_id":10}"#,
            r#"{"operation":99}"#,
            r#"not json"#,
        ] {
            h.gateway.handle_ingress(&session, frame).await;
        }

        assert!(h.publisher.published.lock().await.is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_displacement_closes_old_session_and_keeps_new() {
        let h = harness();
        let (first, _first_rx) = new_session(10, "web");
        let (second, _second_rx) = new_session(10, "web");

        h.gateway.register(first.clone()).await;
        h.gateway.register(second.clone()).await;

        assert!(first.is_closed());
        assert!(!second.is_closed());
        assert_eq!(h.gateway.user_connection_count(10).await, 1);

        // 被顶替会话的晚到注销不会挤掉顶替者，也不会写镜像
        h.gateway.deregister(&first).await;
        assert_eq!(h.gateway.user_connection_count(10).await, 1);
        let marks = h.mirror.marks.lock().await;
        assert_eq!(marks.iter().filter(|(_, _, online)| !online).count(), 0);
    }

    #[tokio::test]
    async fn test_deregister_removes_session_and_mirror_field() {
        let h = harness();
        let (session, _rx) = new_session(10, "web");

        h.gateway.register(session.clone()).await;
        h.gateway.deregister(&session).await;

        assert!(!h.gateway.online(10).await);
        let marks = h.mirror.marks.lock().await;
        assert_eq!(*marks, vec![(10, "web".to_string(), true), (10, "web".to_string(), false)]);
    }

    #[tokio::test]
    async fn test_send_to_user_fans_out_to_all_devices() {
        let h = harness();
        let (web, mut web_rx) = new_session(10, "web");
        let (ios, mut ios_rx) = new_session(10, "ios");
        h.gateway.register(web).await;
        h.gateway.register(ios).await;

        assert!(h.gateway.send_to_user(10, "payload").await);
        assert_eq!(web_rx.recv().await.unwrap(), "payload");
        assert_eq!(ios_rx.recv().await.unwrap(), "payload");
    }

    #[tokio::test]
    async fn test_send_to_offline_user_returns_false() {
        let h = harness();
        assert!(!h.gateway.send_to_user(20, "payload").await);

        // 下行投递对本地不在线静默丢弃，不产生错误
        let envelope = Envelope {
            operation: operation::DELIVER,
            receiver_id: 20,
            ..Default::default()
        };
        h.gateway.deliver_local(&envelope, "payload").await;
    }

    #[tokio::test]
    async fn test_online_falls_back_to_mirror_when_locally_absent() {
        let h = harness();
        assert!(!h.gateway.online(20).await);

        h.mirror.online.store(true, Ordering::SeqCst);
        assert!(h.gateway.online(20).await);

        // 投递用的本地判定不受镜像影响
        assert!(!MessageGateway::is_user_online(h.gateway.as_ref(), 20).await);
    }

    #[tokio::test]
    async fn test_online_user_count_tracks_registrations() {
        let h = harness();
        let (a, _a_rx) = new_session(10, "web");
        let (b, _b_rx) = new_session(20, "web");
        h.gateway.register(a).await;
        h.gateway.register(b).await;
        assert_eq!(h.gateway.online_user_count().await, 2);
    }
}
