//! 应用启动器 - 负责依赖注入和服务启动

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

use crate::application::delivery::DeliveryService;
use crate::application::message_service::MessageService;
use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::infrastructure::auth::TokenService;
use crate::infrastructure::cache::redis_presence::RedisPresenceMirror;
use crate::infrastructure::messaging::producer::KafkaEnvelopeProducer;
use crate::infrastructure::persistence::postgres_message_repository::PostgresMessageRepository;
use crate::infrastructure::snowflake::SnowflakeGenerator;
use crate::interface::consumers::receive_consumer::ReceiveTopicConsumer;
use crate::interface::consumers::send_consumer::SendTopicConsumer;
use crate::interface::ws::gateway::Gateway;
use crate::interface::ws::handler::{self, WsState};

/// 装配完成的应用上下文
pub struct ApplicationContext {
    pub config: Arc<GatewayConfig>,
    pub gateway: Arc<Gateway>,
    pub tokens: Arc<TokenService>,
    pub delivery: Arc<DeliveryService>,
    pub messages: Arc<MessageService>,
    pub producer: Arc<KafkaEnvelopeProducer>,
    pub shutdown: CancellationToken,
    send_consumer: Arc<SendTopicConsumer>,
    receive_consumer: Arc<ReceiveTopicConsumer>,
}

/// 依赖注入：按外围到核心的顺序装配全部组件
pub async fn initialize(config: Arc<GatewayConfig>) -> Result<ApplicationContext> {
    let shutdown = CancellationToken::new();

    let redis_client = Arc::new(
        redis::Client::open(config.redis_url.as_str())
            .map_err(|err| GatewayError::Config(format!("invalid redis url: {err}")))?,
    );

    let pool = Arc::new(
        PgPoolOptions::new()
            .max_connections(16)
            .connect(&config.database_url)
            .await
            .map_err(|err| GatewayError::Config(format!("failed to connect postgres: {err}")))?,
    );

    let producer = Arc::new(KafkaEnvelopeProducer::new(
        &config.kafka_brokers,
        config.producer_timeout(),
    )?);

    let mirror = Arc::new(RedisPresenceMirror::new(
        redis_client.clone(),
        config.cache_op_timeout(),
    ));

    let gateway = Arc::new(Gateway::new(
        producer.clone(),
        mirror,
        shutdown.clone(),
    ));

    let tokens = Arc::new(TokenService::new(redis_client, &config));

    let repository = Arc::new(PostgresMessageRepository::new(pool));

    let delivery = Arc::new(DeliveryService::new(
        repository.clone(),
        producer.clone(),
        gateway.clone(),
    ));

    let id_generator = Arc::new(SnowflakeGenerator::new(config.snowflake_worker_id)?);
    let messages = Arc::new(MessageService::new(
        repository,
        gateway.clone(),
        id_generator,
    ));

    let instance_id = Uuid::new_v4().to_string()[..8].to_string();
    let send_consumer = Arc::new(SendTopicConsumer::new(
        &config.kafka_brokers,
        delivery.clone(),
        shutdown.clone(),
    )?);
    let receive_consumer = Arc::new(ReceiveTopicConsumer::new(
        &config.kafka_brokers,
        &instance_id,
        gateway.clone(),
        shutdown.clone(),
    )?);

    info!(instance_id = %instance_id, "application context initialized");

    Ok(ApplicationContext {
        config,
        gateway,
        tokens,
        delivery,
        messages,
        producer,
        shutdown,
        send_consumer,
        receive_consumer,
    })
}

/// 启动服务并阻塞到收到停机信号
pub async fn run() -> Result<()> {
    let config = Arc::new(GatewayConfig::from_env());
    let context = initialize(config.clone()).await?;

    {
        let consumer = context.send_consumer.clone();
        tokio::spawn(async move {
            if let Err(err) = consumer.run().await {
                error!(?err, "send consumer terminated");
            }
        });
    }
    {
        let consumer = context.receive_consumer.clone();
        tokio::spawn(async move {
            if let Err(err) = consumer.run().await {
                error!(?err, "receive consumer terminated");
            }
        });
    }

    let app = handler::router(WsState {
        gateway: context.gateway.clone(),
        tokens: context.tokens.clone(),
    });

    let listener = tokio::net::TcpListener::bind(&config.server_addr)
        .await
        .map_err(|err| {
            GatewayError::Config(format!("failed to bind {}: {err}", config.server_addr))
        })?;

    info!(addr = %config.server_addr, "gateway listening");

    let server = {
        let shutdown = context.shutdown.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
        })
    };

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(?err, "failed to listen for shutdown signal");
    }
    info!("shutting down");

    // 取消信号传播到全部会话与消费者，生产者在退出前清空发送队列
    context.shutdown.cancel();
    if let Ok(Err(err)) = server.await {
        error!(?err, "server terminated with error");
    }
    context.producer.shutdown().await;

    info!("gateway stopped");
    Ok(())
}
