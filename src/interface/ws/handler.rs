//! WebSocket 接入端点
//!
//! `GET /ws?token=<jwt>&device_id=<id>`。令牌是信任边界：
//! 缺失返回 401 "no token"，无效返回 401 "invalid token"；
//! 认证已在升级前完成，升级本身不做来源校验。

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tracing::{error, warn};

use crate::infrastructure::auth::TokenService;
use crate::interface::ws::gateway::Gateway;
use crate::interface::ws::session::DEFAULT_DEVICE_ID;

#[derive(Clone)]
pub struct WsState {
    pub gateway: Arc<Gateway>,
    pub tokens: Arc<TokenService>,
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    device_id: Option<String>,
}

pub fn router(state: WsState) -> Router {
    Router::new().route("/ws", get(ws_handler)).with_state(state)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<WsState>,
) -> Response {
    let Some(token) = query.token.filter(|token| !token.is_empty()) else {
        return (StatusCode::UNAUTHORIZED, "no token").into_response();
    };

    let claims = match state.tokens.validate(&token).await {
        Ok(claims) => claims,
        Err(err) => {
            warn!(?err, "websocket auth rejected");
            return (StatusCode::UNAUTHORIZED, "invalid token").into_response();
        }
    };

    let device_id = query
        .device_id
        .filter(|device| !device.is_empty())
        .unwrap_or_else(|| DEFAULT_DEVICE_ID.to_string());

    let user_id = claims.user_id;
    ws.on_failed_upgrade(move |err| {
        error!(?err, user_id, "websocket upgrade failed");
    })
    .on_upgrade(move |socket| state.gateway.handle_socket(socket, user_id, device_id))
}
