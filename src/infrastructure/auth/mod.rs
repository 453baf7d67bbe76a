//! 令牌服务
//!
//! JWT（HS256）携带身份声明，Redis 中的令牌集合作为有效性来源：
//! 签发时写入 `user_token:{user_id}:{token_id}`，校验时解码后必须与
//! 集合中存储的令牌一致。刷新令牌在存储键上追加 `:refresh` 后缀，
//! 该后缀规则由 `is_refresh` 声明在签发与校验两侧统一推导。

use std::sync::Arc;

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use redis::{aio::ConnectionManager, AsyncCommands};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};

const USER_TOKEN_PREFIX: &str = "user_token:";

/// JWT 声明
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    pub user_id: u64,
    pub username: String,
    pub is_refresh: bool,
    pub token_id: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

pub struct TokenService {
    client: Arc<redis::Client>,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
    access_ttl_seconds: u64,
    refresh_ttl_seconds: u64,
}

impl TokenService {
    pub fn new(client: Arc<redis::Client>, config: &GatewayConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.set_issuer(&[&config.jwt_issuer]);

        Self {
            client,
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            validation,
            issuer: config.jwt_issuer.clone(),
            access_ttl_seconds: config.access_token_ttl_seconds,
            refresh_ttl_seconds: config.refresh_token_ttl_seconds,
        }
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        ConnectionManager::new(self.client.as_ref().clone())
            .await
            .map_err(|err| GatewayError::Cache(err.to_string()))
    }

    /// 令牌集合存储键；刷新令牌追加 `:refresh` 后缀
    fn token_key(user_id: u64, token_id: &str, is_refresh: bool) -> String {
        if is_refresh {
            format!("{}{}:{}:refresh", USER_TOKEN_PREFIX, user_id, token_id)
        } else {
            format!("{}{}:{}", USER_TOKEN_PREFIX, user_id, token_id)
        }
    }

    /// 签发访问令牌与刷新令牌，并写入令牌集合
    pub async fn issue_tokens(&self, user_id: u64, username: &str) -> Result<(String, String)> {
        let token_id = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();

        let access_claims = TokenClaims {
            user_id,
            username: username.to_string(),
            is_refresh: false,
            token_id: token_id.clone(),
            iss: self.issuer.clone(),
            iat: now,
            exp: now + self.access_ttl_seconds as i64,
        };
        let refresh_claims = TokenClaims {
            is_refresh: true,
            exp: now + self.refresh_ttl_seconds as i64,
            ..access_claims.clone()
        };

        let access_token = encode(&Header::default(), &access_claims, &self.encoding_key)
            .map_err(|err| GatewayError::Auth(err.to_string()))?;
        let refresh_token = encode(&Header::default(), &refresh_claims, &self.encoding_key)
            .map_err(|err| GatewayError::Auth(err.to_string()))?;

        let mut conn = self.connection().await?;
        let _: () = conn
            .set_ex(
                Self::token_key(user_id, &token_id, false),
                &access_token,
                self.access_ttl_seconds,
            )
            .await
            .map_err(|err| GatewayError::Cache(err.to_string()))?;
        let _: () = conn
            .set_ex(
                Self::token_key(user_id, &token_id, true),
                &refresh_token,
                self.refresh_ttl_seconds,
            )
            .await
            .map_err(|err| GatewayError::Cache(err.to_string()))?;

        Ok((access_token, refresh_token))
    }

    /// 校验令牌：解码 JWT 并与令牌集合中的存储值比对
    pub async fn validate(&self, token: &str) -> Result<TokenClaims> {
        let data = decode::<TokenClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|err| GatewayError::Auth(format!("token decode failed: {err}")))?;
        let claims = data.claims;

        let key = Self::token_key(claims.user_id, &claims.token_id, claims.is_refresh);
        let mut conn = self.connection().await?;
        let stored: Option<String> = conn
            .get(&key)
            .await
            .map_err(|err| GatewayError::Cache(err.to_string()))?;

        match stored {
            Some(stored) if stored == token => {
                debug!(user_id = claims.user_id, token_id = %claims.token_id, "token authenticated");
                Ok(claims)
            }
            Some(_) => Err(GatewayError::Auth("token superseded".to_string())),
            None => Err(GatewayError::Auth("token not in active set".to_string())),
        }
    }

    /// 撤销单个令牌（访问与刷新一并删除）
    pub async fn revoke(&self, user_id: u64, token_id: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: usize = conn
            .del(&[
                Self::token_key(user_id, token_id, false),
                Self::token_key(user_id, token_id, true),
            ])
            .await
            .map_err(|err| GatewayError::Cache(err.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_key_suffix_follows_refresh_claim() {
        // 同一条推导规则覆盖签发与校验两侧
        assert_eq!(
            TokenService::token_key(10, "abc", false),
            "user_token:10:abc"
        );
        assert_eq!(
            TokenService::token_key(10, "abc", true),
            "user_token:10:abc:refresh"
        );
    }
}
