//! Admin session tokens.
//!
//! Tokens are HS256 JWTs bound to the epoch of the running process: a restart
//! mints a new epoch and every token issued before it stops verifying.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
    pub epoch: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

pub struct AuthService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    admin_username: String,
    admin_password_sha256: String,
    token_ttl_hours: i64,
    epoch: String,
}

impl AuthService {
    pub fn new(config: &AppConfig) -> Self {
        let epoch = Uuid::new_v4().to_string();
        info!("Auth epoch {}", epoch);
        Self {
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            admin_username: config.admin_username.clone(),
            admin_password_sha256: config.admin_password_sha256.clone(),
            token_ttl_hours: config.token_ttl_hours,
            epoch,
        }
    }

    pub fn check_credentials(&self, username: &str, password: &str) -> bool {
        username == self.admin_username && sha256_hex(password) == self.admin_password_sha256
    }

    pub fn issue_token(&self, subject: &str) -> Result<String, AppError> {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: subject.to_string(),
            exp: now + self.token_ttl_hours * 3600,
            iat: now,
            jti: Uuid::new_v4().to_string(),
            epoch: self.epoch.clone(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to sign token: {}", e)))
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims, AppError> {
        let data = decode::<Claims>(token, &self.decoding_key, &Validation::new(Algorithm::HS256))
            .map_err(|e| {
                debug!("Token rejected: {}", e);
                AppError::Unauthorized("Invalid or expired token".into())
            })?;

        if data.claims.epoch != self.epoch {
            return Err(AppError::Unauthorized(
                "Session expired, please sign in again".into(),
            ));
        }
        Ok(data.claims)
    }

    /// Handle a login attempt, returning a fresh token.
    pub fn login(&self, request: &LoginRequest) -> Result<String, AppError> {
        if !self.check_credentials(&request.username, &request.password) {
            warn!("Failed login for user {:?}", request.username);
            return Err(AppError::Unauthorized("Invalid username or password".into()));
        }
        info!("User {} signed in", request.username);
        self.issue_token(&request.username)
    }
}

pub fn sha256_hex(input: &str) -> String {
    format!("{:x}", Sha256::digest(input.as_bytes()))
}

/// Middleware: reject requests without a valid `Authorization: Bearer` token.
pub async fn require_token(
    State(auth): State<Arc<AuthService>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .ok_or_else(|| AppError::Unauthorized("Missing bearer token".into()))?;

    let claims = auth.verify_token(token)?;
    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}

#[cfg(test)]
pub fn test_config() -> AppConfig {
    AppConfig {
        bind_addr: "127.0.0.1:0".into(),
        database_url: None,
        jwt_secret: "test-secret".into(),
        admin_username: "admin".into(),
        admin_password_sha256: sha256_hex("coffee"),
        token_ttl_hours: 1,
        template_dir: "configs".into(),
        max_upload_bytes: 1024 * 1024,
    }
}
