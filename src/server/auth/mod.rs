//! Caller identity from JWT
//!
//! Tokens are issued elsewhere; the core only verifies them. The tenant a
//! request acts for is always the token's `tenant_id`.

use axum::{
    extract::{FromRequestParts, Query},
    http::request::Parts,
    RequestPartsExt,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::server::error::CoreError;
use crate::server::AppState;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String, // user id
    pub tenant_id: String,
    #[serde(default)]
    pub role: Option<String>,
    pub exp: usize, // expiration timestamp
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Validate a JWT token and extract claims
pub fn validate_token(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;

    Ok(token_data.claims)
}

#[cfg(test)]
pub fn create_token(user_id: &str, tenant_id: &str, secret: &str) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};

    let claims = Claims {
        sub: user_id.to_string(),
        tenant_id: tenant_id.to_string(),
        role: Some("admin".to_string()),
        exp: (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp() as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
}

/// JWT auth extractor: `Authorization: Bearer`, or `?token=` for WebSocket
/// clients that cannot set headers.
impl FromRequestParts<Arc<AppState>> for Claims {
    type Rejection = CoreError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = match parts.extract::<TypedHeader<Authorization<Bearer>>>().await {
            Ok(TypedHeader(Authorization(bearer))) => bearer.token().to_string(),
            Err(_) => parts
                .extract::<Query<TokenQuery>>()
                .await
                .ok()
                .and_then(|Query(q)| q.token)
                .filter(|t| !t.is_empty())
                .ok_or_else(|| CoreError::Unauthorized("missing bearer token".to_string()))?,
        };

        let claims = validate_token(&token, &state.config.jwt_secret)
            .map_err(|_| CoreError::Unauthorized("invalid token".to_string()))?;

        if claims.tenant_id.is_empty() {
            return Err(CoreError::Unauthorized("token carries no tenant".to_string()));
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_round_trip_keeps_tenant() {
        let token = create_token("u1", "t1", "secret");
        let claims = validate_token(&token, "secret").unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.tenant_id, "t1");
        assert!(validate_token(&token, "other").is_err());
    }
}
