//! mCube click-to-call dialect

use reqwest::Method;
use serde_json::json;

use super::http::ProviderHttp;
use super::{json_str_field, signature, AdapterError, UNKNOWN_STATUS};
use crate::models::CallSession;

#[derive(Clone)]
pub struct McubeAdapter {
    http: ProviderHttp,
}

impl McubeAdapter {
    pub fn new(http: ProviderHttp) -> Self {
        Self { http }
    }

    fn authed(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, path)
            .bearer_auth(&self.http.provider.credentials.auth_token)
    }

    pub async fn initiate_call(&self, session: &CallSession) -> Result<String, AdapterError> {
        let body = json!({
            "from": session.from_phone,
            "to": session.to_phone,
            "format": "json",
            "priority": 1,
        });
        let response = self
            .http
            .send(self.authed(Method::POST, "/click2call").json(&body))
            .await?;
        json_str_field(&response, "call_id")
            .ok_or_else(|| AdapterError::Parse("call_id missing from mCube response".to_string()))
    }

    pub async fn end_call(&self, external_id: &str) -> Result<(), AdapterError> {
        self.http
            .send(self.authed(Method::DELETE, &format!("/click2call/{external_id}")))
            .await?;
        Ok(())
    }

    pub async fn transfer_call(&self, external_id: &str, to_phone: &str) -> Result<(), AdapterError> {
        self.http
            .send(
                self.authed(Method::POST, &format!("/click2call/{external_id}/transfer"))
                    .json(&json!({ "transfer_to": to_phone })),
            )
            .await?;
        Ok(())
    }

    pub async fn get_call_status(&self, external_id: &str) -> Result<String, AdapterError> {
        let body = self
            .http
            .send_lenient(self.authed(Method::GET, &format!("/click2call/{external_id}")))
            .await?;
        Ok(body
            .and_then(|b| json_str_field(&b, "status"))
            .unwrap_or_else(|| UNKNOWN_STATUS.to_string()))
    }

    /// Hex HMAC-SHA256 over the body, keyed by the webhook secret or the auth token.
    pub fn validate_webhook_signature(&self, payload: &[u8], sig: &str) -> bool {
        let creds = &self.http.provider.credentials;
        let secret = creds
            .webhook_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(&creds.auth_token);
        !secret.is_empty() && signature::verify_sha256_hex(secret, payload, sig)
    }
}
