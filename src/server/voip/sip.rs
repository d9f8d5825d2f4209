//! Generic SIP gateway dialect (JSON over HTTP, `X-API-Key` auth)

use reqwest::Method;
use serde_json::json;

use super::http::ProviderHttp;
use super::{json_str_field, verify_optional_secret, AdapterError, UNKNOWN_STATUS};
use crate::models::CallSession;

#[derive(Clone)]
pub struct SipAdapter {
    http: ProviderHttp,
}

impl SipAdapter {
    pub fn new(http: ProviderHttp) -> Self {
        Self { http }
    }

    fn authed(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let request = self.http.request(method, path);
        let key = &self.http.provider.credentials.api_key;
        if key.is_empty() {
            request
        } else {
            request.header("X-API-Key", key)
        }
    }

    pub async fn initiate_call(&self, session: &CallSession) -> Result<String, AdapterError> {
        let body = json!({
            "caller": session.from_phone,
            "callee": session.to_phone,
            "caller_id": self.http.provider.caller_id,
        });
        let response = self
            .http
            .send(self.authed(Method::POST, "/calls").json(&body))
            .await?;
        json_str_field(&response, "call_id")
            .ok_or_else(|| AdapterError::Parse("call_id missing from SIP gateway response".to_string()))
    }

    pub async fn end_call(&self, external_id: &str) -> Result<(), AdapterError> {
        self.http
            .send(self.authed(Method::DELETE, &format!("/calls/{external_id}")))
            .await?;
        Ok(())
    }

    pub async fn transfer_call(&self, external_id: &str, to_phone: &str) -> Result<(), AdapterError> {
        self.http
            .send(
                self.authed(Method::POST, &format!("/calls/{external_id}/transfer"))
                    .json(&json!({ "transfer_to": to_phone })),
            )
            .await?;
        Ok(())
    }

    pub async fn get_call_status(&self, external_id: &str) -> Result<String, AdapterError> {
        let body = self
            .http
            .send_lenient(self.authed(Method::GET, &format!("/calls/{external_id}")))
            .await?;
        Ok(body
            .and_then(|b| json_str_field(&b, "status"))
            .unwrap_or_else(|| UNKNOWN_STATUS.to_string()))
    }

    pub fn validate_webhook_signature(&self, payload: &[u8], signature: &str) -> bool {
        verify_optional_secret(&self.http.provider, payload, signature)
    }
}
