//! Asterisk REST Interface (ARI) dialect

use reqwest::Method;
use serde_json::json;

use super::http::ProviderHttp;
use super::{json_str_field, verify_optional_secret, AdapterError, UNKNOWN_STATUS};
use crate::models::CallSession;

const DIALPLAN_CONTEXT: &str = "from-internal";

#[derive(Clone)]
pub struct AsteriskAdapter {
    http: ProviderHttp,
}

impl AsteriskAdapter {
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
            "endpoint": format!("SIP/{}", session.to_phone),
            "extension": session.to_phone,
            "context": DIALPLAN_CONTEXT,
            "priority": 1,
        });
        let response = self
            .http
            .send(self.authed(Method::POST, "/api/channels").json(&body))
            .await?;
        json_str_field(&response, "id")
            .ok_or_else(|| AdapterError::Parse("channel id missing from ARI response".to_string()))
    }

    pub async fn end_call(&self, external_id: &str) -> Result<(), AdapterError> {
        self.http
            .send(self.authed(Method::DELETE, &format!("/api/channels/{external_id}")))
            .await?;
        Ok(())
    }

    pub async fn transfer_call(&self, external_id: &str, to_phone: &str) -> Result<(), AdapterError> {
        let body = json!({ "extension": to_phone, "context": DIALPLAN_CONTEXT });
        self.http
            .send(
                self.authed(Method::POST, &format!("/api/channels/{external_id}/redirect"))
                    .json(&body),
            )
            .await?;
        Ok(())
    }

    pub async fn get_call_status(&self, external_id: &str) -> Result<String, AdapterError> {
        let body = self
            .http
            .send_lenient(self.authed(Method::GET, &format!("/api/channels/{external_id}")))
            .await?;
        Ok(body
            .and_then(|b| json_str_field(&b, "state"))
            .unwrap_or_else(|| UNKNOWN_STATUS.to_string()))
    }

    pub fn validate_webhook_signature(&self, payload: &[u8], signature: &str) -> bool {
        verify_optional_secret(&self.http.provider, payload, signature)
    }
}
