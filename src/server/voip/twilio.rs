//! Twilio Programmable Voice dialect

use reqwest::{Method, Url};
use serde_json::json;

use super::http::ProviderHttp;
use super::{json_str_field, signature, AdapterError, UNKNOWN_STATUS};
use crate::models::CallSession;

/// TwiML URL Twilio fetches to redirect a live call, with the target
/// number as a properly encoded query parameter.
fn transfer_url(callback_url: &str, to_phone: &str) -> Result<Url, AdapterError> {
    Url::parse_with_params(callback_url, &[("transfer_to", to_phone)])
        .map_err(|e| AdapterError::Config(format!("invalid callback_url '{callback_url}': {e}")))
}

#[derive(Clone)]
pub struct TwilioAdapter {
    http: ProviderHttp,
}

impl TwilioAdapter {
    pub fn new(http: ProviderHttp) -> Self {
        Self { http }
    }

    fn authed(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let creds = &self.http.provider.credentials;
        self.http
            .request(method, path)
            .basic_auth(&creds.api_key, Some(&creds.api_secret))
    }

    fn calls_path(&self, suffix: &str) -> String {
        format!(
            "/2010-04-01/Accounts/{}/Calls{}",
            self.http.provider.credentials.api_key, suffix
        )
    }

    pub async fn initiate_call(&self, session: &CallSession) -> Result<String, AdapterError> {
        let body = json!({
            "From": session.from_phone,
            "To": session.to_phone,
            "Url": self.http.provider.callback_url,
        });
        let response = self
            .http
            .send(self.authed(Method::POST, &self.calls_path(".json")).json(&body))
            .await?;
        json_str_field(&response, "sid")
            .ok_or_else(|| AdapterError::Parse("sid missing from Twilio response".to_string()))
    }

    pub async fn end_call(&self, external_id: &str) -> Result<(), AdapterError> {
        self.http
            .send(
                self.authed(Method::POST, &self.calls_path(&format!("/{external_id}.json")))
                    .json(&json!({ "Status": "completed" })),
            )
            .await?;
        Ok(())
    }

    pub async fn transfer_call(&self, external_id: &str, to_phone: &str) -> Result<(), AdapterError> {
        let url = transfer_url(&self.http.provider.callback_url, to_phone)?;
        self.http
            .send(
                self.authed(Method::POST, &self.calls_path(&format!("/{external_id}.json")))
                    .json(&json!({ "Url": url.as_str() })),
            )
            .await?;
        Ok(())
    }

    pub async fn get_call_status(&self, external_id: &str) -> Result<String, AdapterError> {
        let body = self
            .http
            .send_lenient(self.authed(Method::GET, &self.calls_path(&format!("/{external_id}.json"))))
            .await?;
        Ok(body
            .and_then(|b| json_str_field(&b, "status"))
            .unwrap_or_else(|| UNKNOWN_STATUS.to_string()))
    }

    /// Base64 HMAC-SHA1 over `callback_url || body`, keyed by the webhook
    /// secret or the account secret.
    pub fn validate_webhook_signature(&self, payload: &[u8], sig: &str) -> bool {
        let provider = &self.http.provider;
        let creds = &provider.credentials;
        let secret = creds
            .webhook_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(&creds.api_secret);
        !secret.is_empty()
            && signature::verify_sha1_base64(secret, &provider.callback_url, payload, sig)
    }
}
