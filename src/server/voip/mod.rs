//! Provider adapters
//!
//! One dialect per upstream kind, all behind [`VoipAdapter`]. Adapters are
//! stateless apart from the provider row and a shared `reqwest::Client`, so
//! building one per request is cheap.

pub mod http;
pub mod signature;

mod asterisk;
mod exotel;
mod mcube;
mod sip;
mod twilio;

use std::time::Duration;

use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::models::{CallSession, ProviderKind, VoipProvider};

pub use asterisk::AsteriskAdapter;
pub use exotel::ExotelAdapter;
pub use http::ProviderHttp;
pub use mcube::McubeAdapter;
pub use sip::SipAdapter;
pub use twilio::TwilioAdapter;

/// Status reported when the upstream gives no usable answer.
pub const UNKNOWN_STATUS: &str = "UNKNOWN";

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("provider returned HTTP {status}: {snippet}")]
    Status { status: u16, snippet: String },

    #[error("provider did not answer within {0:?}")]
    Timeout(Duration),

    #[error("network error: {0}")]
    Network(String),

    #[error("unexpected provider response: {0}")]
    Parse(String),

    #[error("provider misconfigured: {0}")]
    Config(String),

    #[error("request cancelled by shutdown")]
    Cancelled,
}

/// String field at the top level of a JSON body; numbers are stringified.
pub(crate) fn json_str_field(body: &str, field: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    match value.get(field)? {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Hex HMAC-SHA256 with an explicitly configured secret. Without one the
/// signature is accepted; the registry refuses such providers unless
/// unsigned webhooks are allowed.
pub(crate) fn verify_optional_secret(provider: &VoipProvider, payload: &[u8], sig: &str) -> bool {
    match provider
        .credentials
        .webhook_secret
        .as_deref()
        .filter(|s| !s.is_empty())
    {
        Some(secret) => signature::verify_sha256_hex(secret, payload, sig),
        None => {
            tracing::warn!(
                provider_id = %provider.id,
                kind = %provider.kind,
                "Accepting unsigned webhook, no webhook_secret configured"
            );
            true
        }
    }
}

#[derive(Clone)]
pub enum VoipAdapter {
    Asterisk(AsteriskAdapter),
    Exotel(ExotelAdapter),
    Twilio(TwilioAdapter),
    Mcube(McubeAdapter),
    Sip(SipAdapter),
}

impl VoipAdapter {
    pub fn for_provider(
        provider: &VoipProvider,
        client: Client,
        cancel: CancellationToken,
    ) -> Result<Self, AdapterError> {
        if provider.base_url().is_empty() {
            return Err(AdapterError::Config(format!(
                "provider {} has no api_url",
                provider.id
            )));
        }
        let http = ProviderHttp::new(provider.clone(), client, cancel);
        Ok(match provider.kind {
            ProviderKind::Asterisk => Self::Asterisk(AsteriskAdapter::new(http)),
            ProviderKind::Exotel => Self::Exotel(ExotelAdapter::new(http)),
            ProviderKind::Twilio => Self::Twilio(TwilioAdapter::new(http)),
            ProviderKind::Mcube => Self::Mcube(McubeAdapter::new(http)),
            ProviderKind::Sip => Self::Sip(SipAdapter::new(http)),
        })
    }

    pub fn kind(&self) -> ProviderKind {
        match self {
            Self::Asterisk(_) => ProviderKind::Asterisk,
            Self::Exotel(_) => ProviderKind::Exotel,
            Self::Twilio(_) => ProviderKind::Twilio,
            Self::Mcube(_) => ProviderKind::Mcube,
            Self::Sip(_) => ProviderKind::Sip,
        }
    }

    /// Place the call upstream and return the provider's call id.
    pub async fn initiate_call(&self, session: &CallSession) -> Result<String, AdapterError> {
        tracing::info!(
            "Initiating {} call for session {} to {}",
            self.kind(),
            session.id,
            session.to_phone
        );
        match self {
            Self::Asterisk(a) => a.initiate_call(session).await,
            Self::Exotel(a) => a.initiate_call(session).await,
            Self::Twilio(a) => a.initiate_call(session).await,
            Self::Mcube(a) => a.initiate_call(session).await,
            Self::Sip(a) => a.initiate_call(session).await,
        }
    }

    pub async fn end_call(&self, external_id: &str) -> Result<(), AdapterError> {
        match self {
            Self::Asterisk(a) => a.end_call(external_id).await,
            Self::Exotel(a) => a.end_call(external_id).await,
            Self::Twilio(a) => a.end_call(external_id).await,
            Self::Mcube(a) => a.end_call(external_id).await,
            Self::Sip(a) => a.end_call(external_id).await,
        }
    }

    pub async fn transfer_call(&self, external_id: &str, to_phone: &str) -> Result<(), AdapterError> {
        match self {
            Self::Asterisk(a) => a.transfer_call(external_id, to_phone).await,
            Self::Exotel(a) => a.transfer_call(external_id, to_phone).await,
            Self::Twilio(a) => a.transfer_call(external_id, to_phone).await,
            Self::Mcube(a) => a.transfer_call(external_id, to_phone).await,
            Self::Sip(a) => a.transfer_call(external_id, to_phone).await,
        }
    }

    /// Provider-native status string, or [`UNKNOWN_STATUS`].
    pub async fn get_call_status(&self, external_id: &str) -> Result<String, AdapterError> {
        match self {
            Self::Asterisk(a) => a.get_call_status(external_id).await,
            Self::Exotel(a) => a.get_call_status(external_id).await,
            Self::Twilio(a) => a.get_call_status(external_id).await,
            Self::Mcube(a) => a.get_call_status(external_id).await,
            Self::Sip(a) => a.get_call_status(external_id).await,
        }
    }

    pub fn validate_webhook_signature(&self, payload: &[u8], signature: &str) -> bool {
        match self {
            Self::Asterisk(a) => a.validate_webhook_signature(payload, signature),
            Self::Exotel(a) => a.validate_webhook_signature(payload, signature),
            Self::Twilio(a) => a.validate_webhook_signature(payload, signature),
            Self::Mcube(a) => a.validate_webhook_signature(payload, signature),
            Self::Sip(a) => a.validate_webhook_signature(payload, signature),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CreateProviderRequest, InitiateCallRequest};
    use serde_json::json;
    use wiremock::matchers::{body_json, body_string_contains, header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(kind: &str, api_url: &str, extra: serde_json::Value) -> VoipProvider {
        let mut body = json!({
            "id": "prov-1",
            "name": "test",
            "kind": kind,
            "api_url": api_url,
            "api_key": "key",
            "api_secret": "secret",
            "auth_token": "token",
            "sender_number": "+15550000000",
            "caller_id": "+15551111111",
            "callback_url": "https://hooks.example/voip",
            "timeout_seconds": 2,
        });
        if let (Some(base), Some(extra)) = (body.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                base.insert(k.clone(), v.clone());
            }
        }
        let req: CreateProviderRequest = serde_json::from_value(body).unwrap();
        req.into_provider("t1", "admin")
    }

    fn adapter(p: &VoipProvider) -> VoipAdapter {
        VoipAdapter::for_provider(p, Client::new(), CancellationToken::new()).unwrap()
    }

    fn session() -> CallSession {
        let mut s = CallSession::new(
            "t1",
            "u1",
            &InitiateCallRequest {
                to_phone: "+15552222222".into(),
                ..Default::default()
            },
        );
        s.from_phone = "+15550000000".into();
        s
    }

    #[tokio::test]
    async fn test_asterisk_initiate_posts_channel() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/channels"))
            .and(header("authorization", "Bearer token"))
            .and(body_json(json!({
                "endpoint": "SIP/+15552222222",
                "extension": "+15552222222",
                "context": "from-internal",
                "priority": 1
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "chan-9"})))
            .expect(1)
            .mount(&server)
            .await;

        let a = adapter(&provider("ASTERISK", &server.uri(), json!({})));
        assert_eq!(a.initiate_call(&session()).await.unwrap(), "chan-9");
    }

    #[tokio::test]
    async fn test_asterisk_missing_id_is_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/channels"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"state": "Up"})))
            .mount(&server)
            .await;

        let a = adapter(&provider("ASTERISK", &server.uri(), json!({})));
        assert!(matches!(
            a.initiate_call(&session()).await,
            Err(AdapterError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn test_exotel_initiate_uses_form_and_basic_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/Accounts/key/Calls/connect"))
            .and(header_exists("authorization"))
            .and(body_string_contains("CallerId=%2B15551111111"))
            .and(body_string_contains("Timeout=2"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<TwilioResponse><Call><Sid>exo-1</Sid></Call></TwilioResponse>"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let a = adapter(&provider("EXOTEL", &server.uri(), json!({})));
        assert_eq!(a.initiate_call(&session()).await.unwrap(), "exo-1");
    }

    #[tokio::test]
    async fn test_exotel_status_reads_xml() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/Accounts/key/Calls/exo-1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<R><Call><Status>completed</Status></Call></R>"),
            )
            .mount(&server)
            .await;

        let a = adapter(&provider("EXOTEL", &server.uri(), json!({})));
        assert_eq!(a.get_call_status("exo-1").await.unwrap(), "completed");
    }

    #[tokio::test]
    async fn test_twilio_end_and_transfer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/2010-04-01/Accounts/key/Calls/CA1.json"))
            .and(body_json(json!({"Status": "completed"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/2010-04-01/Accounts/key/Calls/CA1.json"))
            .and(body_json(json!({
                "Url": "https://hooks.example/voip?transfer_to=%2B15553333333"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let a = adapter(&provider("TWILIO", &server.uri(), json!({})));
        a.end_call("CA1").await.unwrap();
        a.transfer_call("CA1", "+15553333333").await.unwrap();
    }

    #[tokio::test]
    async fn test_twilio_initiate_returns_sid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/2010-04-01/Accounts/key/Calls.json"))
            .and(body_json(json!({
                "From": "+15550000000",
                "To": "+15552222222",
                "Url": "https://hooks.example/voip"
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"sid": "CA77"})))
            .mount(&server)
            .await;

        let a = adapter(&provider("TWILIO", &server.uri(), json!({})));
        assert_eq!(a.initiate_call(&session()).await.unwrap(), "CA77");
    }

    #[tokio::test]
    async fn test_mcube_non_2xx_is_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/click2call"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let a = adapter(&provider("MCUBE", &server.uri(), json!({})));
        match a.initiate_call(&session()).await {
            Err(AdapterError::Status { status, snippet }) => {
                assert_eq!(status, 500);
                assert_eq!(snippet, "upstream down");
            }
            other => panic!("expected status error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_sip_sends_api_key_and_status_falls_back() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/calls"))
            .and(header("x-api-key", "key"))
            .and(body_json(json!({
                "caller": "+15550000000",
                "callee": "+15552222222",
                "caller_id": "+15551111111"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"call_id": 42})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/calls/42"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let a = adapter(&provider("SIP", &server.uri(), json!({})));
        assert_eq!(a.initiate_call(&session()).await.unwrap(), "42");
        assert_eq!(a.get_call_status("42").await.unwrap(), UNKNOWN_STATUS);
    }

    #[tokio::test]
    async fn test_timeout_maps_to_timeout_error() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/calls/1"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let p = provider("SIP", &server.uri(), json!({"timeout_seconds": 1}));
        let a = adapter(&p);
        assert!(matches!(a.end_call("1").await, Err(AdapterError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_cancellation_aborts_in_flight_call() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/calls/1"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let p = provider("SIP", &server.uri(), json!({"timeout_seconds": 30}));
        let cancel = CancellationToken::new();
        let a = VoipAdapter::for_provider(&p, Client::new(), cancel.clone()).unwrap();
        cancel.cancel();
        assert!(matches!(a.end_call("1").await, Err(AdapterError::Cancelled)));
    }

    #[test]
    fn test_signature_schemes_per_kind() {
        let body = br#"{"event_type":"CALL_ENDED","session_id":"s1"}"#;

        let twilio = adapter(&provider("TWILIO", "http://x", json!({})));
        let sig = signature::sign_sha1_base64("secret", "https://hooks.example/voip", body);
        assert!(twilio.validate_webhook_signature(body, &sig));
        assert!(!twilio.validate_webhook_signature(body, "bogus"));

        let exotel = adapter(&provider("EXOTEL", "http://x", json!({"webhook_secret": "wh"})));
        assert!(exotel.validate_webhook_signature(body, &signature::sign_sha256_hex("wh", body)));
        assert!(!exotel.validate_webhook_signature(body, &signature::sign_sha256_hex("secret", body)));

        let mcube = adapter(&provider("MCUBE", "http://x", json!({})));
        assert!(mcube.validate_webhook_signature(body, &signature::sign_sha256_hex("token", body)));

        let sip = adapter(&provider("SIP", "http://x", json!({"webhook_secret": "s"})));
        assert!(sip.validate_webhook_signature(body, &signature::sign_sha256_hex("s", body)));
        assert!(!sip.validate_webhook_signature(body, "00"));

        let unsigned = adapter(&provider("ASTERISK", "http://x", json!({})));
        assert!(unsigned.validate_webhook_signature(body, ""));
    }

    #[test]
    fn test_empty_api_url_is_config_error() {
        let p = provider("SIP", "", json!({}));
        assert!(matches!(
            VoipAdapter::for_provider(&p, Client::new(), CancellationToken::new()),
            Err(AdapterError::Config(_))
        ));
    }
}
