use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upstream VoIP dialect a provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderKind {
    Asterisk,
    Exotel,
    Twilio,
    Mcube,
    Sip,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Asterisk => "ASTERISK",
            ProviderKind::Exotel => "EXOTEL",
            ProviderKind::Twilio => "TWILIO",
            ProviderKind::Mcube => "MCUBE",
            ProviderKind::Sip => "SIP",
        }
    }

    /// Request header carrying the webhook signature for this dialect.
    pub fn signature_header(&self) -> &'static str {
        match self {
            ProviderKind::Twilio => "x-twilio-signature",
            ProviderKind::Exotel => "x-exotel-signature",
            ProviderKind::Mcube => "x-mcube-signature",
            ProviderKind::Asterisk | ProviderKind::Sip => "x-signature",
        }
    }

    /// Dialects without a documented signing scheme of their own.
    pub fn needs_explicit_webhook_secret(&self) -> bool {
        matches!(self, ProviderKind::Asterisk | ProviderKind::Sip)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ASTERISK" => Ok(ProviderKind::Asterisk),
            "EXOTEL" => Ok(ProviderKind::Exotel),
            "TWILIO" => Ok(ProviderKind::Twilio),
            "MCUBE" => Ok(ProviderKind::Mcube),
            "SIP" => Ok(ProviderKind::Sip),
            other => Err(format!("unknown provider kind: {other}")),
        }
    }
}

/// Opaque upstream credentials, passed to adapters verbatim.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderCredentials {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    #[serde(default)]
    pub auth_token: String,
    #[serde(default)]
    pub webhook_secret: Option<String>,
}

impl fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("api_key", &redact(&self.api_key))
            .field("api_secret", &redact(&self.api_secret))
            .field("auth_token", &redact(&self.auth_token))
            .field("webhook_secret", &self.webhook_secret.as_deref().map(redact))
            .finish()
    }
}

fn redact(value: &str) -> &'static str {
    if value.is_empty() {
        ""
    } else {
        "***"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoipProvider {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub kind: ProviderKind,
    pub api_url: String,
    pub credentials: ProviderCredentials,
    pub sender_number: String,
    pub caller_id: String,
    pub callback_url: String,
    pub priority: i32,
    pub timeout_seconds: i32,
    pub retry_count: i32,
    pub is_active: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VoipProvider {
    /// Base URL with any trailing slash removed.
    pub fn base_url(&self) -> &str {
        self.api_url.trim_end_matches('/')
    }

    /// Timeout for outbound calls, never below one second.
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_seconds.max(1) as u64)
    }

    /// Provider view safe to return to API callers.
    pub fn redacted(&self) -> ProviderView {
        ProviderView {
            id: self.id.clone(),
            tenant_id: self.tenant_id.clone(),
            name: self.name.clone(),
            kind: self.kind,
            api_url: self.api_url.clone(),
            sender_number: self.sender_number.clone(),
            caller_id: self.caller_id.clone(),
            callback_url: self.callback_url.clone(),
            priority: self.priority,
            timeout_seconds: self.timeout_seconds,
            retry_count: self.retry_count,
            is_active: self.is_active,
            has_webhook_secret: self
                .credentials
                .webhook_secret
                .as_deref()
                .is_some_and(|s| !s.is_empty()),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Provider as exposed over HTTP; credentials are write-only.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderView {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub kind: ProviderKind,
    pub api_url: String,
    pub sender_number: String,
    pub caller_id: String,
    pub callback_url: String,
    pub priority: i32,
    pub timeout_seconds: i32,
    pub retry_count: i32,
    pub is_active: bool,
    pub has_webhook_secret: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_timeout() -> i32 {
    30
}

fn default_active() -> bool {
    true
}

/// Body of `POST /providers`, also the shape of `VOIP_PROVIDERS_FILE` entries.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateProviderRequest {
    /// Only honoured for startup seeding; HTTP callers always use their own tenant.
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub kind: ProviderKind,
    pub api_url: String,
    #[serde(default, flatten)]
    pub credentials: ProviderCredentials,
    #[serde(default)]
    pub sender_number: String,
    #[serde(default)]
    pub caller_id: String,
    #[serde(default)]
    pub callback_url: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: i32,
    #[serde(default)]
    pub retry_count: i32,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

impl CreateProviderRequest {
    pub fn into_provider(self, tenant_id: &str, created_by: &str) -> VoipProvider {
        let now = Utc::now();
        VoipProvider {
            id: self
                .id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            tenant_id: tenant_id.to_string(),
            name: self.name,
            kind: self.kind,
            api_url: self.api_url,
            credentials: self.credentials,
            sender_number: self.sender_number,
            caller_id: self.caller_id,
            callback_url: self.callback_url,
            priority: self.priority,
            timeout_seconds: self.timeout_seconds,
            retry_count: self.retry_count,
            is_active: self.is_active,
            created_by: created_by.to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}
