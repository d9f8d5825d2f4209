use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Longest query echo kept in a usage row.
pub const USAGE_QUERY_MAX_CHARS: usize = 1000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiPriority {
    High,
    #[default]
    Normal,
}

impl AiPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            AiPriority::High => "high",
            AiPriority::Normal => "normal",
        }
    }
}

/// A language-model query scoped to one tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiRequest {
    #[serde(default)]
    pub tenant_id: String,
    pub query: String,
    #[serde(default)]
    pub context: Value,
    #[serde(default)]
    pub priority: AiPriority,
}

/// Body of `POST /ai/query`; the tenant comes from the caller's token.
#[derive(Debug, Clone, Deserialize)]
pub struct AiQueryBody {
    pub query: String,
    #[serde(default)]
    pub context: Value,
    #[serde(default)]
    pub priority: AiPriority,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiResponse {
    pub provider: String,
    pub tokens_used: i64,
    pub cost: f64,
    pub processing_time_ms: i64,
    pub cached: bool,
    pub payload: Map<String, Value>,
}

impl AiResponse {
    pub fn new(provider: impl Into<String>, tokens_used: i64, cost: f64) -> Self {
        Self {
            provider: provider.into(),
            tokens_used,
            cost,
            processing_time_ms: 0,
            cached: false,
            payload: Map::new(),
        }
    }

    pub fn with_payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = payload;
        self
    }
}

/// Persisted accounting row for one provider invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiUsageRecord {
    pub tenant_id: String,
    pub query: String,
    pub provider: String,
    pub tokens_used: i64,
    pub processing_time_ms: i64,
    pub cost: f64,
    pub priority: AiPriority,
    pub created_at: DateTime<Utc>,
}

impl AiUsageRecord {
    pub fn new(request: &AiRequest, provider: &str, tokens_used: i64, cost: f64, processing_time_ms: i64) -> Self {
        Self {
            tenant_id: request.tenant_id.clone(),
            query: truncate_chars(&request.query, USAGE_QUERY_MAX_CHARS),
            provider: provider.to_string(),
            tokens_used,
            processing_time_ms,
            cost,
            priority: request.priority,
            created_at: Utc::now(),
        }
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AiUsageSummary {
    pub total_requests: i64,
    pub total_tokens: i64,
    pub total_cost: f64,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

/// Point-in-time view of one registered AI provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AiProviderStats {
    pub available: bool,
    pub cost_per_token: f64,
}
