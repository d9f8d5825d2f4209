//! AI orchestrator
//!
//! Routes tenant queries to registered language-model providers, caches
//! answers by `(tenant, query, context)` and records every provider
//! invocation in the usage log.

pub mod cache;
pub mod claude;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::models::{AiPriority, AiProviderStats, AiRequest, AiResponse, AiUsageRecord, AiUsageSummary};
use crate::server::db::{AiUsageStore, StoreError};

pub use cache::{cache_key, ResponseCache};
pub use claude::ClaudeProvider;

#[derive(Debug, thiserror::Error)]
pub enum AiError {
    #[error("no AI provider is available")]
    NoProvider,

    #[error("AI provider {provider} failed: {message}")]
    Provider { provider: String, message: String },
}

/// A language-model backend. Tokens and cost are reported by the provider.
#[async_trait]
pub trait AiProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn call(&self, request: &AiRequest) -> Result<AiResponse, AiError>;

    fn is_available(&self) -> bool;

    fn cost_per_token(&self) -> f64;
}

pub struct AiOrchestrator {
    providers: RwLock<BTreeMap<String, Arc<dyn AiProvider>>>,
    cache: ResponseCache,
    usage: Arc<dyn AiUsageStore>,
    next: AtomicUsize,
}

impl AiOrchestrator {
    pub fn new(usage: Arc<dyn AiUsageStore>, cache_size: usize, cache_ttl: Duration) -> Self {
        Self {
            providers: RwLock::new(BTreeMap::new()),
            cache: ResponseCache::new(cache_size, cache_ttl),
            usage,
            next: AtomicUsize::new(0),
        }
    }

    pub async fn register_provider(&self, name: &str, provider: Arc<dyn AiProvider>) {
        tracing::info!("Registered AI provider {}", name);
        self.providers.write().await.insert(name.to_string(), provider);
    }

    /// High priority takes the cheapest available provider; normal priority
    /// rotates through them in name order.
    async fn select(&self, priority: AiPriority) -> Result<(String, Arc<dyn AiProvider>), AiError> {
        let available: Vec<(String, Arc<dyn AiProvider>)> = self
            .providers
            .read()
            .await
            .iter()
            .filter(|(_, p)| p.is_available())
            .map(|(name, p)| (name.clone(), Arc::clone(p)))
            .collect();

        if available.is_empty() {
            return Err(AiError::NoProvider);
        }

        let chosen = match priority {
            AiPriority::High => available
                .into_iter()
                .min_by(|(_, a), (_, b)| a.cost_per_token().total_cmp(&b.cost_per_token())),
            AiPriority::Normal => {
                let idx = self.next.fetch_add(1, Ordering::Relaxed) % available.len();
                available.into_iter().nth(idx)
            }
        };
        chosen.ok_or(AiError::NoProvider)
    }

    pub async fn process_query(&self, request: AiRequest) -> Result<AiResponse, AiError> {
        let key = cache_key(&request.tenant_id, &request.query, &request.context);

        if let Some(mut hit) = self.cache.get(&key).await {
            tracing::debug!(tenant_id = %request.tenant_id, "AI cache hit");
            hit.cached = true;
            return Ok(hit);
        }

        let (name, provider) = self.select(request.priority).await?;
        let started = Instant::now();
        let result = provider.call(&request).await;
        let elapsed_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);

        match result {
            Ok(mut response) => {
                if response.provider.is_empty() {
                    response.provider = name.clone();
                }
                response.processing_time_ms = elapsed_ms;
                response.cached = false;

                self.cache.insert(key, response.clone()).await;
                self.record(AiUsageRecord::new(
                    &request,
                    &response.provider,
                    response.tokens_used,
                    response.cost,
                    elapsed_ms,
                ))
                .await;

                tracing::info!(
                    tenant_id = %request.tenant_id,
                    provider = %response.provider,
                    tokens = response.tokens_used,
                    "AI query served in {}ms",
                    elapsed_ms
                );
                Ok(response)
            }
            Err(e) => {
                self.record(AiUsageRecord::new(&request, &name, 0, 0.0, elapsed_ms))
                    .await;
                tracing::warn!(tenant_id = %request.tenant_id, provider = %name, "AI query failed: {}", e);
                Err(match e {
                    AiError::Provider { .. } => e,
                    other => AiError::Provider {
                        provider: name,
                        message: other.to_string(),
                    },
                })
            }
        }
    }

    async fn record(&self, record: AiUsageRecord) {
        if let Err(e) = self.usage.record_usage(&record).await {
            tracing::error!(tenant_id = %record.tenant_id, "Failed to record AI usage: {}", e);
        }
    }

    pub async fn get_provider_stats(&self) -> BTreeMap<String, AiProviderStats> {
        self.providers
            .read()
            .await
            .iter()
            .map(|(name, p)| {
                (
                    name.clone(),
                    AiProviderStats {
                        available: p.is_available(),
                        cost_per_token: p.cost_per_token(),
                    },
                )
            })
            .collect()
    }

    pub async fn get_tenant_usage(
        &self,
        tenant_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<AiUsageSummary, StoreError> {
        self.usage.tenant_usage(tenant_id, start, end).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::server::db::memory::MemoryStore;
    use serde_json::{json, Value};

    /// Provider with a fixed price that counts its invocations.
    pub(crate) struct FixedProvider {
        pub name: String,
        pub cost: f64,
        pub available: bool,
        pub fail: bool,
        pub calls: AtomicUsize,
    }

    impl FixedProvider {
        pub(crate) fn new(name: &str, cost: f64) -> Arc<Self> {
            Self::build(name, cost, true, false)
        }

        pub(crate) fn build(name: &str, cost: f64, available: bool, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                cost,
                available,
                fail,
                calls: AtomicUsize::new(0),
            })
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AiProvider for FixedProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn call(&self, _request: &AiRequest) -> Result<AiResponse, AiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(AiError::Provider {
                    provider: self.name.clone(),
                    message: "boom".into(),
                });
            }
            Ok(AiResponse::new(self.name.clone(), 100, 100.0 * self.cost))
        }

        fn is_available(&self) -> bool {
            self.available
        }

        fn cost_per_token(&self) -> f64 {
            self.cost
        }
    }

    fn request(query: &str, priority: AiPriority) -> AiRequest {
        AiRequest {
            tenant_id: "t1".into(),
            query: query.into(),
            context: json!({}),
            priority,
        }
    }

    fn orchestrator(store: Arc<MemoryStore>) -> AiOrchestrator {
        AiOrchestrator::new(store, 1000, Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn test_high_priority_picks_cheapest_and_caches() {
        let store = Arc::new(MemoryStore::new());
        let ai = orchestrator(store.clone());
        let cheap = FixedProvider::new("cheap", 0.002);
        let pricey = FixedProvider::new("pricey", 0.005);
        ai.register_provider("cheap", cheap.clone()).await;
        ai.register_provider("pricey", pricey.clone()).await;

        let first = ai.process_query(request("q", AiPriority::High)).await.unwrap();
        assert_eq!(first.provider, "cheap");
        assert!(!first.cached);

        let second = ai.process_query(request("q", AiPriority::High)).await.unwrap();
        assert!(second.cached);
        assert_eq!(cheap.calls(), 1);
        assert_eq!(pricey.calls(), 0);

        let usage = ai
            .get_tenant_usage("t1", Utc::now() - chrono::Duration::hours(1), Utc::now())
            .await
            .unwrap();
        assert_eq!(usage.total_requests, 1);
        assert_eq!(usage.total_tokens, 100);
    }

    #[tokio::test]
    async fn test_normal_priority_rotates() {
        let ai = orchestrator(Arc::new(MemoryStore::new()));
        let a = FixedProvider::new("a", 0.01);
        let b = FixedProvider::new("b", 0.01);
        ai.register_provider("a", a.clone()).await;
        ai.register_provider("b", b.clone()).await;

        for n in 0..4 {
            ai.process_query(request(&format!("q{n}"), AiPriority::Normal))
                .await
                .unwrap();
        }
        assert_eq!(a.calls(), 2);
        assert_eq!(b.calls(), 2);
    }

    #[tokio::test]
    async fn test_unavailable_providers_are_skipped() {
        let ai = orchestrator(Arc::new(MemoryStore::new()));
        assert!(matches!(
            ai.process_query(request("q", AiPriority::Normal)).await,
            Err(AiError::NoProvider)
        ));

        let down = FixedProvider::build("down", 0.0, false, false);
        ai.register_provider("down", down.clone()).await;
        assert!(matches!(
            ai.process_query(request("q", AiPriority::High)).await,
            Err(AiError::NoProvider)
        ));
        assert_eq!(down.calls(), 0);

        let stats = ai.get_provider_stats().await;
        assert!(!stats["down"].available);
    }

    #[tokio::test]
    async fn test_failure_is_accounted_and_not_cached() {
        let store = Arc::new(MemoryStore::new());
        let ai = orchestrator(store.clone());
        let broken = FixedProvider::build("broken", 0.001, true, true);
        ai.register_provider("broken", broken.clone()).await;

        for _ in 0..2 {
            let err = ai.process_query(request("q", AiPriority::Normal)).await.unwrap_err();
            assert!(matches!(err, AiError::Provider { .. }));
        }
        assert_eq!(broken.calls(), 2);

        let usage = ai
            .get_tenant_usage("t1", Utc::now() - chrono::Duration::hours(1), Utc::now())
            .await
            .unwrap();
        assert_eq!(usage.total_requests, 2);
        assert_eq!(usage.total_tokens, 0);
    }

    #[tokio::test]
    async fn test_context_changes_cache_key() {
        let ai = orchestrator(Arc::new(MemoryStore::new()));
        let p = FixedProvider::new("p", 0.01);
        ai.register_provider("p", p.clone()).await;

        let mut req = request("q", AiPriority::Normal);
        ai.process_query(req.clone()).await.unwrap();
        req.context = Value::String("other".into());
        let second = ai.process_query(req).await.unwrap();
        assert!(!second.cached);
        assert_eq!(p.calls(), 2);
    }
}
