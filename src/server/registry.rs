//! Provider registry
//!
//! Per-tenant cache of provider rows in front of the [`ProviderStore`].
//! Writes go to the store first and then drop the tenant's cache entry.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::models::VoipProvider;
use crate::server::db::{ProviderStore, StoreError};
use crate::server::error::CoreError;

pub struct ProviderRegistry {
    store: Arc<dyn ProviderStore>,
    cache: RwLock<HashMap<String, Arc<Vec<VoipProvider>>>>,
    allow_unsigned_webhooks: bool,
}

impl ProviderRegistry {
    pub fn new(store: Arc<dyn ProviderStore>, allow_unsigned_webhooks: bool) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
            allow_unsigned_webhooks,
        }
    }

    pub async fn register(&self, provider: VoipProvider) -> Result<VoipProvider, CoreError> {
        if provider.name.trim().is_empty() {
            return Err(CoreError::Validation("name is required".to_string()));
        }
        if provider.base_url().is_empty() {
            return Err(CoreError::Validation("api_url is required".to_string()));
        }
        let has_secret = provider
            .credentials
            .webhook_secret
            .as_deref()
            .is_some_and(|s| !s.is_empty());
        if provider.kind.needs_explicit_webhook_secret() && !has_secret {
            if !self.allow_unsigned_webhooks {
                return Err(CoreError::Validation(format!(
                    "{} providers need a webhook_secret (or ALLOW_UNSIGNED_WEBHOOKS=true)",
                    provider.kind
                )));
            }
            tracing::warn!(
                tenant_id = %provider.tenant_id,
                provider_id = %provider.id,
                "Registering {} provider without a webhook secret",
                provider.kind
            );
        }

        self.store.insert_provider(&provider).await?;
        self.cache.write().await.remove(&provider.tenant_id);

        tracing::info!(
            tenant_id = %provider.tenant_id,
            provider_id = %provider.id,
            "Registered {} provider '{}'",
            provider.kind,
            provider.name
        );
        Ok(provider)
    }

    pub async fn get(&self, tenant_id: &str, id: &str) -> Result<VoipProvider, CoreError> {
        match self.store.get_provider(tenant_id, id).await {
            Ok(provider) => Ok(provider),
            Err(StoreError::NotFound) => Err(CoreError::NotFound(format!("provider {id}"))),
            Err(e) => Err(e.into()),
        }
    }

    async fn tenant_providers(&self, tenant_id: &str) -> Result<Arc<Vec<VoipProvider>>, CoreError> {
        if let Some(cached) = self.cache.read().await.get(tenant_id) {
            return Ok(Arc::clone(cached));
        }
        let providers = Arc::new(self.store.list_providers(tenant_id).await?);
        self.cache
            .write()
            .await
            .insert(tenant_id.to_string(), Arc::clone(&providers));
        Ok(providers)
    }

    /// Active providers, `priority DESC, created_at DESC`.
    pub async fn list_active(&self, tenant_id: &str) -> Result<Vec<VoipProvider>, CoreError> {
        Ok(self
            .tenant_providers(tenant_id)
            .await?
            .iter()
            .filter(|p| p.is_active)
            .cloned()
            .collect())
    }

    /// The named provider if given, otherwise the highest-priority active one.
    pub async fn select(
        &self,
        tenant_id: &str,
        provider_id: Option<&str>,
    ) -> Result<VoipProvider, CoreError> {
        if let Some(id) = provider_id.filter(|id| !id.is_empty()) {
            return match self.get(tenant_id, id).await {
                Ok(provider) if provider.is_active => Ok(provider),
                Ok(_) => Err(CoreError::NoProvider(format!("provider {id} is inactive"))),
                Err(CoreError::NotFound(_)) => Err(CoreError::NoProvider(format!(
                    "provider {id} not found for tenant"
                ))),
                Err(e) => Err(e),
            };
        }

        self.list_active(tenant_id)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::NoProvider("no active provider for tenant".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CreateProviderRequest, ProviderKind};
    use crate::server::db::memory::MemoryStore;

    fn provider(tenant: &str, id: &str, kind: ProviderKind, priority: i32, active: bool) -> VoipProvider {
        let req: CreateProviderRequest = serde_json::from_value(serde_json::json!({
            "id": id,
            "name": id,
            "kind": kind,
            "api_url": "http://upstream",
            "webhook_secret": "s",
            "priority": priority,
            "is_active": active,
        }))
        .unwrap();
        req.into_provider(tenant, "admin")
    }

    fn registry(allow_unsigned: bool) -> ProviderRegistry {
        ProviderRegistry::new(Arc::new(MemoryStore::new()), allow_unsigned)
    }

    #[tokio::test]
    async fn test_select_prefers_priority_and_skips_inactive() {
        let reg = registry(false);
        reg.register(provider("t1", "low", ProviderKind::Twilio, 1, true)).await.unwrap();
        reg.register(provider("t1", "high", ProviderKind::Exotel, 9, false)).await.unwrap();
        reg.register(provider("t1", "mid", ProviderKind::Mcube, 5, true)).await.unwrap();

        let chosen = reg.select("t1", None).await.unwrap();
        assert_eq!(chosen.id, "mid");
        let active: Vec<_> = reg.list_active("t1").await.unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(active, vec!["mid", "low"]);
    }

    #[tokio::test]
    async fn test_select_explicit_rejects_inactive_and_foreign() {
        let reg = registry(false);
        reg.register(provider("t1", "off", ProviderKind::Sip, 0, false)).await.unwrap();
        reg.register(provider("t2", "other", ProviderKind::Sip, 0, true)).await.unwrap();

        assert!(matches!(reg.select("t1", Some("off")).await, Err(CoreError::NoProvider(_))));
        assert!(matches!(reg.select("t1", Some("other")).await, Err(CoreError::NoProvider(_))));
        assert!(matches!(reg.get("t1", "other").await, Err(CoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_empty_tenant_has_no_provider() {
        let reg = registry(false);
        assert!(matches!(reg.select("t1", None).await, Err(CoreError::NoProvider(_))));
    }

    #[tokio::test]
    async fn test_register_invalidates_cache() {
        let reg = registry(false);
        assert!(reg.list_active("t1").await.unwrap().is_empty());
        reg.register(provider("t1", "p", ProviderKind::Twilio, 0, true)).await.unwrap();
        assert_eq!(reg.list_active("t1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unsigned_asterisk_needs_opt_in() {
        let mut p = provider("t1", "ari", ProviderKind::Asterisk, 0, true);
        p.credentials.webhook_secret = None;

        assert!(matches!(
            registry(false).register(p.clone()).await,
            Err(CoreError::Validation(_))
        ));
        assert!(registry(true).register(p).await.is_ok());
    }
}
