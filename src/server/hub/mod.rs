//! Tenant-scoped WebSocket hub
//!
//! A single coordinator task owns the client set and the per-tenant index.
//! Everyone else talks to it through three channels:
//!
//! - `register`: admit a client (acknowledged, so stats are current on return)
//! - `unregister`: drop a client when its reader exits
//! - `broadcast`: fan an event out to one tenant
//!
//! Each client's outbound queue is bounded. A full queue gets the client
//! evicted on the spot; the broadcaster never waits on a slow reader.

mod client;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio_util::sync::CancellationToken;

use crate::models::WsEvent;

/// Hub tunables.
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub client_queue: usize,
    pub broadcast_queue: usize,
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
    pub write_timeout: Duration,
    /// How long `broadcast` waits for space before dropping the event.
    pub enqueue_grace: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            client_queue: 256,
            broadcast_queue: 256,
            ping_interval: Duration::from_secs(54),
            pong_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(10),
            enqueue_grace: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("hub is shut down")]
    Closed,

    #[error("broadcast queue full, event {0} dropped")]
    Saturated(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HubStats {
    pub total_clients: usize,
    pub tenant_clients: BTreeMap<String, usize>,
}

/// Handed to a connection on admission.
pub struct Registration {
    pub client_id: String,
    pub events: mpsc::Receiver<Arc<WsEvent>>,
    /// Cancelled when the hub evicts this client or shuts down.
    pub evicted: CancellationToken,
}

struct ClientEntry {
    tenant_id: String,
    user_id: String,
    tx: mpsc::Sender<Arc<WsEvent>>,
    evicted: CancellationToken,
}

struct RegisterRequest {
    client_id: String,
    entry: ClientEntry,
    ack: oneshot::Sender<()>,
}

pub struct Hub {
    config: HubConfig,
    register_tx: mpsc::Sender<RegisterRequest>,
    unregister_tx: mpsc::UnboundedSender<String>,
    broadcast_tx: mpsc::Sender<Arc<WsEvent>>,
    stats: Arc<RwLock<HubStats>>,
    shutdown: CancellationToken,
}

impl Hub {
    /// Spawn the coordinator and return a handle to it.
    pub fn start(config: HubConfig, shutdown: CancellationToken) -> Arc<Self> {
        let (register_tx, register_rx) = mpsc::channel(64);
        let (unregister_tx, unregister_rx) = mpsc::unbounded_channel();
        let (broadcast_tx, broadcast_rx) = mpsc::channel(config.broadcast_queue.max(1));
        let stats = Arc::new(RwLock::new(HubStats::default()));

        let coordinator = Coordinator {
            clients: HashMap::new(),
            tenants: HashMap::new(),
            stats: Arc::clone(&stats),
        };
        tokio::spawn(coordinator.run(
            register_rx,
            unregister_rx,
            broadcast_rx,
            shutdown.clone(),
        ));

        Arc::new(Self {
            config,
            register_tx,
            unregister_tx,
            broadcast_tx,
            stats,
            shutdown,
        })
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub async fn register(&self, tenant_id: &str, user_id: &str) -> Result<Registration, HubError> {
        let client_id = uuid::Uuid::new_v4().to_string();
        let (tx, events) = mpsc::channel(self.config.client_queue.max(1));
        let evicted = self.shutdown.child_token();
        let (ack, acked) = oneshot::channel();

        let request = RegisterRequest {
            client_id: client_id.clone(),
            entry: ClientEntry {
                tenant_id: tenant_id.to_string(),
                user_id: user_id.to_string(),
                tx,
                evicted: evicted.clone(),
            },
            ack,
        };
        self.register_tx
            .send(request)
            .await
            .map_err(|_| HubError::Closed)?;
        acked.await.map_err(|_| HubError::Closed)?;

        Ok(Registration {
            client_id,
            events,
            evicted,
        })
    }

    pub fn unregister(&self, client_id: &str) {
        // The coordinator may already be gone during shutdown.
        let _ = self.unregister_tx.send(client_id.to_string());
    }

    /// Queue `event` for its tenant's clients, waiting at most the enqueue
    /// grace for room in the broadcast queue.
    pub async fn broadcast(&self, event: WsEvent) -> Result<(), HubError> {
        let event_id = event.event_id.clone();
        match tokio::time::timeout(
            self.config.enqueue_grace,
            self.broadcast_tx.send(Arc::new(event)),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(HubError::Closed),
            Err(_) => {
                tracing::warn!(event_id = %event_id, "Broadcast queue full, dropping event");
                Err(HubError::Saturated(event_id))
            }
        }
    }

    /// Broadcast and log instead of failing; for request paths that must not
    /// be held up by the hub.
    pub async fn publish(&self, event: WsEvent) {
        if let Err(e) = self.broadcast(event).await {
            tracing::warn!("Event not delivered to hub: {}", e);
        }
    }

    pub async fn stats(&self) -> HubStats {
        self.stats.read().await.clone()
    }
}

struct Coordinator {
    clients: HashMap<String, ClientEntry>,
    tenants: HashMap<String, HashSet<String>>,
    stats: Arc<RwLock<HubStats>>,
}

impl Coordinator {
    async fn run(
        mut self,
        mut register_rx: mpsc::Receiver<RegisterRequest>,
        mut unregister_rx: mpsc::UnboundedReceiver<String>,
        mut broadcast_rx: mpsc::Receiver<Arc<WsEvent>>,
        shutdown: CancellationToken,
    ) {
        tracing::info!("WebSocket hub started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(request) = register_rx.recv() => {
                    self.add(request.client_id, request.entry);
                    self.publish_stats().await;
                    let _ = request.ack.send(());
                }
                Some(client_id) = unregister_rx.recv() => {
                    if self.remove(&client_id).is_some() {
                        self.publish_stats().await;
                    }
                }
                Some(event) = broadcast_rx.recv() => {
                    if self.deliver(&event) {
                        self.publish_stats().await;
                    }
                }
                else => break,
            }
        }

        for entry in self.clients.values() {
            entry.evicted.cancel();
        }
        self.clients.clear();
        self.tenants.clear();
        self.publish_stats().await;
        tracing::info!("WebSocket hub stopped");
    }

    fn add(&mut self, client_id: String, entry: ClientEntry) {
        tracing::info!(
            client_id = %client_id,
            tenant_id = %entry.tenant_id,
            user_id = %entry.user_id,
            "WebSocket client registered"
        );
        self.tenants
            .entry(entry.tenant_id.clone())
            .or_default()
            .insert(client_id.clone());
        self.clients.insert(client_id, entry);
    }

    fn remove(&mut self, client_id: &str) -> Option<ClientEntry> {
        let entry = self.clients.remove(client_id)?;
        if let Some(ids) = self.tenants.get_mut(&entry.tenant_id) {
            ids.remove(client_id);
            if ids.is_empty() {
                self.tenants.remove(&entry.tenant_id);
            }
        }
        tracing::info!(
            client_id = %client_id,
            tenant_id = %entry.tenant_id,
            "WebSocket client unregistered"
        );
        Some(entry)
    }

    /// Fan out to the event's tenant. Returns true if anyone was evicted.
    fn deliver(&mut self, event: &Arc<WsEvent>) -> bool {
        let Some(ids) = self.tenants.get(&event.tenant_id) else {
            return false;
        };

        let mut stalled = Vec::new();
        for id in ids {
            let Some(client) = self.clients.get(id) else {
                continue;
            };
            match client.tx.try_send(Arc::clone(event)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => stalled.push(id.clone()),
            }
        }

        for id in &stalled {
            if let Some(entry) = self.remove(id) {
                tracing::warn!(
                    client_id = %id,
                    tenant_id = %entry.tenant_id,
                    "Evicting slow WebSocket client"
                );
                entry.evicted.cancel();
            }
        }
        !stalled.is_empty()
    }

    async fn publish_stats(&self) {
        let tenant_clients = self
            .tenants
            .iter()
            .map(|(tenant, ids)| (tenant.clone(), ids.len()))
            .collect();
        *self.stats.write().await = HubStats {
            total_clients: self.clients.len(),
            tenant_clients,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::error::TryRecvError;

    fn event(tenant: &str, n: usize) -> WsEvent {
        WsEvent::campaign_update(
            tenant,
            "camp-1",
            serde_json::Map::from_iter([("n".to_string(), serde_json::json!(n))]),
        )
    }

    #[tokio::test]
    async fn test_broadcast_is_tenant_scoped() {
        let hub = Hub::start(HubConfig::default(), CancellationToken::new());
        let mut a = hub.register("t1", "u1").await.unwrap();
        let mut b = hub.register("t2", "u2").await.unwrap();

        hub.broadcast(event("t1", 1)).await.unwrap();
        hub.broadcast(event("t2", 2)).await.unwrap();

        let got_a = a.events.recv().await.unwrap();
        let got_b = b.events.recv().await.unwrap();
        assert_eq!(got_a.tenant_id, "t1");
        assert_eq!(got_b.tenant_id, "t2");
        assert!(matches!(a.events.try_recv(), Err(TryRecvError::Empty)));
        assert!(matches!(b.events.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_stats_track_registrations() {
        let hub = Hub::start(HubConfig::default(), CancellationToken::new());
        let a = hub.register("t1", "u1").await.unwrap();
        let _b = hub.register("t1", "u2").await.unwrap();
        let _c = hub.register("t2", "u3").await.unwrap();

        let stats = hub.stats().await;
        assert_eq!(stats.total_clients, 3);
        assert_eq!(stats.tenant_clients.get("t1"), Some(&2));

        hub.unregister(&a.client_id);
        // A registration round-trip guarantees the unregister was processed.
        let _d = hub.register("t3", "u4").await.unwrap();
        let stats = hub.stats().await;
        assert_eq!(stats.tenant_clients.get("t1"), Some(&1));
        assert_eq!(stats.total_clients, 3);
    }

    #[tokio::test]
    async fn test_full_queue_evicts_only_that_client() {
        let config = HubConfig {
            client_queue: 4,
            ..HubConfig::default()
        };
        let hub = Hub::start(config, CancellationToken::new());
        let stalled = hub.register("t1", "slow").await.unwrap();
        let mut live = hub.register("t1", "fast").await.unwrap();

        for n in 0..10 {
            hub.broadcast(event("t1", n)).await.unwrap();
            let got = live.events.recv().await.unwrap();
            assert_eq!(got.data["n"], n);
        }

        assert!(stalled.evicted.is_cancelled());
        assert!(!live.evicted.is_cancelled());
        assert_eq!(hub.stats().await.tenant_clients.get("t1"), Some(&1));
    }

    #[tokio::test]
    async fn test_shutdown_evicts_everyone() {
        let shutdown = CancellationToken::new();
        let hub = Hub::start(HubConfig::default(), shutdown.clone());
        let reg = hub.register("t1", "u1").await.unwrap();

        shutdown.cancel();
        reg.evicted.cancelled().await;
        assert!(reg.evicted.is_cancelled());
    }

    #[tokio::test]
    async fn test_broadcast_after_shutdown_is_closed() {
        let shutdown = CancellationToken::new();
        let hub = Hub::start(HubConfig::default(), shutdown.clone());
        shutdown.cancel();
        // Let the coordinator observe cancellation and drop its receivers.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(matches!(hub.broadcast(event("t1", 0)).await, Err(HubError::Closed)));
    }
}
