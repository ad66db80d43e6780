//! Boot-time reattachment of previously paired sessions.
//!
//! Runs after the store is reachable: every active session with a device
//! binding gets a reattach task in a bounded pool, spread by a per-session
//! jitter delay derived from the session id. Per-session failures are
//! logged and never abort startup.

use crate::gateway::Gateway;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};
use uuid::Uuid;

/// Default bound on concurrent reattach tasks.
pub const DEFAULT_PARALLELISM: usize = 8;

const DEFAULT_JITTER_MIN: Duration = Duration::from_secs(1);
const DEFAULT_JITTER_SPAN: Duration = Duration::from_secs(4);

pub struct Reconciler {
    gateway: Arc<Gateway>,
    parallelism: usize,
    jitter_min: Duration,
    jitter_span: Duration,
}

impl Reconciler {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self {
            gateway,
            parallelism: DEFAULT_PARALLELISM,
            jitter_min: DEFAULT_JITTER_MIN,
            jitter_span: DEFAULT_JITTER_SPAN,
        }
    }

    pub fn parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn jitter(mut self, min: Duration, span: Duration) -> Self {
        self.jitter_min = min;
        self.jitter_span = span;
        self
    }

    /// Reattach everything the store reports as paired. Returns once every
    /// task has finished.
    pub async fn run(&self) {
        let paired = match self.gateway.store().list_paired().await {
            Ok(paired) => paired,
            Err(e) => {
                warn!(error = %e, "reconciler could not list paired sessions");
                return;
            }
        };
        if paired.is_empty() {
            return;
        }
        info!(count = paired.len(), "reattaching paired sessions");

        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let mut tasks = JoinSet::new();
        for session in paired {
            let semaphore = Arc::clone(&semaphore);
            let gateway = Arc::clone(&self.gateway);
            let delay = self.delay_for(session.id);
            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                tokio::select! {
                    _ = gateway.cancellation().cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
                match gateway.spawn_session(&session).await {
                    Ok(()) => {
                        info!(session_id = %session.id, name = %session.name, "reattach scheduled");
                    }
                    Err(e) => {
                        warn!(
                            session_id = %session.id,
                            name = %session.name,
                            error = %e,
                            "reattach failed"
                        );
                    }
                }
            });
        }
        while tasks.join_next().await.is_some() {}
    }

    /// Deterministic per-session jitter within the configured span.
    fn delay_for(&self, id: Uuid) -> Duration {
        let span_ms = self.jitter_span.as_millis() as u64;
        if span_ms == 0 {
            return self.jitter_min;
        }
        let digest = Sha256::digest(id.as_bytes());
        let mut word = [0u8; 8];
        word.copy_from_slice(&digest[..8]);
        let offset = u64::from_be_bytes(word) % span_ms;
        self.jitter_min + Duration::from_millis(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::protocol::mock::MockConnector;
    use crate::store::{MemoryStore, Store};
    use crate::types::{Session, SessionStatus};
    use std::sync::atomic::Ordering;

    fn test_gateway(connector: Arc<MockConnector>) -> (Arc<Gateway>, Store) {
        let store: Store = Arc::new(MemoryStore::new());
        let mut config = Config::default();
        config.auth.api_key = "secret".into();
        let gateway = Gateway::new(Arc::clone(&store), connector, &config).unwrap();
        (Arc::new(gateway), store)
    }

    fn fast(reconciler: Reconciler) -> Reconciler {
        reconciler.jitter(Duration::ZERO, Duration::from_millis(2))
    }

    async fn paired_session(store: &Store, name: &str) -> Session {
        let mut session = Session::new(name, None);
        session.device_binding = format!("{name}@s.whatsapp.net");
        store.create(&session).await.unwrap();
        session
    }

    async fn wait_for<F, Fut>(what: &str, mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..400 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {what}");
    }

    #[tokio::test]
    async fn reattaches_paired_sessions() {
        let connector = MockConnector::new();
        let (gateway, store) = test_gateway(Arc::clone(&connector));
        let a = paired_session(&store, "alpha").await;
        let b = paired_session(&store, "beta").await;
        // Unpaired and tombstoned rows are skipped.
        store.create(&Session::new("fresh", None)).await.unwrap();
        let mut gone = Session::new("gone", None);
        gone.device_binding = "gone@s.whatsapp.net".into();
        store.create(&gone).await.unwrap();
        store.set_active(gone.id, false).await.unwrap();

        fast(Reconciler::new(Arc::clone(&gateway))).run().await;

        for id in [a.id, b.id] {
            wait_for("reattach to connect", || async {
                store
                    .get_by_id(id)
                    .await
                    .map(|s| s.status == SessionStatus::Connected)
                    .unwrap_or(false)
            })
            .await;
            assert!(gateway.registry().get(id).is_some());
        }
        assert!(gateway.registry().get(gone.id).is_none());
        assert_eq!(gateway.registry().len(), 2);
    }

    #[tokio::test]
    async fn failed_reattach_reverts_to_disconnected() {
        let connector = MockConnector::new();
        connector.fail_reattach.store(true, Ordering::SeqCst);
        let (gateway, store) = test_gateway(Arc::clone(&connector));
        let session = paired_session(&store, "alpha").await;

        fast(Reconciler::new(Arc::clone(&gateway))).run().await;

        wait_for("revert to disconnected", || async {
            store
                .get_by_id(session.id)
                .await
                .map(|s| s.status == SessionStatus::Disconnected)
                .unwrap_or(false)
        })
        .await;
        assert!(gateway.registry().get(session.id).is_none());
        // Binding survives for the next attempt.
        assert!(store.get_by_id(session.id).await.unwrap().is_paired());
    }

    #[tokio::test]
    async fn empty_store_is_a_noop() {
        let connector = MockConnector::new();
        let (gateway, _store) = test_gateway(connector);
        fast(Reconciler::new(Arc::clone(&gateway))).run().await;
        assert!(gateway.registry().is_empty());
    }

    #[test]
    fn jitter_is_deterministic_and_bounded() {
        let connector = MockConnector::new();
        let (gateway, _store) = {
            let store: Store = Arc::new(MemoryStore::new());
            let mut config = Config::default();
            config.auth.api_key = "secret".into();
            (
                Arc::new(Gateway::new(Arc::clone(&store), connector, &config).unwrap()),
                store,
            )
        };
        let reconciler = Reconciler::new(gateway);
        let id = Uuid::new_v4();
        let d1 = reconciler.delay_for(id);
        let d2 = reconciler.delay_for(id);
        assert_eq!(d1, d2);
        assert!(d1 >= DEFAULT_JITTER_MIN);
        assert!(d1 < DEFAULT_JITTER_MIN + DEFAULT_JITTER_SPAN);
    }
}
