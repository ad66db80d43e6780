//! Process-wide table mapping session ids to live client handles.
//!
//! Reads are frequent and cheap; inserts and removals are rare. The lock is
//! never held across network I/O: callers clone the handle out, drop the
//! guard, then talk to the protocol client.

use crate::protocol::{ProtocolClient, SubscriptionId};
use crate::types::SubPhase;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use tokio::sync::{watch, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// In-memory record combining a protocol client, its event subscription and
/// its cancellation token. Exactly one exists per live session.
pub struct ClientHandle {
    session_id: Uuid,
    client: Arc<dyn ProtocolClient>,
    stop: CancellationToken,
    event_subscription: StdMutex<Option<SubscriptionId>>,
    /// Held by the session worker for the duration of each transition.
    /// Senders acquire it briefly to observe settled state.
    transition_gate: Mutex<()>,
    sub_phase: watch::Sender<SubPhase>,
}

impl ClientHandle {
    pub fn new(
        session_id: Uuid,
        client: Arc<dyn ProtocolClient>,
        stop: CancellationToken,
    ) -> Arc<Self> {
        let (sub_phase, _) = watch::channel(SubPhase::None);
        Arc::new(Self {
            session_id,
            client,
            stop,
            event_subscription: StdMutex::new(None),
            transition_gate: Mutex::new(()),
            sub_phase,
        })
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn client(&self) -> Arc<dyn ProtocolClient> {
        Arc::clone(&self.client)
    }

    pub fn stop_signal(&self) -> &CancellationToken {
        &self.stop
    }

    pub fn cancel(&self) {
        self.stop.cancel();
    }

    /// Wait for any in-flight transition to settle.
    pub async fn settle(&self) -> MutexGuard<'_, ()> {
        self.transition_gate.lock().await
    }

    pub fn sub_phase(&self) -> SubPhase {
        *self.sub_phase.borrow()
    }

    pub fn watch_sub_phase(&self) -> watch::Receiver<SubPhase> {
        self.sub_phase.subscribe()
    }

    pub(crate) fn set_sub_phase(&self, phase: SubPhase) {
        let _ = self.sub_phase.send(phase);
    }

    pub(crate) fn set_event_subscription(&self, id: SubscriptionId) {
        *lock(&self.event_subscription) = Some(id);
    }

    pub(crate) fn take_event_subscription(&self) -> Option<SubscriptionId> {
        lock(&self.event_subscription).take()
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// The registry proper. Owned by the gateway; never outlives the process.
#[derive(Default)]
pub struct ClientRegistry {
    inner: RwLock<HashMap<Uuid, Arc<ClientHandle>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unless an entry already exists. Returns false on conflict,
    /// leaving the existing entry untouched.
    pub fn put_if_absent(&self, handle: Arc<ClientHandle>) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        match inner.entry(handle.session_id()) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(handle);
                true
            }
        }
    }

    pub fn get(&self, session_id: Uuid) -> Option<Arc<ClientHandle>> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&session_id)
            .cloned()
    }

    pub fn remove(&self, session_id: Uuid) -> Option<Arc<ClientHandle>> {
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&session_id)
    }

    /// Every live handle, for shutdown.
    pub fn snapshot(&self) -> Vec<Arc<ClientHandle>> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
