//! Per-session state machine.
//!
//! One worker task owns each live session: it is the single consumer of the
//! client's QR and event channels and the single writer of state
//! transitions. Store writes for a transition complete before the next
//! transition is admitted; senders observe settled state through the
//! handle's transition gate.

pub mod qr;

use crate::error::ProtocolError;
use crate::protocol::{ProtocolEvent, QrEvent};
use crate::registry::{ClientHandle, ClientRegistry};
use crate::store::Store;
use crate::types::{
    MessageDirection, MessageRecord, MessageStatus, SessionStatus, SubPhase,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Depth of the bounded channel bridging library callbacks to the worker.
const EVENT_QUEUE_DEPTH: usize = 256;

/// Machine states. `QrPending` is the `connecting` sub-phase awaiting a
/// scan; it is never persisted as such.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MachineState {
    Disconnected,
    Connecting,
    QrPending,
    Connected,
}

impl MachineState {
    /// The persisted status for this state.
    pub fn status(&self) -> SessionStatus {
        match self {
            Self::Disconnected => SessionStatus::Disconnected,
            Self::Connecting | Self::QrPending => SessionStatus::Connecting,
            Self::Connected => SessionStatus::Connected,
        }
    }
}

/// Transition inputs, fanned in from caller operations and protocol events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    Connect,
    QrEmitted,
    QrTimeout,
    PairSuccess,
    ReattachSuccess,
    ProtocolFailure,
    LoggedOut,
    DisconnectRequested,
    StreamReplaced,
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("transition {via:?} not allowed from {from:?}")]
pub struct InvalidTransition {
    pub from: MachineState,
    pub via: Transition,
}

/// The transition table. Anything unlisted is rejected without side effect.
pub fn next_state(
    from: MachineState,
    via: Transition,
) -> Result<MachineState, InvalidTransition> {
    use MachineState::*;
    use Transition::*;
    match (from, via) {
        (Disconnected, Connect) => Ok(Connecting),
        // QR codes rotate while the scan is pending.
        (Connecting | QrPending, QrEmitted) => Ok(QrPending),
        (QrPending, QrTimeout) => Ok(Disconnected),
        (QrPending, PairSuccess) => Ok(Connected),
        (Connecting, ReattachSuccess) => Ok(Connected),
        (Connecting | QrPending | Connected, ProtocolFailure) => Ok(Disconnected),
        (Connected, LoggedOut) => Ok(Disconnected),
        (Connected, DisconnectRequested) => Ok(Disconnected),
        (Connected, StreamReplaced) => Ok(Disconnected),
        (from, via) => Err(InvalidTransition { from, via }),
    }
}

/// Owns one live session end to end.
pub(crate) struct SessionWorker {
    session_id: Uuid,
    store: Store,
    registry: Arc<ClientRegistry>,
    handle: Arc<ClientHandle>,
    state: MachineState,
    /// Emit the terminal QR rendering at info level.
    verbose_qr: bool,
}

impl SessionWorker {
    pub fn new(
        session_id: Uuid,
        store: Store,
        registry: Arc<ClientRegistry>,
        handle: Arc<ClientHandle>,
        verbose_qr: bool,
    ) -> Self {
        Self {
            session_id,
            store,
            registry,
            handle,
            state: MachineState::Connecting,
            verbose_qr,
        }
    }

    /// Drive the session until it disconnects. `device_binding` selects the
    /// reattach path; without it the QR pairing flow runs.
    pub async fn run(mut self, device_binding: Option<String>) {
        let client = self.handle.client();

        let (event_tx, mut event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let subscription = client
            .add_event_handler(Box::new(move |event| {
                // Bounded bridge; a stalled worker drops rather than blocks.
                if event_tx.try_send(event).is_err() {
                    debug!("event queue full, dropping protocol event");
                }
            }))
            .await;
        self.handle.set_event_subscription(subscription);

        let mut qr_rx = match &device_binding {
            Some(_) => None,
            None => match client.qr_channel().await {
                Ok(rx) => Some(rx),
                Err(e) => {
                    warn!(session_id = %self.session_id, error = %e, "qr channel failed");
                    self.fail_and_teardown().await;
                    return;
                }
            },
        };

        let startup = match &device_binding {
            Some(binding) => client.reattach(binding).await,
            None => client.connect().await,
        };
        match startup {
            Ok(()) if device_binding.is_some() => {
                if self.apply(Transition::ReattachSuccess).await.is_ok() {
                    info!(session_id = %self.session_id, "reattached");
                }
            }
            Ok(()) => {}
            Err(e) => {
                warn!(session_id = %self.session_id, error = %e, "session startup failed");
                self.fail_and_teardown().await;
                return;
            }
        }

        loop {
            tokio::select! {
                _ = self.handle.stop_signal().cancelled() => {
                    self.teardown(Transition::DisconnectRequested, false).await;
                    return;
                }
                qr = recv_qr(&mut qr_rx) => {
                    match qr {
                        Some(event) => {
                            if self.on_qr_event(event).await {
                                return;
                            }
                        }
                        None => qr_rx = None,
                    }
                }
                event = event_rx.recv() => {
                    match event {
                        Some(event) => {
                            if self.on_protocol_event(event).await {
                                return;
                            }
                        }
                        // All senders gone: the client is dead.
                        None => {
                            self.teardown(Transition::ProtocolFailure, false).await;
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Apply a transition and persist its status. Returns true when the
    /// worker should exit.
    async fn on_qr_event(&mut self, event: QrEvent) -> bool {
        match event {
            QrEvent::Code(payload) => {
                let handle = self.handle.clone();
                let _gate = handle.settle().await;
                if self.advance(Transition::QrEmitted).is_err() {
                    return false;
                }
                match qr::render(&payload) {
                    Ok(artifacts) => {
                        if self.verbose_qr {
                            info!(
                                session_id = %self.session_id,
                                "scan to pair:\n{}",
                                artifacts.terminal
                            );
                        } else {
                            debug!(session_id = %self.session_id, "qr code emitted");
                        }
                        if let Err(e) = self
                            .store
                            .set_qr_payload(self.session_id, &artifacts.data_url)
                            .await
                        {
                            warn!(session_id = %self.session_id, error = %e, "qr persist failed");
                        }
                    }
                    Err(e) => {
                        warn!(session_id = %self.session_id, error = %e, "qr render failed");
                    }
                }
                self.handle.set_sub_phase(SubPhase::QrPending);
                false
            }
            QrEvent::Timeout => {
                info!(session_id = %self.session_id, "qr scan timed out");
                self.teardown(Transition::QrTimeout, false).await;
                true
            }
            QrEvent::Success => {
                // Pairing handshake runs; PairSuccess arrives on the event
                // stream once the binding is issued.
                self.handle.set_sub_phase(SubPhase::Pairing);
                false
            }
        }
    }

    async fn on_protocol_event(&mut self, event: ProtocolEvent) -> bool {
        match event {
            ProtocolEvent::PairSuccess { device_binding } => {
                let handle = self.handle.clone();
                let _gate = handle.settle().await;
                if self.advance(Transition::PairSuccess).is_err() {
                    return false;
                }
                // Binding persisted and QR cleared before the connected
                // status becomes observable.
                if let Err(e) = self
                    .store
                    .set_device_binding(self.session_id, &device_binding)
                    .await
                {
                    warn!(session_id = %self.session_id, error = %e, "binding persist failed");
                }
                if let Err(e) = self.store.set_qr_payload(self.session_id, "").await {
                    warn!(session_id = %self.session_id, error = %e, "qr clear failed");
                }
                self.persist_status().await;
                self.handle.set_sub_phase(SubPhase::None);
                info!(session_id = %self.session_id, "paired");
                false
            }
            ProtocolEvent::Connected => {
                if let Err(e) = self.store.touch_last_seen(self.session_id).await {
                    debug!(session_id = %self.session_id, error = %e, "last_seen write failed");
                }
                false
            }
            ProtocolEvent::LoggedOut { reason } => {
                warn!(session_id = %self.session_id, %reason, "logged out by server");
                self.teardown(Transition::LoggedOut, true).await;
                true
            }
            ProtocolEvent::StreamReplaced => {
                warn!(session_id = %self.session_id, "stream replaced");
                self.teardown(Transition::StreamReplaced, false).await;
                true
            }
            ProtocolEvent::Disconnected { reason } => {
                info!(session_id = %self.session_id, %reason, "protocol disconnect");
                self.teardown(Transition::ProtocolFailure, false).await;
                true
            }
            ProtocolEvent::Message(inbound) => {
                let record = MessageRecord {
                    id: Uuid::new_v4(),
                    session_id: self.session_id,
                    wire_id: inbound.wire_id,
                    kind: inbound.kind,
                    direction: MessageDirection::Inbound,
                    status: MessageStatus::Delivered,
                    chat_id: inbound.chat_id.clone(),
                    sender_id: inbound.sender_id.clone(),
                    content: inbound.content,
                    media_ref: None,
                    caption: inbound.caption,
                    reply_to: None,
                    timestamp: inbound.timestamp,
                };
                if let Err(e) = self.store.record_message(&record).await {
                    warn!(session_id = %self.session_id, error = %e, "inbound record failed");
                }
                let _ = self
                    .store
                    .upsert_chat(self.session_id, &inbound.chat_id, inbound.timestamp)
                    .await;
                let _ = self
                    .store
                    .upsert_contact(self.session_id, &inbound.sender_id, None)
                    .await;
                let _ = self.store.touch_last_seen(self.session_id).await;
                false
            }
            ProtocolEvent::Receipt(receipt) => {
                let status = if receipt.read {
                    MessageStatus::Read
                } else {
                    MessageStatus::Delivered
                };
                // The message may predate this process; a miss is fine.
                let _ = self
                    .store
                    .update_message_status(self.session_id, &receipt.wire_id, status)
                    .await;
                false
            }
        }
    }

    /// Advance the machine or reject; rejection leaves no side effect.
    fn advance(&mut self, via: Transition) -> Result<(), InvalidTransition> {
        match next_state(self.state, via) {
            Ok(next) => {
                debug!(
                    session_id = %self.session_id,
                    from = ?self.state,
                    ?via,
                    to = ?next,
                    "transition"
                );
                self.state = next;
                Ok(())
            }
            Err(rejected) => {
                debug!(session_id = %self.session_id, error = %rejected, "transition rejected");
                Err(rejected)
            }
        }
    }

    /// Apply a transition and persist the resulting status.
    async fn apply(&mut self, via: Transition) -> Result<(), InvalidTransition> {
        let handle = self.handle.clone();
        let _gate = handle.settle().await;
        self.advance(via)?;
        self.persist_status().await;
        Ok(())
    }

    async fn persist_status(&self) {
        if let Err(e) = self
            .store
            .set_status(self.session_id, self.state.status())
            .await
        {
            warn!(session_id = %self.session_id, error = %e, "status persist failed");
        }
    }

    async fn fail_and_teardown(&mut self) {
        self.teardown(Transition::ProtocolFailure, false).await;
    }

    /// Remove the registry entry, release the client, then write the final
    /// status best-effort. `tombstone` additionally deactivates the row.
    async fn teardown(&mut self, via: Transition, tombstone: bool) {
        let handle = self.handle.clone();
        let _gate = handle.settle().await;
        let _ = self.advance(via);
        self.state = MachineState::Disconnected;
        self.registry.remove(self.session_id);

        let client = self.handle.client();
        if let Some(subscription) = self.handle.take_event_subscription() {
            client.remove_event_handler(subscription).await;
        }
        if let Err(e) = client.disconnect().await {
            if !matches!(e, ProtocolError::NotConnected) {
                debug!(session_id = %self.session_id, error = %e, "client disconnect failed");
            }
        }

        // Store failures must not block removal.
        let _ = self.store.set_qr_payload(self.session_id, "").await;
        let _ = self
            .store
            .set_status(self.session_id, SessionStatus::Disconnected)
            .await;
        if tombstone {
            let _ = self.store.set_active(self.session_id, false).await;
        }
        self.handle.set_sub_phase(SubPhase::None);
    }
}

async fn recv_qr(qr_rx: &mut Option<mpsc::Receiver<QrEvent>>) -> Option<QrEvent> {
    match qr_rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use MachineState::*;
    use Transition::*;

    const STATES: [MachineState; 4] = [Disconnected, Connecting, QrPending, Connected];
    const TRANSITIONS: [Transition; 9] = [
        Connect,
        QrEmitted,
        QrTimeout,
        PairSuccess,
        ReattachSuccess,
        ProtocolFailure,
        LoggedOut,
        DisconnectRequested,
        StreamReplaced,
    ];

    fn allowed(from: MachineState, via: Transition) -> Option<MachineState> {
        match (from, via) {
            (Disconnected, Connect) => Some(Connecting),
            (Connecting, QrEmitted) | (QrPending, QrEmitted) => Some(QrPending),
            (QrPending, QrTimeout) => Some(Disconnected),
            (QrPending, PairSuccess) => Some(Connected),
            (Connecting, ReattachSuccess) => Some(Connected),
            (Connecting, ProtocolFailure)
            | (QrPending, ProtocolFailure)
            | (Connected, ProtocolFailure) => Some(Disconnected),
            (Connected, LoggedOut)
            | (Connected, DisconnectRequested)
            | (Connected, StreamReplaced) => Some(Disconnected),
            _ => None,
        }
    }

    #[test]
    fn table_is_exactly_the_listed_transitions() {
        for from in STATES {
            for via in TRANSITIONS {
                match allowed(from, via) {
                    Some(expected) => {
                        assert_eq!(next_state(from, via), Ok(expected), "{from:?} --{via:?}");
                    }
                    None => {
                        assert_eq!(
                            next_state(from, via),
                            Err(InvalidTransition { from, via }),
                            "{from:?} --{via:?} should be rejected"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn persisted_status_collapses_sub_phase() {
        assert_eq!(QrPending.status(), SessionStatus::Connecting);
        assert_eq!(Connecting.status(), SessionStatus::Connecting);
        assert_eq!(Connected.status(), SessionStatus::Connected);
        assert_eq!(Disconnected.status(), SessionStatus::Disconnected);
    }

    #[test]
    fn pair_success_requires_qr_pending() {
        assert!(next_state(Connecting, PairSuccess).is_err());
        assert!(next_state(Disconnected, PairSuccess).is_err());
    }
}
