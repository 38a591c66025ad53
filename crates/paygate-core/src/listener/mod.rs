//! AccessListener - client-side wait for the operator's decision
//!
//! Armed for one resolved identity, the listener watches the user's grant
//! and payment request and drives `WaitState`. There is no timeout: a
//! request nobody decides keeps the listener in `WAITING` until it is
//! released.
//!
//! `bind()` follows an identity cell instead of a fixed user. When the
//! identity changes the old listener is fully released before the next one
//! is armed. Events carry the user and generation they belong to, and any
//! event whose identity is no longer current is dropped before it reaches
//! the caller.

mod state;

pub use state::{Observation, WaitState};

use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ListenerConfig;
use crate::error::{Error, Result, StoreError, StoreResult};
use crate::identity::{IdentityCell, UserId};
use crate::path::PathScheme;
use crate::store::{decode, Document, SharedStore, Subscription};

const EVENT_BUFFER: usize = 8;

/// Events delivered to the owning UI
#[derive(Debug, Clone, PartialEq)]
pub enum ListenerEvent {
    /// The wait state changed
    StateChanged(WaitState),
    /// The hand-off delay after approval elapsed; show the download view
    HandOff,
    /// A subscription failed; the listener has stopped
    StreamError(StoreError),
}

/// Factory for per-identity listeners
#[derive(Clone)]
pub struct AccessListener {
    store: SharedStore,
    paths: PathScheme,
    config: ListenerConfig,
}

impl AccessListener {
    /// Create a listener factory
    #[must_use]
    pub fn new(store: SharedStore, paths: PathScheme, config: ListenerConfig) -> Self {
        Self {
            store,
            paths,
            config,
        }
    }

    /// Start waiting for `user_id`
    ///
    /// # Errors
    ///
    /// `Subscription` if either key cannot be watched.
    pub async fn arm(&self, user_id: &UserId) -> Result<ListenerHandle> {
        self.open(user_id).await.map_err(Error::Subscription)
    }

    /// Start waiting for the session's identity
    ///
    /// # Errors
    ///
    /// `IdentityUnavailable` until the identity resolves.
    pub async fn arm_for(&self, identity: &IdentityCell) -> Result<ListenerHandle> {
        let user_id = identity.require()?;
        self.arm(&user_id).await
    }

    /// Follow an identity, re-arming on every change
    #[must_use]
    pub fn bind(&self, identity: watch::Receiver<Option<UserId>>) -> BoundListener {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();
        let generation = Arc::new(AtomicU64::new(0));
        let task = tokio::spawn(supervise(
            self.clone(),
            identity.clone(),
            generation.clone(),
            tx,
            cancel.clone(),
        ));
        BoundListener {
            rx,
            identity,
            generation,
            cancel,
            task: Some(task),
        }
    }

    async fn open(&self, user_id: &UserId) -> StoreResult<ListenerHandle> {
        let grants = self.store.subscribe(&self.paths.grant(user_id)).await?;
        let requests = match self.store.subscribe(&self.paths.payment(user_id)).await {
            Ok(sub) => sub,
            Err(e) => {
                grants.release().await;
                return Err(e);
            }
        };

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let (state_tx, state_rx) = watch::channel(WaitState::Waiting);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run(
            user_id.clone(),
            grants,
            requests,
            Emitter {
                tx,
                cancel: cancel.clone(),
            },
            state_tx,
            self.config.clone(),
        ));

        info!(user_id = %user_id, "access listener armed");
        Ok(ListenerHandle {
            user_id: user_id.clone(),
            rx,
            state: state_rx,
            cancel,
            task: Some(task),
        })
    }
}

struct Emitter<E> {
    tx: mpsc::Sender<E>,
    cancel: CancellationToken,
}

impl<E> Emitter<E> {
    async fn emit(&self, event: E) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.tx.send(event) => sent.is_ok(),
        }
    }
}

fn observe<T: DeserializeOwned>(
    user_id: &UserId,
    key: &str,
    snapshot: Option<Document>,
) -> Option<T> {
    let document = snapshot?;
    match decode(document) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!(user_id = %user_id, key, error = %e, "undecodable snapshot treated as absent");
            None
        }
    }
}

async fn run(
    user_id: UserId,
    mut grants: Subscription<Option<Document>>,
    mut requests: Subscription<Option<Document>>,
    events: Emitter<ListenerEvent>,
    state_tx: watch::Sender<WaitState>,
    config: ListenerConfig,
) {
    let mut state = WaitState::Waiting;

    loop {
        let item = tokio::select! {
            biased;
            _ = events.cancel.cancelled() => break,
            item = grants.next() => {
                item.map(|r| r.map(|s| Observation::Grant(observe(&user_id, "grant", s))))
            }
            item = requests.next() => {
                item.map(|r| r.map(|s| Observation::Request(observe(&user_id, "request", s))))
            }
        };

        let observation = match item {
            Some(Ok(observation)) => {
                let owned = observation.clone().owned_by(&user_id);
                if owned != observation {
                    warn!(user_id = %user_id, "record owned by another user treated as absent");
                }
                owned
            }
            Some(Err(e)) => {
                warn!(user_id = %user_id, error = %e, "listener subscription failed");
                events.emit(ListenerEvent::StreamError(e)).await;
                break;
            }
            None => {
                events.emit(ListenerEvent::StreamError(StoreError::Closed)).await;
                break;
            }
        };

        let next = state.reduce(&observation);
        if next == state {
            continue;
        }
        state = next;
        state_tx.send_replace(state);
        info!(user_id = %user_id, state = %state, "wait state changed");
        if !events.emit(ListenerEvent::StateChanged(state)).await {
            break;
        }

        match state {
            WaitState::Approved => {
                tokio::select! {
                    biased;
                    _ = events.cancel.cancelled() => {}
                    _ = tokio::time::sleep(config.handoff_delay()) => {
                        events.emit(ListenerEvent::HandOff).await;
                    }
                }
                break;
            }
            WaitState::Denied => break,
            WaitState::Waiting => {}
        }
    }

    grants.release().await;
    requests.release().await;
    debug!(user_id = %user_id, state = %state, "access listener stopped");
}

/// Live listener for one identity
pub struct ListenerHandle {
    user_id: UserId,
    rx: mpsc::Receiver<ListenerEvent>,
    state: watch::Receiver<WaitState>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    /// Identity this listener is armed for
    #[must_use]
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Current wait state
    #[must_use]
    pub fn state(&self) -> WaitState {
        *self.state.borrow()
    }

    /// Next event; `None` once the listener stopped or was released
    pub async fn next_event(&mut self) -> Option<ListenerEvent> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            event = self.rx.recv() => event,
        }
    }

    /// Tear down both subscriptions and wait until nothing can be delivered
    pub async fn release(mut self) {
        self.cancel.cancel();
        self.rx.close();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        debug!(user_id = %self.user_id, "access listener released");
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Event from a bound listener, tagged with the identity it belongs to
#[derive(Debug, Clone, PartialEq)]
pub struct BoundEvent {
    /// Identity the event was produced for
    pub user_id: UserId,
    /// Increments on every identity change
    pub generation: u64,
    /// The listener event
    pub event: ListenerEvent,
}

impl BoundEvent {
    fn is_current(
        &self,
        identity: &watch::Receiver<Option<UserId>>,
        generation: &AtomicU64,
    ) -> bool {
        self.generation == generation.load(Ordering::SeqCst)
            && identity.borrow().as_ref() == Some(&self.user_id)
    }
}

/// Listener that follows identity changes
pub struct BoundListener {
    rx: mpsc::Receiver<BoundEvent>,
    identity: watch::Receiver<Option<UserId>>,
    generation: Arc<AtomicU64>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl BoundListener {
    /// Next event for the identity that is current right now
    ///
    /// Events buffered for a previous identity are discarded.
    pub async fn next_event(&mut self) -> Option<BoundEvent> {
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                event = self.rx.recv() => event,
            }?;

            if event.is_current(&self.identity, &self.generation) {
                return Some(event);
            }
            debug!(
                user_id = %event.user_id,
                generation = event.generation,
                "discarding event from a previous identity"
            );
        }
    }

    /// Stop following the identity and release the current listener
    pub async fn release(mut self) {
        self.cancel.cancel();
        self.rx.close();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for BoundListener {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn supervise(
    listener: AccessListener,
    mut identity: watch::Receiver<Option<UserId>>,
    current_generation: Arc<AtomicU64>,
    tx: mpsc::Sender<BoundEvent>,
    cancel: CancellationToken,
) {
    let events = Emitter { tx, cancel };
    let mut generation = 0u64;
    let mut armed_for: Option<UserId> = None;
    let mut current: Option<ListenerHandle> = None;

    loop {
        let desired = identity.borrow_and_update().clone();
        if desired != armed_for {
            // retire the old generation first so its buffered events are dropped
            generation = current_generation.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(old) = current.take() {
                old.release().await;
            }
            armed_for = desired.clone();

            if let Some(user_id) = desired {
                debug!(user_id = %user_id, generation, "identity changed, re-arming listener");
                match listener.open(&user_id).await {
                    Ok(handle) => current = Some(handle),
                    Err(e) => {
                        warn!(user_id = %user_id, error = %e, "could not arm listener");
                        let event = BoundEvent {
                            user_id,
                            generation,
                            event: ListenerEvent::StreamError(e),
                        };
                        if !events.emit(event).await {
                            break;
                        }
                    }
                }
            }
        }

        let next = async {
            match current.as_mut() {
                Some(handle) => handle.next_event().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = events.cancel.cancelled() => break,
            changed = identity.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            event = next => match (event, armed_for.clone()) {
                (Some(event), Some(user_id)) => {
                    let tagged = BoundEvent { user_id, generation, event };
                    if !tagged.is_current(&identity, &current_generation) {
                        continue;
                    }
                    if !events.emit(tagged).await {
                        break;
                    }
                }
                _ => {
                    // stopped on its own; stays idle until the identity changes
                    if let Some(done) = current.take() {
                        done.release().await;
                    }
                }
            },
        }
    }

    if let Some(handle) = current.take() {
        handle.release().await;
    }
}
