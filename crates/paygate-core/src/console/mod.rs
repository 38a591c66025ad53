//! ApprovalConsole - operator-side review of payment requests
//!
//! The console keeps a live view of the `payments` collection and turns an
//! operator decision into store writes:
//! - approve: request status and the access grant in one transaction
//! - deny: request status, plus a grant revocation under `DenyPolicy::Revoke`
//!
//! Every decision re-reads the stored request and commits only if the stored
//! `requestId` and `status` still match what was read, so an operator acting
//! on a request the user has since replaced gets `StaleRequest` instead of
//! approving the wrong plan.

mod view;

pub use view::{ConsoleEntry, ConsoleStats, ConsoleView};

use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ConsoleConfig, DenyPolicy};
use crate::error::{Error, Result, StoreError};
use crate::event_bus::{AccessEvent, EventBus};
use crate::identity::UserId;
use crate::model::{AccessGrant, Decision, PaymentRequest, RequestStatus};
use crate::path::{Collection, PathScheme};
use crate::store::{decode, encode, Document, SharedStore, Subscription, Write};

/// Operator console over the payments collection
pub struct ApprovalConsole {
    store: SharedStore,
    paths: PathScheme,
    config: ConsoleConfig,
    view: Arc<RwLock<ConsoleView>>,
    changes: Arc<watch::Sender<u64>>,
    feed_error: Arc<RwLock<Option<StoreError>>>,
    events: EventBus,
    cancel: CancellationToken,
    feed: Option<JoinHandle<()>>,
}

impl ApprovalConsole {
    /// Subscribe to the payments collection and wait for the first snapshot
    ///
    /// # Errors
    ///
    /// `Subscription` if the subscription cannot be opened or its first
    /// delivery is an error.
    pub async fn open(store: SharedStore, paths: PathScheme, config: ConsoleConfig) -> Result<Self> {
        let collection = paths.collection(Collection::Payments);
        let mut subscription = store
            .subscribe_collection(&collection)
            .await
            .map_err(Error::Subscription)?;

        let first = match subscription.next().await {
            Some(Ok(documents)) => documents,
            Some(Err(e)) => return Err(Error::Subscription(e)),
            None => return Err(Error::Subscription(StoreError::Closed)),
        };

        let mut initial = ConsoleView::default();
        initial.apply_snapshot(first);
        let (changes, _) = watch::channel(initial.revision());

        info!(
            collection = %collection,
            pending = initial.stats().pending,
            "approval console opened"
        );

        let mut console = Self {
            store,
            paths,
            config,
            view: Arc::new(RwLock::new(initial)),
            changes: Arc::new(changes),
            feed_error: Arc::new(RwLock::new(None)),
            events: EventBus::default(),
            cancel: CancellationToken::new(),
            feed: None,
        };
        console.feed = Some(console.spawn_feed(subscription));
        Ok(console)
    }

    /// Use an existing bus for decision events
    #[must_use]
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.events = bus;
        self
    }

    /// Bus carrying `RequestApproved` / `RequestDenied`
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    fn spawn_feed(&self, mut subscription: Subscription<Vec<Document>>) -> JoinHandle<()> {
        let view = self.view.clone();
        let changes = self.changes.clone();
        let feed_error = self.feed_error.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            loop {
                let item = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    item = subscription.next() => item,
                };

                match item {
                    Some(Ok(documents)) => {
                        let mut view = view.write().await;
                        view.apply_snapshot(documents);
                        debug!(revision = view.revision(), "console snapshot applied");
                        changes.send_replace(view.revision());
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "payments subscription failed, console view frozen");
                        *feed_error.write().await = Some(e);
                        changes.send_modify(|rev| *rev += 1);
                        break;
                    }
                    None => {
                        *feed_error.write().await = Some(StoreError::Closed);
                        changes.send_modify(|rev| *rev += 1);
                        break;
                    }
                }
            }
            subscription.release().await;
        })
    }

    /// Pending requests awaiting a decision, oldest first
    pub async fn pending(&self) -> Vec<PaymentRequest> {
        self.view.read().await.pending()
    }

    /// Current view entry for a user
    pub async fn entry(&self, user_id: &UserId) -> Option<ConsoleEntry> {
        self.view.read().await.get(user_id).cloned()
    }

    /// Dashboard counters
    pub async fn stats(&self) -> ConsoleStats {
        self.view.read().await.stats()
    }

    /// Revision counter that changes whenever the view does
    #[must_use]
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// Error that stopped the live view, if any
    pub async fn feed_error(&self) -> Option<StoreError> {
        self.feed_error.read().await.clone()
    }

    /// Approve `request_id` for `user_id` and issue the grant
    ///
    /// Writes the status and the grant in one transaction. Approving an
    /// already approved request rewrites the same outcome.
    ///
    /// # Errors
    ///
    /// `RequestNotFound`, `StaleRequest`, `Transition` (request was denied)
    /// or a retryable `Write`.
    pub async fn approve(&self, request_id: &str, user_id: &UserId) -> Result<AccessGrant> {
        let current = self.load_request(user_id).await?;
        ensure_current(request_id, &current)?;
        let next = current.status.apply(Decision::Approve)?;

        let grant = AccessGrant::issue(user_id.clone(), current.plan_id.clone());
        let writes = vec![
            Write::Update {
                path: self.paths.payment(user_id),
                fields: status_fields(next),
            },
            Write::Merge {
                path: self.paths.grant(user_id),
                fields: encode(&grant)?,
            },
        ];

        self.commit(user_id, &current, Decision::Approve, next, writes).await?;

        info!(
            user_id = %user_id,
            request_id = %request_id,
            plan = %current.plan_id,
            operator = %self.config.operator_id,
            "payment request approved"
        );
        self.events.publish(AccessEvent::RequestApproved {
            user_id: user_id.clone(),
            request_id: request_id.to_string(),
            operator_id: self.config.operator_id.clone(),
        });

        Ok(grant)
    }

    /// Deny `request_id`
    ///
    /// The owning user is resolved through the live view.
    ///
    /// # Errors
    ///
    /// `RequestNotFound`, `StaleRequest` or a retryable `Write`.
    pub async fn deny(&self, request_id: &str) -> Result<()> {
        let user_id = self
            .view
            .read()
            .await
            .find_by_request(request_id)
            .map(|entry| entry.request.user_id.clone())
            .ok_or_else(|| Error::RequestNotFound(request_id.to_string()))?;

        let current = self.load_request(&user_id).await?;
        ensure_current(request_id, &current)?;
        let next = current.status.apply(Decision::Deny)?;

        let payment = Write::Update {
            path: self.paths.payment(&user_id),
            fields: status_fields(next),
        };
        let writes = match self.config.deny_policy {
            DenyPolicy::Revoke => {
                let mut revoke = Document::new();
                revoke.insert("userId".into(), user_id.as_str().into());
                revoke.insert("canDownload".into(), false.into());
                vec![
                    payment,
                    Write::Merge {
                        path: self.paths.grant(&user_id),
                        fields: revoke,
                    },
                ]
            }
            DenyPolicy::Preserve => vec![payment],
        };

        self.commit(&user_id, &current, Decision::Deny, next, writes).await?;

        let grant_revoked = self.config.deny_policy == DenyPolicy::Revoke;
        info!(
            user_id = %user_id,
            request_id = %request_id,
            grant_revoked,
            operator = %self.config.operator_id,
            "payment request denied"
        );
        self.events.publish(AccessEvent::RequestDenied {
            user_id,
            request_id: request_id.to_string(),
            operator_id: self.config.operator_id.clone(),
            grant_revoked,
        });

        Ok(())
    }

    /// Release the subscription and stop the live view
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(feed) = self.feed.take() {
            let _ = feed.await;
        }
        debug!("approval console closed");
    }

    async fn load_request(&self, user_id: &UserId) -> Result<PaymentRequest> {
        let path = self.paths.payment(user_id);
        let document = self
            .store
            .get(&path)
            .await
            .map_err(Error::Read)?
            .ok_or_else(|| Error::RequestNotFound(user_id.to_string()))?;
        decode(document)
    }

    /// Commit `writes` behind a precondition on the request as it was read
    async fn commit(
        &self,
        user_id: &UserId,
        read: &PaymentRequest,
        decision: Decision,
        next: RequestStatus,
        writes: Vec<Write>,
    ) -> Result<()> {
        let mut expected = Document::new();
        expected.insert("requestId".into(), read.request_id.as_str().into());
        expected.insert("status".into(), read.status.as_str().into());

        let mut guarded = Vec::with_capacity(writes.len() + 1);
        guarded.push(Write::Expect {
            path: self.paths.payment(user_id),
            fields: expected,
        });
        guarded.extend(writes);

        self.mark(|view| view.begin(user_id, decision)).await;
        let result = self.store.transact(guarded).await;

        match result {
            Ok(()) => {
                self.mark(|view| view.settle(user_id, next)).await;
                Ok(())
            }
            Err(StoreError::Conflict(reason)) => {
                self.mark(|view| view.abort(user_id)).await;
                warn!(user_id = %user_id, ?decision, %reason, "request changed before commit");
                let latest = self.load_request(user_id).await?;
                ensure_current(&read.request_id, &latest)?;
                latest.status.apply(decision)?;
                Err(Error::Write(StoreError::Conflict(reason)))
            }
            Err(e) => {
                self.mark(|view| view.abort(user_id)).await;
                warn!(user_id = %user_id, ?decision, error = %e, "decision write failed");
                Err(Error::Write(e))
            }
        }
    }

    async fn mark(&self, apply: impl FnOnce(&mut ConsoleView)) {
        let mut view = self.view.write().await;
        apply(&mut view);
        self.changes.send_replace(view.revision());
    }
}

impl Drop for ApprovalConsole {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(feed) = self.feed.take() {
            feed.abort();
        }
    }
}

fn ensure_current(request_id: &str, current: &PaymentRequest) -> Result<()> {
    if current.request_id == request_id {
        Ok(())
    } else {
        Err(Error::StaleRequest {
            requested: request_id.to_string(),
            current: current.request_id.clone(),
        })
    }
}

fn status_fields(status: RequestStatus) -> Document {
    let mut fields = Document::new();
    fields.insert("status".into(), status.as_str().into());
    fields
}
