//! AccessGuard - gate in front of the protected download
//!
//! The guard reads the user's grant once and exposes the outcome as
//! `GuardState`. Anything other than a readable grant for the same user with
//! `canDownload: true` is a denial, including a failed read. It does not
//! refresh on its own; the user triggers `check_again()`, or the caller uses
//! the subscription-backed `watch()` instead.
//!
//! An outcome only ever stands for the identity it was read for. A check
//! whose identity changed during the read is denied, and an identity change
//! resets the published state to `Loading` (or `Denied(NoIdentity)` on
//! sign-out).

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Error, Result, StoreResult};
use crate::identity::{IdentityCell, UserId};
use crate::model::AccessGrant;
use crate::path::PathScheme;
use crate::store::{decode, Document, SharedStore, Subscription};

/// Why access was denied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    /// No identity has resolved
    NoIdentity,
    /// No grant exists for the user
    NoRecord,
    /// Grant exists but `canDownload` is not true
    NotPermitted,
    /// The read failed
    ReadFailed,
    /// The grant could not be decoded
    Malformed,
    /// The grant belongs to a different user
    IdentityMismatch,
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NoIdentity => "not signed in",
            Self::NoRecord => "no access record",
            Self::NotPermitted => "access not granted",
            Self::ReadFailed => "access record could not be read",
            Self::Malformed => "access record is malformed",
            Self::IdentityMismatch => "access record belongs to another user",
        };
        f.write_str(text)
    }
}

/// Outcome of an access check
#[derive(Debug, Clone, PartialEq)]
pub enum GuardState {
    /// Check in progress
    Loading,
    /// Access denied
    Denied(DenialReason),
    /// Access granted
    Granted(AccessGrant),
}

impl GuardState {
    /// Whether the protected content may be shown
    #[must_use]
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted(_))
    }
}

/// Fail-closed evaluation of one grant read
#[must_use]
pub fn evaluate(read: StoreResult<Option<Document>>, user_id: &UserId) -> GuardState {
    let document = match read {
        Ok(Some(document)) => document,
        Ok(None) => return GuardState::Denied(DenialReason::NoRecord),
        Err(e) => {
            warn!(user_id = %user_id, error = %e, "grant read failed, denying access");
            return GuardState::Denied(DenialReason::ReadFailed);
        }
    };

    let grant: AccessGrant = match decode(document) {
        Ok(grant) => grant,
        Err(e) => {
            warn!(user_id = %user_id, error = %e, "malformed grant, denying access");
            return GuardState::Denied(DenialReason::Malformed);
        }
    };

    if &grant.user_id != user_id {
        warn!(user_id = %user_id, owner = %grant.user_id, "grant owner mismatch, denying access");
        GuardState::Denied(DenialReason::IdentityMismatch)
    } else if grant.permits_download() {
        GuardState::Granted(grant)
    } else {
        GuardState::Denied(DenialReason::NotPermitted)
    }
}

/// One-shot access gate for the session identity
pub struct AccessGuard {
    store: SharedStore,
    paths: PathScheme,
    identity: IdentityCell,
    state: Arc<watch::Sender<GuardState>>,
    latest: Arc<AtomicU64>,
    follower: JoinHandle<()>,
}

impl AccessGuard {
    /// Create a guard in the `Loading` state
    ///
    /// Must be called inside a tokio runtime; the guard spawns a task that
    /// follows `identity`.
    #[must_use]
    pub fn new(store: SharedStore, paths: PathScheme, identity: IdentityCell) -> Self {
        let (state, _) = watch::channel(GuardState::Loading);
        let state = Arc::new(state);
        let latest = Arc::new(AtomicU64::new(0));
        let follower = tokio::spawn(reset_on_identity_change(
            identity.subscribe(),
            state.clone(),
            latest.clone(),
        ));
        Self {
            store,
            paths,
            identity,
            state,
            latest,
            follower,
        }
    }

    /// Last published outcome
    #[must_use]
    pub fn state(&self) -> GuardState {
        self.state.borrow().clone()
    }

    /// Observe published outcomes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<GuardState> {
        self.state.subscribe()
    }

    /// Read the grant once and publish the outcome
    ///
    /// When checks overlap only the most recently issued one publishes; the
    /// others still return what they saw.
    pub async fn check(&self) -> GuardState {
        let seq = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.send_replace(GuardState::Loading);

        let outcome = match self.identity.current() {
            None => GuardState::Denied(DenialReason::NoIdentity),
            Some(user_id) => {
                let read = self.store.get(&self.paths.grant(&user_id)).await;
                if self.identity.current().as_ref() == Some(&user_id) {
                    evaluate(read, &user_id)
                } else {
                    warn!(user_id = %user_id, "identity changed during the access check, denying");
                    GuardState::Denied(DenialReason::IdentityMismatch)
                }
            }
        };

        let published = self.state.send_if_modified(|current| {
            if self.latest.load(Ordering::SeqCst) != seq {
                return false;
            }
            *current = outcome.clone();
            true
        });
        debug!(seq, published, granted = outcome.is_granted(), "access check finished");
        outcome
    }

    /// Re-issue the one-shot read
    pub async fn check_again(&self) -> GuardState {
        self.check().await
    }

    /// Subscription-backed gate that re-evaluates on every grant change
    ///
    /// # Errors
    ///
    /// `Subscription` if the grant cannot be watched.
    pub async fn watch(&self, user_id: &UserId) -> Result<GuardWatch> {
        let subscription = self
            .store
            .subscribe(&self.paths.grant(user_id))
            .await
            .map_err(Error::Subscription)?;
        Ok(GuardWatch {
            user_id: user_id.clone(),
            subscription,
            failed: false,
        })
    }
}

impl Drop for AccessGuard {
    fn drop(&mut self) {
        self.follower.abort();
    }
}

async fn reset_on_identity_change(
    mut identity: watch::Receiver<Option<UserId>>,
    state: Arc<watch::Sender<GuardState>>,
    latest: Arc<AtomicU64>,
) {
    while identity.changed().await.is_ok() {
        // checks still reading for the previous identity must not publish
        latest.fetch_add(1, Ordering::SeqCst);
        let reset = match identity.borrow_and_update().as_ref() {
            Some(_) => GuardState::Loading,
            None => GuardState::Denied(DenialReason::NoIdentity),
        };
        debug!(state = ?reset, "identity changed, access state reset");
        state.send_replace(reset);
    }
}

/// Live access gate for one user
#[derive(Debug)]
pub struct GuardWatch {
    user_id: UserId,
    subscription: Subscription<Option<Document>>,
    failed: bool,
}

impl GuardWatch {
    /// Outcome of the next grant snapshot; a stream error yields
    /// `Denied(ReadFailed)` and the watch then ends
    pub async fn next(&mut self) -> Option<GuardState> {
        if self.failed {
            return None;
        }
        let read = self.subscription.next().await?;
        self.failed = read.is_err();
        Some(evaluate(read, &self.user_id))
    }

    /// Release the underlying subscription
    pub async fn release(self) {
        self.subscription.release().await;
    }
}

#[cfg(test)]
mod tests;
