//! Identity gating
//!
//! Sign-in itself happens elsewhere; this module only models the moment an
//! identity becomes known. Components that must not act before that point
//! take a `UserId` (which cannot be empty) or watch an [`IdentityCell`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

use crate::error::{Error, Result};

/// A resolved, non-empty user identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Parse a raw identity string
    ///
    /// Blank input means the identity has not resolved.
    pub fn parse(raw: impl AsRef<str>) -> Result<Self> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() || trimmed.contains('/') {
            return Err(Error::IdentityUnavailable);
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Borrow the raw identifier
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for UserId {
    type Error = Error;

    fn try_from(raw: String) -> Result<Self> {
        Self::parse(raw)
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}

impl AsRef<str> for UserId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Holds the session's current identity and notifies watchers on change
#[derive(Debug, Clone)]
pub struct IdentityCell {
    tx: Arc<watch::Sender<Option<UserId>>>,
}

impl Default for IdentityCell {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityCell {
    /// Create an unresolved identity cell
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Record a resolved identity. Re-resolving the same identity is a no-op.
    pub fn resolve(&self, user_id: UserId) {
        self.tx.send_if_modified(|current| {
            if current.as_ref() == Some(&user_id) {
                false
            } else {
                *current = Some(user_id);
                true
            }
        });
    }

    /// Forget the identity (sign-out)
    pub fn clear(&self) {
        self.tx.send_if_modified(|current| current.take().is_some());
    }

    /// Current identity, if resolved
    #[must_use]
    pub fn current(&self) -> Option<UserId> {
        self.tx.borrow().clone()
    }

    /// Current identity or `IdentityUnavailable`
    pub fn require(&self) -> Result<UserId> {
        self.current().ok_or(Error::IdentityUnavailable)
    }

    /// Watch identity changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<UserId>> {
        self.tx.subscribe()
    }
}
