//! Client wait-state machine
//!
//! `WAITING` moves to `APPROVED` on a grant with `canDownload: true` and to
//! `DENIED` on a request whose status is `denied`. Both are terminal. The
//! reducer is pure so snapshot handling can be tested without a store.

use serde::Serialize;
use std::fmt;

use crate::identity::UserId;
use crate::model::{AccessGrant, PaymentRequest, RequestStatus};

/// What the client is waiting on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WaitState {
    /// No decision observed yet
    Waiting,
    /// Grant observed; hand off to the download view
    Approved,
    /// Request denied; the user has to act
    Denied,
}

/// One decoded snapshot from a watched key
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    /// `user_access/{uid}`; `None` when absent or undecodable
    Grant(Option<AccessGrant>),
    /// `payments/{uid}`; `None` when absent or undecodable
    Request(Option<PaymentRequest>),
}

impl Observation {
    /// Treat records that belong to another user as absent
    #[must_use]
    pub fn owned_by(self, user_id: &UserId) -> Self {
        match self {
            Self::Grant(Some(grant)) if &grant.user_id != user_id => Self::Grant(None),
            Self::Request(Some(request)) if &request.user_id != user_id => Self::Request(None),
            other => other,
        }
    }
}

impl WaitState {
    /// Next state after `observation`
    #[must_use]
    pub fn reduce(self, observation: &Observation) -> WaitState {
        if self.is_terminal() {
            return self;
        }
        match observation {
            Observation::Grant(Some(grant)) if grant.permits_download() => Self::Approved,
            Observation::Request(Some(request)) if request.status == RequestStatus::Denied => {
                Self::Denied
            }
            _ => self,
        }
    }

    /// No further transition is possible
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Waiting)
    }
}

impl fmt::Display for WaitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting => f.write_str("WAITING"),
            Self::Approved => f.write_str("APPROVED"),
            Self::Denied => f.write_str("DENIED"),
        }
    }
}
