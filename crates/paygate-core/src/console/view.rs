//! Operator-side view of payment requests
//!
//! Rebuilt from every collection snapshot. A decision that is being written
//! is tracked as an in-flight marker so the entry leaves the pending list
//! immediately and comes back if the write fails.

use std::collections::HashMap;
use tracing::warn;

use crate::identity::UserId;
use crate::model::{Decision, PaymentRequest, RequestStatus};
use crate::store::{decode, Document};

/// One request as the console sees it
#[derive(Debug, Clone)]
pub struct ConsoleEntry {
    /// Latest stored request
    pub request: PaymentRequest,
    /// Decision currently being written, if any
    pub in_flight: Option<Decision>,
}

/// Dashboard counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsoleStats {
    /// Requests awaiting a decision
    pub pending: usize,
    /// Approved requests
    pub approved: usize,
    /// Denied requests
    pub denied: usize,
    /// Sum of approved amounts in minor units
    pub approved_revenue_minor: i64,
    /// Documents in the collection that could not be decoded
    pub malformed: usize,
}

/// All requests known to the console
#[derive(Debug, Default)]
pub struct ConsoleView {
    entries: HashMap<UserId, ConsoleEntry>,
    malformed: usize,
    revision: u64,
}

impl ConsoleView {
    /// Replace the view with a full collection snapshot
    ///
    /// In-flight markers survive only while the stored request is unchanged
    /// and still pending.
    pub fn apply_snapshot(&mut self, documents: Vec<Document>) {
        let mut previous = std::mem::take(&mut self.entries);
        self.malformed = 0;

        for document in documents {
            let request: PaymentRequest = match decode(document) {
                Ok(request) => request,
                Err(e) => {
                    warn!(error = %e, "skipping undecodable payment request");
                    self.malformed += 1;
                    continue;
                }
            };

            let in_flight = previous
                .remove(&request.user_id)
                .filter(|old| {
                    old.request.request_id == request.request_id
                        && request.status == RequestStatus::Pending
                })
                .and_then(|old| old.in_flight);

            self.entries
                .insert(request.user_id.clone(), ConsoleEntry { request, in_flight });
        }

        self.revision += 1;
    }

    /// Pending requests without a decision in flight, oldest first
    #[must_use]
    pub fn pending(&self) -> Vec<PaymentRequest> {
        let mut pending: Vec<PaymentRequest> = self
            .entries
            .values()
            .filter(|e| e.request.status == RequestStatus::Pending && e.in_flight.is_none())
            .map(|e| e.request.clone())
            .collect();
        pending.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        pending
    }

    /// Entry for a user
    #[must_use]
    pub fn get(&self, user_id: &UserId) -> Option<&ConsoleEntry> {
        self.entries.get(user_id)
    }

    /// Entry holding the given request id
    #[must_use]
    pub fn find_by_request(&self, request_id: &str) -> Option<&ConsoleEntry> {
        self.entries
            .values()
            .find(|e| e.request.request_id == request_id)
    }

    /// Mark a decision as in flight
    pub fn begin(&mut self, user_id: &UserId, decision: Decision) {
        if let Some(entry) = self.entries.get_mut(user_id) {
            entry.in_flight = Some(decision);
            self.revision += 1;
        }
    }

    /// The decision committed; reflect it locally until the next snapshot
    pub fn settle(&mut self, user_id: &UserId, status: RequestStatus) {
        if let Some(entry) = self.entries.get_mut(user_id) {
            entry.request.status = status;
            entry.in_flight = None;
            self.revision += 1;
        }
    }

    /// The decision failed; the entry goes back to what the store said
    pub fn abort(&mut self, user_id: &UserId) {
        if let Some(entry) = self.entries.get_mut(user_id) {
            entry.in_flight = None;
            self.revision += 1;
        }
    }

    /// Counter bumped on every change
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Dashboard counters
    #[must_use]
    pub fn stats(&self) -> ConsoleStats {
        let mut stats = ConsoleStats {
            malformed: self.malformed,
            ..ConsoleStats::default()
        };
        for entry in self.entries.values() {
            match entry.request.status {
                RequestStatus::Pending => stats.pending += 1,
                RequestStatus::Approved => {
                    stats.approved += 1;
                    stats.approved_revenue_minor = stats
                        .approved_revenue_minor
                        .saturating_add(entry.request.amount_minor);
                }
                RequestStatus::Denied => stats.denied += 1,
            }
        }
        stats
    }
}
