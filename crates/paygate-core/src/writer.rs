//! RequestWriter - records a payment claim from the client side
//!
//! A submission overwrites whatever request the user had before: the
//! document key is the user id, so there is never more than one live request
//! per identity. A failed write is returned to the caller as retryable and is
//! not retried or queued here.

use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::event_bus::{AccessEvent, EventBus};
use crate::identity::{IdentityCell, UserId};
use crate::model::{PaymentRequest, RequestStatus};
use crate::path::PathScheme;
use crate::plans::PlanCatalog;
use crate::store::{encode, SharedStore};

/// Length of the random part of a transaction reference
const TXN_SUFFIX_LEN: usize = 9;

/// Generate a human-traceable reference like `TXN-K3F9Q2ZLA`
#[must_use]
pub fn generate_transaction_ref() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TXN_SUFFIX_LEN)
        .map(char::from)
        .collect();
    format!("TXN-{}", suffix.to_ascii_uppercase())
}

fn validate_email(email: &str) -> Result<String> {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email.to_string()),
        _ => Err(Error::InvalidEmail(email.to_string())),
    }
}

/// Client-side writer of payment requests
pub struct RequestWriter {
    store: SharedStore,
    paths: PathScheme,
    catalog: Arc<PlanCatalog>,
    origin_device: String,
    events: Option<EventBus>,
}

impl RequestWriter {
    /// Create a writer
    #[must_use]
    pub fn new(
        store: SharedStore,
        paths: PathScheme,
        catalog: Arc<PlanCatalog>,
        client: &ClientConfig,
    ) -> Self {
        Self {
            store,
            paths,
            catalog,
            origin_device: client.origin_device.clone(),
            events: None,
        }
    }

    /// Publish `RequestSubmitted` after each successful write
    #[must_use]
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    /// Record a pending payment claim for `user_id`
    ///
    /// # Errors
    ///
    /// `InvalidEmail` / `UnknownPlan` before any write; `Write` (retryable)
    /// if the store rejects the overwrite.
    pub async fn submit(
        &self,
        user_id: &UserId,
        email: &str,
        plan_id: &str,
    ) -> Result<PaymentRequest> {
        let email = validate_email(email)?;
        let plan = self.catalog.get(plan_id)?;

        let request = PaymentRequest {
            request_id: Uuid::new_v4().to_string(),
            user_id: user_id.clone(),
            user_email: email,
            plan_id: plan.id.clone(),
            amount_minor: plan.amount_minor,
            currency: plan.currency.clone(),
            status: RequestStatus::Pending,
            transaction_ref: generate_transaction_ref(),
            created_at: Utc::now(),
            origin_device: self.origin_device.clone(),
        };

        let path = self.paths.payment(user_id);
        let document = encode(&request)?;

        if let Err(e) = self.store.set(&path, document).await {
            warn!(user_id = %user_id, error = %e, "payment request write failed");
            return Err(Error::Write(e));
        }

        info!(
            user_id = %user_id,
            request_id = %request.request_id,
            plan = %request.plan_id,
            txn = %request.transaction_ref,
            "payment request submitted"
        );

        if let Some(bus) = &self.events {
            bus.publish(AccessEvent::RequestSubmitted {
                user_id: user_id.clone(),
                request_id: request.request_id.clone(),
                plan_id: request.plan_id.clone(),
                amount_minor: request.amount_minor,
            });
        }

        Ok(request)
    }

    /// Submit for the session's identity; blocked until it resolves
    pub async fn submit_as(
        &self,
        identity: &IdentityCell,
        email: &str,
        plan_id: &str,
    ) -> Result<PaymentRequest> {
        let user_id = identity.require()?;
        self.submit(&user_id, email, plan_id).await
    }
}
