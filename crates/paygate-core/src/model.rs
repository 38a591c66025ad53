//! Records exchanged through the store
//!
//! Field names on the wire are camelCase and match what every actor reads
//! and writes, so the structs here are the shared contract between the
//! client, the console and the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::identity::UserId;

/// Status of a payment request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    /// Waiting for an operator decision
    Pending,
    /// Operator approved; a grant was written in the same transaction
    Approved,
    /// Operator denied
    Denied,
}

impl RequestStatus {
    /// Wire value
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Denied => "denied",
        }
    }

    /// Apply an operator decision
    ///
    /// Repeating a decision is allowed and yields the same status. An approved
    /// request may still be denied (revocation); a denied request cannot be
    /// approved, the user has to submit again.
    pub fn apply(self, decision: Decision) -> Result<RequestStatus, TransitionError> {
        match (self, decision) {
            (Self::Pending | Self::Approved, Decision::Approve) => Ok(Self::Approved),
            (_, Decision::Deny) => Ok(Self::Denied),
            (Self::Denied, Decision::Approve) => Err(TransitionError::AlreadyDenied),
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Grant access
    Approve,
    /// Refuse access
    Deny,
}

/// Rejected status transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// Denied requests are final; the user must resubmit
    #[error("request already denied")]
    AlreadyDenied,
}

/// A claim of payment awaiting manual verification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    /// Client-generated id, display only
    pub request_id: String,
    /// Owner and document key
    pub user_id: UserId,
    /// Contact email entered by the user
    pub user_email: String,
    /// Plan id from the catalog
    pub plan_id: String,
    /// Claimed amount in minor units
    pub amount_minor: i64,
    /// ISO currency code
    pub currency: String,
    /// Current status
    pub status: RequestStatus,
    /// Human-traceable transaction reference
    pub transaction_ref: String,
    /// When the client wrote the request
    pub created_at: DateTime<Utc>,
    /// Where the request came from
    pub origin_device: String,
}

impl PaymentRequest {
    /// Amount formatted for operators, e.g. `INR 2,399.00`
    #[must_use]
    pub fn display_amount(&self) -> String {
        format_minor(self.amount_minor, &self.currency)
    }
}

/// Authorization record; the only source of truth for access
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessGrant {
    /// Owner and document key
    pub user_id: UserId,
    /// Whether the protected download may be exposed
    pub can_download: bool,
    /// Plan the grant was issued for
    #[serde(default)]
    pub plan: String,
    /// When access was granted
    #[serde(default)]
    pub granted_at: Option<DateTime<Utc>>,
}

impl AccessGrant {
    /// Grant issued now
    #[must_use]
    pub fn issue(user_id: UserId, plan: impl Into<String>) -> Self {
        Self {
            user_id,
            can_download: true,
            plan: plan.into(),
            granted_at: Some(Utc::now()),
        }
    }

    /// True only for an explicit `canDownload: true`
    #[must_use]
    pub fn permits_download(&self) -> bool {
        self.can_download
    }
}

/// Format minor units with two decimals and thousands separators
#[must_use]
pub fn format_minor(amount_minor: i64, currency: &str) -> String {
    let sign = if amount_minor < 0 { "-" } else { "" };
    let abs = amount_minor.unsigned_abs();
    let major = (abs / 100).to_string();
    let minor = abs % 100;

    let mut grouped = String::with_capacity(major.len() + major.len() / 3);
    for (i, ch) in major.chars().enumerate() {
        if i > 0 && (major.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    format!("{} {}{}.{:02}", currency, sign, grouped, minor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        use Decision::*;
        use RequestStatus::*;

        assert_eq!(Pending.apply(Approve), Ok(Approved));
        assert_eq!(Pending.apply(Deny), Ok(Denied));
        assert_eq!(Approved.apply(Approve), Ok(Approved));
        assert_eq!(Approved.apply(Deny), Ok(Denied));
        assert_eq!(Denied.apply(Deny), Ok(Denied));
        assert_eq!(Denied.apply(Approve), Err(TransitionError::AlreadyDenied));
    }

    #[test]
    fn test_payment_request_wire_shape() {
        let request = PaymentRequest {
            request_id: "r1".into(),
            user_id: UserId::parse("u1").unwrap(),
            user_email: "a@firm.com".into(),
            plan_id: "Scale".into(),
            amount_minor: 239_900,
            currency: "INR".into(),
            status: RequestStatus::Pending,
            transaction_ref: "TXN-ABCDEFGHI".into(),
            created_at: Utc::now(),
            origin_device: "Web Client".into(),
        };

        let value = serde_json::to_value(&request).unwrap();
        let obj = value.as_object().unwrap();
        for key in [
            "requestId",
            "userId",
            "userEmail",
            "planId",
            "amountMinor",
            "currency",
            "status",
            "transactionRef",
            "createdAt",
            "originDevice",
        ] {
            assert!(obj.contains_key(key), "missing {}", key);
        }
        assert_eq!(obj.len(), 10);
        assert_eq!(obj["status"], "pending");
    }

    #[test]
    fn test_grant_without_plan_still_decodes() {
        let grant: AccessGrant =
            serde_json::from_value(serde_json::json!({"userId": "u1", "canDownload": false}))
                .unwrap();
        assert!(!grant.permits_download());
        assert!(grant.plan.is_empty());
        assert!(grant.granted_at.is_none());
    }

    #[test]
    fn test_grant_requires_can_download_field() {
        let result: Result<AccessGrant, _> =
            serde_json::from_value(serde_json::json!({"userId": "u1", "plan": "Scale"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_format_minor() {
        assert_eq!(format_minor(239_900, "INR"), "INR 2,399.00");
        assert_eq!(format_minor(1_999_950, "INR"), "INR 19,999.50");
        assert_eq!(format_minor(5, "USD"), "USD 0.05");
        assert_eq!(format_minor(-120_000, "INR"), "INR -1,200.00");
    }
}
