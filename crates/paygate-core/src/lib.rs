//! Paygate Core - store-mediated manual payment approval
//!
//! Three actors coordinate only through a shared document store:
//! - Writer: the client records a payment claim keyed by its user id
//! - Console: an operator approves or denies; approval writes the grant
//! - Listener: the client waits for the grant or the denial
//! - Guard: the protected download checks the grant, fail-closed
//!
//! Every component receives the store as an injected `SharedStore`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod console;
pub mod error;
pub mod event_bus;
pub mod guard;
pub mod identity;
pub mod listener;
pub mod model;
pub mod path;
pub mod plans;
pub mod store;
pub mod writer;

pub use config::{ClientConfig, ConsoleConfig, DenyPolicy, ListenerConfig, PipelineConfig};
pub use console::{ApprovalConsole, ConsoleEntry, ConsoleStats};
pub use error::{Error, Result, StoreError, StoreResult};
pub use event_bus::{AccessEvent, EventBus};
pub use guard::{AccessGuard, DenialReason, GuardState, GuardWatch};
pub use identity::{IdentityCell, UserId};
pub use listener::{
    AccessListener, BoundEvent, BoundListener, ListenerEvent, ListenerHandle, Observation,
    WaitState,
};
pub use model::{AccessGrant, Decision, PaymentRequest, RequestStatus, TransitionError};
pub use path::{Collection, CollectionPath, DocumentPath, PathScheme};
pub use plans::{Plan, PlanCatalog};
pub use store::{AccessStore, Document, SharedStore, Subscription, SubscriptionSink, Write};
pub use writer::{generate_transaction_ref, RequestWriter};
