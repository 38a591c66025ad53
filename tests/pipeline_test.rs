//! End-to-end approval flows over real store adapters
//!
//! Client, console and guard each get their own handle on the store and
//! never talk to each other directly.

use paygate_core::{
    AccessGuard, AccessListener, ApprovalConsole, ConsoleConfig, DenialReason, DenyPolicy,
    Error, GuardState, IdentityCell, ListenerConfig, ListenerEvent, PathScheme, PlanCatalog,
    RequestStatus, RequestWriter, SharedStore, UserId, WaitState,
};
use async_trait::async_trait;
use paygate_core::{
    AccessStore, ClientConfig, CollectionPath, Document, DocumentPath, StoreResult, Subscription,
    Write,
};
use paygate_store::{MemoryStore, SqliteStore};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct Harness {
    memory: MemoryStore,
    store: SharedStore,
    paths: PathScheme,
}

impl Harness {
    fn new() -> Self {
        let memory = MemoryStore::new();
        Self {
            store: Arc::new(memory.clone()),
            memory,
            paths: PathScheme::default(),
        }
    }

    fn writer(&self) -> RequestWriter {
        RequestWriter::new(
            self.store.clone(),
            self.paths.clone(),
            Arc::new(PlanCatalog::default()),
            &ClientConfig::default(),
        )
    }

    fn listener(&self) -> AccessListener {
        AccessListener::new(
            self.store.clone(),
            self.paths.clone(),
            ListenerConfig::default(),
        )
    }

    fn guard(&self, user: &UserId) -> AccessGuard {
        let identity = IdentityCell::new();
        identity.resolve(user.clone());
        AccessGuard::new(self.store.clone(), self.paths.clone(), identity)
    }

    async fn console(&self, deny_policy: DenyPolicy) -> ApprovalConsole {
        let config = ConsoleConfig {
            deny_policy,
            ..ConsoleConfig::default()
        };
        ApprovalConsole::open(self.store.clone(), self.paths.clone(), config)
            .await
            .unwrap()
    }
}

fn uid(raw: &str) -> UserId {
    UserId::parse(raw).unwrap()
}

#[tokio::test(start_paused = true)]
async fn scenario_a_approval_hands_off_to_download() {
    let h = Harness::new();
    let user = uid("alice");

    let request = h
        .writer()
        .submit(&user, "alice@firm.com", "Scale")
        .await
        .unwrap();
    assert_eq!(request.display_amount(), "INR 2,399.00");

    let mut listener = h.listener().arm(&user).await.unwrap();
    let console = h.console(DenyPolicy::Revoke).await;

    let pending = console.pending().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].transaction_ref, request.transaction_ref);

    console.approve(&request.request_id, &user).await.unwrap();

    assert_eq!(
        listener.next_event().await,
        Some(ListenerEvent::StateChanged(WaitState::Approved))
    );
    assert_eq!(listener.next_event().await, Some(ListenerEvent::HandOff));

    let state = h.guard(&user).check().await;
    match state {
        GuardState::Granted(grant) => assert_eq!(grant.plan, "Scale"),
        other => panic!("expected access, got {:?}", other),
    }

    let stats = console.stats().await;
    assert_eq!(stats.approved, 1);
    assert_eq!(stats.approved_revenue_minor, 239_900);
    console.close().await;
}

#[tokio::test]
async fn scenario_b_denial_keeps_guard_closed() {
    let h = Harness::new();
    let user = uid("bob");

    let request = h
        .writer()
        .submit(&user, "bob@firm.com", "Launch")
        .await
        .unwrap();
    let mut listener = h.listener().arm(&user).await.unwrap();
    let console = h.console(DenyPolicy::Revoke).await;

    console.deny(&request.request_id).await.unwrap();

    assert_eq!(
        listener.next_event().await,
        Some(ListenerEvent::StateChanged(WaitState::Denied))
    );
    assert_eq!(listener.next_event().await, None);

    assert_eq!(
        h.guard(&user).check().await,
        GuardState::Denied(DenialReason::NotPermitted)
    );
    assert!(console.pending().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn scenario_c_no_decision_waits_forever() {
    let h = Harness::new();
    let user = uid("carol");

    h.writer()
        .submit(&user, "carol@firm.com", "Enterprise")
        .await
        .unwrap();
    let mut listener = h.listener().arm(&user).await.unwrap();

    let waited = tokio::time::timeout(Duration::from_secs(24 * 3600), listener.next_event()).await;
    assert!(waited.is_err());
    assert_eq!(listener.state(), WaitState::Waiting);

    assert_eq!(
        h.guard(&user).check().await,
        GuardState::Denied(DenialReason::NoRecord)
    );
    listener.release().await;
}

#[tokio::test]
async fn approve_is_idempotent() {
    let h = Harness::new();
    let user = uid("dave");
    let request = h
        .writer()
        .submit(&user, "dave@firm.com", "Scale")
        .await
        .unwrap();
    let console = h.console(DenyPolicy::Revoke).await;

    console.approve(&request.request_id, &user).await.unwrap();
    console.approve(&request.request_id, &user).await.unwrap();

    assert!(h.guard(&user).check().await.is_granted());
    let stored = h.store.get(&h.paths.payment(&user)).await.unwrap().unwrap();
    assert_eq!(stored["status"], "approved");
}

#[tokio::test]
async fn guard_read_before_commit_is_denied() {
    let h = Harness::new();
    let user = uid("erin");
    let request = h
        .writer()
        .submit(&user, "erin@firm.com", "Scale")
        .await
        .unwrap();
    let guard = h.guard(&user);
    let console = h.console(DenyPolicy::Revoke).await;

    assert!(!guard.check().await.is_granted());
    console.approve(&request.request_id, &user).await.unwrap();

    // no auto-refresh: the earlier outcome stands until the user asks again
    assert!(!guard.state().is_granted());
    assert!(guard.check_again().await.is_granted());
}

#[tokio::test]
async fn deny_after_approve_revokes_by_default() {
    let h = Harness::new();
    let user = uid("frank");
    let request = h
        .writer()
        .submit(&user, "frank@firm.com", "Scale")
        .await
        .unwrap();
    let console = h.console(DenyPolicy::Revoke).await;

    console.approve(&request.request_id, &user).await.unwrap();
    console.deny(&request.request_id).await.unwrap();

    let grant = h.store.get(&h.paths.grant(&user)).await.unwrap().unwrap();
    assert_eq!(grant["canDownload"], false);
    assert_eq!(grant["plan"], "Scale");
    assert!(!h.guard(&user).check().await.is_granted());
}

#[tokio::test]
async fn deny_after_approve_preserve_leaves_grant() {
    let h = Harness::new();
    let user = uid("grace");
    let request = h
        .writer()
        .submit(&user, "grace@firm.com", "Scale")
        .await
        .unwrap();
    let console = h.console(DenyPolicy::Preserve).await;

    console.approve(&request.request_id, &user).await.unwrap();
    console.deny(&request.request_id).await.unwrap();

    let stored = h.store.get(&h.paths.payment(&user)).await.unwrap().unwrap();
    assert_eq!(stored["status"], RequestStatus::Denied.as_str());
    assert!(h.guard(&user).check().await.is_granted());
}

#[tokio::test]
async fn denied_request_cannot_be_approved_until_resubmitted() {
    let h = Harness::new();
    let user = uid("heidi");
    let writer = h.writer();
    let first = writer.submit(&user, "heidi@firm.com", "Scale").await.unwrap();
    let console = h.console(DenyPolicy::Revoke).await;

    console.deny(&first.request_id).await.unwrap();
    let err = console.approve(&first.request_id, &user).await.unwrap_err();
    assert!(matches!(err, Error::Transition(_)));

    let second = writer.submit(&user, "heidi@firm.com", "Scale").await.unwrap();
    let err = console.approve(&first.request_id, &user).await.unwrap_err();
    assert!(matches!(err, Error::StaleRequest { .. }));

    console.approve(&second.request_id, &user).await.unwrap();
    assert!(h.guard(&user).check().await.is_granted());
}

/// Memory store that lets the user resubmit right before the next transaction
struct ResubmitBeforeCommit {
    inner: MemoryStore,
    pending: Mutex<Option<(RequestWriter, UserId)>>,
}

#[async_trait]
impl AccessStore for ResubmitBeforeCommit {
    async fn get(&self, path: &DocumentPath) -> StoreResult<Option<Document>> {
        self.inner.get(path).await
    }

    async fn set(&self, path: &DocumentPath, value: Document) -> StoreResult<()> {
        self.inner.set(path, value).await
    }

    async fn update(&self, path: &DocumentPath, fields: Document) -> StoreResult<()> {
        self.inner.update(path, fields).await
    }

    async fn transact(&self, writes: Vec<Write>) -> StoreResult<()> {
        let resubmit = self.pending.lock().unwrap().take();
        if let Some((writer, user)) = resubmit {
            writer
                .submit(&user, "nina@firm.com", "Enterprise")
                .await
                .unwrap();
        }
        self.inner.transact(writes).await
    }

    async fn subscribe(&self, path: &DocumentPath) -> StoreResult<Subscription<Option<Document>>> {
        self.inner.subscribe(path).await
    }

    async fn subscribe_collection(
        &self,
        path: &CollectionPath,
    ) -> StoreResult<Subscription<Vec<Document>>> {
        self.inner.subscribe_collection(path).await
    }
}

#[tokio::test]
async fn resubmission_during_approve_is_stale() {
    let h = Harness::new();
    let user = uid("nina");
    let first = h
        .writer()
        .submit(&user, "nina@firm.com", "Launch")
        .await
        .unwrap();

    let racing: SharedStore = Arc::new(ResubmitBeforeCommit {
        inner: h.memory.clone(),
        pending: Mutex::new(Some((h.writer(), user.clone()))),
    });
    let console = ApprovalConsole::open(racing, h.paths.clone(), ConsoleConfig::default())
        .await
        .unwrap();

    let err = console.approve(&first.request_id, &user).await.unwrap_err();
    assert!(matches!(err, Error::StaleRequest { .. }));

    let stored = h.store.get(&h.paths.payment(&user)).await.unwrap().unwrap();
    assert_ne!(stored["requestId"], first.request_id.as_str());
    assert_eq!(stored["planId"], "Enterprise");
    assert_eq!(stored["status"], "pending");
    assert!(h.store.get(&h.paths.grant(&user)).await.unwrap().is_none());
    console.close().await;
}

#[tokio::test]
async fn failed_approve_can_be_retried() {
    let h = Harness::new();
    let user = uid("ivan");
    let request = h
        .writer()
        .submit(&user, "ivan@firm.com", "Launch")
        .await
        .unwrap();
    let console = h.console(DenyPolicy::Revoke).await;

    h.memory.fail_next_writes(1);
    let err = console.approve(&request.request_id, &user).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(console.pending().await.len(), 1);
    assert!(!h.guard(&user).check().await.is_granted());

    console.approve(&request.request_id, &user).await.unwrap();
    assert!(h.guard(&user).check().await.is_granted());
}

#[tokio::test]
async fn failed_submit_writes_nothing() {
    let h = Harness::new();
    h.memory.fail_next_writes(1);

    let err = h
        .writer()
        .submit(&uid("judy"), "judy@firm.com", "Scale")
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert!(h.memory.is_empty().await);
}

#[tokio::test]
async fn bound_listener_follows_identity() {
    let h = Harness::new();
    let identity = IdentityCell::new();
    let mut bound = h.listener().bind(identity.subscribe());

    let old = uid("kim");
    let new = uid("lee");
    let writer = h.writer();
    writer.submit(&old, "kim@firm.com", "Scale").await.unwrap();
    let request = writer.submit(&new, "lee@firm.com", "Scale").await.unwrap();

    identity.resolve(old.clone());
    identity.resolve(new.clone());

    let console = h.console(DenyPolicy::Revoke).await;
    console.approve(&request.request_id, &new).await.unwrap();

    let event = bound.next_event().await.unwrap();
    assert_eq!(event.user_id, new);
    assert_eq!(event.event, ListenerEvent::StateChanged(WaitState::Approved));
    bound.release().await;
}

#[tokio::test]
async fn sqlite_actors_on_separate_handles() {
    let dir = tempfile::TempDir::new().unwrap();
    let db = dir.path().join("access.db");
    let poll = Duration::from_millis(20);
    let paths = PathScheme::default();

    let client: SharedStore = Arc::new(SqliteStore::with_options(&db, poll).await.unwrap());
    let operator: SharedStore = Arc::new(SqliteStore::with_options(&db, poll).await.unwrap());
    let user = uid("mallory");

    let request = RequestWriter::new(
        client.clone(),
        paths.clone(),
        Arc::new(PlanCatalog::default()),
        &ClientConfig::default(),
    )
    .submit(&user, "mallory@firm.com", "Scale")
    .await
    .unwrap();

    let listener = AccessListener::new(
        client.clone(),
        paths.clone(),
        ListenerConfig {
            handoff_delay_ms: 10,
        },
    );
    let mut handle = listener.arm(&user).await.unwrap();

    let console = ApprovalConsole::open(operator, paths.clone(), ConsoleConfig::default())
        .await
        .unwrap();
    assert_eq!(console.pending().await.len(), 1);
    console.approve(&request.request_id, &user).await.unwrap();

    let first = tokio::time::timeout(Duration::from_secs(5), handle.next_event())
        .await
        .unwrap();
    assert_eq!(
        first,
        Some(ListenerEvent::StateChanged(WaitState::Approved))
    );
    let second = tokio::time::timeout(Duration::from_secs(5), handle.next_event())
        .await
        .unwrap();
    assert_eq!(second, Some(ListenerEvent::HandOff));

    let identity = IdentityCell::new();
    identity.resolve(user);
    let guard = AccessGuard::new(client, paths, identity);
    assert!(guard.check().await.is_granted());
    console.close().await;
}
