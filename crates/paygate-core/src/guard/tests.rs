use super::*;
use crate::error::StoreError;
use crate::path::{CollectionPath, DocumentPath};
use crate::store::mock::MockStore;
use crate::store::{encode, Write};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tokio_test::{assert_pending, assert_ready};

fn uid(raw: &str) -> UserId {
    UserId::parse(raw).unwrap()
}

fn grant_doc(user: &str, can_download: bool) -> Document {
    let mut grant = AccessGrant::issue(uid(user), "Scale");
    grant.can_download = can_download;
    encode(&grant).unwrap()
}

fn guard_for(store: MockStore, user: Option<&str>) -> AccessGuard {
    let identity = IdentityCell::new();
    if let Some(user) = user {
        identity.resolve(uid(user));
    }
    AccessGuard::new(Arc::new(store), PathScheme::default(), identity)
}

#[test]
fn test_evaluate_fail_closed() {
    let user = uid("u1");

    assert!(evaluate(Ok(Some(grant_doc("u1", true))), &user).is_granted());
    assert_eq!(
        evaluate(Ok(None), &user),
        GuardState::Denied(DenialReason::NoRecord)
    );
    assert_eq!(
        evaluate(Ok(Some(grant_doc("u1", false))), &user),
        GuardState::Denied(DenialReason::NotPermitted)
    );
    assert_eq!(
        evaluate(Ok(Some(grant_doc("u2", true))), &user),
        GuardState::Denied(DenialReason::IdentityMismatch)
    );
    assert_eq!(
        evaluate(Err(StoreError::Unavailable("offline".into())), &user),
        GuardState::Denied(DenialReason::ReadFailed)
    );

    let mut junk = Document::new();
    junk.insert("userId".into(), "u1".into());
    junk.insert("canDownload".into(), "true".into());
    assert_eq!(
        evaluate(Ok(Some(junk)), &user),
        GuardState::Denied(DenialReason::Malformed)
    );
}

#[tokio::test]
async fn test_starts_loading() {
    let guard = guard_for(MockStore::new(), Some("u1"));
    assert_eq!(guard.state(), GuardState::Loading);
}

#[tokio::test]
async fn test_no_identity_denies_without_read() {
    let mut store = MockStore::new();
    store.expect_get().never();

    let guard = guard_for(store, None);
    assert_eq!(
        guard.check().await,
        GuardState::Denied(DenialReason::NoIdentity)
    );
}

#[tokio::test]
async fn test_check_reads_grant_path() {
    let mut store = MockStore::new();
    store
        .expect_get()
        .withf(|path| path.to_string() == "artifacts/paygate_suite/public/data/user_access/u1")
        .times(1)
        .returning(|_| Ok(Some(grant_doc("u1", true))));

    let guard = guard_for(store, Some("u1"));
    let mut states = guard.subscribe();

    assert!(guard.check().await.is_granted());
    assert!(states.borrow_and_update().is_granted());
}

#[tokio::test]
async fn test_check_again_sees_later_grant() {
    let mut store = MockStore::new();
    let mut calls = 0;
    store.expect_get().times(2).returning(move |_| {
        calls += 1;
        if calls == 1 {
            Ok(None)
        } else {
            Ok(Some(grant_doc("u1", true)))
        }
    });

    let guard = guard_for(store, Some("u1"));
    assert_eq!(
        guard.check().await,
        GuardState::Denied(DenialReason::NoRecord)
    );
    assert!(guard.check_again().await.is_granted());
    assert!(guard.state().is_granted());
}

#[tokio::test]
async fn test_read_failure_denies() {
    let mut store = MockStore::new();
    store
        .expect_get()
        .returning(|_| Err(StoreError::Unavailable("offline".into())));

    let guard = guard_for(store, Some("u1"));
    assert_eq!(
        guard.check().await,
        GuardState::Denied(DenialReason::ReadFailed)
    );
}

/// Store whose first `get` waits on a gate
struct GatedStore {
    gate: Mutex<Option<oneshot::Receiver<StoreResult<Option<Document>>>>>,
}

#[async_trait]
impl crate::store::AccessStore for GatedStore {
    async fn get(&self, _path: &DocumentPath) -> StoreResult<Option<Document>> {
        let gate = self.gate.lock().unwrap().take();
        match gate {
            Some(rx) => rx.await.unwrap_or(Err(StoreError::Closed)),
            None => Ok(Some(grant_doc("u1", true))),
        }
    }

    async fn set(&self, _path: &DocumentPath, _value: Document) -> StoreResult<()> {
        unimplemented!()
    }

    async fn update(&self, _path: &DocumentPath, _fields: Document) -> StoreResult<()> {
        unimplemented!()
    }

    async fn transact(&self, _writes: Vec<Write>) -> StoreResult<()> {
        unimplemented!()
    }

    async fn subscribe(&self, _path: &DocumentPath) -> StoreResult<Subscription<Option<Document>>> {
        unimplemented!()
    }

    async fn subscribe_collection(
        &self,
        _path: &CollectionPath,
    ) -> StoreResult<Subscription<Vec<Document>>> {
        unimplemented!()
    }
}

#[tokio::test]
async fn test_only_latest_check_publishes() {
    let (release, gate) = oneshot::channel();
    let store = GatedStore {
        gate: Mutex::new(Some(gate)),
    };
    let identity = IdentityCell::new();
    identity.resolve(uid("u1"));
    let guard = AccessGuard::new(Arc::new(store), PathScheme::default(), identity);

    let mut first = tokio_test::task::spawn(guard.check());
    assert_pending!(first.poll());

    assert!(guard.check_again().await.is_granted());

    release.send(Ok(None)).unwrap();
    let stale = assert_ready!(first.poll());
    assert_eq!(stale, GuardState::Denied(DenialReason::NoRecord));

    // the older check finished last but must not overwrite the newer outcome
    assert!(guard.state().is_granted());
}

#[tokio::test]
async fn test_watch_follows_grant_changes() {
    let (sink, sub) = Subscription::channel("grant", 8);
    let mut store = MockStore::new();
    store.expect_subscribe().return_once(move |_| Ok(sub));

    let guard = guard_for(store, Some("u1"));
    let mut watch = guard.watch(&uid("u1")).await.unwrap();

    sink.send(Ok(None)).await;
    sink.send(Ok(Some(grant_doc("u1", true)))).await;
    sink.send(Ok(Some(grant_doc("u1", false)))).await;
    sink.send(Err(StoreError::Unavailable("offline".into()))).await;
    sink.send(Ok(Some(grant_doc("u1", true)))).await;

    assert_eq!(
        watch.next().await,
        Some(GuardState::Denied(DenialReason::NoRecord))
    );
    assert!(watch.next().await.unwrap().is_granted());
    assert_eq!(
        watch.next().await,
        Some(GuardState::Denied(DenialReason::NotPermitted))
    );
    assert_eq!(
        watch.next().await,
        Some(GuardState::Denied(DenialReason::ReadFailed))
    );
    assert_eq!(watch.next().await, None);

    watch.release().await;
    assert!(sink.is_cancelled());
}

#[tokio::test]
async fn test_identity_swap_during_read_denies() {
    let identity = IdentityCell::new();
    identity.resolve(uid("u1"));
    let swap = identity.clone();

    let mut store = MockStore::new();
    store.expect_get().times(1).returning(move |_| {
        // another account signs in while the read is in flight
        swap.resolve(uid("u2"));
        Ok(Some(grant_doc("u1", true)))
    });

    let guard = AccessGuard::new(Arc::new(store), PathScheme::default(), identity);
    assert_eq!(
        guard.check().await,
        GuardState::Denied(DenialReason::IdentityMismatch)
    );
    assert!(!guard.state().is_granted());
}

#[tokio::test]
async fn test_identity_change_resets_published_state() {
    let identity = IdentityCell::new();
    identity.resolve(uid("u1"));
    let mut store = MockStore::new();
    store
        .expect_get()
        .times(1)
        .returning(|_| Ok(Some(grant_doc("u1", true))));

    let guard = AccessGuard::new(Arc::new(store), PathScheme::default(), identity.clone());
    let mut states = guard.subscribe();
    assert!(guard.check().await.is_granted());
    states.borrow_and_update();

    identity.resolve(uid("u2"));
    states.changed().await.unwrap();
    assert_eq!(*states.borrow_and_update(), GuardState::Loading);

    identity.clear();
    states.changed().await.unwrap();
    assert_eq!(
        *states.borrow_and_update(),
        GuardState::Denied(DenialReason::NoIdentity)
    );
}
