use super::*;
use crate::identity::UserId;
use crate::model::AccessGrant;
use crate::path::PathScheme;
use futures::StreamExt;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_test::assert_pending;

#[tokio::test]
async fn test_subscription_delivers_in_order() {
    let (sink, mut sub) = Subscription::<u32>::channel("test", 4);

    assert!(sink.send(Ok(1)).await);
    assert!(sink.send(Ok(2)).await);

    assert_eq!(sub.next().await.unwrap().unwrap(), 1);
    assert_eq!(sub.next().await.unwrap().unwrap(), 2);
}

#[tokio::test]
async fn test_release_stops_producer() {
    let stopped = Arc::new(AtomicBool::new(false));
    let flag = stopped.clone();

    let sub = Subscription::<u32>::spawn("ticker", 1, move |sink| async move {
        let mut n = 0;
        while sink.send(Ok(n)).await {
            n += 1;
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        flag.store(true, Ordering::SeqCst);
    });

    sub.release().await;
    assert!(stopped.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_released_handle_delivers_nothing() {
    let (sink, sub) = Subscription::<u32>::channel("test", 4);
    assert!(sink.send(Ok(7)).await);
    assert!(sub.is_active());

    sub.release().await;
    assert!(!sink.send(Ok(8)).await);
    assert!(sink.is_cancelled());
}

#[tokio::test]
async fn test_drop_cancels_sink() {
    let (sink, sub) = Subscription::<u32>::channel("test", 4);
    drop(sub);

    assert!(sink.is_cancelled());
    assert!(!sink.send(Ok(1)).await);
}

#[tokio::test]
async fn test_subscription_is_a_stream() {
    let (sink, sub) = Subscription::<u32>::channel("test", 4);
    sink.send(Ok(1)).await;
    sink.send(Err(crate::error::StoreError::Closed)).await;
    drop(sink);

    let items: Vec<_> = sub.collect().await;
    assert_eq!(items.len(), 2);
    assert!(items[0].is_ok());
    assert!(items[1].is_err());
}

#[tokio::test]
async fn test_next_pending_without_items() {
    let (_sink, mut sub) = Subscription::<u32>::channel("idle", 4);
    let mut next = tokio_test::task::spawn(sub.next());
    assert_pending!(next.poll());
}

#[test]
fn test_encode_decode_grant() {
    let grant = AccessGrant::issue(UserId::parse("u1").unwrap(), "Scale");
    let doc = encode(&grant).unwrap();

    assert_eq!(doc["canDownload"], json!(true));
    assert_eq!(doc["userId"], json!("u1"));

    let back: AccessGrant = decode(doc).unwrap();
    assert_eq!(back, grant);
}

#[test]
fn test_encode_rejects_non_objects() {
    assert!(encode(&42).is_err());
}

#[test]
fn test_merge_fields_overwrites_and_keeps() {
    let mut target = json!({"status": "pending", "plan": "Scale"})
        .as_object()
        .cloned()
        .unwrap();
    let fields = json!({"status": "approved"}).as_object().cloned().unwrap();

    merge_fields(&mut target, fields);
    assert_eq!(target["status"], "approved");
    assert_eq!(target["plan"], "Scale");
}

#[test]
fn test_write_path() {
    let scheme = PathScheme::default();
    let path = scheme.payment(&UserId::parse("u1").unwrap());
    let write = Write::Merge {
        path: path.clone(),
        fields: Document::new(),
    };
    assert_eq!(write.path(), &path);
}

#[test]
fn test_check_expected() {
    let current = json!({"requestId": "r1", "status": "pending"})
        .as_object()
        .cloned()
        .unwrap();
    let same = json!({"requestId": "r1"}).as_object().cloned().unwrap();
    let other = json!({"requestId": "r2"}).as_object().cloned().unwrap();

    assert!(check_expected("payments/u1", Some(&current), &same).is_ok());
    assert!(matches!(
        check_expected("payments/u1", Some(&current), &other),
        Err(StoreError::Conflict(_))
    ));
    assert!(matches!(
        check_expected("payments/u1", None, &same),
        Err(StoreError::Conflict(_))
    ));
}
