//! Scoped subscription handle
//!
//! A `Subscription` owns the receiving end of a snapshot channel and the
//! producer task feeding it. Releasing (or dropping) the handle cancels the
//! producer; `release()` additionally waits for it to finish, so once it
//! returns nothing can be delivered for this subscription again.

use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::StoreResult;

/// Default number of undelivered snapshots buffered per subscription
pub const DEFAULT_BUFFER: usize = 16;

/// Producer side of a subscription
pub struct SubscriptionSink<T> {
    tx: mpsc::Sender<StoreResult<T>>,
    cancel: CancellationToken,
}

impl<T> SubscriptionSink<T> {
    /// Deliver one item. Returns `false` once the subscriber is gone or
    /// released, which is the producer's signal to stop.
    pub async fn send(&self, item: StoreResult<T>) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.tx.send(item) => sent.is_ok(),
        }
    }

    /// Resolves when the subscriber releases the handle
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Whether the subscriber released the handle
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }
}

/// Live subscription to a document or collection
pub struct Subscription<T> {
    label: String,
    rx: mpsc::Receiver<StoreResult<T>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> Subscription<T> {
    /// Create a handle and its sink without a producer task
    ///
    /// Used by adapters that feed the sink from elsewhere, and by tests.
    #[must_use]
    pub fn channel(label: impl Into<String>, buffer: usize) -> (SubscriptionSink<T>, Self) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let cancel = CancellationToken::new();
        let sink = SubscriptionSink {
            tx,
            cancel: cancel.clone(),
        };
        let sub = Self {
            label: label.into(),
            rx,
            cancel,
            task: None,
        };
        (sink, sub)
    }

    /// Spawn `producer` with a fresh sink and return the owning handle
    #[must_use]
    pub fn spawn<F, Fut>(label: impl Into<String>, buffer: usize, producer: F) -> Self
    where
        F: FnOnce(SubscriptionSink<T>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (sink, mut sub) = Self::channel(label, buffer);
        sub.task = Some(tokio::spawn(producer(sink)));
        sub
    }
}

impl<T> Subscription<T> {
    /// What this subscription watches (for logs)
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Wait for the next snapshot
    ///
    /// Returns `None` when the producer stopped or the handle was released.
    pub async fn next(&mut self) -> Option<StoreResult<T>> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            item = self.rx.recv() => item,
        }
    }

    /// Whether the handle is still live
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Cancel the producer and wait until it has stopped
    pub async fn release(mut self) {
        self.shutdown();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        debug!(subscription = %self.label, "subscription released");
    }

    fn shutdown(&mut self) {
        self.cancel.cancel();
        self.rx.close();
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl<T> Stream for Subscription<T> {
    type Item = StoreResult<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.cancel.is_cancelled() {
            return Poll::Ready(None);
        }
        this.rx.poll_recv(cx)
    }
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("label", &self.label)
            .field("active", &self.is_active())
            .finish()
    }
}
