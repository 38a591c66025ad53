//! In-memory document store
//!
//! Everything lives behind one lock, so a transaction is trivially atomic:
//! writes are staged against a copy of the touched documents and only
//! published if every write applies. Each commit bumps a global revision that
//! subscriptions watch.
//!
//! Fault injection (`fail_next_writes`, `fail_next_reads`) lets tests drive
//! the failure paths of the components above the store.

use async_trait::async_trait;
use paygate_core::store::{check_expected, merge_fields, DEFAULT_BUFFER};
use paygate_core::{
    AccessStore, CollectionPath, Document, DocumentPath, StoreError, StoreResult, Subscription,
    Write,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::debug;

use crate::feed;

#[derive(Debug, Clone)]
struct Entry {
    collection: String,
    body: Document,
    revision: u64,
}

#[derive(Debug, Default)]
struct State {
    documents: HashMap<String, Entry>,
    revision: u64,
}

struct Inner {
    state: RwLock<State>,
    commits: watch::Sender<u64>,
    failing_writes: AtomicUsize,
    failing_reads: AtomicUsize,
}

impl Inner {
    fn read_fault(&self) -> StoreResult<()> {
        if take_fault(&self.failing_reads) {
            return Err(StoreError::Unavailable("injected read failure".to_string()));
        }
        Ok(())
    }

    async fn read_document(&self, key: &str) -> StoreResult<(u64, Option<Document>)> {
        self.read_fault()?;
        let state = self.state.read().await;
        Ok(match state.documents.get(key) {
            Some(entry) => (entry.revision, Some(entry.body.clone())),
            None => (0, None),
        })
    }

    async fn read_collection(&self, collection: &str) -> StoreResult<(u64, Vec<Document>)> {
        self.read_fault()?;
        let state = self.state.read().await;
        let mut entries: Vec<(&String, &Entry)> = state
            .documents
            .iter()
            .filter(|(_, entry)| entry.collection == collection)
            .collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));

        let version = entries.iter().map(|(_, e)| e.revision).max().unwrap_or(0);
        let documents = entries.into_iter().map(|(_, e)| e.body.clone()).collect();
        Ok((version, documents))
    }
}

fn take_fault(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Process-local `AccessStore`
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        let (commits, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(State::default()),
                commits,
                failing_writes: AtomicUsize::new(0),
                failing_reads: AtomicUsize::new(0),
            }),
        }
    }

    /// Fail the next `n` writes or transactions with `Unavailable`
    pub fn fail_next_writes(&self, n: usize) {
        self.inner.failing_writes.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` reads, including subscription fetches
    pub fn fail_next_reads(&self, n: usize) {
        self.inner.failing_reads.store(n, Ordering::SeqCst);
    }

    /// Revision of the last commit
    pub async fn revision(&self) -> u64 {
        self.inner.state.read().await.revision
    }

    /// Number of stored documents
    pub async fn len(&self) -> usize {
        self.inner.state.read().await.documents.len()
    }

    /// Whether nothing has been written yet
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl AccessStore for MemoryStore {
    async fn get(&self, path: &DocumentPath) -> StoreResult<Option<Document>> {
        let (_, document) = self.inner.read_document(&path.to_string()).await?;
        Ok(document)
    }

    async fn set(&self, path: &DocumentPath, value: Document) -> StoreResult<()> {
        self.transact(vec![Write::Set {
            path: path.clone(),
            value,
        }])
        .await
    }

    async fn update(&self, path: &DocumentPath, fields: Document) -> StoreResult<()> {
        self.transact(vec![Write::Update {
            path: path.clone(),
            fields,
        }])
        .await
    }

    async fn transact(&self, writes: Vec<Write>) -> StoreResult<()> {
        if take_fault(&self.inner.failing_writes) {
            return Err(StoreError::Unavailable("injected write failure".to_string()));
        }

        let mut state = self.inner.state.write().await;
        let revision = state.revision + 1;
        let mut staged: HashMap<String, Entry> = HashMap::new();

        for write in writes {
            let key = write.path().to_string();
            let collection = write.path().collection().to_string();
            let current = staged
                .get(&key)
                .or_else(|| state.documents.get(&key))
                .map(|entry| entry.body.clone());

            let body = match write {
                Write::Expect { fields, .. } => {
                    check_expected(&key, current.as_ref(), &fields)?;
                    continue;
                }
                Write::Set { value, .. } => value,
                Write::Update { fields, .. } => {
                    let mut body = current.ok_or_else(|| StoreError::NotFound(key.clone()))?;
                    merge_fields(&mut body, fields);
                    body
                }
                Write::Merge { fields, .. } => {
                    let mut body = current.unwrap_or_default();
                    merge_fields(&mut body, fields);
                    body
                }
            };

            staged.insert(
                key,
                Entry {
                    collection,
                    body,
                    revision,
                },
            );
        }

        let count = staged.len();
        state.documents.extend(staged);
        state.revision = revision;
        drop(state);

        self.inner.commits.send_replace(revision);
        debug!(revision, documents = count, "memory transaction committed");
        Ok(())
    }

    async fn subscribe(&self, path: &DocumentPath) -> StoreResult<Subscription<Option<Document>>> {
        let key = path.to_string();
        let inner = self.inner.clone();
        let commits = inner.commits.subscribe();

        Ok(Subscription::spawn(key.clone(), DEFAULT_BUFFER, move |sink| {
            feed::drive(key.clone(), sink, commits, None, move || {
                let inner = inner.clone();
                let key = key.clone();
                async move { inner.read_document(&key).await }
            })
        }))
    }

    async fn subscribe_collection(
        &self,
        path: &CollectionPath,
    ) -> StoreResult<Subscription<Vec<Document>>> {
        let collection = path.to_string();
        let inner = self.inner.clone();
        let commits = inner.commits.subscribe();

        Ok(Subscription::spawn(collection.clone(), DEFAULT_BUFFER, move |sink| {
            feed::drive(collection.clone(), sink, commits, None, move || {
                let inner = inner.clone();
                let collection = collection.clone();
                async move { inner.read_collection(&collection).await }
            })
        }))
    }
}
