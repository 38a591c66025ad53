//! Change feed shared by the adapters
//!
//! A feed fetches the current snapshot, delivers it if its version moved, and
//! then sleeps until the adapter reports a commit, the poll interval elapses
//! or the subscriber releases the handle. The first fetch is always
//! delivered, so every subscription starts with the current value.

use paygate_core::{StoreResult, SubscriptionSink};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Drive `sink` until it is released or a fetch fails
///
/// `fetch` returns the snapshot together with a version that changes
/// whenever the snapshot may have changed.
pub(crate) async fn drive<T, F, Fut>(
    label: String,
    sink: SubscriptionSink<T>,
    mut commits: watch::Receiver<u64>,
    poll: Option<Duration>,
    mut fetch: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<(u64, T)>>,
{
    let mut delivered: Option<u64> = None;

    loop {
        // mark before fetching so a commit landing mid-fetch still wakes us
        commits.borrow_and_update();

        match fetch().await {
            Ok((version, snapshot)) => {
                if delivered != Some(version) {
                    delivered = Some(version);
                    debug!(feed = %label, version, "delivering snapshot");
                    if !sink.send(Ok(snapshot)).await {
                        break;
                    }
                }
            }
            Err(e) => {
                warn!(feed = %label, error = %e, "snapshot fetch failed, closing feed");
                let _ = sink.send(Err(e)).await;
                break;
            }
        }

        tokio::select! {
            biased;
            _ = sink.cancelled() => break,
            changed = commits.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::time::sleep(poll.unwrap_or_default()), if poll.is_some() => {}
        }
    }

    debug!(feed = %label, "feed stopped");
}
