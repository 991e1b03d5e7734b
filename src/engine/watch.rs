//! Turning a label-filtered event stream into a single bounded result
//!
//! The stream is consumed on its own task. The caller waits on a oneshot
//! channel raced against the deadline. Whichever side loses, the observer task
//! is aborted before returning, which drops the stream and closes the watch.

use futures::StreamExt;
use kube::api::WatchEvent;
use tokio::sync::oneshot;
use tokio::time::{sleep_until, timeout_at, Instant};
use tracing::{debug, warn};

use crate::error::Error;
use crate::gateway::WatchStream;

/// Reason recorded when no terminal event arrived in time
pub const WATCH_TIMEOUT_REASON: &str = "Watch Timeout";

/// Terminal result of one watch.
///
/// `error` set with no `status` means the outcome is undetermined: the watch
/// itself broke, which is not the same thing as the workload failing.
#[derive(Debug)]
pub struct WatchOutcome<S> {
    pub status: Option<S>,
    pub reason: String,
    pub error: Option<Error>,
}

impl<S> WatchOutcome<S> {
    pub fn resolved(status: S, reason: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            reason: reason.into(),
            error: None,
        }
    }

    pub fn timed_out(status: S) -> Self {
        Self::resolved(status, WATCH_TIMEOUT_REASON)
    }

    pub fn undetermined(error: Error) -> Self {
        Self {
            status: None,
            reason: String::new(),
            error: Some(error),
        }
    }

    pub fn is_undetermined(&self) -> bool {
        self.error.is_some()
    }

    pub fn is_timeout(&self) -> bool {
        self.error.is_none() && self.reason == WATCH_TIMEOUT_REASON
    }
}

/// Consume `stream` until `judge` returns a terminal status or `deadline`
/// passes. On timeout the outcome is `timeout_status` with
/// [`WATCH_TIMEOUT_REASON`].
///
/// A stream that ends without a terminal event is treated like silence: the
/// caller still waits out the deadline. `Deleted` events are never judged:
/// the last state of a removed object is not an outcome.
pub(crate) async fn observe<K, S, F>(
    stream: WatchStream<K>,
    deadline: Instant,
    timeout_status: S,
    mut judge: F,
) -> WatchOutcome<S>
where
    K: Send + 'static,
    S: Send + 'static,
    F: FnMut(&K) -> Option<(S, String)> + Send + 'static,
{
    let (tx, rx) = oneshot::channel();

    let observer = tokio::spawn(async move {
        let mut stream = stream;
        while let Some(event) = stream.next().await {
            let object = match event {
                Ok(WatchEvent::Added(obj)) | Ok(WatchEvent::Modified(obj)) => obj,
                Ok(WatchEvent::Deleted(_)) => {
                    debug!("Watched object was deleted, waiting for a replacement");
                    continue;
                }
                Ok(WatchEvent::Bookmark(_)) => continue,
                Ok(WatchEvent::Error(response)) => {
                    warn!("Watch reported an error: {}", response.message);
                    let _ = tx.send(WatchOutcome::undetermined(Error::KubeError(
                        kube::Error::Api(response),
                    )));
                    return;
                }
                Err(e) => {
                    warn!("Watch stream failed: {}", e);
                    let _ = tx.send(WatchOutcome::undetermined(Error::KubeError(e)));
                    return;
                }
            };
            if let Some((status, reason)) = judge(&object) {
                let _ = tx.send(WatchOutcome::resolved(status, reason));
                return;
            }
        }
        debug!("Watch stream closed without a terminal event");
    });

    let outcome = match timeout_at(deadline, rx).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(_closed)) => {
            sleep_until(deadline).await;
            WatchOutcome::timed_out(timeout_status)
        }
        Err(_elapsed) => {
            debug!("Watch deadline elapsed");
            WatchOutcome::timed_out(timeout_status)
        }
    };

    observer.abort();
    // Wait for the abort to land so the stream is closed when we return
    let _ = observer.await;
    outcome
}
