//! Cooperative cancellation for long-running protocol exchanges.
//!
//! Every bounded receive in the request/reply engine observes a
//! [`CancelToken`] alongside its timeout, so a mission, fence, rally or
//! arm sequence can be interrupted from outside (Ctrl-C in the runner,
//! shutdown of an embedding service). A canceled operation surfaces the
//! protocol state it stopped in rather than silently unwinding.

use tokio::sync::watch;

/// Observer half of a cancellation pair. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: Option<watch::Receiver<bool>>,
}

/// Triggering half of a cancellation pair.
///
/// Dropping the handle does not cancel; only [`CancelHandle::cancel`] does.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

/// Create a connected handle/token pair.
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx: Some(rx) })
}

impl CancelHandle {
    /// Signal cancellation to every token cloned from this pair.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    /// Create another token observing this handle.
    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: Some(self.tx.subscribe()),
        }
    }
}

impl CancelToken {
    /// A token that never fires. Used when the caller has no cancellation
    /// source.
    pub fn never() -> Self {
        CancelToken { rx: None }
    }

    /// Whether cancellation has been signaled.
    pub fn is_canceled(&self) -> bool {
        self.rx.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Resolve once cancellation is signaled; pends forever for
    /// [`CancelToken::never`] tokens or when the handle is gone without
    /// having canceled.
    pub async fn canceled(&self) {
        let Some(mut rx) = self.rx.clone() else {
            return std::future::pending().await;
        };
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                // Handle dropped without canceling.
                return std::future::pending().await;
            }
        }
    }
}
