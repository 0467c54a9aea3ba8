//! Pending-command table.
//!
//! One entry per in-flight command, keyed by command id. Every entry
//! resolves exactly once: either an inbound ack takes it (and cancels the
//! timer), or the timeout task fires, removes it, and hands the entry to
//! the caller's timeout handler. A take on an id with no entry is the
//! duplicate/late-ack case and returns `None`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};

use tabsense_core::protocol::AgentMessage;

/// Where a pending command's resolution goes.
pub enum AckWaiter {
    /// A controller websocket connection.
    Conn(u64),
    /// An HTTP `POST /command` caller.
    Oneshot(oneshot::Sender<AgentMessage>),
}

pub struct PendingEntry {
    pub waiter: AckWaiter,
    pub kind: &'static str,
    timer: tokio::task::JoinHandle<()>,
}

#[derive(Clone, Default)]
pub struct PendingCommands {
    inner: Arc<Mutex<HashMap<String, PendingEntry>>>,
}

impl PendingCommands {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry and arm its timeout. If nothing has taken the
    /// entry when the timer fires, it is removed and passed to
    /// `on_timeout`.
    pub async fn register<F, Fut>(
        &self,
        command_id: String,
        waiter: AckWaiter,
        kind: &'static str,
        timeout: Duration,
        on_timeout: F,
    ) where
        F: FnOnce(PendingEntry) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let timer = {
            let inner = self.inner.clone();
            let command_id = command_id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                let entry = inner.lock().await.remove(&command_id);
                if let Some(entry) = entry {
                    on_timeout(entry).await;
                }
            })
        };
        self.inner.lock().await.insert(
            command_id,
            PendingEntry {
                waiter,
                kind,
                timer,
            },
        );
    }

    /// Take the entry for an ack, cancelling its timer. `None` means the
    /// entry is gone (already resolved or timed out); the caller drops
    /// the ack.
    pub async fn take(&self, command_id: &str) -> Option<PendingEntry> {
        let entry = self.inner.lock().await.remove(command_id);
        if let Some(ref entry) = entry {
            entry.timer.abort();
        }
        entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn conn_waiter() -> AckWaiter {
        AckWaiter::Conn(1)
    }

    #[tokio::test]
    async fn take_resolves_once_and_cancels_the_timer() {
        let pending = PendingCommands::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();

        pending
            .register(
                "cmd_1_aaaa".into(),
                conn_waiter(),
                "click",
                Duration::from_millis(50),
                move |_entry| async move {
                    fired_clone.fetch_add(1, Ordering::SeqCst);
                },
            )
            .await;

        let entry = pending.take("cmd_1_aaaa").await.expect("entry present");
        assert_eq!(entry.kind, "click");
        assert!(pending.take("cmd_1_aaaa").await.is_none());

        // Timer was cancelled: the timeout handler never runs.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn timeout_removes_the_entry_and_runs_the_handler() {
        let pending = PendingCommands::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();

        pending
            .register(
                "cmd_2_bbbb".into(),
                conn_waiter(),
                "type",
                Duration::from_millis(30),
                move |entry| async move {
                    assert_eq!(entry.kind, "type");
                    fired_clone.fetch_add(1, Ordering::SeqCst);
                },
            )
            .await;

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        // A late ack finds nothing.
        assert!(pending.take("cmd_2_bbbb").await.is_none());
    }
}
