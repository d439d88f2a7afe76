//! Supervisor
//!
//! A set of named, cancellable, long-running tasks. Shutdown cancels every
//! member's token and waits for all of them to report done, so callers get a
//! synchronous stop: once `shutdown` returns, nothing is still running. Used
//! for the top-level process group and for per-pipeline runner groups.

use std::future::Future;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct Supervisor {
    token: CancellationToken,
    members: Vec<Member>,
}

struct Member {
    name: String,
    handle: JoinHandle<()>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            members: Vec::new(),
        }
    }

    /// The token members observe; child supervisors can chain off it.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Spawn a named member. The factory receives a child token that is
    /// cancelled on shutdown; the member is expected to return promptly once
    /// it fires.
    pub fn spawn<F, Fut>(&mut self, name: impl Into<String>, f: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let token = self.token.child_token();
        let fut = f(token);

        debug!(member = %name, "starting supervisor member");

        let member_name = name.clone();
        let handle = tokio::spawn(async move {
            fut.await;
            debug!(member = %member_name, "supervisor member done");
        });

        self.members.push(Member { name, handle });
    }

    /// Cancel all members and wait for each to finish.
    pub async fn shutdown(self) {
        self.token.cancel();

        for member in self.members {
            if let Err(e) = member.handle.await {
                warn!(member = %member.name, "supervisor member panicked: {}", e);
            }
        }
    }

    /// Wait for every member to finish on its own, without cancelling.
    pub async fn wait(self) {
        for member in self.members {
            if let Err(e) = member.handle.await {
                warn!(member = %member.name, "supervisor member panicked: {}", e);
            }
        }
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn test_shutdown_cancels_and_waits_for_members() {
        let stopped = Arc::new(AtomicBool::new(false));
        let observed = stopped.clone();

        let mut supervisor = Supervisor::new();
        supervisor.spawn("loop", move |token| async move {
            token.cancelled().await;
            observed.store(true, Ordering::SeqCst);
        });

        supervisor.shutdown().await;
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_members_share_one_shutdown_signal() {
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let mut supervisor = Supervisor::new();
        for i in 0..3 {
            let count = count.clone();
            supervisor.spawn(format!("member-{}", i), move |token| async move {
                token.cancelled().await;
                count.fetch_add(1, Ordering::SeqCst);
            });
        }

        supervisor.shutdown().await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}
