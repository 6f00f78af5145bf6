//! Cooperative cancellation signal.

use std::sync::Arc;

use tokio::sync::watch;

/// One-shot termination flag that can be awaited.
///
/// Migration runs only look at it between stages, so a stage that has started
/// always runs to completion.
#[derive(Debug, Clone)]
pub struct Shutdown {
    sender: Arc<watch::Sender<bool>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Signal termination. Idempotent.
    pub fn shutdown(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_terminated(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolves once `shutdown` has been called.
    pub fn wait(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut receiver = self.sender.subscribe();
        async move {
            let _ = receiver.wait_for(|terminated| *terminated).await;
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::Shutdown;

    #[tokio::test]
    async fn test_wait_resolves_after_shutdown() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_terminated());

        let waiter = tokio::spawn(shutdown.wait());
        shutdown.shutdown();
        tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert!(shutdown.is_terminated());

        // already terminated: resolves immediately
        tokio::time::timeout(Duration::from_secs(1), shutdown.wait()).await.unwrap();
    }
}
