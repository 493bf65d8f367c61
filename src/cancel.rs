use std::sync::Arc;
use tokio::sync::watch;

/// Cooperative cancellation signal.
///
/// Clones share the same state. Once cancelled it stays cancelled, and waiters that
/// subscribe late still observe it.
#[derive(Clone, Debug)]
pub struct Cancel {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for Cancel {
    fn default() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }
}

impl Cancel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// resolves once `cancel` has been called, immediately if it already was.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // the sender lives as long as self, so wait_for can not fail
        let _ = rx.wait_for(|c| *c).await;
    }
}
