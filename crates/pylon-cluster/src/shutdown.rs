//! The single cancellation primitive of the runtime.
//!
//! Every long-lived task owned by an agent or a sender selects on an
//! [`ExitSignal`] alongside its work. Triggering is sticky and
//! idempotent: current and future waiters alike observe it.

use std::sync::Arc;

use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct ExitSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl ExitSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Trip the signal. Safe to call any number of times.
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the signal has been tripped — immediately, if it
    /// already was.
    pub async fn triggered(&self) {
        let mut rx = self.tx.subscribe();
        // the sender half lives inside self, so the channel never closes
        let _ = rx.wait_for(|tripped| *tripped).await;
    }
}

impl Default for ExitSignal {
    fn default() -> Self {
        Self::new()
    }
}
