//! Shutdown signal shared by every background loop.
//!
//! `ShutdownTrigger` が送信側、`Shutdown` が受信側。trigger を drop しても
//! `trigger()` と同じ扱い（全ループが止まる）。

use tokio::sync::watch;

/// Sending half. Owned by whoever controls the process lifetime.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn new() -> (Self, Shutdown) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, Shutdown { rx })
    }

    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }

    pub fn trigger(&self) {
        // receivers may already be gone
        let _ = self.tx.send(true);
    }
}

/// Receiving half, cloned into each loop.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Non-blocking check, used at the top of each loop iteration.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolves once shutdown has been requested or the trigger is dropped.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // Err means the trigger was dropped: treat as shutdown.
        let _ = rx.wait_for(|stop| *stop).await;
    }
}
