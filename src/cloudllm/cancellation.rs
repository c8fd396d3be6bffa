//! Minimal cancellation token, hand-rolled over `tokio::sync::watch` rather than pulling in
//! `tokio-util` for a single primitive (§5 cancellation model).
//!
//! A child token created with [`CancellationToken::child`] is cancelled whenever its parent is,
//! matching the "ticket-left-active token is linked to the process token" requirement in §4.1
//! step 6 and §5.

use tokio::sync::watch;

#[derive(Clone)]
pub struct CancellationToken {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
    /// Present only for child tokens; lets `is_cancelled` observe parent cancellation too.
    parent: Option<Box<CancellationToken>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx,
            rx,
            parent: None,
        }
    }

    /// Create a token that is cancelled either directly or when `self` is cancelled.
    pub fn child(&self) -> Self {
        let mut token = Self::new();
        token.parent = Some(Box::new(self.clone()));
        token
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() || self.parent.as_ref().is_some_and(|p| p.is_cancelled())
    }

    /// Resolve once this token (or any ancestor) is cancelled.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let mut own_rx = self.rx.clone();
        match &self.parent {
            None => {
                let _ = own_rx.wait_for(|v| *v).await;
            }
            Some(parent) => {
                tokio::select! {
                    _ = async { let _ = own_rx.wait_for(|v| *v).await; } => {}
                    _ = parent.cancelled() => {}
                }
            }
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}
