//! Barrier between building a launcher and processing disconnects
//!
//! While a launcher is being assembled, a disconnect must not be treated as
//! a plain seat release: the match may be about to start with that node in
//! it. `disallow` raises the barrier, `allow` lowers it, and `wait` parks a
//! disconnect handler until the barrier changes or a timeout passes.

use std::time::Duration;

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct GateState {
    generation: u64,
    blocking: bool,
}

/// Generation-counted removal barrier
#[derive(Debug)]
pub struct RemovalGate {
    tx: watch::Sender<GateState>,
    timeout: Duration,
}

impl RemovalGate {
    /// Open gate; blocked waiters give up after `timeout`
    pub fn new(timeout: Duration) -> Self {
        let (tx, _rx) = watch::channel(GateState {
            generation: 0,
            blocking: false,
        });
        Self { tx, timeout }
    }

    /// Raise a new barrier, releasing anyone parked on the previous one
    pub fn disallow(&self) {
        self.tx.send_modify(|state| {
            state.generation += 1;
            state.blocking = true;
        });
    }

    /// Lower the barrier until the next `disallow`
    pub fn allow(&self) {
        self.tx.send_modify(|state| {
            state.generation += 1;
            state.blocking = false;
        });
    }

    /// Whether removals are currently held back
    pub fn is_blocking(&self) -> bool {
        self.tx.borrow().blocking
    }

    /// Wait until the current barrier changes. Returns false on timeout.
    pub async fn wait(&self) -> bool {
        let mut rx = self.tx.subscribe();
        let current = *rx.borrow_and_update();
        if !current.blocking {
            return true;
        }

        let changed = rx.wait_for(|state| state.generation != current.generation);
        let result = match tokio::time::timeout(self.timeout, changed).await {
            Ok(_) => true,
            Err(_) => {
                tracing::warn!(
                    "Removal gate still closed after {:?}, proceeding",
                    self.timeout
                );
                false
            }
        };
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_open_gate_does_not_block() {
        let gate = RemovalGate::new(Duration::from_secs(6));
        assert!(!gate.is_blocking());
        assert!(gate.wait().await);
    }

    #[tokio::test]
    async fn test_allow_releases_waiter() {
        let gate = Arc::new(RemovalGate::new(Duration::from_secs(6)));
        gate.disallow();

        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.wait().await })
        };
        tokio::task::yield_now().await;
        gate.allow();

        assert!(waiter.await.unwrap());
        assert!(!gate.is_blocking());
    }

    #[tokio::test]
    async fn test_new_barrier_releases_old_waiters() {
        let gate = Arc::new(RemovalGate::new(Duration::from_secs(6)));
        gate.disallow();

        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.wait().await })
        };
        tokio::task::yield_now().await;
        gate.disallow();

        assert!(waiter.await.unwrap());
        assert!(gate.is_blocking());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let gate = RemovalGate::new(Duration::from_secs(6));
        gate.disallow();

        assert!(!gate.wait().await);
    }
}
