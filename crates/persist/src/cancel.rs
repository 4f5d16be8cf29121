//! Caller-supplied cancellation for store operations.
//!
//! A `Cancellation` is installed as the SQLite progress handler for the
//! duration of one operation, so a flipped flag or an expired deadline aborts
//! the statement that is currently running. Write paths also check it right
//! before commit; an aborted transaction is rolled back when dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::StoreError;

#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Cancellation {
    /// Never cancelled unless [`cancel`](Self::cancel) is called.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { flag: Arc::default(), deadline: Some(Instant::now() + timeout) }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    pub fn check(&self) -> Result<(), StoreError> {
        if self.is_cancelled() {
            Err(StoreError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_is_shared_between_clones() {
        let c = Cancellation::new();
        let seen_by_worker = c.clone();
        assert!(!seen_by_worker.is_cancelled());
        c.cancel();
        assert!(seen_by_worker.is_cancelled());
        assert!(matches!(seen_by_worker.check(), Err(StoreError::Cancelled)));
    }

    #[test]
    fn deadline_expires() {
        let c = Cancellation::with_timeout(Duration::ZERO);
        assert!(c.is_cancelled());
        assert!(!Cancellation::with_timeout(Duration::from_secs(60)).is_cancelled());
    }
}
