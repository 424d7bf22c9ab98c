use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{Error, Result};

/// Bounds how many document verifications run at once.
///
/// Waiters are served in arrival order.
#[derive(Debug, Clone)]
pub struct OcrGate {
    permits: Arc<Semaphore>,
    capacity: usize,
}

/// A held permit. Dropping it returns the permit and wakes the next waiter.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

impl OcrGate {
    /// A gate admitting `capacity` callers at a time. Zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a permit.
    pub async fn acquire(&self) -> Result<GatePermit> {
        self.permits
            .clone()
            .acquire_owned()
            .await
            .map(|permit| GatePermit { _permit: permit })
            .map_err(|_| Error::Unavailable("Verification gate is closed".to_string()))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use rocket::futures::{poll, FutureExt};

    use super::*;

    #[rocket::async_test]
    async fn bounds_concurrent_holders() {
        let gate = OcrGate::new(2);
        let a = gate.acquire().await.unwrap();
        let _b = gate.acquire().await.unwrap();
        assert_eq!(gate.available(), 0);

        let mut third = gate.acquire().boxed();
        assert!(poll!(&mut third).is_pending());

        drop(a);
        assert!(poll!(&mut third).is_ready());
    }

    #[rocket::async_test]
    async fn waiters_are_served_in_order() {
        let gate = OcrGate::new(1);
        let held = gate.acquire().await.unwrap();

        let mut first = gate.acquire().boxed();
        let mut second = gate.acquire().boxed();
        assert!(poll!(&mut first).is_pending());
        assert!(poll!(&mut second).is_pending());

        drop(held);
        // The later arrival cannot jump the queue.
        assert!(poll!(&mut second).is_pending());
        let first = match poll!(&mut first) {
            std::task::Poll::Ready(permit) => permit.unwrap(),
            std::task::Poll::Pending => panic!("first waiter was not woken"),
        };
        assert!(poll!(&mut second).is_pending());

        drop(first);
        assert!(poll!(&mut second).is_ready());
    }

    #[test]
    fn zero_capacity_admits_one() {
        let gate = OcrGate::new(0);
        assert_eq!(gate.capacity(), 1);
        assert_eq!(gate.available(), 1);
    }
}
