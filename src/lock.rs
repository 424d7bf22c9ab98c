//! Key-scoped leases over a shared [`LeaseStore`].

use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use data_encoding::HEXLOWER;
use rand::{rngs::OsRng, RngCore};

use crate::clock::Clock;
use crate::model::{lease::Lease, store::LeaseStore};

/// How long a lease lasts and how hard to try for a held one.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LockPolicy {
    pub ttl: chrono::Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            ttl: chrono::Duration::milliseconds(8000),
            max_retries: 6,
            retry_delay: Duration::from_millis(200),
        }
    }
}

/// Proof of holding a lease. Needed to release it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeaseToken(String);

impl LeaseToken {
    fn generate() -> Self {
        let mut bytes = [0_u8; 16];
        OsRng.fill_bytes(&mut bytes);
        Self(HEXLOWER.encode(&bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for LeaseToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Acquires and releases leases. Cheap to clone.
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn LeaseStore>,
    clock: Arc<dyn Clock>,
}

impl LockManager {
    pub fn new(store: Arc<dyn LeaseStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Try to take the lease on `key`.
    ///
    /// First tries a plain create. If the key is held, retries up to
    /// `policy.max_retries` times to take over an expired lease, sleeping
    /// `policy.retry_delay` between misses. Returns `None` if the key stayed
    /// busy; store errors are logged and count as a miss.
    pub async fn acquire(&self, key: &str, policy: &LockPolicy) -> Option<LeaseToken> {
        let token = LeaseToken::generate();
        let lease = Lease {
            key: key.to_string(),
            token: token.0.clone(),
            expires_at: self.clock.now() + policy.ttl,
        };

        match self.store.create(&lease).await {
            Ok(true) => {
                trace!("Acquired lock {key}");
                return Some(token);
            }
            Ok(false) => {}
            Err(e) => warn!("Failed to create lock {key}: {e}"),
        }

        let mut lease = lease;
        for attempt in 1..=policy.max_retries {
            let now = self.clock.now();
            lease.expires_at = now + policy.ttl;
            match self.store.take_over(&lease, now).await {
                Ok(true) => {
                    debug!("Acquired lock {key} on retry {attempt}");
                    return Some(token);
                }
                Ok(false) => {}
                Err(e) => warn!("Failed to take over lock {key}: {e}"),
            }
            if attempt < policy.max_retries {
                tokio::time::sleep(policy.retry_delay).await;
            }
        }

        debug!("Lock {key} still busy after {} retries", policy.max_retries);
        None
    }

    /// Release the lease on `key` if `token` still owns it.
    ///
    /// Releasing a lease that has since expired and been taken by someone
    /// else does nothing.
    pub async fn release(&self, key: &str, token: &LeaseToken) {
        match self.store.remove(key, token.as_str()).await {
            Ok(true) => trace!("Released lock {key}"),
            Ok(false) => debug!("Lock {key} was no longer held by this token"),
            Err(e) => warn!("Failed to release lock {key}: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;
    use rocket::futures::future::join_all;

    use super::*;
    use crate::clock::ManualClock;
    use crate::model::memory::MemoryStore;

    fn manager() -> (LockManager, Arc<MemoryStore>, Arc<ManualClock>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new());
        (LockManager::new(store.clone(), clock.clone()), store, clock)
    }

    fn quick() -> LockPolicy {
        LockPolicy {
            retry_delay: Duration::from_millis(1),
            ..LockPolicy::default()
        }
    }

    #[rocket::async_test]
    async fn release_frees_the_key() {
        let (locks, store, _) = manager();
        let token = locks.acquire("voter:a", &quick()).await.unwrap();
        assert_eq!(store.lease("voter:a").unwrap().token, token.as_str());

        locks.release("voter:a", &token).await;
        assert!(store.lease("voter:a").is_none());

        let policy = LockPolicy {
            max_retries: 0,
            ..quick()
        };
        assert!(locks.acquire("voter:a", &policy).await.is_some());
    }

    #[rocket::async_test]
    async fn held_key_is_busy() {
        let (locks, _, _) = manager();
        let _held = locks.acquire("voter:a", &quick()).await.unwrap();
        assert!(locks.acquire("voter:a", &quick()).await.is_none());

        // Other keys are unaffected.
        assert!(locks.acquire("voter:b", &quick()).await.is_some());
    }

    #[rocket::async_test]
    async fn expired_lease_is_taken_over_first_try() {
        let (locks, store, clock) = manager();
        let stale = locks.acquire("voter:a", &quick()).await.unwrap();
        clock.advance(ChronoDuration::seconds(9));

        let policy = LockPolicy {
            max_retries: 1,
            retry_delay: Duration::from_secs(60),
            ..quick()
        };
        let fresh = tokio::time::timeout(
            Duration::from_secs(5),
            locks.acquire("voter:a", &policy),
        )
        .await
        .unwrap()
        .unwrap();
        assert_ne!(stale, fresh);

        // The stale holder cannot release the new lease.
        locks.release("voter:a", &stale).await;
        assert_eq!(store.lease("voter:a").unwrap().token, fresh.as_str());
    }

    #[rocket::async_test]
    async fn busy_key_gives_up_without_a_final_sleep() {
        let (locks, _, _) = manager();
        let _held = locks.acquire("voter:a", &quick()).await.unwrap();

        let policy = LockPolicy {
            max_retries: 1,
            retry_delay: Duration::from_secs(60),
            ..LockPolicy::default()
        };
        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            locks.acquire("voter:a", &policy),
        )
        .await
        .expect("acquire slept after its last attempt");
        assert!(outcome.is_none());
    }

    #[rocket::async_test]
    async fn waiter_gets_key_after_release() {
        let (locks, _, _) = manager();
        let held = locks.acquire("voter:a", &quick()).await.unwrap();

        let waiter = {
            let locks = locks.clone();
            let policy = LockPolicy {
                max_retries: 200,
                retry_delay: Duration::from_millis(5),
                ..LockPolicy::default()
            };
            tokio::spawn(async move { locks.acquire("voter:a", &policy).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        locks.release("voter:a", &held).await;

        assert!(waiter.await.unwrap().is_some());
    }

    #[rocket::async_test]
    async fn concurrent_acquires_have_one_winner() {
        let (locks, _, _) = manager();
        let policy = LockPolicy {
            max_retries: 2,
            ..quick()
        };
        let attempts = (0..16).map(|_| locks.acquire("voter:a", &policy));
        let winners = join_all(attempts)
            .await
            .into_iter()
            .filter(Option::is_some)
            .count();
        assert_eq!(winners, 1);
    }
}
