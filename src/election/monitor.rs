use std::time::Duration;

use rocket::{
    fairing::{Fairing, Info, Kind},
    Orbit, Rocket, Shutdown,
};
use tokio::time::{interval, MissedTickBehavior};

use crate::config::Config;
use crate::election::ElectionLifecycle;

/// Periodically ends elections whose time has run out, so a forgotten
/// election closes without an administrator.
#[derive(Clone)]
pub struct ElectionMonitor {
    lifecycle: ElectionLifecycle,
    period: Duration,
}

impl ElectionMonitor {
    pub fn new(lifecycle: ElectionLifecycle, period: Duration) -> Self {
        Self { lifecycle, period }
    }

    /// One check. Errors are logged and otherwise ignored; the next tick retries.
    pub async fn tick(&self) -> bool {
        match self.lifecycle.expire_if_due().await {
            Ok(expired) => expired,
            Err(e) => {
                error!("Error in election end detection: {e}");
                false
            }
        }
    }

    /// Check every period until `shutdown` fires.
    pub async fn run(self, shutdown: Shutdown) {
        tokio::pin!(shutdown);
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = &mut shutdown => {
                    debug!("Election monitor stopping");
                    break;
                }
            }
        }
    }
}

/// Spawns the [`ElectionMonitor`] once the server is up.
pub struct ElectionMonitorFairing;

#[rocket::async_trait]
impl Fairing for ElectionMonitorFairing {
    fn info(&self) -> Info {
        Info {
            name: "Election monitor",
            kind: Kind::Liftoff,
        }
    }

    async fn on_liftoff(&self, rocket: &Rocket<Orbit>) {
        let (lifecycle, config) = match (
            rocket.state::<ElectionLifecycle>(),
            rocket.state::<Config>(),
        ) {
            (Some(lifecycle), Some(config)) => (lifecycle.clone(), config),
            _ => {
                error!("Election monitor not started: services are not configured");
                return;
            }
        };

        let monitor = ElectionMonitor::new(lifecycle, config.election_monitor_interval());
        info!(
            "Monitoring election expiry every {}s",
            monitor.period.as_secs()
        );
        tokio::spawn(monitor.run(rocket.shutdown()));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration as ChronoDuration;

    use super::*;
    use crate::clock::ManualClock;
    use crate::events::Notifier;
    use crate::model::{election::LifecycleState, memory::MemoryStore};

    #[rocket::async_test]
    async fn tick_ends_overdue_elections() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new());
        let lifecycle = ElectionLifecycle::new(store.clone(), clock.clone(), Notifier::new());
        let monitor = ElectionMonitor::new(lifecycle.clone(), Duration::from_secs(60));

        lifecycle.start(60).await.unwrap();
        assert!(!monitor.tick().await);
        assert_eq!(lifecycle.status().await.unwrap().status, LifecycleState::Active);

        clock.advance(ChronoDuration::minutes(60) + ChronoDuration::seconds(1));
        assert!(monitor.tick().await);
        assert!(!store.stored_config().unwrap().is_active);
        assert_eq!(lifecycle.status().await.unwrap().status, LifecycleState::Ended);
    }

    #[rocket::async_test]
    async fn paused_elections_are_left_alone() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new());
        let notifier = Notifier::new();
        let lifecycle = ElectionLifecycle::new(store.clone(), clock.clone(), notifier.clone());
        let monitor = ElectionMonitor::new(lifecycle.clone(), Duration::from_secs(60));

        lifecycle.start(1).await.unwrap();
        lifecycle.pause().await.unwrap();
        let mut events = notifier.subscribe();
        clock.advance(ChronoDuration::minutes(5));

        assert!(!monitor.tick().await);
        assert!(events.try_recv().is_err());
        assert_eq!(lifecycle.status().await.unwrap().status, LifecycleState::Ended);
    }
}
