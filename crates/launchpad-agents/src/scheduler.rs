use std::time::Duration;

use chrono::{DateTime, Utc};
use launchpad_models::{EntityId, EntityKind};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::runtime::{AgentHandle, Event};
use crate::state::StateStore;

/// Decides which entities a periodic tick re-evaluates.
#[derive(Debug, Clone)]
pub struct MonitorScheduler {
    kind: EntityKind,
    period: Duration,
    min_reevaluation: chrono::Duration,
}

impl MonitorScheduler {
    pub fn new(kind: EntityKind, period: Duration, min_reevaluation: Duration) -> Self {
        Self {
            kind,
            period,
            min_reevaluation: chrono::Duration::from_std(min_reevaluation)
                .unwrap_or_else(|_| chrono::Duration::weeks(52 * 100)),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Entities due at `now`, lazily, in store insertion order.
    ///
    /// An entity is due when it has never been evaluated or was last
    /// evaluated at least `min_reevaluation` ago. Ids are unique per store so
    /// one pass never yields the same entity twice. The ids borrow only the
    /// store.
    pub fn due<'a>(
        &self,
        store: &'a StateStore,
        now: DateTime<Utc>,
    ) -> impl Iterator<Item = &'a EntityId> + 'a {
        let kind = self.kind;
        let min_reevaluation = self.min_reevaluation;
        store
            .iter()
            .filter(move |entity| entity.kind == kind)
            .filter(move |entity| match entity.last_evaluated_at {
                None => true,
                Some(last) => now - last >= min_reevaluation,
            })
            .map(|entity| &entity.id)
    }

    /// Request a tick every period until cancelled.
    ///
    /// A tick is only enqueued when the previous one has been picked up by
    /// the agent; intervals missed while the agent is busy are skipped.
    pub fn spawn_ticker(&self, handle: AgentHandle, cancel: CancellationToken) -> JoinHandle<()> {
        let period = self.period;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first interval tick completes immediately.
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if !handle.request_tick() {
                            debug!(agent = %handle.address(), "Tick skipped, previous tick still pending");
                        }
                    }
                }
            }
        })
    }
}

/// Enqueue a sweep of correlation timeouts and approval deadlines every `every`.
pub fn spawn_sweeper(
    handle: AgentHandle,
    every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if handle.try_submit(Event::Sweep).is_err() {
                        debug!(agent = %handle.address(), "Sweep skipped, mailbox full");
                    }
                }
            }
        }
    })
}
