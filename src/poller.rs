//! Periodic refresh of the dashboard.
//!
//! Every tick reads the active assignments, publishes them, then resolves and
//! publishes progress for the most recent one. Ticks only ever run on the
//! poller task, so two of them never overlap; a tick requested while one is
//! running is queued once and runs right after it.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    events::{Broadcaster, ServerEvent},
    models::{ActiveWindow, ProgressRow},
    resolver::Resolver,
    store::ProgressStore,
};

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Assignments query failed; nothing was published.
    Failed,
    /// Published an empty assignment list.
    NoActive,
    /// Published assignments but progress could not be resolved.
    ProgressFailed { assignment_id: i64 },
    Published { assignment_id: i64, rows: Vec<ProgressRow> },
}

/// Asks the poller for an extra tick outside the schedule.
#[derive(Clone)]
pub struct TickTrigger {
    notify: Arc<Notify>,
}

impl TickTrigger {
    pub fn request(&self) {
        // Stores at most one pending permit.
        self.notify.notify_one();
    }
}

pub struct Poller {
    store: Arc<dyn ProgressStore>,
    resolver: Resolver,
    broadcaster: Broadcaster,
    window: ActiveWindow,
    trigger: TickTrigger,
}

impl Poller {
    pub fn new(store: Arc<dyn ProgressStore>, broadcaster: Broadcaster, window: ActiveWindow) -> Self {
        Self {
            resolver: Resolver::new(store.clone()),
            store,
            broadcaster,
            window,
            trigger: TickTrigger { notify: Arc::new(Notify::new()) },
        }
    }

    pub fn trigger(&self) -> TickTrigger {
        self.trigger.clone()
    }

    pub async fn tick(&self) -> TickOutcome {
        let assignments = match self.store.active_assignments(self.window).await {
            Ok(assignments) => assignments,
            Err(e) => {
                tracing::error!(error = %e, "database polling error");
                return TickOutcome::Failed;
            }
        };

        self.broadcaster.publish(ServerEvent::active_assignments(&assignments));

        let Some(latest) = assignments.first() else {
            return TickOutcome::NoActive;
        };
        let assignment_id = latest.id;

        match self.resolver.resolve_progress(assignment_id).await {
            Ok(rows) => {
                self.broadcaster.publish(ServerEvent::quiz_progress(assignment_id, &rows));
                TickOutcome::Published { assignment_id, rows }
            }
            Err(e) => {
                tracing::error!(assignment_id, error = %e, "database polling error");
                TickOutcome::ProgressFailed { assignment_id }
            }
        }
    }

    /// Start ticking every `period`, beginning immediately, until `cancel`
    /// fires.
    pub fn spawn(self, period: Duration, cancel: CancellationToken) -> PollerHandle {
        let token = cancel.clone();
        let trigger = self.trigger();
        let join = tokio::spawn(async move { self.run(period, token).await });
        PollerHandle { cancel, join, trigger }
    }

    async fn run(self, period: Duration, cancel: CancellationToken) {
        tracing::info!(period_ms = period.as_millis() as u64, "poller started");
        let requests = self.trigger.notify.clone();
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
                _ = requests.notified() => {
                    tracing::debug!("out-of-band tick");
                }
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                outcome = self.tick() => {
                    tracing::debug!(?outcome, "tick finished");
                }
            }
        }
        tracing::info!("poller stopped");
    }
}

/// Owns the running poller task; dropping it without `shutdown` leaves the
/// task running until its token is cancelled.
pub struct PollerHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
    trigger: TickTrigger,
}

impl PollerHandle {
    pub fn trigger(&self) -> TickTrigger {
        self.trigger.clone()
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.join.await {
            tracing::error!(error = %e, "poller task failed");
        }
    }
}
