use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::{
    error::StoreError,
    models::{ActiveWindow, Assignment, ProgressRow},
    resolver::Strategy,
    store::ProgressStore,
};

#[derive(Default)]
struct Inner {
    assignments: Vec<Assignment>,
    rows: HashMap<(Strategy, i64), Vec<ProgressRow>>,
    failing: HashSet<Strategy>,
    fail_active: bool,
    calls: Vec<Strategy>,
}

/// In-memory `ProgressStore` with canned results per strategy and switchable
/// failures. Used by tests and local demos without a database.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert_assignment(&self, assignment: Assignment) {
        self.lock().assignments.push(assignment);
    }

    pub fn set_rows(&self, strategy: Strategy, assignment_id: i64, rows: Vec<ProgressRow>) {
        self.lock().rows.insert((strategy, assignment_id), rows);
    }

    pub fn fail(&self, strategy: Strategy) {
        self.lock().failing.insert(strategy);
    }

    pub fn recover(&self, strategy: Strategy) {
        self.lock().failing.remove(&strategy);
    }

    pub fn set_active_failing(&self, failing: bool) {
        self.lock().fail_active = failing;
    }

    /// Strategies queried so far, in call order.
    pub fn calls(&self) -> Vec<Strategy> {
        self.lock().calls.clone()
    }

    fn progress(&self, strategy: Strategy, assignment_id: i64) -> Result<Vec<ProgressRow>, StoreError> {
        let mut inner = self.lock();
        inner.calls.push(strategy);
        if inner.failing.contains(&strategy) {
            return Err(StoreError::Query(sqlx::Error::PoolTimedOut));
        }
        Ok(inner.rows.get(&(strategy, assignment_id)).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl ProgressStore for InMemoryStore {
    async fn active_assignments(&self, window: ActiveWindow) -> Result<Vec<Assignment>, StoreError> {
        let since = window.cutoff(Utc::now());
        let inner = self.lock();
        if inner.fail_active {
            return Err(StoreError::Query(sqlx::Error::PoolTimedOut));
        }
        let mut active: Vec<Assignment> = inner
            .assignments
            .iter()
            .filter(|a| a.updated_at > since)
            .cloned()
            .collect();
        active.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(active)
    }

    async fn progress_from_view(&self, assignment_id: i64) -> Result<Vec<ProgressRow>, StoreError> {
        self.progress(Strategy::View, assignment_id)
    }

    async fn progress_from_join(&self, assignment_id: i64) -> Result<Vec<ProgressRow>, StoreError> {
        self.progress(Strategy::DirectJoin, assignment_id)
    }

    async fn progress_from_aggregation(
        &self,
        assignment_id: i64,
    ) -> Result<Vec<ProgressRow>, StoreError> {
        self.progress(Strategy::FullAggregation, assignment_id)
    }
}
