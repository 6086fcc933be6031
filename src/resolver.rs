use std::{fmt, sync::Arc};

use crate::{error::StoreError, models::ProgressRow, store::ProgressStore};

/// Ways of computing progress, tried in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    View,
    DirectJoin,
    FullAggregation,
}

impl Strategy {
    pub const ORDER: [Strategy; 3] = [Strategy::View, Strategy::DirectJoin, Strategy::FullAggregation];

    /// Strategies whose failure or empty result falls through to the next.
    /// Full aggregation always answers last and its error goes to the caller.
    pub const FALLBACKS: [Strategy; 2] = [Strategy::View, Strategy::DirectJoin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::View => "view",
            Strategy::DirectJoin => "direct_join",
            Strategy::FullAggregation => "full_aggregation",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub strategy: Strategy,
    pub rows: Vec<ProgressRow>,
}

#[derive(Clone)]
pub struct Resolver {
    store: Arc<dyn ProgressStore>,
}

impl Resolver {
    pub fn new(store: Arc<dyn ProgressStore>) -> Self {
        Self { store }
    }

    pub async fn resolve_progress(&self, assignment_id: i64) -> Result<Vec<ProgressRow>, StoreError> {
        Ok(self.resolve(assignment_id).await?.rows)
    }

    /// Run the strategies in order and keep the first non-empty result.
    /// An empty result and a failed query both fall through, except on the
    /// last strategy whose outcome is returned as is.
    pub async fn resolve(&self, assignment_id: i64) -> Result<Resolution, StoreError> {
        for strategy in Strategy::FALLBACKS {
            match self.run(strategy, assignment_id).await {
                Ok(rows) => {
                    tracing::info!(%strategy, assignment_id, rows = rows.len(), "progress query");
                    if !rows.is_empty() {
                        return Ok(Resolution { strategy, rows });
                    }
                }
                Err(e) => {
                    tracing::warn!(%strategy, assignment_id, error = %e, "progress query failed, falling back");
                }
            }
        }

        let strategy = Strategy::FullAggregation;
        let rows = self.run(strategy, assignment_id).await?;
        tracing::info!(%strategy, assignment_id, rows = rows.len(), "progress query");
        Ok(Resolution { strategy, rows })
    }

    async fn run(&self, strategy: Strategy, assignment_id: i64) -> Result<Vec<ProgressRow>, StoreError> {
        match strategy {
            Strategy::View => self.store.progress_from_view(assignment_id).await,
            Strategy::DirectJoin => self.store.progress_from_join(assignment_id).await,
            Strategy::FullAggregation => {
                let mut rows = self.store.progress_from_aggregation(assignment_id).await?;
                rows.sort_by(|a, b| b.total_score.total_cmp(&a.total_score));
                Ok(rows)
            }
        }
    }
}
