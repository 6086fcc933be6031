use async_trait::async_trait;
use serde_json::Value;
use sqlx::{query_as, query_scalar};
use std::{future::Future, time::Duration};

use crate::{
    db::Db,
    error::StoreError,
    models::{ActiveWindow, Assignment, ProgressRow},
};

/// Result marker the quiz app writes into `Student_try."Quiz_result"` for a
/// correct answer.
pub const CORRECT_MARK: &str = "✅";

/// Read-only access to the quiz database.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Assignments updated inside `window`, most recent first. The window is
    /// measured against the store's own clock.
    async fn active_assignments(&self, window: ActiveWindow) -> Result<Vec<Assignment>, StoreError>;

    /// Rows of the `v_assignment_student_try_info` aggregation view.
    async fn progress_from_view(&self, assignment_id: i64) -> Result<Vec<ProgressRow>, StoreError>;

    /// Students who started the assignment; progress counters are all zero.
    async fn progress_from_join(&self, assignment_id: i64) -> Result<Vec<ProgressRow>, StoreError>;

    /// Per-student aggregates computed from individual question attempts.
    async fn progress_from_aggregation(
        &self,
        assignment_id: i64,
    ) -> Result<Vec<ProgressRow>, StoreError>;
}

pub struct PgStore {
    db: Db,
    query_timeout: Duration,
}

impl PgStore {
    pub fn new(db: Db, query_timeout: Duration) -> Self {
        Self { db, query_timeout }
    }

    async fn timed<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        tokio::time::timeout(self.query_timeout, fut)
            .await
            .map_err(|_| StoreError::Timeout(self.query_timeout))?
            .map_err(StoreError::from)
    }
}

#[async_trait]
impl ProgressStore for PgStore {
    async fn active_assignments(&self, window: ActiveWindow) -> Result<Vec<Assignment>, StoreError> {
        self.timed(
            query_as::<_, Assignment>(
                r#"
                SELECT
                  id::bigint AS id,
                  description::text AS description,
                  "Assignmentname"::text AS assignment_name,
                  type::text AS kind,
                  noofquestion::bigint AS question_count,
                  "update"::timestamptz AS updated_at
                FROM assignment
                WHERE "update" > NOW() - make_interval(hours => $1)
                ORDER BY "update" DESC
                "#,
            )
            .bind(i32::try_from(window.as_hours()).unwrap_or(i32::MAX))
            .fetch_all(&self.db),
        )
        .await
    }

    async fn progress_from_view(&self, assignment_id: i64) -> Result<Vec<ProgressRow>, StoreError> {
        // to_jsonb keeps whichever columns the view actually exposes, so the
        // primary/secondary name substitution happens in ProgressRow.
        let raw: Vec<Value> = self
            .timed(
                query_scalar::<_, Value>(
                    r#"
                    SELECT to_jsonb(v)
                    FROM v_assignment_student_try_info v
                    WHERE v."assignmentID" = $1
                    "#,
                )
                .bind(assignment_id)
                .fetch_all(&self.db),
            )
            .await?;

        let total = raw.len();
        let rows: Vec<ProgressRow> = raw.iter().filter_map(ProgressRow::from_view_row).collect();
        if rows.len() < total {
            tracing::warn!(
                assignment_id,
                dropped = total - rows.len(),
                "view rows without assignment or student try id"
            );
        }
        Ok(rows)
    }

    async fn progress_from_join(&self, assignment_id: i64) -> Result<Vec<ProgressRow>, StoreError> {
        self.timed(
            query_as::<_, ProgressRow>(
                r#"
                SELECT
                  a.id::bigint AS assignment_id,
                  a.description::text AS assignment_name,
                  ast.id::bigint AS student_try_id,
                  u."Full_Name"::text AS student_name,
                  0::bigint AS questions_done,
                  COALESCE(a.noofquestion, 0)::bigint AS total_questions,
                  0::bigint AS correct_answers,
                  0::float8 AS total_score,
                  0::bigint AS current_question_index
                FROM assignment a
                JOIN assignment_student_try ast ON a.id = ast."assignmentID"
                LEFT JOIN "Users" u ON ast.hocsinh_id = u."ID"
                WHERE a.id = $1
                GROUP BY a.id, a.description, ast.id, u."Full_Name", a.noofquestion
                ORDER BY ast.id
                "#,
            )
            .bind(assignment_id)
            .fetch_all(&self.db),
        )
        .await
    }

    async fn progress_from_aggregation(
        &self,
        assignment_id: i64,
    ) -> Result<Vec<ProgressRow>, StoreError> {
        self.timed(
            query_as::<_, ProgressRow>(
                r#"
                SELECT
                  a.id::bigint AS assignment_id,
                  a.description::text AS assignment_name,
                  ast.id::bigint AS student_try_id,
                  u."Full_Name"::text AS student_name,
                  COUNT(st."ID")::bigint AS questions_done,
                  COALESCE(a.noofquestion, 0)::bigint AS total_questions,
                  COALESCE(SUM(CASE WHEN st."Quiz_result" = $2 THEN 1 ELSE 0 END), 0)::bigint
                    AS correct_answers,
                  COALESCE(SUM(COALESCE(st.score, 0)), 0)::float8 AS total_score,
                  COALESCE(MAX(COALESCE(st.currentindex, 0)), 0)::bigint AS current_question_index
                FROM assignment a
                JOIN assignment_student_try ast ON a.id = ast."assignmentID"
                LEFT JOIN "Student_try" st ON ast.id = st.assignment_student_try_id
                LEFT JOIN "Users" u ON ast.hocsinh_id = u."ID"
                WHERE a.id = $1
                GROUP BY a.id, a.description, ast.id, u."Full_Name", a.noofquestion
                ORDER BY total_score DESC
                "#,
            )
            .bind(assignment_id)
            .bind(CORRECT_MARK)
            .fetch_all(&self.db),
        )
        .await
    }
}
