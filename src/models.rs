use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An assignment as the dashboard sees it. Field names on the wire follow the
/// `assignment` table so the browser client can read them unchanged.
#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Assignment {
    pub id: i64,
    pub description: Option<String>,
    #[serde(rename = "Assignmentname")]
    pub assignment_name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    #[serde(rename = "noofquestion")]
    pub question_count: Option<i64>,
    #[serde(rename = "update")]
    pub updated_at: DateTime<Utc>,
}

/// One student's progress on one assignment.
#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProgressRow {
    pub assignment_id: i64,
    pub assignment_name: Option<String>,
    pub student_try_id: i64,
    pub student_name: Option<String>,
    pub questions_done: i64,
    pub total_questions: i64,
    pub correct_answers: i64,
    pub total_score: f64,
    pub current_question_index: i64,
}

impl ProgressRow {
    /// Project a row of `v_assignment_student_try_info` (as a JSON object)
    /// onto the progress shape. Returns `None` when the row lacks either id.
    pub fn from_view_row(row: &Value) -> Option<Self> {
        Some(Self {
            assignment_id: int_field(row, "assignmentID")?,
            assignment_name: text_field(row, "assignment_name")
                .or_else(|| text_field(row, "description")),
            student_try_id: int_field(row, "id")?,
            student_name: text_field(row, "student_name")
                .or_else(|| text_field(row, "Full_Name")),
            questions_done: int_field(row, "questions_done").unwrap_or(0),
            total_questions: int_field(row, "noofquestion").unwrap_or(0),
            correct_answers: int_field(row, "correct_answers").unwrap_or(0),
            total_score: float_field(row, "total_score").unwrap_or(0.0),
            current_question_index: int_field(row, "currentindex").unwrap_or(0),
        })
    }
}

fn text_field(row: &Value, key: &str) -> Option<String> {
    match row.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn float_field(row: &Value, key: &str) -> Option<f64> {
    match row.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// Views sometimes cast ids to text; accept numeric strings too.
fn int_field(row: &Value, key: &str) -> Option<i64> {
    match row.get(key)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Trailing window that decides whether an assignment is "active".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveWindow(Duration);

impl ActiveWindow {
    pub const DEFAULT_HOURS: i64 = 3;

    pub fn hours(hours: i64) -> Self {
        Self(Duration::hours(hours))
    }

    pub fn as_hours(&self) -> i64 {
        self.0.num_hours()
    }

    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.0
    }

    pub fn contains(&self, updated_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        updated_at > self.cutoff(now)
    }
}

impl Default for ActiveWindow {
    fn default() -> Self {
        Self::hours(Self::DEFAULT_HOURS)
    }
}
