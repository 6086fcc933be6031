use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::{Duration as Age, Utc};
use futures::StreamExt;
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use quizpulse::{
    events::{Broadcaster, QUIZ_PROGRESS_UPDATE},
    memory::InMemoryStore,
    models::{ActiveWindow, Assignment, ProgressRow},
    poller::{Poller, PollerHandle},
    resolver::Strategy,
    routes::{router, AppState},
};

fn assignment(id: i64, age: Age) -> Assignment {
    Assignment {
        id,
        description: Some(format!("quiz {id}")),
        assignment_name: Some(format!("Quiz {id}")),
        kind: Some("multiple_choice".into()),
        question_count: Some(10),
        updated_at: Utc::now() - age,
    }
}

fn started(assignment_id: i64, try_id: i64) -> ProgressRow {
    ProgressRow {
        assignment_id,
        assignment_name: Some(format!("quiz {assignment_id}")),
        student_try_id: try_id,
        student_name: Some("Lan".into()),
        questions_done: 0,
        total_questions: 10,
        correct_answers: 0,
        total_score: 0.0,
        current_question_index: 0,
    }
}

struct Harness {
    store: Arc<InMemoryStore>,
    broadcaster: Broadcaster,
    shutdown: CancellationToken,
    poller: PollerHandle,
    app: Router,
}

fn harness(period: Duration) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let broadcaster = Broadcaster::default();
    let shutdown = CancellationToken::new();
    let poller = Poller::new(store.clone(), broadcaster.clone(), ActiveWindow::default())
        .spawn(period, shutdown.clone());
    let state = AppState::new(
        store.clone(),
        ActiveWindow::default(),
        broadcaster.clone(),
        poller.trigger(),
        shutdown.clone(),
    );
    Harness {
        store,
        broadcaster,
        shutdown,
        poller,
        app: router(state),
    }
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

const HOUR: Duration = Duration::from_secs(3600);

#[tokio::test]
async fn health_is_ok() {
    let h = harness(HOUR);
    let response = h
        .app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    h.poller.shutdown().await;
}

#[tokio::test]
async fn active_assignments_exclude_stale_ones() {
    let h = harness(HOUR);
    h.store.insert_assignment(assignment(1, Age::hours(1)));
    h.store.insert_assignment(assignment(2, Age::hours(4)));

    let (status, body) = get(&h.app, "/api/active-assignments").await;
    assert_eq!(status, StatusCode::OK);
    let list = body.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["id"], 1);
    assert_eq!(list[0]["Assignmentname"], "Quiz 1");
    assert_eq!(list[0]["noofquestion"], 10);
    h.poller.shutdown().await;
}

#[tokio::test]
async fn active_assignments_failure_is_a_generic_500() {
    let h = harness(HOUR);
    h.store.set_active_failing(true);

    let (status, body) = get(&h.app, "/api/active-assignments").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, serde_json::json!({ "error": "Database error" }));
    h.poller.shutdown().await;
}

#[tokio::test]
async fn progress_falls_back_to_started_students() {
    let h = harness(HOUR);
    h.store.fail(Strategy::View);
    h.store.set_rows(Strategy::DirectJoin, 5, vec![started(5, 51)]);

    let (status, body) = get(&h.app, "/api/assignment/5/progress").await;
    assert_eq!(status, StatusCode::OK);
    let rows = body.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["student_try_id"], 51);
    assert_eq!(rows[0]["questions_done"], 0);
    assert_eq!(rows[0]["total_score"], 0.0);
    assert_eq!(rows[0]["total_questions"], 10);
    h.poller.shutdown().await;
}

#[tokio::test]
async fn progress_failure_is_a_generic_500() {
    let h = harness(HOUR);
    h.store.fail(Strategy::FullAggregation);

    let (status, body) = get(&h.app, "/api/assignment/5/progress").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Database error");
    h.poller.shutdown().await;
}

#[tokio::test]
async fn non_numeric_assignment_id_is_rejected() {
    let h = harness(HOUR);
    let (status, _) = get(&h.app, "/api/assignment/abc/progress").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    h.poller.shutdown().await;
}

#[tokio::test]
async fn new_subscriber_gets_a_snapshot_without_waiting_for_the_schedule() {
    let h = harness(HOUR);
    h.store.insert_assignment(assignment(9, Age::minutes(3)));
    h.store.set_rows(Strategy::View, 9, vec![started(9, 90)]);
    // the scheduled first tick runs right away; let it go by
    tokio::time::sleep(Duration::from_millis(50)).await;
    let mut earlier = h.broadcaster.subscribe();

    let response = h
        .app
        .clone()
        .oneshot(Request::builder().uri("/api/events").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(h.broadcaster.subscriber_count(), 2);

    let mut body = response.into_body().into_data_stream();
    let mut seen = String::new();
    let found = tokio::time::timeout(Duration::from_secs(2), async {
        while let Some(chunk) = body.next().await {
            seen.push_str(&String::from_utf8_lossy(&chunk.unwrap()));
            if seen.contains("quiz-progress-update") {
                return true;
            }
        }
        false
    })
    .await
    .unwrap_or(false);
    assert!(found, "no progress event in {seen:?}");
    assert!(seen.contains("active-assignments-update"));
    assert!(seen.contains("\"student_try_id\":90"));

    // the extra tick is broadcast, not sent to the new connection only
    let progress = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match earlier.recv().await {
                Some(event) if event.name == QUIZ_PROGRESS_UPDATE => return Some(event),
                Some(_) => continue,
                None => return None,
            }
        }
    })
    .await
    .expect("earlier subscriber sees the requested tick")
    .expect("bus still open");
    assert_eq!(progress.payload["assignment_id"], 9);
    assert_eq!(progress.payload["progress"][0]["student_try_id"], 90);

    drop(body);
    assert_eq!(h.broadcaster.subscriber_count(), 1);
    drop(earlier);
    assert_eq!(h.broadcaster.subscriber_count(), 0);
    h.poller.shutdown().await;
}

#[tokio::test]
async fn shutdown_ends_open_event_streams() {
    let h = harness(HOUR);
    let response = h
        .app
        .clone()
        .oneshot(Request::builder().uri("/api/events").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let mut body = response.into_body().into_data_stream();

    h.shutdown.cancel();
    let ended = tokio::time::timeout(Duration::from_secs(2), async {
        while body.next().await.is_some() {}
    })
    .await;
    assert!(ended.is_ok());
    h.poller.shutdown().await;
}
