use axum::{
    extract::{Path, State},
    http::Method,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Json, Router,
};
use futures::{future, Stream, StreamExt};
use std::{convert::Infallible, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    error::ApiResult,
    events::Broadcaster,
    models::{ActiveWindow, Assignment, ProgressRow},
    poller::TickTrigger,
    resolver::Resolver,
    store::ProgressStore,
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ProgressStore>,
    pub resolver: Resolver,
    pub window: ActiveWindow,
    pub broadcaster: Broadcaster,
    pub trigger: TickTrigger,
    /// Ends open event streams so graceful shutdown can finish.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        store: Arc<dyn ProgressStore>,
        window: ActiveWindow,
        broadcaster: Broadcaster,
        trigger: TickTrigger,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            resolver: Resolver::new(store.clone()),
            store,
            window,
            broadcaster,
            trigger,
            shutdown,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/active-assignments", get(list_active_assignments))
        .route("/api/assignment/:id/progress", get(assignment_progress))
        // push channel
        .route("/api/events", get(stream_events))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET])
                .allow_headers(Any),
        )
}

async fn list_active_assignments(State(state): State<AppState>) -> ApiResult<Json<Vec<Assignment>>> {
    let assignments = state.store.active_assignments(state.window).await?;
    Ok(Json(assignments))
}

async fn assignment_progress(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Vec<ProgressRow>>> {
    let rows = state.resolver.resolve_progress(id).await?;
    Ok(Json(rows))
}

async fn stream_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.broadcaster.subscribe();
    // fresh snapshot for the new client; it goes to everyone
    state.trigger.request();

    let stream = subscription
        .into_stream()
        .take_until(state.shutdown.cancelled_owned())
        .filter_map(|evt| {
            future::ready(match Event::default().event(evt.name).json_data(&evt.payload) {
                Ok(event) => Some(Ok(event)),
                Err(err) => {
                    tracing::error!(event = evt.name, error = %err, "failed to serialize event payload");
                    None
                }
            })
        });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
