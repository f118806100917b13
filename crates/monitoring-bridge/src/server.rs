use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use correlation::KeptnEvent;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::task::TaskTracker;

/// ProcessFn processes a single accepted event.
pub type ProcessFn =
    Arc<dyn Fn(KeptnEvent) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

struct App {
    process: ProcessFn,
    tracker: TaskTracker,
    event_timeout: Duration,
}

/// Build the router of the event receiver.
/// Accepted events are processed in the background on tasks of `tracker`,
/// each bounded by `event_timeout`.
pub fn router(process: ProcessFn, tracker: TaskTracker, event_timeout: Duration) -> Router {
    Router::new()
        .route("/", post(handle_event))
        .route("/health", get(handle_health))
        .with_state(Arc::new(App {
            process,
            tracker,
            event_timeout,
        }))
}

async fn handle_event(State(app): State<Arc<App>>, Json(event): Json<KeptnEvent>) -> StatusCode {
    let process = app.process.clone();
    let timeout = app.event_timeout;
    let (id, event_type) = (event.id.clone(), event.event_type.clone());
    tracing::debug!(%id, %event_type, "accepted event");

    app.tracker.spawn(async move {
        match tokio::time::timeout(timeout, process(event)).await {
            Ok(Ok(())) => (),
            Ok(Err(err)) => {
                tracing::error!(?err, %id, %event_type, "failed to process event");
            }
            Err(_elapsed) => {
                tracing::error!(%id, %event_type, ?timeout, "timed out processing event");
            }
        }
    });

    StatusCode::ACCEPTED
}

async fn handle_health() -> &'static str {
    "OK"
}
