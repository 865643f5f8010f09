use crate::server::state::AppState;
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use std::time::Duration;
use tokio::time::Instant;

#[tracing::instrument(level = "debug", skip_all)]
pub async fn metrics(State(state): State<AppState>) -> String {
    let should_refresh = {
        if let Ok(mut last_collection) = state.last_collection.try_lock()
            && last_collection.elapsed() > Duration::from_secs(1)
        {
            *last_collection = Instant::now();
            true
        } else {
            false
        }
    };

    if should_refresh {
        refresh_measurements(&state).await;
    }

    encode_response(&state)
}

pub async fn health_check() -> StatusCode {
    StatusCode::OK
}

#[tracing::instrument(level = "debug", skip_all)]
pub async fn status(
    State(state): State<AppState>,
) -> Json<crate::governor::control_loop::ControlState> {
    Json(state.governor_state.read().await.clone())
}

#[tracing::instrument(level = "trace", skip_all)]
async fn refresh_measurements(state: &AppState) {
    let mut futures = FuturesUnordered::new();
    for collector in state.collectors.iter() {
        futures.push(collector.collect());
    }

    while let Some(result) = futures.next().await {
        if let Err(error) = result {
            tracing::error!(?error, "Metrics collector failed");
        }
    }
}

#[tracing::instrument(level = "trace", skip_all)]
fn encode_response(state: &AppState) -> String {
    let metric_families = state.registry.gather();
    let encoder = prometheus::TextEncoder::new();

    encoder.encode_to_string(&metric_families).unwrap()
}
