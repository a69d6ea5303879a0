//! Realtime notifications via Server-Sent Events.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::{
        IntoResponse,
        sse::{Event as SseEvent, KeepAlive, Sse},
    },
};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::PrincipalContext;

/// GET /stream
///
/// Every message published on the backplane by any worker arrives here as an
/// SSE event named after its topic, with the JSON message as data. The
/// stream ends when the worker stops.
pub async fn stream(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    let Some(receiver) = services.realtime.subscribe() else {
        return errors::json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "shutting_down",
            "realtime stream is closed",
        );
    };

    let username = principal.user().username.clone();
    tracing::debug!(username = %username, "realtime client connected");

    let events = BroadcastStream::new(receiver).filter_map(move |item| match item {
        Ok(message) => {
            let data = serde_json::to_string(&message).ok()?;
            Some(Ok::<_, Infallible>(SseEvent::default().event(message.topic).data(data)))
        }
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::warn!(username = %username, skipped, "realtime client lagging");
            None
        }
    });

    Sse::new(events)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
        .into_response()
}
