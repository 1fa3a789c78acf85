//! Server-Sent Events endpoint.
//!
//! `GET /connections/stream` — push-based change feed. Subscribes to the
//! same notification bus that drives session lifecycle, so dashboards see
//! every create/delete/attach/resize as it happens.
//!
//! Frame layout: a `: connected` comment on open, then a synthetic
//! `state`-reason summary, then one `event: connections` frame per
//! publication with `id:` set to the summary version. A `: hb` comment goes
//! out every heartbeat interval. Slow consumers lag on the broadcast channel
//! and simply skip missed summaries.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use futures::StreamExt;

use crate::notify::Summary;
use crate::AppState;

fn summary_event(summary: &Summary) -> Event {
    let data = serde_json::to_string(summary).unwrap_or_default();
    Event::default()
        .event("connections")
        .id(summary.version.to_string())
        .data(data)
}

/// `GET /connections/stream` — SSE event stream.
pub async fn stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.manager.subscribe();
    let initial = state.manager.current_summary().await;

    let opening = futures::stream::iter(vec![
        Ok(Event::default().comment("connected")),
        Ok(summary_event(&initial)),
    ]);

    let updates = futures::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(summary) => return Some((Ok(summary_event(&summary)), rx)),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                    // Channel overflow — skip missed summaries, loop again
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    let heartbeat = Duration::from_millis(state.config.server.sse_heartbeat_ms);
    Sse::new(opening.chain(updates))
        .keep_alive(KeepAlive::new().interval(heartbeat).text("hb"))
}
