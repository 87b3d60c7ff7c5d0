//! Server-Sent Events over the event bus

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::events::EventBus;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Stream every `IngestEvent` (optionally only those of one batch) with a
/// heartbeat comment every 15 seconds
///
/// The first message is a `ConnectionStatus` event so clients can show a
/// connected indicator before any job runs. A client that falls behind the
/// bus capacity skips the missed events and keeps streaming.
pub fn event_sse_stream(
    bus: &EventBus,
    service_name: &'static str,
    batch_filter: Option<Uuid>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!(service = service_name, batch = ?batch_filter, "SSE client connected");

    let mut rx = bus.subscribe();

    let stream = async_stream::stream! {
        yield Ok(Event::default().event("ConnectionStatus").data("connected"));

        loop {
            tokio::select! {
                _ = tokio::time::sleep(HEARTBEAT_INTERVAL) => {
                    debug!("SSE: Sending heartbeat");
                    yield Ok(Event::default().comment("heartbeat"));
                }
                received = rx.recv() => {
                    let event = match received {
                        Ok(event) => event,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(service = service_name, skipped, "SSE client lagging, events dropped");
                            continue;
                        }
                        Err(RecvError::Closed) => break,
                    };

                    if batch_filter.is_some_and(|id| event.batch_id() != id) {
                        continue;
                    }

                    match serde_json::to_string(&event) {
                        Ok(json) => yield Ok(Event::default().event(event.event_type()).data(json)),
                        Err(e) => warn!("SSE: Failed to serialize {}: {}", event.event_type(), e),
                    }
                }
            }
        }

        info!(service = service_name, "SSE stream closed");
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(HEARTBEAT_INTERVAL)
            .text("heartbeat"),
    )
}
