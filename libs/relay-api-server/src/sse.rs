use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event as SseEvent, Sse};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};

use relay_api::StreamFrame;
use relay_engine::{DeliveryError, FrameSink, WriteFailure};

use crate::AppState;
use crate::error::ApiError;
use crate::http::DeliveryParams;

// ═══════════════════════════════════════════════════════════════
//  SSE: GET /api/topics/{name}/stream?subscription=&cursor=
// ═══════════════════════════════════════════════════════════════

/// Attach a stream and pump it into an SSE body. The session runs on its
/// own task and ends as soon as the body is dropped.
pub(crate) async fn handle_stream(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<DeliveryParams>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let cursor = match params.cursor {
        Some(cursor) => Some(cursor),
        None => last_event_id(&headers)?,
    };
    let session = state
        .dispatcher
        .open_stream(&name, params.subscription_id(), cursor)?;

    let (tx, rx) = mpsc::channel::<SseEvent>(1);
    let id = session.subscription();
    tokio::spawn(async move {
        let mut sink = SseSink(tx);
        match session.run(&mut sink).await {
            Ok(()) => tracing::debug!(topic = %name, subscription = %id, "stream closed"),
            Err(DeliveryError::WriteFailure { .. }) => {
                tracing::debug!(topic = %name, subscription = %id, "stream client went away")
            }
            Err(e) => tracing::info!(topic = %name, subscription = %id, error = %e, "stream ended"),
        }
    });

    let stream = ReceiverStream::new(rx).map(Ok);
    Ok(Sse::new(stream))
}

fn last_event_id(headers: &HeaderMap) -> Result<Option<u64>, ApiError> {
    let Some(value) = headers.get("last-event-id") else {
        return Ok(None);
    };
    let text = value
        .to_str()
        .map_err(|_| ApiError::BadRequest("Last-Event-ID is not ASCII".into()))?;
    text.trim()
        .parse::<u64>()
        .map(Some)
        .map_err(|_| ApiError::BadRequest(format!("Last-Event-ID '{text}' is not a sequence")))
}

/// Frames rendered into the SSE body.
struct SseSink(mpsc::Sender<SseEvent>);

impl FrameSink for SseSink {
    fn write(&mut self, frame: StreamFrame) -> Pin<Box<dyn Future<Output = Result<(), WriteFailure>> + Send + '_>> {
        Box::pin(async move {
            let event = to_sse(frame)?;
            self.0
                .send(event)
                .await
                .map_err(|_| WriteFailure::new("connection closed"))
        })
    }

    fn closed(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(self.0.closed())
    }
}

/// One frame per SSE message. An event that cannot be serialized ends
/// the stream, so the client reconnects instead of missing it.
fn to_sse(frame: StreamFrame) -> Result<SseEvent, WriteFailure> {
    let sse = match frame {
        StreamFrame::Open { subscription, cursor, resync } => {
            let data = serde_json::json!({
                "subscription": subscription,
                "cursor": cursor,
                "resync": resync,
            });
            SseEvent::default().event("open").data(data.to_string())
        }
        StreamFrame::Event(event) => {
            let data = serde_json::to_string(&event).map_err(|e| {
                tracing::error!(topic = %event.topic, sequence = event.sequence, error = %e, "event serialization failed");
                WriteFailure::new(format!("event {} is not serializable: {e}", event.sequence))
            })?;
            SseEvent::default().id(event.sequence.to_string()).event("event").data(data)
        }
        StreamFrame::KeepAlive => SseEvent::default().comment("keep-alive"),
    };
    Ok(sse)
}
