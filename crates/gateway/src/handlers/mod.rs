//! Request handlers

pub mod deep_think;
pub mod health;
pub mod overview;
pub mod query;
pub mod snapshot;

use axum::response::sse::Event;
use axum::response::{IntoResponse, Sse};
use biograph_context::SseEvent;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::convert::Infallible;

/// Wrap a service event stream as an SSE response. Each event becomes the
/// wire sequence `event: NAME\ndata: JSON\n\n`.
pub fn sse_response(stream: BoxStream<'static, SseEvent>) -> impl IntoResponse {
    let events = stream.map(|e| Ok::<Event, Infallible>(Event::default().event(e.event).data(e.data.to_string())));
    Sse::new(events)
}
