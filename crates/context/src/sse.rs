//! Server-sent event framing
//!
//! The streamers produce a sequence of named events; the gateway writes them
//! to the socket. Framing is the ASCII sequence
//! `event: NAME\ndata: JSON\n\n`. Consumers treat unknown events as
//! ignorable, so new event names can be added without breaking clients.

/// One server-sent event
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub event: String,
    pub data: serde_json::Value,
}

impl SseEvent {
    pub fn new(event: &str, data: serde_json::Value) -> Self {
        Self { event: event.to_string(), data }
    }

    pub fn start(data: serde_json::Value) -> Self {
        Self::new("start", data)
    }

    pub fn context(data: serde_json::Value) -> Self {
        Self::new("context", data)
    }

    pub fn delta(text: &str) -> Self {
        Self::new("delta", serde_json::json!({ "text": text }))
    }

    pub fn done(data: serde_json::Value) -> Self {
        Self::new("done", data)
    }

    pub fn error(message: &str, partial_text: &str, detail: &str) -> Self {
        Self::new(
            "error",
            serde_json::json!({
                "message": message,
                "partial_text": partial_text,
                "detail": detail,
            }),
        )
    }

    /// Wire framing for one event
    pub fn frame(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.event, self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_frame_format() {
        let event = SseEvent::delta("Hello");
        assert_eq!(event.frame(), "event: delta\ndata: {\"text\":\"Hello\"}\n\n");
    }

    #[test]
    fn test_error_shape() {
        let event = SseEvent::error("failed", "partial", "boom");
        assert_eq!(event.event, "error");
        assert_eq!(event.data, json!({
            "message": "failed",
            "partial_text": "partial",
            "detail": "boom",
        }));
    }
}
