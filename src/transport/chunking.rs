//! Size-based payload chunking.
//!
//! Payloads whose serialized form exceeds the configured limit are split into
//! UTF-8 safe pieces and delivered as `chunked-<event>` events carrying
//! `{ id, index, chunk, final }`, which clients reassemble by `id`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use super::{Transport, TransportError};
use crate::config::ChunkingConfig;
use crate::dispatch::Channels;
use crate::metrics::TransportMetrics;

/// Prefix of the event name used for chunk pieces
pub const CHUNKED_EVENT_PREFIX: &str = "chunked-";

/// One piece of a chunked payload
#[derive(Debug, Clone, Serialize)]
struct ChunkPayload<'a> {
    id: Uuid,
    index: usize,
    chunk: &'a str,
    #[serde(rename = "final")]
    is_final: bool,
}

/// Decorator that splits oversized payloads before handing them to the
/// wrapped transport. Each dispatch is still one logical `trigger` call.
pub struct ChunkingTransport {
    inner: Arc<dyn Transport>,
    config: ChunkingConfig,
}

impl ChunkingTransport {
    pub fn new(inner: Arc<dyn Transport>, config: ChunkingConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl Transport for ChunkingTransport {
    async fn trigger(
        &self,
        channels: &Channels,
        event: &str,
        payload: &serde_json::Value,
        exclude_socket_id: Option<&str>,
    ) -> Result<(), TransportError> {
        if !self.config.enabled {
            return self
                .inner
                .trigger(channels, event, payload, exclude_socket_id)
                .await;
        }

        let serialized = serde_json::to_string(payload)?;
        if serialized.len() <= self.config.limit {
            return self
                .inner
                .trigger(channels, event, payload, exclude_socket_id)
                .await;
        }

        if self.config.limit == 0 {
            return Err(TransportError::InvalidPayload(format!(
                "payload of {} bytes cannot be chunked with a zero limit",
                serialized.len()
            )));
        }

        let pieces = split_utf8(&serialized, self.config.limit);
        let id = Uuid::new_v4();
        let chunked_event = format!("{}{}", CHUNKED_EVENT_PREFIX, event);
        let last = pieces.len() - 1;

        tracing::debug!(
            event = %event,
            size = serialized.len(),
            limit = self.config.limit,
            chunks = pieces.len(),
            chunk_id = %id,
            "Splitting oversized payload"
        );

        for (index, chunk) in pieces.iter().copied().enumerate() {
            let piece = serde_json::to_value(ChunkPayload {
                id,
                index,
                chunk,
                is_final: index == last,
            })?;
            self.inner
                .trigger(channels, &chunked_event, &piece, exclude_socket_id)
                .await?;
        }

        TransportMetrics::record_chunks(pieces.len() as u64);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "chunking"
    }
}

/// Split `s` into pieces of at most `limit` bytes without breaking a
/// character. A character wider than `limit` forms its own piece.
fn split_utf8(s: &str, limit: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;

    while start < s.len() {
        let mut end = (start + limit).min(s.len());
        while end > start && !s.is_char_boundary(end) {
            end -= 1;
        }
        if end == start {
            end = s[start..]
                .char_indices()
                .nth(1)
                .map_or(s.len(), |(i, _)| start + i);
        }
        pieces.push(&s[start..end]);
        start = end;
    }

    if pieces.is_empty() {
        pieces.push(s);
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;
    use tokio_test::assert_ok;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(String, serde_json::Value)>>,
    }

    #[async_trait]
    impl Transport for Recorder {
        async fn trigger(
            &self,
            _channels: &Channels,
            event: &str,
            payload: &serde_json::Value,
            _exclude_socket_id: Option<&str>,
        ) -> Result<(), TransportError> {
            self.calls
                .lock()
                .unwrap()
                .push((event.to_string(), payload.clone()));
            Ok(())
        }

        fn name(&self) -> &'static str {
            "recorder"
        }
    }

    fn chunking(limit: usize, enabled: bool) -> (Arc<Recorder>, ChunkingTransport) {
        let recorder = Arc::new(Recorder::default());
        let transport = ChunkingTransport::new(recorder.clone(), ChunkingConfig { enabled, limit });
        (recorder, transport)
    }

    #[test]
    fn test_split_respects_char_boundaries() {
        let s = "aé€😀b";
        let pieces = split_utf8(s, 3);
        assert_eq!(pieces.concat(), s);
        assert!(pieces.iter().all(|p| !p.is_empty()));
        // the 4-byte emoji cannot fit and forms its own piece
        assert!(pieces.contains(&"😀"));
    }

    #[test]
    fn test_split_exact_multiple() {
        assert_eq!(split_utf8("abcdef", 3), vec!["abc", "def"]);
        assert_eq!(split_utf8("", 3), vec![""]);
    }

    #[tokio::test]
    async fn test_small_payload_passes_through() {
        let (recorder, transport) = chunking(9216, true);
        let payload = json!({"id": 1});

        assert_ok!(transport.trigger(&"orders".into(), "order.created", &payload, None).await);

        let calls = recorder.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], ("order.created".to_string(), payload));
    }

    #[tokio::test]
    async fn test_large_payload_is_chunked() {
        let (recorder, transport) = chunking(16, true);
        let payload = json!({"text": "x".repeat(40)});
        let serialized = serde_json::to_string(&payload).unwrap();

        assert_ok!(transport.trigger(&"orders".into(), "report.ready", &payload, Some("s1")).await);

        let calls = recorder.calls.lock().unwrap();
        assert!(calls.len() > 1);
        assert!(calls.iter().all(|(event, _)| event == "chunked-report.ready"));

        let id = calls[0].1["id"].clone();
        let mut rebuilt = String::new();
        for (index, (_, piece)) in calls.iter().enumerate() {
            assert_eq!(piece["id"], id);
            assert_eq!(piece["index"], index);
            assert_eq!(piece["final"], index == calls.len() - 1);
            rebuilt.push_str(piece["chunk"].as_str().unwrap());
        }
        assert_eq!(rebuilt, serialized);
    }

    #[tokio::test]
    async fn test_zero_limit_is_rejected() {
        let (recorder, transport) = chunking(0, true);

        let result = transport
            .trigger(&"orders".into(), "order.created", &json!({"id": 1}), None)
            .await;

        assert!(matches!(result, Err(TransportError::InvalidPayload(_))));
        assert!(recorder.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_chunking_forwards_unchanged() {
        let (recorder, transport) = chunking(4, false);
        let payload = json!({"text": "a long enough payload"});

        assert_ok!(transport.trigger(&"orders".into(), "order.created", &payload, None).await);

        let calls = recorder.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "order.created");
    }
}
