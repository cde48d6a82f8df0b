//! Server-sent events decoding.

use crate::error::ClientError;
use crate::transport::ByteStream;
use futures_util::stream::{self, BoxStream, StreamExt};

/// One dispatched server-sent event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    /// `event:` field; `None` means the default `message` type.
    pub event: Option<String>,
    /// `data:` lines joined with `\n`.
    pub data: String,
    pub id: Option<String>,
    pub retry_ms: Option<u64>,
}

/// Incremental `text/event-stream` decoder.
///
/// Accepts arbitrary byte chunks (a chunk may end mid-line or mid-character)
/// and yields each event once its terminating blank line arrives.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    pending: SseEvent,
    has_data: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|&byte| byte == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(event) = self.line(&line) {
                events.push(event);
            }
        }
        events
    }

    fn line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => {
                if self.has_data {
                    self.pending.data.push('\n');
                }
                self.pending.data.push_str(value);
                self.has_data = true;
            }
            "event" => self.pending.event = Some(value.to_string()),
            "id" => self.pending.id = Some(value.to_string()),
            "retry" => self.pending.retry_ms = value.parse().ok(),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = std::mem::take(&mut self.pending);
        let had_data = std::mem::replace(&mut self.has_data, false);
        had_data.then_some(event)
    }
}

/// Decode a byte stream into server-sent events.
pub fn events(body: ByteStream) -> BoxStream<'static, Result<SseEvent, ClientError>> {
    body.scan(SseDecoder::new(), |decoder, chunk| {
        let batch: Vec<Result<SseEvent, ClientError>> = match chunk {
            Ok(bytes) => decoder.push(&bytes).into_iter().map(Ok).collect(),
            Err(err) => vec![Err(err)],
        };
        futures_util::future::ready(Some(stream::iter(batch)))
    })
    .flatten()
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_event() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"event: message\ndata: {\"type\":\"round\",\"round\":2}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("message"));
        assert_eq!(events[0].data, r#"{"type":"round","round":2}"#);
    }

    #[test]
    fn test_split_chunks_and_crlf() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"id: 7\r\nda").is_empty());
        assert!(decoder.push(b"ta: a\r\ndata: b\r\n").is_empty());
        let events = decoder.push(b"\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "a\nb");
        assert_eq!(events[0].id.as_deref(), Some("7"));
    }

    #[test]
    fn test_comments_and_empty_events_are_skipped() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b": keepalive\n\nretry: 3000\n\ndata: x\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "x");
        assert_eq!(events[0].retry_ms, None);
    }

    #[test]
    fn test_multibyte_character_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        let text = "data: caf\u{e9}\n\n".as_bytes();
        let (first, second) = text.split_at(10);
        assert!(decoder.push(first).is_empty());
        let events = decoder.push(second);
        assert_eq!(events[0].data, "caf\u{e9}");
    }

    #[tokio::test]
    async fn test_events_stream() {
        let chunks: Vec<Result<Vec<u8>, ClientError>> = vec![
            Ok(b"data: one\n\ndata: t".to_vec()),
            Ok(b"wo\n\n".to_vec()),
            Err(ClientError::Transport("reset".into())),
        ];
        let decoded: Vec<_> = events(stream::iter(chunks).boxed()).collect().await;
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[0].as_ref().unwrap().data, "one");
        assert_eq!(decoded[1].as_ref().unwrap().data, "two");
        assert!(decoded[2].is_err());
    }
}
