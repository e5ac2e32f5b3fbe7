//! Bounded body capture.
//!
//! A body is read to the end so the full size is known, but at most `cap`
//! bytes are retained. The retained bytes become both the trace snapshot
//! and the replacement body that is forwarded.

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue};
use bytes::{Bytes, BytesMut};
use http_body_util::BodyExt;

use crate::trace::entry::{HeaderSnapshot, MessageSnapshot};

/// Capture cap for request and response bodies (1 MiB).
pub const MAX_CAPTURE_BYTES: usize = 1 << 20;

/// Result of reading a body under the cap.
#[derive(Debug, Clone)]
pub struct CapturedBody {
    /// Retained bytes, at most the cap.
    pub bytes: Bytes,
    /// Number of bytes the original body carried.
    pub original_len: u64,
    /// True iff `original_len` exceeded the cap.
    pub truncated: bool,
    /// Set when the stream failed before its end.
    pub read_error: Option<String>,
}

impl CapturedBody {
    /// Build the message snapshot for these bytes and headers.
    pub fn snapshot(&self, headers: &HeaderMap, cap: usize) -> MessageSnapshot {
        MessageSnapshot {
            headers: header_snapshot(headers),
            body: body_text(&self.bytes, cap),
            truncated: self.truncated,
        }
    }

    /// Fresh, replayable body over the retained bytes.
    pub fn replay(&self) -> Body {
        Body::from(self.bytes.clone())
    }
}

/// Read `body` to the end, keeping at most `cap` bytes.
///
/// A stream error ends the capture early; whatever was read is kept and
/// the error text is reported in `read_error`.
pub async fn capture_body(mut body: Body, cap: usize) -> CapturedBody {
    let mut retained = BytesMut::new();
    let mut original_len: u64 = 0;
    let mut read_error = None;

    while let Some(frame) = body.frame().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                read_error = Some(e.to_string());
                break;
            }
        };
        let Ok(data) = frame.into_data() else {
            continue;
        };
        original_len += data.len() as u64;
        let room = cap.saturating_sub(retained.len());
        if room > 0 {
            retained.extend_from_slice(&data[..data.len().min(room)]);
        }
    }

    CapturedBody {
        bytes: retained.freeze(),
        original_len,
        truncated: original_len > cap as u64,
        read_error,
    }
}

/// Point `Content-Length` at a replayed body that differs from the original.
pub fn set_replayed_length(headers: &mut HeaderMap, len: usize) {
    headers.remove(header::TRANSFER_ENCODING);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
}

/// Copy headers into the snapshot mapping, keeping every value.
pub fn header_snapshot(headers: &HeaderMap) -> HeaderSnapshot {
    let mut snapshot = HeaderSnapshot::new();
    for (name, value) in headers {
        snapshot
            .entry(name.as_str().to_string())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    snapshot
}

/// Decode body bytes as text, never longer than `cap` bytes.
///
/// Invalid UTF-8 (including a sequence cut by truncation) is replaced,
/// which can grow the text, so the result is cut back on a char boundary.
pub fn body_text(bytes: &[u8], cap: usize) -> String {
    let mut text = String::from_utf8_lossy(bytes).into_owned();
    if text.len() > cap {
        let mut end = cap;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderName;
    use futures_util::stream;

    fn chunked(chunks: Vec<&'static [u8]>) -> Body {
        let stream = stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok::<_, std::io::Error>(Bytes::from_static(c))),
        );
        Body::from_stream(stream)
    }

    #[tokio::test]
    async fn small_body_kept_whole() {
        let captured = capture_body(Body::from("<a/>"), 16).await;
        assert_eq!(&captured.bytes[..], b"<a/>");
        assert_eq!(captured.original_len, 4);
        assert!(!captured.truncated);
    }

    #[tokio::test]
    async fn body_at_cap_is_not_truncated() {
        let captured = capture_body(Body::from(vec![b'x'; 8]), 8).await;
        assert_eq!(captured.bytes.len(), 8);
        assert!(!captured.truncated);
    }

    #[tokio::test]
    async fn oversized_body_truncated_across_chunks() {
        let body = chunked(vec![b"abcd", b"efgh", b"ijkl"]);
        let captured = capture_body(body, 6).await;
        assert_eq!(&captured.bytes[..], b"abcdef");
        assert_eq!(captured.original_len, 12);
        assert!(captured.truncated);

        let replayed = captured.replay().collect().await.unwrap().to_bytes();
        assert_eq!(&replayed[..], b"abcdef");
    }

    #[tokio::test]
    async fn full_size_cap_truncation() {
        let len = MAX_CAPTURE_BYTES + 10;
        let captured = capture_body(Body::from(vec![b'a'; len]), MAX_CAPTURE_BYTES).await;
        assert!(captured.truncated);
        assert_eq!(captured.bytes.len(), MAX_CAPTURE_BYTES);
        assert_eq!(captured.original_len, len as u64);
        let snapshot = captured.snapshot(&HeaderMap::new(), MAX_CAPTURE_BYTES);
        assert_eq!(snapshot.body.len(), MAX_CAPTURE_BYTES);
        assert!(snapshot.truncated);
    }

    #[tokio::test]
    async fn stream_error_keeps_partial_bytes() {
        let stream = stream::iter(vec![
            Ok(Bytes::from_static(b"part")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ]);
        let captured = capture_body(Body::from_stream(stream), 64).await;
        assert_eq!(&captured.bytes[..], b"part");
        assert!(captured.read_error.is_some());
    }

    #[test]
    fn body_text_respects_cap_on_invalid_utf8() {
        let text = body_text(&[0xff, 0xff, 0xff, 0xff], 4);
        assert!(text.len() <= 4);
        // "é" is two bytes; cutting after the first leaves a broken sequence.
        let text = body_text(&"aé".as_bytes()[..2], 2);
        assert!(text.len() <= 2);
    }

    #[test]
    fn header_snapshot_keeps_all_values() {
        let mut headers = HeaderMap::new();
        headers.append("x-multi", HeaderValue::from_static("one"));
        headers.append("x-multi", HeaderValue::from_static("two"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/xml"));
        headers.insert(
            HeaderName::from_bytes(b"SOAPAction").unwrap(),
            HeaderValue::from_static("\"Go\""),
        );
        let snapshot = header_snapshot(&headers);
        assert_eq!(snapshot["x-multi"], vec!["one", "two"]);
        assert_eq!(snapshot["content-type"], vec!["text/xml"]);
        // Keys come out lowercase whatever the wire casing was.
        assert_eq!(snapshot["soapaction"], vec!["\"Go\""]);
        assert!(!snapshot.contains_key("SOAPAction"));
    }

    #[test]
    fn replayed_length_replaces_chunked_framing() {
        let mut headers = HeaderMap::new();
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        set_replayed_length(&mut headers, 42);
        assert!(headers.get(header::TRANSFER_ENCODING).is_none());
        assert_eq!(headers[header::CONTENT_LENGTH], "42");
    }
}
