//! DAP transport layer: Content-Length based message framing.
//!
//! The codec knows nothing about message semantics: it turns a byte stream
//! into payload buffers and back.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::FrameError;

/// Default upper bound for a single payload (16 MiB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Upper bound for a single header line, terminator included.
pub const MAX_HEADER_LINE_BYTES: usize = 8 * 1024;

/// Encode a payload into a DAP wire-format frame with Content-Length header.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let header = format!("Content-Length: {}\r\n\r\n", payload.len());
    let mut buf = Vec::with_capacity(header.len() + payload.len());
    buf.extend_from_slice(header.as_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Write one frame to `writer` and flush it.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode_frame(payload)).await?;
    writer.flush().await?;
    Ok(())
}

/// Decode one frame from the front of an in-memory buffer.
///
/// Returns `Ok(None)` when `data` does not yet hold a complete frame,
/// otherwise the payload and the number of bytes consumed.
pub fn decode_frame(data: &[u8], max_frame_bytes: usize) -> Result<Option<(Vec<u8>, usize)>, FrameError> {
    let mut pos = 0;
    let mut content_length = None;

    loop {
        let Some(rel) = data[pos..].iter().position(|&b| b == b'\n') else {
            if data.len() - pos >= MAX_HEADER_LINE_BYTES {
                return Err(header_line_too_long());
            }
            return Ok(None);
        };
        if rel + 1 > MAX_HEADER_LINE_BYTES {
            return Err(header_line_too_long());
        }
        let line = std::str::from_utf8(&data[pos..pos + rel])
            .map_err(|_| FrameError::Framing("header is not valid UTF-8".into()))?;
        pos += rel + 1;

        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            break;
        }
        if let Some(length) = parse_header_line(line)? {
            content_length = Some(length);
        }
    }

    let length = check_length(content_length, max_frame_bytes)?;
    if data.len() - pos < length {
        return Ok(None);
    }
    Ok(Some((data[pos..pos + length].to_vec(), pos + length)))
}

/// Reads frames one at a time from an async byte stream.
///
/// Each call to [`next_frame`](Self::next_frame) yields the next payload;
/// `Ok(None)` marks a clean end of stream. The sequence cannot be rewound:
/// restarting means building a new reader over a reopened stream.
#[derive(Debug)]
pub struct FrameReader<R> {
    reader: BufReader<R>,
    max_frame_bytes: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Create a reader with the default payload limit.
    pub fn new(reader: R) -> Self {
        Self::with_max_frame_bytes(reader, DEFAULT_MAX_FRAME_BYTES)
    }

    /// Create a reader that rejects payloads larger than `max_frame_bytes`.
    pub fn with_max_frame_bytes(reader: R, max_frame_bytes: usize) -> Self {
        Self {
            reader: BufReader::new(reader),
            max_frame_bytes,
        }
    }

    /// The configured payload limit.
    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }

    /// Read the next payload.
    ///
    /// Suspends until a full frame is available or the stream closes.
    pub async fn next_frame(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        let mut content_length = None;
        let mut header_bytes = 0usize;

        loop {
            let mut line = Vec::new();
            let n = (&mut self.reader)
                .take(MAX_HEADER_LINE_BYTES as u64)
                .read_until(b'\n', &mut line)
                .await?;

            if n == 0 {
                if header_bytes == 0 {
                    return Ok(None);
                }
                return Err(FrameError::IncompleteFrame {
                    expected: content_length.unwrap_or(0),
                    received: 0,
                });
            }
            if line.last() != Some(&b'\n') {
                if n >= MAX_HEADER_LINE_BYTES {
                    return Err(header_line_too_long());
                }
                return Err(FrameError::IncompleteFrame {
                    expected: content_length.unwrap_or(0),
                    received: 0,
                });
            }
            header_bytes += n;

            let text = std::str::from_utf8(&line)
                .map_err(|_| FrameError::Framing("header is not valid UTF-8".into()))?;
            let text = text.trim_end_matches(['\r', '\n']);
            if text.is_empty() {
                break;
            }
            if let Some(length) = parse_header_line(text)? {
                content_length = Some(length);
            }
        }

        let length = check_length(content_length, self.max_frame_bytes)?;

        let mut body = vec![0u8; length];
        let mut received = 0;
        while received < length {
            let n = self.reader.read(&mut body[received..]).await?;
            if n == 0 {
                return Err(FrameError::IncompleteFrame {
                    expected: length,
                    received,
                });
            }
            received += n;
        }
        tracing::trace!(bytes = length, "frame received");
        Ok(Some(body))
    }

    /// Recover the underlying stream.
    pub fn into_inner(self) -> R {
        self.reader.into_inner()
    }
}

/// Interpret one header line. Returns the length for `Content-Length` and
/// `None` for any other (ignored) header.
fn parse_header_line(line: &str) -> Result<Option<usize>, FrameError> {
    let (name, value) = line
        .split_once(':')
        .ok_or_else(|| FrameError::Framing(format!("header line without ':': '{line}'")))?;
    if !name.trim().eq_ignore_ascii_case("Content-Length") {
        tracing::debug!(header = name.trim(), "ignoring unknown frame header");
        return Ok(None);
    }
    let value = value.trim();
    value
        .parse::<usize>()
        .map(Some)
        .map_err(|e| FrameError::Framing(format!("invalid Content-Length value '{value}': {e}")))
}

fn check_length(content_length: Option<usize>, max_frame_bytes: usize) -> Result<usize, FrameError> {
    let length = content_length
        .ok_or_else(|| FrameError::Framing("missing Content-Length header".into()))?;
    if length > max_frame_bytes {
        return Err(FrameError::FrameTooLarge {
            length,
            max: max_frame_bytes,
        });
    }
    Ok(length)
}

fn header_line_too_long() -> FrameError {
    FrameError::Framing(format!(
        "header line exceeds {MAX_HEADER_LINE_BYTES} bytes"
    ))
}
