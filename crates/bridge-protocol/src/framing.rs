//! Content-Length framing for JSON-RPC over byte streams.
//!
//! Each message is `Content-Length: N\r\n\r\n` followed by exactly N bytes
//! of JSON. Used by the stdio adapter mode; TCP connections use
//! newline-delimited JSON instead and never touch this codec.

use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Maximum accepted frame body. Anything larger is treated as a protocol
/// violation rather than an allocation request.
const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("missing Content-Length header")]
    MissingContentLength,

    #[error("invalid Content-Length: {0}")]
    InvalidContentLength(String),

    #[error("frame too large: {0} bytes")]
    TooLarge(usize),

    #[error("invalid JSON in frame: {0}")]
    Json(#[from] serde_json::Error),
}

/// Read one framed JSON value. Returns `Ok(None)` on clean EOF before any
/// header byte.
pub async fn read_frame<R>(reader: &mut BufReader<R>) -> Result<Option<Value>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut content_length: Option<usize> = None;
    let mut saw_header = false;

    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            if saw_header {
                return Err(FrameError::MissingContentLength);
            }
            return Ok(None);
        }
        saw_header = true;

        if line == "\r\n" || line == "\n" {
            break;
        }

        if let Some(rest) = line
            .to_ascii_lowercase()
            .strip_prefix("content-length:")
            .map(str::to_string)
        {
            let value = rest.trim();
            let parsed = value
                .parse::<usize>()
                .map_err(|_| FrameError::InvalidContentLength(value.to_string()))?;
            content_length = Some(parsed);
        }
        // Other headers (e.g. Content-Type) are tolerated and ignored.
    }

    let len = content_length.ok_or(FrameError::MissingContentLength)?;
    if len > MAX_FRAME_BYTES {
        return Err(FrameError::TooLarge(len));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;

    Ok(Some(serde_json::from_slice(&body)?))
}

/// Write one framed JSON value and flush.
pub async fn write_frame<W>(writer: &mut W, value: &Value) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(value)?;
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}
