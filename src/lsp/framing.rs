//! Content-Length message framing for JSON-RPC over child-process stdio.
//!
//! This module implements the HTTP-style Content-Length framing used by the
//! Language Server Protocol to delimit discrete messages within the byte
//! stream connecting us to gopls.
//!
//! # Wire Format
//!
//! ```text
//! Content-Length: <length>\r\n
//! \r\n
//! <message-body>
//! ```
//!
//! The header parsing is case-insensitive and handles both CRLF and LF line
//! endings. Headers other than Content-Length (e.g. Content-Type) are
//! accepted and ignored.

use anyhow::{anyhow, Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum message size (100MB) to prevent OOM from a malicious/buggy server.
const MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

/// Read a Content-Length framed message from the stream.
///
/// # Protocol
///
/// 1. Read headers until an empty line (handles both CRLF and LF)
/// 2. Extract Content-Length header (case-insensitive)
/// 3. Read exactly that many bytes for the body
///
/// # Errors
///
/// Returns an error if:
/// - The stream is closed (EOF)
/// - No Content-Length header is found
/// - Content-Length exceeds MAX_MESSAGE_SIZE (100MB)
/// - The body cannot be read completely
/// - The body is not valid UTF-8
pub async fn read_message<R>(reader: &mut R) -> Result<String>
where
    R: AsyncBufRead + Unpin,
{
    // Read headers until blank line
    let mut content_length: Option<usize> = None;

    loop {
        let mut line = String::new();
        let bytes_read = reader
            .read_line(&mut line)
            .await
            .context("Failed to read header line")?;

        // EOF - server exited or closed its stdout
        if bytes_read == 0 {
            return Err(anyhow!("Connection closed by server"));
        }

        // Trim both CRLF and LF line endings
        let trimmed = line.trim();

        // Empty line signals end of headers
        if trimmed.is_empty() {
            break;
        }

        // Parse Content-Length header (case-insensitive per HTTP spec)
        if let Some(colon_pos) = trimmed.find(':') {
            let key = trimmed[..colon_pos].trim();
            let value = trimmed[colon_pos + 1..].trim();

            if key.eq_ignore_ascii_case("Content-Length") {
                content_length = Some(
                    value
                        .parse()
                        .with_context(|| format!("Invalid Content-Length value: {}", value))?,
                );
            }
            // Ignore other headers (e.g., Content-Type)
        }
    }

    // Validate Content-Length was present
    let size = content_length.ok_or_else(|| anyhow!("Missing Content-Length header"))?;

    // Validate size is within bounds
    if size > MAX_MESSAGE_SIZE {
        return Err(anyhow!(
            "Message size {} exceeds maximum {} bytes",
            size,
            MAX_MESSAGE_SIZE
        ));
    }

    // Read message body
    let mut body = vec![0u8; size];
    reader
        .read_exact(&mut body)
        .await
        .context("Failed to read message body")?;

    // Convert to UTF-8
    String::from_utf8(body).context("Message body is not valid UTF-8")
}

/// Write a Content-Length framed message to the stream.
///
/// The header and body are assembled into one buffer and written with a
/// single `write_all` so that concurrent writers holding the stream lock in
/// turn can never interleave partial frames on the wire.
///
/// # Errors
///
/// Returns an error if the write or flush fails.
pub async fn write_message<W>(writer: &mut W, body: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body_bytes = body.as_bytes();
    let mut frame = format!("Content-Length: {}\r\n\r\n", body_bytes.len()).into_bytes();
    frame.extend_from_slice(body_bytes);

    writer
        .write_all(&frame)
        .await
        .context("Failed to write message frame")?;

    writer.flush().await.context("Failed to flush message")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{duplex, BufReader};
    use tokio::time::timeout;

    /// Test timeout to prevent hanging tests.
    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_write_read_roundtrip() {
        let (mut client_write, server_read) = duplex(4096);

        let message = r#"{"jsonrpc":"2.0","method":"test","id":1}"#;

        write_message(&mut client_write, message)
            .await
            .expect("Write failed");

        let mut reader = BufReader::new(server_read);
        let received = timeout(TEST_TIMEOUT, read_message(&mut reader))
            .await
            .expect("Test timed out")
            .expect("Read failed");

        assert_eq!(received, message);
    }

    #[tokio::test]
    async fn test_read_missing_content_length() {
        let (mut client_write, server_read) = duplex(4096);

        // Write raw data without Content-Length header (just an empty line)
        use tokio::io::AsyncWriteExt;
        client_write.write_all(b"\r\n").await.expect("Write failed");
        drop(client_write);

        let mut reader = BufReader::new(server_read);
        let result = timeout(TEST_TIMEOUT, read_message(&mut reader))
            .await
            .expect("Test timed out");

        assert!(result.is_err());
        let err_msg = result.unwrap_err().to_string();
        assert!(
            err_msg.contains("Missing Content-Length"),
            "Expected 'Missing Content-Length' error, got: {}",
            err_msg
        );
    }

    #[tokio::test]
    async fn test_read_case_insensitive_header() {
        let (mut client_write, server_read) = duplex(4096);

        use tokio::io::AsyncWriteExt;
        let body = r#"{"test":true}"#;
        let raw = format!("content-length: {}\r\n\r\n{}", body.len(), body);
        client_write
            .write_all(raw.as_bytes())
            .await
            .expect("Write failed");

        let mut reader = BufReader::new(server_read);
        let received = timeout(TEST_TIMEOUT, read_message(&mut reader))
            .await
            .expect("Test timed out")
            .expect("Read failed");

        assert_eq!(received, body);
    }

    #[tokio::test]
    async fn test_read_ignores_extra_headers() {
        let (mut client_write, server_read) = duplex(4096);

        use tokio::io::AsyncWriteExt;
        let body = r#"{"test":true}"#;
        let raw = format!(
            "Content-Type: application/vscode-jsonrpc; charset=utf-8\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        client_write
            .write_all(raw.as_bytes())
            .await
            .expect("Write failed");

        let mut reader = BufReader::new(server_read);
        let received = timeout(TEST_TIMEOUT, read_message(&mut reader))
            .await
            .expect("Test timed out")
            .expect("Read failed");

        assert_eq!(received, body);
    }

    #[tokio::test]
    async fn test_read_lf_only_line_endings() {
        let (mut client_write, server_read) = duplex(4096);

        use tokio::io::AsyncWriteExt;
        let body = r#"{"test":1}"#;
        let raw = format!("Content-Length: {}\n\n{}", body.len(), body);
        client_write
            .write_all(raw.as_bytes())
            .await
            .expect("Write failed");

        let mut reader = BufReader::new(server_read);
        let received = timeout(TEST_TIMEOUT, read_message(&mut reader))
            .await
            .expect("Test timed out")
            .expect("Read failed");

        assert_eq!(received, body);
    }

    #[tokio::test]
    async fn test_read_rejects_oversized_message() {
        let (mut client_write, server_read) = duplex(4096);

        use tokio::io::AsyncWriteExt;
        let raw = format!("Content-Length: {}\r\n\r\n", MAX_MESSAGE_SIZE + 1);
        client_write
            .write_all(raw.as_bytes())
            .await
            .expect("Write failed");

        let mut reader = BufReader::new(server_read);
        let result = timeout(TEST_TIMEOUT, read_message(&mut reader))
            .await
            .expect("Test timed out");

        assert!(result.is_err());
        let err_msg = result.unwrap_err().to_string();
        assert!(
            err_msg.contains("exceeds maximum"),
            "Expected size error, got: {}",
            err_msg
        );
    }

    #[tokio::test]
    async fn test_connection_closed_returns_error() {
        let (client_write, server_read) = duplex(4096);

        // Close write end immediately without sending anything
        drop(client_write);

        let mut reader = BufReader::new(server_read);
        let result = timeout(TEST_TIMEOUT, read_message(&mut reader))
            .await
            .expect("Test timed out");

        assert!(result.is_err());
        let err_msg = result.unwrap_err().to_string();
        assert!(
            err_msg.contains("closed"),
            "Expected connection closed error, got: {}",
            err_msg
        );
    }

    #[tokio::test]
    async fn test_two_frames_back_to_back() {
        let (mut client_write, server_read) = duplex(4096);

        let first = r#"{"id":1}"#;
        let second = r#"{"id":2,"result":null}"#;
        write_message(&mut client_write, first).await.unwrap();
        write_message(&mut client_write, second).await.unwrap();

        let mut reader = BufReader::new(server_read);
        let a = timeout(TEST_TIMEOUT, read_message(&mut reader))
            .await
            .unwrap()
            .unwrap();
        let b = timeout(TEST_TIMEOUT, read_message(&mut reader))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(a, first);
        assert_eq!(b, second);
    }
}
