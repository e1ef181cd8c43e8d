use crate::server::{
    config::ClientConfig,
    pool::INTERNAL_ERROR,
    queue::{AdmissionQueue, Task},
    telemetry::{increment_oversized_requests, increment_requests},
};
use bytes::Bytes;
use std::io;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    time::timeout,
};

pub const GREETING: &[u8] = b"Hey! Listen!\n";
pub const PROMPT: &[u8] = b"> ";
pub const TOO_LARGE: &[u8] = b"error: request too large\n";

/// Outcome of reading one client line.
#[derive(Debug, PartialEq, Eq)]
enum Line {
    /// A full line, without its `\n`.
    Complete(Vec<u8>),
    /// The line exceeded the size limit and was discarded up to its `\n`.
    TooLong,
    /// The client closed the connection.
    Eof,
}

/// Serves one client connection until it sends an empty line, goes idle, or
/// disconnects.
///
/// Each non-empty line becomes one [`Task`]; the handler waits for its result
/// before reading the next line, so one connection never has more than one
/// request in flight.
pub async fn handle_client<S>(stream: S, queue: AdmissionQueue, config: ClientConfig) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut stream = BufReader::new(stream);
    let mut line = Vec::new();

    stream.write_all(GREETING).await?;
    loop {
        stream.write_all(PROMPT).await?;
        stream.flush().await?;

        let outcome = timeout(
            config.idle_timeout,
            read_line(&mut stream, config.max_request_size, &mut line),
        )
        .await;

        let request = match outcome {
            Err(_) => {
                tracing::debug!("Client idle for {:?}, closing", config.idle_timeout);
                break;
            }
            Ok(read) => match read? {
                Line::Eof => break,
                Line::TooLong => {
                    increment_oversized_requests();
                    stream.write_all(TOO_LARGE).await?;
                    continue;
                }
                Line::Complete(raw) => raw,
            },
        };

        let request = request.trim_ascii();
        if request.is_empty() {
            break;
        }

        let (task, result) = Task::new(Bytes::copy_from_slice(request));
        increment_requests();
        if let Err(e) = queue.submit(task).await {
            tracing::warn!("Dropping client request: {e}");
            stream.write_all(INTERNAL_ERROR).await?;
            break;
        }

        let response = match result.await {
            Ok(response) => response,
            Err(_) => {
                tracing::warn!("Task dropped before completion");
                Bytes::from_static(INTERNAL_ERROR)
            }
        };
        stream.write_all(&response).await?;
    }

    stream.flush().await?;
    stream.into_inner().shutdown().await
}

/// Reads one `\n`-terminated line of at most `limit` bytes (excluding the
/// `\n`) into `buf`.
///
/// Longer lines are consumed and dropped without buffering more than `limit`
/// bytes. End of input, including in the middle of a line, is [`Line::Eof`].
async fn read_line<R>(reader: &mut R, limit: usize, buf: &mut Vec<u8>) -> io::Result<Line>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let mut overflow = false;

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(Line::Eof);
        }

        let (chunk, used, done) = match available.iter().position(|&b| b == b'\n') {
            Some(i) => (&available[..i], i + 1, true),
            None => (available, available.len(), false),
        };

        if !overflow {
            if buf.len() + chunk.len() > limit {
                overflow = true;
                buf.clear();
            } else {
                buf.extend_from_slice(chunk);
            }
        }
        reader.consume(used);

        if done {
            return Ok(if overflow {
                Line::TooLong
            } else {
                Line::Complete(core::mem::take(buf))
            });
        }
    }
}
