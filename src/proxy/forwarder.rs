use super::connection::{Connection, item};
use super::socket::probe;
use crate::error::SniProxyError;
use crate::utils::BackoffCounter;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::trace;

/// First delay before re-reading a source that reported end-of-stream
const EOF_BACKOFF_BASE: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// client -> upstream
    Upload,
    /// upstream -> client
    Download,
}

impl Direction {
    pub fn arrow(self) -> &'static str {
        match self {
            Direction::Upload => "↑",
            Direction::Download => "↓",
        }
    }

    /// Log item of the leg this direction reads from
    fn source_item(self) -> &'static str {
        match self {
            Direction::Upload => item::LOCAL,
            Direction::Download => item::UPPER,
        }
    }

    /// Log item of the leg this direction writes to
    fn sink_item(self) -> &'static str {
        match self {
            Direction::Upload => item::UPPER,
            Direction::Download => item::LOCAL,
        }
    }
}

/// Pump bytes from `source` to `sink` until either leg fails or the
/// connection closes.
///
/// A quiet source is never a failure by itself: on a read timeout, and on
/// end-of-stream, the source socket is probed and the loop only stops when
/// the probe fails. Dropping the halves on return closes the sockets.
pub async fn pump(
    conn: Arc<Connection>,
    direction: Direction,
    mut source: OwnedReadHalf,
    mut sink: OwnedWriteHalf,
) {
    let ctx = conn.context().clone();
    let read_timeout = conn.socket_options().read_timeout;
    let mut buffer = vec![0u8; ctx.config.forwarder_buffer_size];
    let eof_backoff = BackoffCounter::new();
    let mut closed = conn.close_signal();

    loop {
        let read = tokio::select! {
            biased;
            _ = closed.wait_for(|c| *c) => return,
            r = tokio::time::timeout(read_timeout, source.read(&mut buffer)) => r,
        };

        match read {
            Ok(Ok(0)) => {
                if let Err(e) = probe(source.as_ref()) {
                    conn.fail(direction.source_item(), Some(direction), &SniProxyError::Io(e));
                    return;
                }
                let delay = eof_backoff.next_delay(EOF_BACKOFF_BASE, read_timeout);
                trace!(id = conn.id(), dir = direction.arrow(), ?delay, "end of stream with live peer");
                tokio::select! {
                    biased;
                    _ = closed.wait_for(|c| *c) => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Ok(Ok(n)) => {
                eof_backoff.reset();
                conn.mark_running(direction);
                let write = async {
                    sink.write_all(&buffer[..n]).await?;
                    sink.flush().await
                };
                let written = tokio::select! {
                    biased;
                    _ = closed.wait_for(|c| *c) => return,
                    w = write => w,
                };
                if let Err(e) = written {
                    conn.fail(direction.sink_item(), Some(direction), &SniProxyError::Io(e));
                    return;
                }
                match direction {
                    Direction::Upload => ctx.metrics.record_upload(n as u64),
                    Direction::Download => ctx.metrics.record_download(n as u64),
                }
            }
            Ok(Err(e)) => {
                conn.fail(direction.source_item(), Some(direction), &SniProxyError::Io(e));
                return;
            }
            Err(_) => {
                if let Err(e) = probe(source.as_ref()) {
                    conn.fail(direction.source_item(), Some(direction), &SniProxyError::Io(e));
                    return;
                }
                conn.mark_idle(direction);
            }
        }
    }
}
