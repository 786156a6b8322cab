//! Log multiplexing
//!
//! Two copy tasks, one per source pipe, forward chunks into a shared channel.
//! Each task owns one sender, so the channel reports end-of-stream exactly
//! once: after both sources are drained. Dropping the [`LogStream`] aborts
//! both tasks.

use bytes::{Bytes, BytesMut};
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::debug;

const CHUNK_SIZE: usize = 8 * 1024;
const CHANNEL_CAPACITY: usize = 64;

/// Single readable stream merging several sources
pub struct LogStream {
    rx: mpsc::Receiver<Bytes>,
    pending: Bytes,
    tasks: Vec<AbortHandle>,
}

impl LogStream {
    /// A stream that is already at end-of-stream
    pub fn closed() -> Self {
        let (_, rx) = mpsc::channel(1);
        Self {
            rx,
            pending: Bytes::new(),
            tasks: Vec::new(),
        }
    }
}

impl AsyncRead for LogStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            if !self.pending.is_empty() {
                let n = self.pending.len().min(buf.remaining());
                let chunk = self.pending.split_to(n);
                buf.put_slice(&chunk);
                return Poll::Ready(Ok(()));
            }

            match ready!(self.rx.poll_recv(cx)) {
                Some(chunk) => self.pending = chunk,
                None => return Poll::Ready(Ok(())),
            }
        }
    }
}

impl Drop for LogStream {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Merge `stdout` and `stderr` into one stream.
///
/// Ordering between the two sources is unspecified; bytes from each source
/// keep their relative order.
pub fn multiplex<O, E>(stdout: O, stderr: E) -> LogStream
where
    O: AsyncRead + Send + Unpin + 'static,
    E: AsyncRead + Send + Unpin + 'static,
{
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

    let out = tokio::spawn(forward("stdout", stdout, tx.clone()));
    let err = tokio::spawn(forward("stderr", stderr, tx));

    LogStream {
        rx,
        pending: Bytes::new(),
        tasks: vec![out.abort_handle(), err.abort_handle()],
    }
}

async fn forward<R>(source: &'static str, mut reader: R, tx: mpsc::Sender<Bytes>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(CHUNK_SIZE);
    loop {
        buf.reserve(CHUNK_SIZE);
        match reader.read_buf(&mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                if tx.send(buf.split().freeze()).await.is_err() {
                    debug!(source, "Log consumer went away");
                    break;
                }
            }
            Err(e) => {
                debug!(source, error = %e, "Log source failed");
                break;
            }
        }
    }
}
