//! Moves generator output to the HTTP response one chunk at a time.
//!
//! The relay never holds more than the chunk it is currently sending, so a
//! slow client throttles the generator through the pipe instead of through
//! an internal buffer. Sink closure is the cancellation signal: the relay
//! races every read against [`ChunkSink::closed`] and terminates the
//! generator as soon as the consumer is gone.

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::supervisor::{Chunk, GeneratorProcess, SupervisorError};

/// Default bytes requested per read.
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024;
/// Default progress logging interval.
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 1024 * 1024;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("client went away after {bytes} bytes")]
    SinkClosed { bytes: u64 },

    #[error("generator failed after {bytes} bytes: {source}")]
    GeneratorFailed {
        bytes: u64,
        #[source]
        source: SupervisorError,
    },
}

/// The consuming side went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("sink closed")]
pub struct SinkClosed;

/// Where relayed bytes go.
#[async_trait]
pub trait ChunkSink: Send {
    /// Hands one chunk to the consumer, waiting while it has no room.
    async fn send(&mut self, chunk: Bytes) -> Result<(), SinkClosed>;

    /// Resolves once the consumer has gone away.
    async fn closed(&self);
}

/// Where relayed bytes come from.
#[async_trait]
pub trait ChunkSource: Send {
    async fn read_chunk(&mut self, max_bytes: usize) -> Result<Chunk, SupervisorError>;

    async fn terminate(&mut self) -> Result<(), SupervisorError>;
}

#[async_trait]
impl ChunkSource for GeneratorProcess {
    async fn read_chunk(&mut self, max_bytes: usize) -> Result<Chunk, SupervisorError> {
        GeneratorProcess::read_chunk(self, max_bytes).await
    }

    async fn terminate(&mut self) -> Result<(), SupervisorError> {
        GeneratorProcess::terminate(self).await
    }
}

/// Sink backed by the channel that feeds a streaming response body.
///
/// The receiver is dropped when the HTTP connection goes away, which makes
/// both `send` and `closed` observe the disconnect.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Result<Bytes, io::Error>>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Result<Bytes, io::Error>>) -> Self {
        Self { tx }
    }

    /// Sink plus the receiving end, with room for a single chunk.
    pub fn channel() -> (Self, mpsc::Receiver<Result<Bytes, io::Error>>) {
        let (tx, rx) = mpsc::channel(1);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl ChunkSink for ChannelSink {
    async fn send(&mut self, chunk: Bytes) -> Result<(), SinkClosed> {
        self.tx.send(Ok(chunk)).await.map_err(|_| SinkClosed)
    }

    async fn closed(&self) {
        self.tx.closed().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayOptions {
    pub chunk_size: usize,
    pub progress_interval: u64,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

/// Relays `source` into `sink` until EOF, failure or disconnect.
///
/// Returns the number of bytes handed to the sink. On disconnect and on
/// read failure the source is terminated before returning; on EOF the
/// caller still owns the (exited) source and decides what to do with its
/// exit status.
pub async fn pump<S, K>(source: &mut S, sink: &mut K, options: &RelayOptions) -> Result<u64, RelayError>
where
    S: ChunkSource + ?Sized,
    K: ChunkSink + ?Sized,
{
    let chunk_size = options.chunk_size.max(1);
    let mut total: u64 = 0;
    let mut next_report = options.progress_interval;

    loop {
        let read = tokio::select! {
            biased;
            _ = sink.closed() => None,
            read = source.read_chunk(chunk_size) => Some(read),
        };

        let chunk = match read {
            None => return Err(abort(source, total).await),
            Some(Ok(Chunk::Data(bytes))) => bytes,
            Some(Ok(Chunk::Eof)) => {
                debug!(bytes = total, "Generator output finished");
                return Ok(total);
            }
            Some(Err(source_err)) => {
                if let Err(e) = source.terminate().await {
                    warn!("Failed to terminate generator after read error: {e}");
                }
                return Err(RelayError::GeneratorFailed {
                    bytes: total,
                    source: source_err,
                });
            }
        };

        let len = chunk.len() as u64;
        if sink.send(chunk).await.is_err() {
            return Err(abort(source, total).await);
        }
        total += len;

        if options.progress_interval > 0 && total >= next_report {
            info!(bytes = total, "Streamed {:.1} MB", total as f64 / (1024.0 * 1024.0));
            while next_report <= total {
                next_report += options.progress_interval;
            }
        }
    }
}

async fn abort<S: ChunkSource + ?Sized>(source: &mut S, total: u64) -> RelayError {
    if let Err(e) = source.terminate().await {
        warn!("Failed to terminate generator after disconnect: {e}");
    }
    RelayError::SinkClosed { bytes: total }
}
