//! The upstream metric transport seam.
//!
//! The core never depends on a concrete message-bus client; it only depends
//! on receiving decoded [`DataChunk`]s through a [`MetricSource`]. Framing,
//! authentication, and subscription management live entirely in the
//! transport adapter.

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::time::Timestamp;

/// A raw chunk of metric values as received from the transport, before
/// timestamp decoding.
#[derive(Debug, Clone, Deserialize)]
pub struct DataChunk {
    pub metric: String,
    pub time_delta: Vec<i64>,
    pub value: Vec<f64>,
}

impl DataChunk {
    /// Decode into `(timestamp, value)` pairs via cumulative time-delta
    /// decoding, dropping NaN values before they reach classification.
    pub fn decode(&self) -> Vec<(Timestamp, f64)> {
        let mut running = 0i64;
        let mut out = Vec::with_capacity(self.time_delta.len());
        for (&delta, &value) in self.time_delta.iter().zip(self.value.iter()) {
            running += delta;
            if value.is_nan() {
                continue;
            }
            out.push((Timestamp::from_posix_ns(running), value));
        }
        out
    }

    /// The last absolute timestamp in this chunk (for timeout bumping),
    /// even if its value was NaN and thus dropped from `decode()`.
    pub fn last_timestamp(&self) -> Option<Timestamp> {
        let total: i64 = self.time_delta.iter().sum();
        if self.time_delta.is_empty() {
            None
        } else {
            Some(Timestamp::from_posix_ns(total))
        }
    }
}

/// A handle the transport uses to push decoded chunks into the reconciler.
#[derive(Clone)]
pub struct ChunkHandle {
    tx: mpsc::UnboundedSender<DataChunk>,
}

impl ChunkHandle {
    pub fn send(&self, chunk: DataChunk) {
        let _ = self.tx.send(chunk);
    }
}

pub fn chunk_channel() -> (ChunkHandle, mpsc::UnboundedReceiver<DataChunk>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChunkHandle { tx }, rx)
}

/// The upstream transport adapter's contract: run until cancelled, pushing
/// decoded chunks through `handle`.
#[async_trait]
pub trait MetricSource: Send {
    async fn run(self: Box<Self>, handle: ChunkHandle);
}

/// A development-only source that reads newline-delimited JSON
/// [`DataChunk`]s from stdin. Used for `--dry-run` local testing; never a
/// production transport.
pub struct StdinMetricSource;

#[async_trait]
impl MetricSource for StdinMetricSource {
    async fn run(self: Box<Self>, handle: ChunkHandle) {
        let stdin = tokio::io::stdin();
        let mut lines = BufReader::new(stdin).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<DataChunk>(&line) {
                Ok(chunk) => handle.send(chunk),
                Err(e) => tracing::warn!(error = %e, "failed to parse data chunk from stdin"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_accumulates_deltas_and_drops_nan() {
        let chunk = DataChunk {
            metric: "m".to_string(),
            time_delta: vec![0, 10, 10],
            value: vec![1.0, f64::NAN, 3.0],
        };
        let pairs = chunk.decode();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].0.posix_ns(), 0);
        assert_eq!(pairs[1].0.posix_ns(), 20);
    }

    #[test]
    fn empty_chunk_decodes_to_nothing() {
        let chunk = DataChunk {
            metric: "m".to_string(),
            time_delta: vec![],
            value: vec![],
        };
        assert!(chunk.decode().is_empty());
        assert!(chunk.last_timestamp().is_none());
    }
}
