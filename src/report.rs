//! A generated check result and the queue that batches it for delivery.

use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::state::State;
use crate::time::Timedelta;

/// One check result, ready to be forwarded to the NSCA sink once a `host`
/// field is attached.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub service: String,
    pub state: State,
    pub message: String,
}

/// Many-writer (one per check), single-reader (the batcher) queue.
///
/// `put` never blocks or fails. `batch` yields every report that arrives
/// within a fixed window, returning an empty batch if none arrive. FIFO is
/// preserved per-writer; fairness across writers is not required or
/// guaranteed.
pub struct ReportQueue {
    tx: mpsc::UnboundedSender<Report>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Report>>,
}

impl ReportQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        ReportQueue {
            tx,
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    /// A cheaply cloneable handle for producers.
    pub fn sender(&self) -> ReportSender {
        ReportSender { tx: self.tx.clone() }
    }

    /// Collect every report that arrives within `timeout`, starting now.
    /// Only one caller should drive `batch` at a time (the batch-sender
    /// task).
    pub async fn batch(&self, timeout: Timedelta) -> Vec<Report> {
        let mut rx = self.rx.lock().await;
        let deadline = sleep(timeout.as_std());
        tokio::pin!(deadline);
        let mut out = Vec::new();
        loop {
            tokio::select! {
                biased;
                maybe = rx.recv() => {
                    match maybe {
                        Some(report) => out.push(report),
                        None => break, // all senders dropped
                    }
                }
                _ = &mut deadline => break,
            }
        }
        out
    }
}

impl Default for ReportQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// A cloneable producer handle for a [`ReportQueue`].
#[derive(Clone)]
pub struct ReportSender {
    tx: mpsc::UnboundedSender<Report>,
}

impl ReportSender {
    pub fn put(&self, report: Report) {
        // An unbounded channel send only fails if the receiver half has been
        // dropped (queue torn down); there's nothing useful to do with that
        // error here.
        let _ = self.tx.send(report);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn batch_collects_reports_within_timeout() {
        let queue = ReportQueue::new();
        let sender = queue.sender();
        sender.put(Report {
            service: "svc".to_string(),
            state: State::Ok,
            message: "All metrics are OK".to_string(),
        });
        let batch = queue.batch(Timedelta::from_ns(50_000_000)).await;
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn batch_is_empty_when_nothing_arrives() {
        let queue = ReportQueue::new();
        let batch = queue.batch(Timedelta::from_ns(10_000_000)).await;
        assert!(batch.is_empty());
    }
}
