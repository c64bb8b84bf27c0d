//! Batch handoff between producers and the sink worker.

use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};

use crate::sink::error::SinkError;
use crate::sink::op::Batch;

pub type BatchResult = Result<(), SinkError>;

/// Completion signal for one batch. Consumed on use, so it fires at most once.
#[derive(Debug)]
pub struct Completion {
    tx: Option<Sender<BatchResult>>,
}

impl Completion {
    pub fn pair() -> (Completion, BatchFuture) {
        let (tx, rx) = crossbeam::channel::bounded(1);
        (Completion { tx: Some(tx) }, BatchFuture { rx })
    }

    /// A completion nobody waits on (end-of-stream markers).
    pub fn none() -> Self {
        Self { tx: None }
    }

    pub fn done(self, result: BatchResult) {
        if let Some(tx) = self.tx {
            let _ = tx.send(result);
        }
    }
}

/// Caller side of a [`Completion`].
#[derive(Debug)]
pub struct BatchFuture {
    rx: Receiver<BatchResult>,
}

impl BatchFuture {
    pub fn wait(self) -> BatchResult {
        self.rx.recv().unwrap_or(Err(SinkError::WorkerExited))
    }

    /// `None` when the batch is still in flight after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<BatchResult> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(SinkError::WorkerExited)),
        }
    }
}

/// Next unit of work; `batch: None` means the stream is exhausted.
#[derive(Debug)]
pub struct Pulled {
    pub batch: Option<Batch>,
    pub completion: Completion,
}

pub trait BatchSource {
    /// Blocks until a batch or end-of-stream is available.
    fn pull_next_batch(&mut self) -> Pulled;
}

#[derive(Debug)]
pub enum Queued {
    Batch(Batch, Completion),
    Close,
}

/// Rendezvous queue fed by [`crate::sink::SinkHandle`].
pub struct ChannelSource {
    rx: Receiver<Queued>,
}

impl ChannelSource {
    pub fn new(rx: Receiver<Queued>) -> Self {
        Self { rx }
    }
}

impl BatchSource for ChannelSource {
    fn pull_next_batch(&mut self) -> Pulled {
        match self.rx.recv() {
            Ok(Queued::Batch(batch, completion)) => Pulled {
                batch: Some(batch),
                completion,
            },
            Ok(Queued::Close) | Err(_) => Pulled {
                batch: None,
                completion: Completion::none(),
            },
        }
    }
}
