//! Sink worker thread: pulls batches, drives scatter/gather, backs off.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::Sender;

use crate::config::SinkConfig;
use crate::sink::compress::Decompressor;
use crate::sink::conn::{self, Connection};
use crate::sink::error::{ConnError, SinkError};
use crate::sink::exchange::{Exchange, Outcome};
use crate::sink::op::Batch;
use crate::sink::source::{BatchFuture, BatchSource, ChannelSource, Completion, Pulled, Queued};
use crate::sink::spec::SinkSpec;
use crate::sink::stats::{SinkStats, StatsSnapshot};
use crate::sink::topology::Topology;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
}

struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    fn new(policy: BackoffPolicy) -> Self {
        Self {
            base: policy.base,
            max: policy.max,
            current: policy.base,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let next = self.current.checked_mul(2).unwrap_or(self.max);
        self.current = std::cmp::min(next, self.max);
        delay
    }

    fn reset(&mut self) {
        self.current = self.base;
    }
}

pub struct SinkWorker<T> {
    config: SinkConfig,
    spec: SinkSpec,
    topology: T,
    exchange: Exchange,
    backoff: BackoffPolicy,
    stats: Arc<SinkStats>,
    conns: BTreeMap<String, Connection>,
}

impl<T: Topology> SinkWorker<T> {
    pub fn new(config: SinkConfig, mut spec: SinkSpec, topology: T) -> Result<Self, SinkError> {
        config.validate()?;
        if spec.bucket.is_none() {
            spec.bucket = topology.sink_map().name.clone();
        }
        let lww_restore = topology.sink_map().is_lww();
        let stats = Arc::new(SinkStats::new());
        let exchange = Exchange::new(&config, lww_restore, Arc::clone(&stats))?;
        Ok(Self {
            backoff: config.backoff_policy(),
            config,
            spec,
            topology,
            exchange,
            stats,
            conns: BTreeMap::new(),
        })
    }

    pub fn with_decompressor(mut self, codec: Box<dyn Decompressor>) -> Self {
        self.exchange = self.exchange.with_decompressor(codec);
        self
    }

    pub fn stats(&self) -> Arc<SinkStats> {
        Arc::clone(&self.stats)
    }

    /// Runs until the source is exhausted, a batch fails, or `stop` is set.
    pub fn run<B: BatchSource>(mut self, mut source: B, stop: &AtomicBool) {
        let mut backoff = Backoff::new(self.backoff);

        while !stop.load(Ordering::Relaxed) {
            let Pulled { batch, completion } = source.pull_next_batch();
            let Some(batch) = batch else {
                completion.done(Ok(()));
                break;
            };

            match self.deliver(&batch, &mut backoff) {
                Ok(()) => {
                    backoff.reset();
                    self.stats.record_batch_done();
                    completion.done(Ok(()));
                }
                Err(err) => {
                    tracing::error!(peer = %self.spec.addr(self.config.use_tls), "sink batch failed: {err}");
                    completion.done(Err(err));
                    break;
                }
            }
        }
        self.close_all();
    }

    fn deliver(&mut self, batch: &Batch, backoff: &mut Backoff) -> Result<(), SinkError> {
        loop {
            let outcome = self.send_recv(batch)?;
            if outcome.refresh
                && let Err(err) = self.topology.refresh_sink_map()
            {
                tracing::warn!("sink map refresh failed: {err}");
            }
            if !outcome.retry {
                return Ok(());
            }

            self.stats.record_retry_batch();
            if outcome.needs_backoff() {
                let delay = backoff.next_delay();
                tracing::warn!(
                    backoff_ms = delay.as_millis() as u64,
                    ops = batch.len(),
                    bytes = batch.payload_bytes(),
                    "backing off before retrying batch"
                );
                thread::sleep(delay);
            }
        }
    }

    fn send_recv(&mut self, batch: &Batch) -> Result<Outcome, SinkError> {
        let key = self.spec.addr(self.config.use_tls);
        let conn = match self.conns.entry(key.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(conn::open(&self.config, &self.spec)?),
        };

        let result = self.exchange.scatter_gather(conn, batch);
        if let Err(err) = &result
            && err.poisons_connection()
            && let Some(conn) = self.conns.remove(&key)
        {
            conn.get_ref().shutdown();
        }
        result
    }

    fn close_all(&mut self) {
        for (peer, conn) in std::mem::take(&mut self.conns) {
            tracing::debug!(%peer, "closing sink connection");
            conn.get_ref().shutdown();
        }
    }
}

/// Entry point for a memcached-protocol destination.
pub struct MemcachedSink;

impl MemcachedSink {
    pub fn start<T>(config: SinkConfig, spec: SinkSpec, topology: T) -> Result<SinkHandle, SinkError>
    where
        T: Topology + 'static,
    {
        let worker = SinkWorker::new(config, spec, topology)?;
        let stats = worker.stats();
        let (queue, rx) = crossbeam::channel::bounded(1);
        let stop = Arc::new(AtomicBool::new(false));

        let worker_stop = Arc::clone(&stop);
        let join = thread::Builder::new()
            .name("docpump-sink".to_string())
            .spawn(move || worker.run(ChannelSource::new(rx), &worker_stop))
            .map_err(ConnError::from)?;

        Ok(SinkHandle {
            queue: Some(queue),
            stop,
            stats,
            join: Some(join),
        })
    }

    /// Connects, handshakes and disconnects.
    pub fn check(config: &SinkConfig, spec: &SinkSpec) -> Result<(), SinkError> {
        config.validate()?;
        let conn = conn::open(config, spec)?;
        conn.get_ref().shutdown();
        Ok(())
    }
}

pub struct SinkHandle {
    queue: Option<Sender<Queued>>,
    stop: Arc<AtomicBool>,
    stats: Arc<SinkStats>,
    join: Option<JoinHandle<()>>,
}

impl SinkHandle {
    /// Queues a batch; blocks while another batch is waiting to be pulled.
    pub fn consume_batch_async(&self, batch: Batch) -> BatchFuture {
        let (completion, future) = Completion::pair();
        if let Some(queue) = &self.queue {
            // A send error drops the completion, which the future reports.
            let _ = queue.send(Queued::Batch(batch, completion));
        }
        future
    }

    /// Ends the stream once queued batches are done.
    pub fn close(&self) {
        if let Some(queue) = &self.queue {
            let _ = queue.send(Queued::Close);
        }
    }

    /// Takes effect before the worker pulls its next batch.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn join(mut self) {
        self.queue.take();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}
