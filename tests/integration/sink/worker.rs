use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use docpump::SinkConfig;
use docpump::sink::proto::DATATYPE_SNAPPY;
use docpump::sink::{
    Batch, BatchFuture, BatchSource, Completion, Decompressor, MemcachedSink, Operation,
    ProtocolError, Pulled, SinkError, SinkMap, SinkSpec, SinkWorker, StaticTopology, Topology,
};

use super::fixtures::{ReceivedFrame, Reply, scripted, spawn_server};

const WAIT: Duration = Duration::from_secs(5);

fn fast_config() -> SinkConfig {
    SinkConfig {
        backoff_base_ms: 1,
        backoff_cap_seconds: 0.01,
        ..SinkConfig::default()
    }
}

fn spec_for(addr: std::net::SocketAddr) -> SinkSpec {
    SinkSpec::parse(&format!("memcached://{addr}")).unwrap()
}

fn set_batch(count: u8) -> Batch {
    (0..count)
        .map(|i| Operation::mutation(i as u16, vec![b'k', b'0' + i], &b"{}"[..]).with_meta(&b"7"[..]))
        .collect()
}

/// Counts refreshes so tests can observe them.
struct CountingTopology {
    map: SinkMap,
    refreshes: Arc<AtomicUsize>,
}

impl Topology for CountingTopology {
    fn sink_map(&self) -> &SinkMap {
        &self.map
    }

    fn refresh_sink_map(&mut self) -> Result<(), SinkError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn key_exists_is_success() {
    let (addr, frames) = spawn_server(scripted(vec![0, 2, 0]));
    let handle =
        MemcachedSink::start(fast_config(), spec_for(addr), StaticTopology::default()).unwrap();

    handle.consume_batch_async(set_batch(3)).wait().unwrap();

    let opcodes: Vec<u8> = frames.try_iter().map(|frame| frame.opcode).collect();
    assert_eq!(opcodes, vec![0xa2, 0xa2, 0xa2]);
    let stats = handle.stats();
    assert_eq!(stats.retry_batches, 0);
    assert_eq!(stats.batches_done, 1);
    assert_eq!(stats.ops_sent, 3);

    handle.close();
    handle.join();
}

#[test]
fn not_my_vbucket_refreshes_and_resubmits() {
    let (addr, frames) = spawn_server(scripted(vec![7, 0]));
    let refreshes = Arc::new(AtomicUsize::new(0));
    let topology = CountingTopology {
        map: SinkMap::default(),
        refreshes: Arc::clone(&refreshes),
    };
    let handle = MemcachedSink::start(fast_config(), spec_for(addr), topology).unwrap();

    handle.consume_batch_async(set_batch(2)).wait().unwrap();

    let opaques: Vec<u32> = frames.try_iter().map(|frame| frame.opaque).collect();
    assert_eq!(opaques, vec![0, 1, 0, 1]);
    assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    let stats = handle.stats();
    assert_eq!(stats.not_my_vbucket, 1);
    assert_eq!(stats.retry_batches, 1);
    assert_eq!(stats.batches_done, 1);

    handle.close();
    handle.join();
}

#[test]
fn unknown_command_falls_back_to_plain_for_good() {
    let (addr, frames) = spawn_server(|frame: &ReceivedFrame| {
        let status = if frame.opcode == 0xa2 { 0x81 } else { 0 };
        Reply::status(frame, status)
    });
    let handle =
        MemcachedSink::start(fast_config(), spec_for(addr), StaticTopology::default()).unwrap();

    handle.consume_batch_async(set_batch(1)).wait().unwrap();
    handle.consume_batch_async(set_batch(1)).wait().unwrap();

    let opcodes: Vec<u8> = frames.try_iter().map(|frame| frame.opcode).collect();
    assert_eq!(opcodes, vec![0xa2, 0x01, 0x01]);
    assert_eq!(handle.stats().retry_batches, 1);

    handle.close();
    handle.join();
}

#[test]
fn transient_statuses_retry_until_success() {
    let (addr, frames) = spawn_server(scripted(vec![0x86, 0x85, 0, 0]));
    let handle =
        MemcachedSink::start(fast_config(), spec_for(addr), StaticTopology::default()).unwrap();

    handle.consume_batch_async(set_batch(2)).wait().unwrap();

    assert_eq!(frames.try_iter().count(), 4);
    assert_eq!(handle.stats().retry_batches, 1);

    handle.close();
    handle.join();
}

#[test]
fn opaque_mismatch_fails_batch_and_stops_worker() {
    let (addr, _frames) = spawn_server(|frame: &ReceivedFrame| Reply {
        status: 0,
        opaque: frame.opaque + 100,
        value: Vec::new(),
    });
    let handle =
        MemcachedSink::start(fast_config(), spec_for(addr), StaticTopology::default()).unwrap();

    let err = handle.consume_batch_async(set_batch(1)).wait().unwrap_err();
    assert!(matches!(
        err,
        SinkError::Protocol(ProtocolError::OpaqueMismatch {
            expected: 0,
            got: 100
        })
    ));

    let after = handle.consume_batch_async(set_batch(1));
    assert!(matches!(
        after.wait_timeout(WAIT),
        Some(Err(SinkError::WorkerExited))
    ));
    handle.join();
}

#[test]
fn connection_is_reused_across_batches() {
    let (addr, frames) = spawn_server(scripted(Vec::new()));
    let handle =
        MemcachedSink::start(fast_config(), spec_for(addr), StaticTopology::default()).unwrap();

    for _ in 0..3 {
        handle.consume_batch_async(set_batch(2)).wait().unwrap();
    }
    let frames: Vec<_> = frames.try_iter().collect();
    assert_eq!(frames.len(), 6);
    assert!(frames.iter().all(|frame| frame.conn_id == 0));
    assert_eq!(handle.stats().batches_done, 3);

    handle.close();
    handle.join();
}

#[test]
fn unreachable_destination_fails_batch() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let handle =
        MemcachedSink::start(fast_config(), spec_for(addr), StaticTopology::default()).unwrap();
    let future = handle.consume_batch_async(set_batch(1));
    let result = future.wait_timeout(WAIT).expect("completion");
    assert!(matches!(result, Err(SinkError::Conn(_))));
    handle.join();
}

#[test]
fn stop_flag_ends_worker_before_next_pull() {
    let (addr, _frames) = spawn_server(scripted(Vec::new()));
    let handle =
        MemcachedSink::start(fast_config(), spec_for(addr), StaticTopology::default()).unwrap();

    handle.consume_batch_async(set_batch(1)).wait().unwrap();
    handle.stop();

    // The worker may already be blocked in a pull; that batch still runs.
    let in_flight = handle.consume_batch_async(set_batch(1));
    assert!(in_flight.wait_timeout(WAIT).is_some());
    let rejected = handle.consume_batch_async(set_batch(1));
    assert!(matches!(
        rejected.wait_timeout(WAIT),
        Some(Err(SinkError::WorkerExited))
    ));
    handle.join();
}

/// Hands out queued batches, then reports end-of-stream.
struct VecSource {
    batches: Vec<(Batch, Completion)>,
}

impl VecSource {
    fn new(batches: Vec<Batch>) -> (Self, Vec<BatchFuture>) {
        let mut futures = Vec::new();
        let batches = batches
            .into_iter()
            .map(|batch| {
                let (completion, future) = Completion::pair();
                futures.push(future);
                (batch, completion)
            })
            .rev()
            .collect();
        (Self { batches }, futures)
    }
}

impl BatchSource for VecSource {
    fn pull_next_batch(&mut self) -> Pulled {
        match self.batches.pop() {
            Some((batch, completion)) => Pulled {
                batch: Some(batch),
                completion,
            },
            None => Pulled {
                batch: None,
                completion: Completion::none(),
            },
        }
    }
}

struct Uppercase;

impl Decompressor for Uppercase {
    fn decompress(&self, input: &[u8]) -> Result<Vec<u8>, String> {
        Ok(input.to_ascii_uppercase())
    }
}

#[test]
fn worker_sends_values_through_its_decompressor() {
    let (addr, frames) = spawn_server(scripted(vec![0, 0]));
    let config = SinkConfig {
        uncompress_values: true,
        ..fast_config()
    };
    let worker = SinkWorker::new(config, spec_for(addr), StaticTopology::default())
        .unwrap()
        .with_decompressor(Box::new(Uppercase));
    let batch = Batch::new(vec![
        Operation::mutation(0, &b"a"[..], &b"packed"[..])
            .with_meta(&b"1"[..])
            .with_datatype(DATATYPE_SNAPPY),
        Operation::mutation(1, &b"b"[..], &b"plain"[..]).with_meta(&b"1"[..]),
    ]);
    let (source, futures) = VecSource::new(vec![batch]);

    worker.run(source, &AtomicBool::new(false));

    for future in futures {
        future.wait().unwrap();
    }
    let values: Vec<Vec<u8>> = frames.try_iter().map(|frame| frame.value).collect();
    assert_eq!(values, vec![b"PACKED".to_vec(), b"plain".to_vec()]);
}
