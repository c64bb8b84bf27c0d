use docpump::SinkConfig;
use docpump::sink::{MemcachedSink, SinkError, SinkMap, SinkSpec, StaticTopology};

use super::fixtures::{ReceivedFrame, Reply, spawn_server};

const SASL_AUTH: u8 = 0x21;
const SELECT_BUCKET: u8 = 0x89;
const HELLO: u8 = 0x1f;

fn accept_all(frame: &ReceivedFrame) -> Reply {
    Reply::status(frame, 0)
}

#[test]
fn check_authenticates_and_selects_bucket() {
    let (addr, frames) = spawn_server(accept_all);
    let spec = SinkSpec::parse(&format!("memcached://admin:secret@{addr}/travel")).unwrap();

    MemcachedSink::check(&SinkConfig::default(), &spec).unwrap();

    let auth = frames.recv().unwrap();
    assert_eq!(auth.opcode, SASL_AUTH);
    assert_eq!(auth.key, b"PLAIN");
    assert_eq!(auth.value, b"\0admin\0secret");
    let select = frames.recv().unwrap();
    assert_eq!(select.opcode, SELECT_BUCKET);
    assert_eq!(select.key, b"travel");
}

#[test]
fn check_reports_rejected_credentials() {
    let (addr, _frames) = spawn_server(|frame: &ReceivedFrame| {
        let status = if frame.opcode == SASL_AUTH { 0x20 } else { 0 };
        Reply::status(frame, status)
    });
    let spec = SinkSpec::parse(&format!("memcached://admin:wrong@{addr}")).unwrap();

    let err = MemcachedSink::check(&SinkConfig::default(), &spec).unwrap_err();
    assert!(matches!(err, SinkError::AccessDenied { .. }));
}

#[test]
fn collections_send_hello_first() {
    let (addr, frames) = spawn_server(accept_all);
    let spec = SinkSpec::parse(&format!("memcached://{addr}")).unwrap();
    let config = SinkConfig {
        use_collections: true,
        ..SinkConfig::default()
    };

    MemcachedSink::check(&config, &spec).unwrap();

    let hello = frames.recv().unwrap();
    assert_eq!(hello.opcode, HELLO);
    assert_eq!(hello.value, vec![0x00, 0x06, 0x00, 0x12]);
}

#[test]
fn worker_selects_bucket_named_by_sink_map() {
    let (addr, frames) = spawn_server(accept_all);
    let spec = SinkSpec::parse(&format!("memcached://{addr}")).unwrap();
    let topology = StaticTopology::new(SinkMap::named("beer-sample"));
    let handle = MemcachedSink::start(SinkConfig::default(), spec, topology).unwrap();

    let batch = vec![docpump::Operation::get(0, &b"k"[..])]
        .into_iter()
        .collect();
    handle.consume_batch_async(batch).wait().unwrap();

    let select = frames.recv().unwrap();
    assert_eq!(select.opcode, SELECT_BUCKET);
    assert_eq!(select.key, b"beer-sample");
    let get = frames.recv().unwrap();
    assert_eq!(get.opcode, 0x00);
    assert_eq!(get.key, b"k");

    handle.close();
    handle.join();
}

#[test]
fn config_file_feeds_the_sink() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("docpump.toml");
    std::fs::write(
        &path,
        "[sink]\ntry_metadata_commands = false\nbackoff_cap_seconds = 0.5\n",
    )
    .unwrap();

    let layer = docpump::config::load_layer(&path).unwrap();
    let mut config = docpump::Config::default();
    layer.apply_to(&mut config);
    assert!(!config.sink.try_metadata_commands);

    let (addr, frames) = spawn_server(accept_all);
    let spec = SinkSpec::parse(&format!("memcached://{addr}")).unwrap();
    let handle = MemcachedSink::start(config.sink, spec, StaticTopology::default()).unwrap();
    let batch = vec![docpump::Operation::mutation(0, &b"k"[..], &b"v"[..]).with_meta(&b"1"[..])]
        .into_iter()
        .collect();
    handle.consume_batch_async(batch).wait().unwrap();

    assert_eq!(frames.recv().unwrap().opcode, 0x01);
    handle.close();
    handle.join();
}
