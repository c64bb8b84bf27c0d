//! Binary memcached-protocol document sink.

pub mod compress;
pub mod conn;
pub mod error;
pub mod exchange;
pub mod frame;
pub mod op;
pub mod proto;
pub mod source;
pub mod spec;
pub mod stats;
pub mod topology;
pub mod translate;
pub mod worker;

pub use compress::{Decompressor, Snappy};
pub use error::{ConnError, EncodeError, ProtocolError, SinkError, TranslateError};
pub use exchange::{Exchange, Outcome};
pub use op::{Batch, OpValue, Operation, SourceCommand, SubdocFields};
pub use source::{BatchFuture, BatchResult, BatchSource, Completion, Pulled};
pub use spec::SinkSpec;
pub use stats::{SinkStats, StatsSnapshot};
pub use topology::{BucketInfo, SinkMap, StaticTopology, Topology};
pub use translate::{CommandSet, CommandTranslator, DestinationOp};
pub use worker::{BackoffPolicy, MemcachedSink, SinkHandle, SinkWorker};

/// Marks user data (document keys) in log output.
pub fn tag_user_data(data: &[u8]) -> String {
    format!("<ud>{}</ud>", String::from_utf8_lossy(data))
}
