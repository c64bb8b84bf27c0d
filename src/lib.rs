#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod sink;
pub mod telemetry;

pub use error::{Error, Transience};

pub use crate::config::{Config, SinkConfig};
pub use crate::sink::{
    Batch, BatchFuture, MemcachedSink, Operation, SinkError, SinkHandle, SinkSpec, StaticTopology,
};
