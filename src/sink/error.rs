//! Sink error types.

use thiserror::Error;

use crate::config::ConfigError;
use crate::error::Transience;
use crate::sink::proto::{Opcode, Status};

/// Failure building a request frame from an operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("value has invalid format for {context}: missing {field}")]
    MissingSubdocField {
        context: &'static str,
        field: &'static str,
    },
    #[error("{opcode} expects a raw value, got sub-document fields")]
    UnexpectedSubdocValue { opcode: Opcode },
    #[error("key too long: {len} bytes")]
    KeyTooLong { len: usize },
    #[error("extras too long: {len} bytes")]
    ExtrasTooLong { len: usize },
    #[error("body too large: {len} bytes")]
    BodyTooLarge { len: usize },
    #[error("unknown command for request: {opcode}")]
    UnsupportedOpcode { opcode: Opcode },
}

/// The peer violated the framing or correlation rules.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unexpected response magic: expected 0x{expected:02x} got 0x{got:02x}")]
    BadMagic { expected: u8, got: u8 },
    #[error("short header: {len} bytes")]
    ShortHeader { len: usize },
    #[error("opaque mismatch: expected {expected} got {got}")]
    OpaqueMismatch { expected: u32, got: u32 },
    #[error("unknown command: 0x{opcode:02x}")]
    UnknownCommand { opcode: u8 },
    #[error("server error status {status} for opcode 0x{opcode:02x}")]
    UnexpectedStatus { status: Status, opcode: u8 },
    #[error("response body of {body_len} bytes exceeds the {max} byte limit")]
    BodyTooLarge { body_len: u32, max: u32 },
    #[error("body length {body_len} shorter than extras {extras_len} + key {key_len}")]
    InconsistentLengths {
        body_len: u32,
        extras_len: u8,
        key_len: u16,
    },
}

/// Failure mapping a source command to a wire command.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TranslateError {
    #[error("unsupported destination operation: {op}")]
    UnsupportedOperation { op: String },
    #[error("unknown source command 0x{code:02x} for operation {op}")]
    UnknownSourceCommand { code: u8, op: String },
}

/// Socket-level failure.
#[derive(Debug, Error)]
pub enum ConnError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("connection closed by peer with {buffered} of {expected} bytes buffered")]
    Eof { expected: usize, buffered: usize },
    #[error("recv timed out with {buffered} of {expected} bytes buffered")]
    Timeout { expected: usize, buffered: usize },
    #[error("connect to {addr} failed: {reason}")]
    Connect { addr: String, reason: String },
    #[error("tls error: {0}")]
    Tls(String),
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("translate error: {0}")]
    Translate(#[from] TranslateError),
    #[error("connection error: {0}")]
    Conn(#[from] ConnError),
    #[error("server temporarily unable to serve request: {status}")]
    TransientServer { status: Status },
    #[error(
        "received NOT_MY_VBUCKET; perhaps the cluster is/was rebalancing; vbucket_id: {vbucket_id}, key: {key}, peer: {peer}"
    )]
    TopologyChanged {
        vbucket_id: u16,
        key: String,
        peer: String,
    },
    #[error("destination does not take command 0x{opcode:02x}; falling back to plain commands")]
    CapabilityMismatch { opcode: u8 },
    #[error("access denied: {context}")]
    AccessDenied { context: String },
    #[error("topology refresh failed: {0}")]
    Topology(String),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("sink worker exited before completing the batch")]
    WorkerExited,
}

impl SinkError {
    pub fn transience(&self) -> Transience {
        match self {
            SinkError::TransientServer { .. }
            | SinkError::TopologyChanged { .. }
            | SinkError::CapabilityMismatch { .. } => Transience::Retryable,
            SinkError::Conn(_) | SinkError::Topology(_) | SinkError::WorkerExited => {
                Transience::Unknown
            }
            SinkError::Encode(_)
            | SinkError::Protocol(_)
            | SinkError::Translate(_)
            | SinkError::AccessDenied { .. }
            | SinkError::Config(_) => Transience::Permanent,
        }
    }

    /// Whether the connection that produced this error must not be reused.
    pub fn poisons_connection(&self) -> bool {
        matches!(self, SinkError::Conn(_) | SinkError::Protocol(_))
    }
}
