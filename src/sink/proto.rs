//! Binary memcached protocol constants: magic bytes, opcodes, status codes.

use std::fmt;

pub const REQ_MAGIC: u8 = 0x80;
pub const RES_MAGIC: u8 = 0x81;

/// Fixed header size for both requests and responses.
pub const HEADER_LEN: usize = 24;

/// Largest response body accepted from a peer.
pub const MAX_BODY_LEN: u32 = 32 * 1024 * 1024;

pub const DATATYPE_JSON: u8 = 0x01;
pub const DATATYPE_SNAPPY: u8 = 0x02;
pub const DATATYPE_XATTR: u8 = 0x04;

pub const SUBDOC_FLAG_XATTR_PATH: u8 = 0x04;
pub const SUBDOC_DOC_FLAG_MKDOC: u8 = 0x01;

pub const EXTRA_META_VERSION: u8 = 0x01;
pub const EXTRA_META_CONFLICT_RESOLUTION: u8 = 0x02;

pub const FORCE_ACCEPT_WITH_META: u32 = 0x01;
pub const FORCE_LWW_RESTORE: u32 = 0x02;

pub const HELLO_FEATURE_XATTR: u16 = 0x06;
pub const HELLO_FEATURE_COLLECTIONS: u16 = 0x12;

pub const DEFAULT_PORT: u16 = 11211;
pub const TLS_PORT: u16 = 11207;

/// Request opcodes this sink puts on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Opcode {
    Get,
    Set,
    Add,
    Delete,
    Noop,
    Hello,
    SaslAuth,
    SelectBucket,
    SetWithMeta,
    AddWithMeta,
    DeleteWithMeta,
    SubdocGet,
    SubdocDictUpsert,
    SubdocMultiLookup,
    SubdocMultiMutation,
}

impl Opcode {
    pub const fn code(self) -> u8 {
        match self {
            Opcode::Get => 0x00,
            Opcode::Set => 0x01,
            Opcode::Add => 0x02,
            Opcode::Delete => 0x04,
            Opcode::Noop => 0x0a,
            Opcode::Hello => 0x1f,
            Opcode::SaslAuth => 0x21,
            Opcode::SelectBucket => 0x89,
            Opcode::SetWithMeta => 0xa2,
            Opcode::AddWithMeta => 0xa4,
            Opcode::DeleteWithMeta => 0xa8,
            Opcode::SubdocGet => 0xc5,
            Opcode::SubdocDictUpsert => 0xc8,
            Opcode::SubdocMultiLookup => 0xd0,
            Opcode::SubdocMultiMutation => 0xd1,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        let op = match code {
            0x00 => Opcode::Get,
            0x01 => Opcode::Set,
            0x02 => Opcode::Add,
            0x04 => Opcode::Delete,
            0x0a => Opcode::Noop,
            0x1f => Opcode::Hello,
            0x21 => Opcode::SaslAuth,
            0x89 => Opcode::SelectBucket,
            0xa2 => Opcode::SetWithMeta,
            0xa4 => Opcode::AddWithMeta,
            0xa8 => Opcode::DeleteWithMeta,
            0xc5 => Opcode::SubdocGet,
            0xc8 => Opcode::SubdocDictUpsert,
            0xd0 => Opcode::SubdocMultiLookup,
            0xd1 => Opcode::SubdocMultiMutation,
            _ => return None,
        };
        Some(op)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Opcode::Get => "GET",
            Opcode::Set => "SET",
            Opcode::Add => "ADD",
            Opcode::Delete => "DELETE",
            Opcode::Noop => "NOOP",
            Opcode::Hello => "HELLO",
            Opcode::SaslAuth => "SASL_AUTH",
            Opcode::SelectBucket => "SELECT_BUCKET",
            Opcode::SetWithMeta => "SET_WITH_META",
            Opcode::AddWithMeta => "ADD_WITH_META",
            Opcode::DeleteWithMeta => "DELETE_WITH_META",
            Opcode::SubdocGet => "SUBDOC_GET",
            Opcode::SubdocDictUpsert => "SUBDOC_DICT_UPSERT",
            Opcode::SubdocMultiLookup => "SUBDOC_MULTI_LOOKUP",
            Opcode::SubdocMultiMutation => "SUBDOC_MULTI_MUTATION",
        }
    }

    pub fn carries_metadata(self) -> bool {
        matches!(
            self,
            Opcode::SetWithMeta | Opcode::AddWithMeta | Opcode::DeleteWithMeta
        )
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response status codes. Unrecognised codes are kept verbatim.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Status {
    Success,
    KeyNotFound,
    KeyExists,
    TooBig,
    InvalidArguments,
    NotStored,
    NotMyVbucket,
    AuthError,
    AccessDenied,
    UnknownCommand,
    OutOfMemory,
    NotSupported,
    InternalError,
    Busy,
    TemporaryFailure,
    Other(u16),
}

impl Status {
    pub fn from_code(code: u16) -> Self {
        match code {
            0x00 => Status::Success,
            0x01 => Status::KeyNotFound,
            0x02 => Status::KeyExists,
            0x03 => Status::TooBig,
            0x04 => Status::InvalidArguments,
            0x05 => Status::NotStored,
            0x07 => Status::NotMyVbucket,
            0x20 => Status::AuthError,
            0x24 => Status::AccessDenied,
            0x81 => Status::UnknownCommand,
            0x82 => Status::OutOfMemory,
            0x83 => Status::NotSupported,
            0x84 => Status::InternalError,
            0x85 => Status::Busy,
            0x86 => Status::TemporaryFailure,
            other => Status::Other(other),
        }
    }

    pub fn code(self) -> u16 {
        match self {
            Status::Success => 0x00,
            Status::KeyNotFound => 0x01,
            Status::KeyExists => 0x02,
            Status::TooBig => 0x03,
            Status::InvalidArguments => 0x04,
            Status::NotStored => 0x05,
            Status::NotMyVbucket => 0x07,
            Status::AuthError => 0x20,
            Status::AccessDenied => 0x24,
            Status::UnknownCommand => 0x81,
            Status::OutOfMemory => 0x82,
            Status::NotSupported => 0x83,
            Status::InternalError => 0x84,
            Status::Busy => 0x85,
            Status::TemporaryFailure => 0x86,
            Status::Other(code) => code,
        }
    }

    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Status::TemporaryFailure | Status::Busy | Status::OutOfMemory
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} (0x{:02x})", self, self.code())
    }
}
