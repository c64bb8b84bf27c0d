//! Logical operations and batches handed to the sink.

use bytes::Bytes;

/// Command a record carried when it was read from the source cluster.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SourceCommand {
    TapMutation,
    TapDelete,
    DcpMutation,
    DcpDelete,
    Get,
    SubdocMultiMutation,
    SubdocMultiLookup,
    Other(u8),
}

impl SourceCommand {
    pub fn from_code(code: u8) -> Self {
        match code {
            0x41 => SourceCommand::TapMutation,
            0x42 => SourceCommand::TapDelete,
            0x57 => SourceCommand::DcpMutation,
            0x58 => SourceCommand::DcpDelete,
            0x00 => SourceCommand::Get,
            0xd1 => SourceCommand::SubdocMultiMutation,
            0xd0 => SourceCommand::SubdocMultiLookup,
            other => SourceCommand::Other(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            SourceCommand::TapMutation => 0x41,
            SourceCommand::TapDelete => 0x42,
            SourceCommand::DcpMutation => 0x57,
            SourceCommand::DcpDelete => 0x58,
            SourceCommand::Get => 0x00,
            SourceCommand::SubdocMultiMutation => 0xd1,
            SourceCommand::SubdocMultiLookup => 0xd0,
            SourceCommand::Other(code) => code,
        }
    }

    pub fn is_deletion(self) -> bool {
        matches!(self, SourceCommand::TapDelete | SourceCommand::DcpDelete)
    }
}

/// Named parts of a sub-document operation value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubdocFields {
    pub body: Option<Bytes>,
    pub xattr_field: Option<Bytes>,
    pub xattr_value: Option<Bytes>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OpValue {
    Raw(Bytes),
    Subdoc(SubdocFields),
}

impl OpValue {
    pub fn empty() -> Self {
        OpValue::Raw(Bytes::new())
    }

    pub fn len(&self) -> usize {
        match self {
            OpValue::Raw(bytes) => bytes.len(),
            OpValue::Subdoc(fields) => [&fields.body, &fields.xattr_field, &fields.xattr_value]
                .into_iter()
                .map(|part| part.as_ref().map_or(0, Bytes::len))
                .sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Bytes> for OpValue {
    fn from(value: Bytes) -> Self {
        OpValue::Raw(value)
    }
}

impl From<&'static [u8]> for OpValue {
    fn from(value: &'static [u8]) -> Self {
        OpValue::Raw(Bytes::from_static(value))
    }
}

impl From<Vec<u8>> for OpValue {
    fn from(value: Vec<u8>) -> Self {
        OpValue::Raw(Bytes::from(value))
    }
}

impl From<SubdocFields> for OpValue {
    fn from(value: SubdocFields) -> Self {
        OpValue::Subdoc(value)
    }
}

/// One document mutation or lookup. Immutable once queued.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Operation {
    pub command: SourceCommand,
    pub vbucket_id: u16,
    pub key: Bytes,
    pub flags: u32,
    pub expiry: u32,
    pub cas: u64,
    /// Revision metadata in textual form; empty when the source sent none.
    pub meta: Bytes,
    pub value: OpValue,
    pub datatype: u8,
    pub conflict_resolution: Option<u8>,
}

impl Operation {
    pub fn new(command: SourceCommand, vbucket_id: u16, key: impl Into<Bytes>) -> Self {
        Self {
            command,
            vbucket_id,
            key: key.into(),
            flags: 0,
            expiry: 0,
            cas: 0,
            meta: Bytes::new(),
            value: OpValue::empty(),
            datatype: 0,
            conflict_resolution: None,
        }
    }

    pub fn mutation(vbucket_id: u16, key: impl Into<Bytes>, value: impl Into<OpValue>) -> Self {
        Self::new(SourceCommand::DcpMutation, vbucket_id, key).with_value(value)
    }

    pub fn deletion(vbucket_id: u16, key: impl Into<Bytes>) -> Self {
        Self::new(SourceCommand::DcpDelete, vbucket_id, key)
    }

    pub fn get(vbucket_id: u16, key: impl Into<Bytes>) -> Self {
        Self::new(SourceCommand::Get, vbucket_id, key)
    }

    pub fn subdoc_mutation(vbucket_id: u16, key: impl Into<Bytes>, fields: SubdocFields) -> Self {
        Self::new(SourceCommand::SubdocMultiMutation, vbucket_id, key).with_value(fields)
    }

    pub fn subdoc_lookup(vbucket_id: u16, key: impl Into<Bytes>, fields: SubdocFields) -> Self {
        Self::new(SourceCommand::SubdocMultiLookup, vbucket_id, key).with_value(fields)
    }

    pub fn with_value(mut self, value: impl Into<OpValue>) -> Self {
        self.value = value.into();
        self
    }

    pub fn with_meta(mut self, meta: impl Into<Bytes>) -> Self {
        self.meta = meta.into();
        self
    }

    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_expiry(mut self, expiry: u32) -> Self {
        self.expiry = expiry;
        self
    }

    pub fn with_cas(mut self, cas: u64) -> Self {
        self.cas = cas;
        self
    }

    pub fn with_datatype(mut self, datatype: u8) -> Self {
        self.datatype = datatype;
        self
    }

    pub fn with_conflict_resolution(mut self, mode: u8) -> Self {
        self.conflict_resolution = Some(mode);
        self
    }

    pub fn has_meta(&self) -> bool {
        !self.meta.is_empty()
    }
}

/// Ordered operations; position is the opaque correlating request and response.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Batch {
    ops: Vec<Operation>,
}

impl Batch {
    pub fn new(ops: Vec<Operation>) -> Self {
        Self { ops }
    }

    pub fn ops(&self) -> &[Operation] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Operation> {
        self.ops.iter()
    }

    pub fn payload_bytes(&self) -> usize {
        self.ops.iter().map(|op| op.key.len() + op.value.len()).sum()
    }
}

impl FromIterator<Operation> for Batch {
    fn from_iter<I: IntoIterator<Item = Operation>>(iter: I) -> Self {
        Self {
            ops: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Batch {
    type Item = &'a Operation;
    type IntoIter = std::slice::Iter<'a, Operation>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.iter()
    }
}
