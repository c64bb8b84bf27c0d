//! Request/response framing for the binary memcached protocol.
//!
//! Every frame is a fixed 24-byte big-endian header followed by
//! `extras + key + value`. Requests carry the vbucket id where responses
//! carry the status code; the header is otherwise identical.

use bytes::{BufMut, Bytes, BytesMut};

use crate::sink::error::{EncodeError, ProtocolError};
use crate::sink::op::{OpValue, Operation, SubdocFields};
use crate::sink::proto::{
    DATATYPE_XATTR, EXTRA_META_CONFLICT_RESOLUTION, EXTRA_META_VERSION, FORCE_ACCEPT_WITH_META,
    FORCE_LWW_RESTORE, HEADER_LEN, MAX_BODY_LEN, Opcode, REQ_MAGIC, RES_MAGIC, SUBDOC_DOC_FLAG_MKDOC,
    SUBDOC_FLAG_XATTR_PATH, Status,
};

const WITH_META_EXTRAS_LEN: usize = 28;
const SUBDOC_MUTATION_SPEC_LEN: usize = 8;
const SUBDOC_LOOKUP_SPEC_LEN: usize = 4;

/// A request ready to be serialised. Lengths are derived from the slices.
#[derive(Clone, Copy, Debug)]
pub struct RequestFrame<'a> {
    pub opcode: Opcode,
    pub vbucket_id: u16,
    pub key: &'a [u8],
    pub extras: &'a [u8],
    pub value: &'a [u8],
    pub opaque: u32,
    pub cas: u64,
    pub datatype: u8,
}

impl<'a> RequestFrame<'a> {
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            vbucket_id: 0,
            key: &[],
            extras: &[],
            value: &[],
            opaque: 0,
            cas: 0,
            datatype: 0,
        }
    }

    pub fn body_len(&self) -> usize {
        self.extras.len() + self.key.len() + self.value.len()
    }

    pub fn encode_into(&self, out: &mut BytesMut) -> Result<(), EncodeError> {
        let key_len = u16::try_from(self.key.len())
            .map_err(|_| EncodeError::KeyTooLong { len: self.key.len() })?;
        let extras_len = u8::try_from(self.extras.len()).map_err(|_| {
            EncodeError::ExtrasTooLong {
                len: self.extras.len(),
            }
        })?;
        let body_len = u32::try_from(self.body_len()).map_err(|_| EncodeError::BodyTooLarge {
            len: self.body_len(),
        })?;

        out.reserve(HEADER_LEN + self.body_len());
        out.put_u8(REQ_MAGIC);
        out.put_u8(self.opcode.code());
        out.put_u16(key_len);
        out.put_u8(extras_len);
        out.put_u8(self.datatype);
        out.put_u16(self.vbucket_id);
        out.put_u32(body_len);
        out.put_u32(self.opaque);
        out.put_u64(self.cas);
        out.put_slice(self.extras);
        out.put_slice(self.key);
        out.put_slice(self.value);
        Ok(())
    }

    pub fn encode(&self) -> Result<Bytes, EncodeError> {
        let mut out = BytesMut::new();
        self.encode_into(&mut out)?;
        Ok(out.freeze())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResponseHeader {
    pub opcode: u8,
    pub key_len: u16,
    pub extras_len: u8,
    pub datatype: u8,
    pub status: u16,
    pub body_len: u32,
    pub opaque: u32,
    pub cas: u64,
}

pub fn decode_response_header(buf: &[u8]) -> Result<ResponseHeader, ProtocolError> {
    if buf.len() < HEADER_LEN {
        return Err(ProtocolError::ShortHeader { len: buf.len() });
    }
    if buf[0] != RES_MAGIC {
        return Err(ProtocolError::BadMagic {
            expected: RES_MAGIC,
            got: buf[0],
        });
    }
    let header = ResponseHeader {
        opcode: buf[1],
        key_len: u16::from_be_bytes([buf[2], buf[3]]),
        extras_len: buf[4],
        datatype: buf[5],
        status: u16::from_be_bytes([buf[6], buf[7]]),
        body_len: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        opaque: u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]),
        cas: u64::from_be_bytes([
            buf[16], buf[17], buf[18], buf[19], buf[20], buf[21], buf[22], buf[23],
        ]),
    };
    if header.body_len > MAX_BODY_LEN {
        return Err(ProtocolError::BodyTooLarge {
            body_len: header.body_len,
            max: MAX_BODY_LEN,
        });
    }
    if (header.extras_len as u32) + (header.key_len as u32) > header.body_len {
        return Err(ProtocolError::InconsistentLengths {
            body_len: header.body_len,
            extras_len: header.extras_len,
            key_len: header.key_len,
        });
    }
    Ok(header)
}

/// A fully read response frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    pub opcode: u8,
    pub status: Status,
    pub datatype: u8,
    pub extras: Bytes,
    pub key: Bytes,
    pub value: Bytes,
    pub cas: u64,
    pub opaque: u32,
}

impl Response {
    pub fn from_parts(header: ResponseHeader, mut body: Bytes) -> Self {
        let extras = body.split_to((header.extras_len as usize).min(body.len()));
        let key = body.split_to((header.key_len as usize).min(body.len()));
        Self {
            opcode: header.opcode,
            status: Status::from_code(header.status),
            datatype: header.datatype,
            extras,
            key,
            value: body,
            cas: header.cas,
            opaque: header.opaque,
        }
    }
}

/// Sequence field of a `*_WITH_META` extras block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeqnoField {
    Numeric(u64),
    Raw([u8; 8]),
}

impl SeqnoField {
    pub fn to_be_bytes(self) -> [u8; 8] {
        match self {
            SeqnoField::Numeric(seqno) => seqno.to_be_bytes(),
            SeqnoField::Raw(raw) => raw,
        }
    }
}

/// Derive the wire sequence field from an operation's textual metadata.
///
/// Decimal metadata is packed as a big-endian integer. Anything else is
/// treated as a legacy raw token: truncated to its first 8 bytes, or
/// zero-filled on the left when shorter. An all-zero token falls back to 1.
pub fn encode_seqno(meta: &[u8]) -> SeqnoField {
    if meta.is_empty() {
        return SeqnoField::Numeric(1);
    }
    if let Some(seqno) = std::str::from_utf8(meta)
        .ok()
        .and_then(|text| text.trim().parse::<u64>().ok())
    {
        return SeqnoField::Numeric(seqno);
    }

    let mut raw = [0u8; 8];
    if meta.len() >= 8 {
        raw.copy_from_slice(&meta[..8]);
    } else {
        raw[8 - meta.len()..].copy_from_slice(meta);
    }
    if u64::from_be_bytes(raw) != 0 {
        SeqnoField::Raw(raw)
    } else {
        SeqnoField::Numeric(1)
    }
}

pub fn force_flags(conflict_resolution_enabled: bool, lww_restore: bool) -> u32 {
    let mut force = 0;
    if !conflict_resolution_enabled {
        force |= FORCE_ACCEPT_WITH_META;
    }
    if lww_restore {
        force |= FORCE_LWW_RESTORE;
    }
    force
}

pub fn set_extras(flags: u32, expiry: u32) -> [u8; 8] {
    let mut extras = [0u8; 8];
    extras[..4].copy_from_slice(&flags.to_be_bytes());
    extras[4..].copy_from_slice(&expiry.to_be_bytes());
    extras
}

/// Extended-metadata block carrying a conflict-resolution mode.
pub fn extended_meta(conflict_mode: u8) -> [u8; 5] {
    [
        EXTRA_META_VERSION,
        EXTRA_META_CONFLICT_RESOLUTION,
        0x00,
        0x01,
        conflict_mode,
    ]
}

pub fn with_meta_extras(
    flags: u32,
    expiry: u32,
    seqno: SeqnoField,
    cas: u64,
    force: u32,
    ext_meta_len: Option<u16>,
) -> BytesMut {
    let mut extras = BytesMut::with_capacity(WITH_META_EXTRAS_LEN + 2);
    extras.put_u32(flags);
    extras.put_u32(expiry);
    extras.put_slice(&seqno.to_be_bytes());
    extras.put_u64(cas);
    extras.put_u32(force);
    if let Some(len) = ext_meta_len {
        extras.put_u16(len);
    }
    extras
}

/// Serialise one translated command for `op` into `out`.
///
/// `value` is the payload after any decompression. Only the XATTR bit of
/// the operation's datatype survives onto the wire.
pub fn encode_command(
    out: &mut BytesMut,
    opcode: Opcode,
    op: &Operation,
    value: &[u8],
    opaque: u32,
    force: u32,
) -> Result<(), EncodeError> {
    let mut key: &[u8] = &op.key;
    let mut value = value;
    let (mut flags, mut expiry, mut cas) = (op.flags, op.expiry, op.cas);

    match opcode {
        Opcode::Get => {
            value = &[];
            (flags, expiry, cas) = (0, 0, 0);
        }
        Opcode::Noop => {
            key = &[];
            value = &[];
            (flags, expiry, cas) = (0, 0, 0);
        }
        Opcode::Delete => value = &[],
        Opcode::DeleteWithMeta if op.datatype & DATATYPE_XATTR == 0 => value = &[],
        _ => {}
    }

    let ext_meta = op
        .conflict_resolution
        .filter(|mode| *mode != 0)
        .map(extended_meta);

    let extras: BytesMut = match opcode {
        Opcode::SetWithMeta | Opcode::AddWithMeta | Opcode::DeleteWithMeta => {
            let seqno = encode_seqno(&op.meta);
            let ext_meta_len = ext_meta.as_ref().map(|block| block.len() as u16);
            with_meta_extras(flags, expiry, seqno, cas, force, ext_meta_len)
        }
        Opcode::Set | Opcode::Add => BytesMut::from(&set_extras(flags, expiry)[..]),
        Opcode::Delete | Opcode::Get | Opcode::Noop => BytesMut::new(),
        other => return Err(EncodeError::UnsupportedOpcode { opcode: other }),
    };

    let mut payload = BytesMut::with_capacity(value.len() + 5);
    payload.put_slice(value);
    if opcode.carries_metadata()
        && let Some(block) = ext_meta
    {
        payload.put_slice(&block);
    }

    RequestFrame {
        opcode,
        vbucket_id: op.vbucket_id,
        key,
        extras: &extras,
        value: &payload,
        opaque,
        cas: 0,
        datatype: op.datatype & DATATYPE_XATTR,
    }
    .encode_into(out)
}

fn subdoc_field<'a>(
    field: &'a Option<Bytes>,
    context: &'static str,
    name: &'static str,
) -> Result<&'a Bytes, EncodeError> {
    field.as_ref().ok_or(EncodeError::MissingSubdocField {
        context,
        field: name,
    })
}

fn subdoc_fields<'a>(value: &'a OpValue, opcode: Opcode) -> Result<&'a SubdocFields, EncodeError> {
    match value {
        OpValue::Subdoc(fields) => Ok(fields),
        OpValue::Raw(_) => Err(EncodeError::MissingSubdocField {
            context: opcode.as_str(),
            field: "xattr_f",
        }),
    }
}

fn spec_len(len: usize, limit: usize) -> Result<(), EncodeError> {
    if len > limit {
        return Err(EncodeError::BodyTooLarge { len });
    }
    Ok(())
}

/// Multi-path mutation: upsert one XATTR path, then replace the body.
pub fn encode_multipath_mutation(
    out: &mut BytesMut,
    op: &Operation,
    opaque: u32,
) -> Result<(), EncodeError> {
    const CONTEXT: &str = "multipath mutation";
    let fields = subdoc_fields(&op.value, Opcode::SubdocMultiMutation)?;
    let body = subdoc_field(&fields.body, CONTEXT, "obj")?;
    let xattr_field = subdoc_field(&fields.xattr_field, CONTEXT, "xattr_f")?;
    let xattr_value = subdoc_field(&fields.xattr_value, CONTEXT, "xattr_v")?;
    spec_len(xattr_field.len(), u16::MAX as usize)?;
    spec_len(xattr_value.len(), u32::MAX as usize)?;
    spec_len(body.len(), u32::MAX as usize)?;

    let mut specs = BytesMut::with_capacity(
        SUBDOC_MUTATION_SPEC_LEN * 2 + body.len() + xattr_field.len() + xattr_value.len(),
    );
    specs.put_u8(Opcode::SubdocDictUpsert.code());
    specs.put_u8(SUBDOC_FLAG_XATTR_PATH);
    specs.put_u16(xattr_field.len() as u16);
    specs.put_u32(xattr_value.len() as u32);
    specs.put_slice(xattr_field);
    specs.put_slice(xattr_value);
    specs.put_u8(Opcode::Set.code());
    specs.put_u8(0);
    specs.put_u16(0);
    specs.put_u32(body.len() as u32);
    specs.put_slice(body);

    RequestFrame {
        opcode: Opcode::SubdocMultiMutation,
        vbucket_id: op.vbucket_id,
        key: &op.key,
        extras: &[SUBDOC_DOC_FLAG_MKDOC],
        value: &specs,
        opaque,
        cas: op.cas,
        datatype: 0,
    }
    .encode_into(out)
}

/// Multi-path lookup: fetch one XATTR path, then the whole body.
pub fn encode_multipath_lookup(
    out: &mut BytesMut,
    op: &Operation,
    opaque: u32,
) -> Result<(), EncodeError> {
    let fields = subdoc_fields(&op.value, Opcode::SubdocMultiLookup)?;
    let xattr_field = subdoc_field(&fields.xattr_field, "multipath lookup", "xattr_f")?;
    spec_len(xattr_field.len(), u16::MAX as usize)?;

    let mut specs = BytesMut::with_capacity(SUBDOC_LOOKUP_SPEC_LEN * 2 + xattr_field.len());
    specs.put_u8(Opcode::SubdocGet.code());
    specs.put_u8(SUBDOC_FLAG_XATTR_PATH);
    specs.put_u16(xattr_field.len() as u16);
    specs.put_slice(xattr_field);
    specs.put_u8(Opcode::Get.code());
    specs.put_u8(0);
    specs.put_u16(0);

    RequestFrame {
        opcode: Opcode::SubdocMultiLookup,
        vbucket_id: op.vbucket_id,
        key: &op.key,
        extras: &[],
        value: &specs,
        opaque,
        cas: op.cas,
        datatype: 0,
    }
    .encode_into(out)
}
