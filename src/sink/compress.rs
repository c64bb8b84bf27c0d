//! Value decompression applied before framing.

use bytes::Bytes;

use crate::sink::proto::DATATYPE_SNAPPY;

pub trait Decompressor: Send + Sync {
    fn decompress(&self, input: &[u8]) -> Result<Vec<u8>, String>;
}

/// Snappy raw-format codec, matching the server's compressed datatype.
#[derive(Clone, Copy, Debug, Default)]
pub struct Snappy;

impl Decompressor for Snappy {
    fn decompress(&self, input: &[u8]) -> Result<Vec<u8>, String> {
        snap::raw::Decoder::new()
            .decompress_vec(input)
            .map_err(|err| err.to_string())
    }
}

/// Returns the value to frame for a document.
///
/// A failed decompression forwards the original compressed bytes unchanged.
pub fn prepare_value(
    value: &Bytes,
    datatype: u8,
    uncompress: bool,
    codec: &dyn Decompressor,
) -> Bytes {
    if !uncompress || datatype & DATATYPE_SNAPPY == 0 || value.is_empty() {
        return value.clone();
    }
    match codec.decompress(value) {
        Ok(plain) => Bytes::from(plain),
        Err(err) => {
            tracing::debug!(error = %err, "value decompression failed, sending compressed bytes");
            value.clone()
        }
    }
}
