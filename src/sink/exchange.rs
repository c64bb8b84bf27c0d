//! Scatter/gather of one batch over one connection.
//!
//! Scatter encodes every eligible operation and flushes them in a single
//! write. Gather then reads exactly one response per sent operation, in
//! order, and folds the statuses into an [`Outcome`].

use std::io::{Read, Write};
use std::sync::Arc;

use bytes::BytesMut;
use regex::bytes::Regex;

use crate::config::{ConfigError, SinkConfig};
use crate::sink::compress::{Decompressor, Snappy, prepare_value};
use crate::sink::conn::Connection;
use crate::sink::error::{EncodeError, ProtocolError, SinkError};
use crate::sink::frame::{
    encode_command, encode_multipath_lookup, encode_multipath_mutation, force_flags,
};
use crate::sink::op::{Batch, OpValue, Operation, SourceCommand};
use crate::sink::proto::{Opcode, Status};
use crate::sink::stats::SinkStats;
use crate::sink::tag_user_data;
use crate::sink::translate::{CommandSet, CommandTranslator, DestinationOp};

/// What the batch needs after a clean gather pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Outcome {
    /// Resend the whole batch.
    pub retry: bool,
    /// Refresh the cluster map before resending.
    pub refresh: bool,
}

impl Outcome {
    pub fn needs_backoff(&self) -> bool {
        self.retry
    }
}

pub struct Exchange {
    operation: DestinationOp,
    translator: CommandTranslator,
    key_filter: Option<Regex>,
    vbucket_filter: Option<u16>,
    uncompress: bool,
    retry_on_topology_change: bool,
    force: u32,
    codec: Box<dyn Decompressor>,
    stats: Arc<SinkStats>,
}

impl Exchange {
    pub fn new(
        config: &SinkConfig,
        lww_restore: bool,
        stats: Arc<SinkStats>,
    ) -> Result<Self, ConfigError> {
        let key_filter = config
            .key_filter
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|err| ConfigError::Invalid(format!("key_filter: {err}")))?;
        Ok(Self {
            operation: config.operation(),
            translator: CommandTranslator::new(config.try_metadata_commands),
            key_filter,
            vbucket_filter: config.vbucket_filter,
            uncompress: config.uncompress_values,
            retry_on_topology_change: config.retry_on_topology_change,
            force: force_flags(config.conflict_resolution_enabled, lww_restore),
            codec: Box::new(Snappy),
            stats,
        })
    }

    pub fn with_decompressor(mut self, codec: Box<dyn Decompressor>) -> Self {
        self.codec = codec;
        self
    }

    pub fn command_set(&self) -> CommandSet {
        self.translator.command_set()
    }

    pub fn force(&self) -> u32 {
        self.force
    }

    pub fn scatter_gather<S: Read + Write>(
        &mut self,
        conn: &mut Connection<S>,
        batch: &Batch,
    ) -> Result<Outcome, SinkError> {
        let skipped = self.skip_mask(batch);
        self.scatter(conn, batch, &skipped)?;
        self.gather(conn, batch, &skipped)
    }

    /// Marks operations to leave out of this pass. Logs once per pass.
    fn skip_mask(&self, batch: &Batch) -> Vec<bool> {
        let mut filtered_keys = 0usize;
        let mask: Vec<bool> = batch
            .iter()
            .map(|op| {
                if self.key_filtered(op) {
                    filtered_keys += 1;
                    return true;
                }
                self.vbucket_filter
                    .is_some_and(|vbucket_id| vbucket_id != op.vbucket_id)
            })
            .collect();
        if filtered_keys > 0 {
            tracing::warn!(
                filtered = filtered_keys,
                ops = batch.len(),
                "skipping operations with filtered keys"
            );
        }
        let skipped = mask.iter().filter(|skip| **skip).count();
        self.stats.record_ops_skipped(skipped as u64);
        mask
    }

    fn key_filtered(&self, op: &Operation) -> bool {
        let filtered = self
            .key_filter
            .as_ref()
            .is_some_and(|filter| !filter.is_match(&op.key));
        if filtered {
            tracing::debug!(key = %tag_user_data(&op.key), "key excluded by key_filter");
        }
        filtered
    }

    /// Frames encoded before a failing operation are still flushed.
    fn scatter<S: Read + Write>(
        &mut self,
        conn: &mut Connection<S>,
        batch: &Batch,
        skipped: &[bool],
    ) -> Result<(), SinkError> {
        let mut out = BytesMut::new();
        let mut sent = 0u64;
        let mut failure = None;
        for (index, op) in batch.iter().enumerate() {
            if skipped[index] {
                continue;
            }
            if let Err(err) = self.encode_op(&mut out, op, opaque_for(index)) {
                failure = Some(err);
                break;
            }
            sent += 1;
        }

        if !out.is_empty() {
            conn.send(&out)?;
        }
        self.stats.record_ops_sent(sent);
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn encode_op(
        &mut self,
        out: &mut BytesMut,
        op: &Operation,
        opaque: u32,
    ) -> Result<(), SinkError> {
        match op.command {
            SourceCommand::SubdocMultiMutation => encode_multipath_mutation(out, op, opaque)?,
            SourceCommand::SubdocMultiLookup => encode_multipath_lookup(out, op, opaque)?,
            source => {
                let opcode = self
                    .translator
                    .translate(source, self.operation, op.has_meta())?;
                let OpValue::Raw(raw) = &op.value else {
                    return Err(EncodeError::UnexpectedSubdocValue { opcode }.into());
                };
                let value = prepare_value(raw, op.datatype, self.uncompress, self.codec.as_ref());
                let force = if opcode.carries_metadata() { self.force } else { 0 };
                encode_command(out, opcode, op, &value, opaque, force)?;
            }
        }
        Ok(())
    }

    fn gather<S: Read + Write>(
        &mut self,
        conn: &mut Connection<S>,
        batch: &Batch,
        skipped: &[bool],
    ) -> Result<Outcome, SinkError> {
        let mut outcome = Outcome::default();
        let mut downgraded = false;

        for (index, op) in batch.iter().enumerate() {
            if skipped[index] {
                continue;
            }
            let response = conn.read_response()?;
            let expected = opaque_for(index);
            if response.opaque != expected {
                return Err(ProtocolError::OpaqueMismatch {
                    expected,
                    got: response.opaque,
                }
                .into());
            }

            match response.status {
                Status::Success | Status::KeyExists => {}
                Status::KeyNotFound => {
                    if !op.command.is_deletion() && op.command != SourceCommand::Get {
                        tracing::warn!(
                            peer = %conn.peer(),
                            key = %tag_user_data(&op.key),
                            "item not found"
                        );
                    }
                }
                status if status.is_transient() => {
                    tracing::debug!(
                        opaque = expected,
                        "{}; batch will be retried",
                        SinkError::TransientServer { status }
                    );
                    outcome.retry = true;
                }
                Status::NotMyVbucket => {
                    let err = SinkError::TopologyChanged {
                        vbucket_id: op.vbucket_id,
                        key: tag_user_data(&op.key),
                        peer: conn.peer().to_string(),
                    };
                    if !self.retry_on_topology_change {
                        return Err(err);
                    }
                    tracing::warn!("{err}");
                    self.stats.record_not_my_vbucket();
                    outcome.retry = true;
                    outcome.refresh = true;
                }
                Status::UnknownCommand => match self.translator.command_set() {
                    CommandSet::WithMeta => {
                        let command =
                            Opcode::from_code(response.opcode).map_or("unknown", Opcode::as_str);
                        tracing::warn!(
                            command,
                            "{}",
                            SinkError::CapabilityMismatch {
                                opcode: response.opcode
                            }
                        );
                        self.translator.downgrade();
                        downgraded = true;
                        outcome.retry = true;
                    }
                    // Frames of this pass were built before the downgrade.
                    CommandSet::Plain if downgraded => {}
                    CommandSet::Plain => {
                        return Err(ProtocolError::UnknownCommand {
                            opcode: response.opcode,
                        }
                        .into());
                    }
                },
                Status::AccessDenied => {
                    return Err(SinkError::AccessDenied {
                        context: access_context(&response.value),
                    });
                }
                status => {
                    return Err(ProtocolError::UnexpectedStatus {
                        status,
                        opcode: response.opcode,
                    }
                    .into());
                }
            }
        }
        Ok(outcome)
    }
}

fn opaque_for(index: usize) -> u32 {
    index as u32
}

/// `error.context` of an access-denied body, or the raw body as text.
fn access_context(body: &[u8]) -> String {
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .pointer("/error/context")
                .and_then(serde_json::Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned())
}
