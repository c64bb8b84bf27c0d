//! Maps source commands onto concrete wire commands.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::sink::error::TranslateError;
use crate::sink::op::SourceCommand;
use crate::sink::proto::Opcode;

/// What the destination should do with each record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationOp {
    Get,
    #[default]
    Set,
    Add,
    Delete,
}

impl DestinationOp {
    pub fn as_str(self) -> &'static str {
        match self {
            DestinationOp::Get => "get",
            DestinationOp::Set => "set",
            DestinationOp::Add => "add",
            DestinationOp::Delete => "delete",
        }
    }
}

impl fmt::Display for DestinationOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DestinationOp {
    type Err = TranslateError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "get" => Ok(DestinationOp::Get),
            "set" => Ok(DestinationOp::Set),
            "add" => Ok(DestinationOp::Add),
            "delete" => Ok(DestinationOp::Delete),
            other => Err(TranslateError::UnsupportedOperation {
                op: other.to_string(),
            }),
        }
    }
}

/// Which command family the sink currently speaks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandSet {
    Plain,
    WithMeta,
}

impl CommandSet {
    pub fn opcode(self, op: DestinationOp) -> Opcode {
        match (self, op) {
            (_, DestinationOp::Get) => Opcode::Get,
            (CommandSet::Plain, DestinationOp::Set) => Opcode::Set,
            (CommandSet::Plain, DestinationOp::Add) => Opcode::Add,
            (CommandSet::Plain, DestinationOp::Delete) => Opcode::Delete,
            (CommandSet::WithMeta, DestinationOp::Set) => Opcode::SetWithMeta,
            (CommandSet::WithMeta, DestinationOp::Add) => Opcode::AddWithMeta,
            (CommandSet::WithMeta, DestinationOp::Delete) => Opcode::DeleteWithMeta,
        }
    }
}

/// Per-sink translator. Once downgraded to plain commands it never upgrades.
#[derive(Clone, Debug)]
pub struct CommandTranslator {
    commands: CommandSet,
}

impl CommandTranslator {
    pub fn new(try_metadata_commands: bool) -> Self {
        let commands = if try_metadata_commands {
            CommandSet::WithMeta
        } else {
            CommandSet::Plain
        };
        Self { commands }
    }

    pub fn command_set(&self) -> CommandSet {
        self.commands
    }

    pub fn downgrade(&mut self) {
        self.commands = CommandSet::Plain;
    }

    pub fn translate(
        &mut self,
        source: SourceCommand,
        op: DestinationOp,
        has_meta: bool,
    ) -> Result<Opcode, TranslateError> {
        if !has_meta {
            // No revision metadata from the source: *_WITH_META is impossible.
            self.downgrade();
        }

        match source {
            SourceCommand::TapMutation | SourceCommand::DcpMutation => {
                Ok(self.commands.opcode(op))
            }
            SourceCommand::TapDelete | SourceCommand::DcpDelete => match op {
                DestinationOp::Get => Ok(Opcode::Noop),
                _ => Ok(self.commands.opcode(DestinationOp::Delete)),
            },
            SourceCommand::Get => Ok(Opcode::Get),
            SourceCommand::SubdocMultiMutation
            | SourceCommand::SubdocMultiLookup
            | SourceCommand::Other(_) => Err(TranslateError::UnknownSourceCommand {
                code: source.code(),
                op: op.to_string(),
            }),
        }
    }
}
