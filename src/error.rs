use std::io;
use thiserror::Error;

use crate::codec::CodecError;
use crate::header::FormatError;

pub type Result<T> = std::result::Result<T, Error>;

/// Every failure is fatal to the conversion in progress; nothing is retried.
#[derive(Error, Debug)]
pub enum Error {
    #[error("ciso/ziso file format error: {0}")]
    Format(#[from] FormatError),

    #[error("block {block}: 0x{offset:08X} {length} bytes failed to decode: {source}")]
    CorruptBlock {
        block: u64,
        offset: u64,
        length: u64,
        #[source]
        source: CodecError,
    },

    #[error(
        "Align error at block {block} (offset 0x{offset:X}, alignment shift {shift}): \
         offset collides with the plain-storage bit, increase the alignment shift"
    )]
    Alignment { block: u64, offset: u64, shift: u8 },

    #[error("Block {block} out of range (container holds {block_count} blocks)")]
    Index { block: u64, block_count: u64 },

    #[error("IO error during {op} at byte {pos}: {source}")]
    Io {
        op: &'static str,
        pos: u64,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Sector table line {line}: {reason}")]
    SectorTable { line: usize, reason: String },
}

impl Error {
    pub(crate) fn io(op: &'static str, pos: u64, source: io::Error) -> Self {
        Error::Io { op, pos, source }
    }
}
