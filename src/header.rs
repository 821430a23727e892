//! Fixed 24-byte container header.
//!
//! ```text
//! 0x00  u32  magic          "CISO" (deflate) or "ZISO" (LZ4)
//! 0x04  u32  header_size    header + index table, in bytes
//! 0x08  u64  total_size     uncompressed image size
//! 0x10  u32  block_size     uncompressed bytes per block
//! 0x14  u8   version
//! 0x15  u8   alignment_shift
//! 0x16  u16  reserved (zero)
//! ```
//!
//! All numeric fields are little-endian.

use byteorder::{ByteOrder, LittleEndian};
use std::io::{self, Read, Write};
use thiserror::Error;

/// `"CISO"` read as a little-endian u32.
pub const CISO_MAGIC: u32 = 0x4F53_4943;
/// `"ZISO"` read as a little-endian u32.
pub const ZISO_MAGIC: u32 = 0x4F53_495A;

pub const HEADER_SIZE: usize = 0x18;
pub const VERSION: u8 = 1;
pub const DEFAULT_BLOCK_SIZE: u32 = 0x800;
pub const INDEX_ENTRY_SIZE: u64 = 4;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("Unrecognised container magic 0x{0:08X}")]
    UnknownMagic(u32),
    #[error("Block size is zero")]
    ZeroBlockSize,
    #[error("Total size is zero")]
    ZeroTotalSize,
    #[error("Header declares {declared} bytes before the first block, expected {expected}")]
    HeaderSizeMismatch { declared: u32, expected: u64 },
    #[error("Image needs {0} blocks, more than the index table can address")]
    TooManyBlocks(u64),
    #[error("Index table truncated: expected {expected} bytes, got {actual}")]
    TruncatedIndex { expected: u64, actual: u64 },
    #[error("Index entry {block} points before its predecessor")]
    IndexNotMonotonic { block: u64 },
    #[error("Index sentinel carries the plain-storage flag")]
    FlaggedSentinel,
    #[error("Alignment shift {0} exceeds 31")]
    BadAlignmentShift(u8),
}

/// Closed set of container variants; each tag owns one compression scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatTag {
    /// Deflate blocks.
    Ciso,
    /// LZ4 blocks.
    Ziso,
}

impl FormatTag {
    #[inline]
    pub fn magic(self) -> u32 {
        match self {
            FormatTag::Ciso => CISO_MAGIC,
            FormatTag::Ziso => ZISO_MAGIC,
        }
    }

    pub fn from_magic(magic: u32) -> Result<Self, FormatError> {
        match magic {
            CISO_MAGIC => Ok(FormatTag::Ciso),
            ZISO_MAGIC => Ok(FormatTag::Ziso),
            other => Err(FormatError::UnknownMagic(other)),
        }
    }

    /// Name of the compression scheme (diagnostics only).
    pub fn scheme(self) -> &'static str {
        match self {
            FormatTag::Ciso => "deflate",
            FormatTag::Ziso => "lz4",
        }
    }

    /// Conventional file extension.
    pub fn extension(self) -> &'static str {
        match self {
            FormatTag::Ciso => "cso",
            FormatTag::Ziso => "zso",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ContainerHeader {
    pub format: FormatTag,
    pub header_size: u32,
    pub total_size: u64,
    pub block_size: u32,
    pub version: u8,
    pub alignment_shift: u8,
}

impl ContainerHeader {
    /// Build a header for a fresh container, deriving `header_size` from the
    /// block count.
    pub fn new(
        format: FormatTag,
        total_size: u64,
        block_size: u32,
        alignment_shift: u8,
    ) -> Result<Self, FormatError> {
        if block_size == 0 {
            return Err(FormatError::ZeroBlockSize);
        }
        if total_size == 0 {
            return Err(FormatError::ZeroTotalSize);
        }
        let header_size = prefix_size(total_size, block_size)
            .and_then(|p| u32::try_from(p).ok())
            .ok_or(FormatError::TooManyBlocks(block_count(total_size, block_size)))?;
        Ok(Self {
            format,
            header_size,
            total_size,
            block_size,
            version: VERSION,
            alignment_shift,
        })
    }

    /// Number of data blocks; the last one may be short.
    #[inline]
    pub fn block_count(&self) -> u64 {
        block_count(self.total_size, self.block_size)
    }

    /// Byte offset of the first block payload (before alignment padding).
    /// Saturates for hand-built headers whose index could not be addressed.
    #[inline]
    pub fn data_start(&self) -> u64 {
        prefix_size(self.total_size, self.block_size).unwrap_or(u64::MAX)
    }

    /// Uncompressed length of block `i`.
    pub fn block_len(&self, i: u64) -> usize {
        let start = i * self.block_size as u64;
        (self.total_size - start).min(self.block_size as u64) as usize
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        LittleEndian::write_u32(&mut buf[0x00..0x04], self.format.magic());
        LittleEndian::write_u32(&mut buf[0x04..0x08], self.header_size);
        LittleEndian::write_u64(&mut buf[0x08..0x10], self.total_size);
        LittleEndian::write_u32(&mut buf[0x10..0x14], self.block_size);
        buf[0x14] = self.version;
        buf[0x15] = self.alignment_shift;
        buf
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&self.encode())
    }

    /// Parse and validate a header.
    ///
    /// `header_size` must be either the full prefix (header plus index) or
    /// the legacy fixed `0x18` that many existing tools write.
    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Result<Self, FormatError> {
        let magic = LittleEndian::read_u32(&buf[0x00..0x04]);
        let header_size = LittleEndian::read_u32(&buf[0x04..0x08]);
        let total_size = LittleEndian::read_u64(&buf[0x08..0x10]);
        let block_size = LittleEndian::read_u32(&buf[0x10..0x14]);
        let version = buf[0x14];
        let alignment_shift = buf[0x15];

        let format = FormatTag::from_magic(magic)?;
        if block_size == 0 {
            return Err(FormatError::ZeroBlockSize);
        }
        if total_size == 0 {
            return Err(FormatError::ZeroTotalSize);
        }
        if alignment_shift > 31 {
            return Err(FormatError::BadAlignmentShift(alignment_shift));
        }
        // The index must be addressable by the u32 `header_size`, whatever
        // the field itself declares.
        let expected = prefix_size(total_size, block_size)
            .filter(|&p| p <= u32::MAX as u64)
            .ok_or(FormatError::TooManyBlocks(block_count(total_size, block_size)))?;
        if header_size as u64 != expected && header_size as usize != HEADER_SIZE {
            return Err(FormatError::HeaderSizeMismatch { declared: header_size, expected });
        }

        Ok(Self { format, header_size, total_size, block_size, version, alignment_shift })
    }

    pub fn read<R: Read>(mut reader: R) -> Result<Self, crate::Error> {
        let mut buf = [0u8; HEADER_SIZE];
        reader
            .read_exact(&mut buf)
            .map_err(|e| crate::Error::io("read header", 0, e))?;
        Ok(Self::decode(&buf)?)
    }
}

#[inline]
fn block_count(total_size: u64, block_size: u32) -> u64 {
    total_size.div_ceil(block_size as u64)
}

/// Header plus index table, or `None` if it does not fit a u64.
#[inline]
fn prefix_size(total_size: u64, block_size: u32) -> Option<u64> {
    block_count(total_size, block_size)
        .checked_add(1)?
        .checked_mul(INDEX_ENTRY_SIZE)?
        .checked_add(HEADER_SIZE as u64)
}

pub fn encode_header(header: &ContainerHeader) -> [u8; HEADER_SIZE] {
    header.encode()
}

pub fn decode_header(buf: &[u8; HEADER_SIZE]) -> Result<ContainerHeader, FormatError> {
    ContainerHeader::decode(buf)
}
