//! Block index: `block_count + 1` packed little-endian u32 entries.
//!
//! ```text
//! bit 31      plain-storage flag (block stored uncompressed)
//! bits 0..30  block start offset >> alignment_shift
//! ```
//!
//! The last entry is a sentinel holding the end of the final block
//! (floor-shifted) and never carries the flag.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};
use crate::header::{FormatError, INDEX_ENTRY_SIZE};

pub const PLAIN_FLAG: u32 = 0x8000_0000;
pub const OFFSET_MASK: u32 = 0x7FFF_FFFF;

/// Physical location of one stored block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSpan {
    pub offset: u64,
    /// Upper bound on the stored length; may run past the block into padding
    /// (and past EOF for the final block of an aligned container).
    pub length: u64,
    pub plain: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexTable {
    entries: Vec<u32>,
    alignment_shift: u8,
}

impl IndexTable {
    /// Zero-filled table for `block_count` blocks plus the sentinel.
    pub fn build(block_count: u64, alignment_shift: u8) -> Self {
        Self {
            entries: vec![0; block_count as usize + 1],
            alignment_shift,
        }
    }

    #[inline]
    pub fn block_count(&self) -> u64 {
        self.entries.len() as u64 - 1
    }

    #[inline]
    pub fn alignment_shift(&self) -> u8 {
        self.alignment_shift
    }

    /// Record block `i` starting at absolute byte `offset`.
    ///
    /// `offset` must already be aligned.  Fails with [`Error::Alignment`] if
    /// the shifted offset reaches into the flag bit.
    pub fn record(&mut self, i: u64, offset: u64, plain: bool) -> Result<()> {
        let count = self.block_count();
        if i >= count {
            return Err(Error::Index { block: i, block_count: count });
        }
        let packed = self.pack(i, offset)?;
        self.entries[i as usize] = if plain { packed | PLAIN_FLAG } else { packed };
        Ok(())
    }

    /// Set the sentinel to the final write position.
    pub fn finalize(&mut self, final_offset: u64) -> Result<()> {
        let count = self.block_count();
        self.entries[count as usize] = self.pack(count, final_offset)?;
        Ok(())
    }

    fn pack(&self, i: u64, offset: u64) -> Result<u32> {
        let shifted = offset >> self.alignment_shift;
        if shifted > OFFSET_MASK as u64 {
            return Err(Error::Alignment { block: i, offset, shift: self.alignment_shift });
        }
        Ok(shifted as u32)
    }

    #[inline]
    pub fn entry(&self, i: usize) -> u32 {
        self.entries[i]
    }

    /// Serialized size in bytes.
    #[inline]
    pub fn byte_len(&self) -> usize {
        self.entries.len() * INDEX_ENTRY_SIZE as usize
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.byte_len()];
        LittleEndian::write_u32_into(&self.entries, &mut out);
        out
    }

    /// Parse a full table, checking length, monotonic offsets and an
    /// unflagged sentinel.
    pub fn parse(bytes: &[u8], block_count: u64, alignment_shift: u8) -> Result<Self> {
        let expected = (block_count + 1) * INDEX_ENTRY_SIZE;
        if bytes.len() as u64 != expected {
            return Err(FormatError::TruncatedIndex { expected, actual: bytes.len() as u64 }.into());
        }
        let mut entries = vec![0u32; block_count as usize + 1];
        LittleEndian::read_u32_into(bytes, &mut entries);

        for (i, pair) in entries.windows(2).enumerate() {
            if pair[1] & OFFSET_MASK < pair[0] & OFFSET_MASK {
                return Err(FormatError::IndexNotMonotonic { block: i as u64 + 1 }.into());
            }
        }
        if entries[block_count as usize] & PLAIN_FLAG != 0 {
            return Err(FormatError::FlaggedSentinel.into());
        }
        Ok(Self { entries, alignment_shift })
    }

    /// Where block `i` lives in the container.
    pub fn block_span(&self, i: u64) -> Result<BlockSpan> {
        let count = self.block_count();
        if i >= count {
            return Err(Error::Index { block: i, block_count: count });
        }
        let shift = self.alignment_shift;
        let cur = self.entries[i as usize];
        let next = self.entries[i as usize + 1] & OFFSET_MASK;
        let start = (cur & OFFSET_MASK) as u64;

        let mut units = next as u64 - start;
        // The sentinel is floor-shifted, so an aligned final block may end up
        // to one alignment unit past it.  Every other entry is exact.
        if shift != 0 && i + 1 == count {
            units += 1;
        }
        Ok(BlockSpan {
            offset: start << shift,
            length: units << shift,
            plain: cur & PLAIN_FLAG != 0,
        })
    }

    /// Number of blocks stored uncompressed.
    pub fn plain_count(&self) -> u64 {
        let count = self.block_count() as usize;
        self.entries[..count].iter().filter(|e| *e & PLAIN_FLAG != 0).count() as u64
    }
}
