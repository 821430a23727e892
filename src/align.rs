//! Block-start alignment and the 31-bit offset budget.
//!
//! Index entries keep 31 bits of `offset >> alignment_shift`.  A shift that
//! is too small for the image makes late offsets spill into the plain flag,
//! so the shift is checked against the worst-case container size before
//! any block is written.

use std::io::{self, Read, Write};

use crate::error::{Error, Result};
use crate::index::OFFSET_MASK;

pub const MAX_ALIGNMENT_SHIFT: u8 = 31;

/// What to do when the configured shift cannot address the whole container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlignmentPolicy {
    /// Raise the shift to the smallest sufficient value.
    #[default]
    Raise,
    /// Fail with [`Error::Alignment`].
    Refuse,
}

/// Bytes of padding needed to bring `cursor` to the next aligned position.
#[inline]
pub fn padding_len(cursor: u64, shift: u8) -> u64 {
    let unit = 1u64 << shift;
    cursor.wrapping_neg() & (unit - 1)
}

/// Pad `writer` from `cursor` up to alignment and return the new cursor.
pub fn write_padding<W: Write>(writer: &mut W, cursor: u64, shift: u8, pad: u8) -> io::Result<u64> {
    let len = padding_len(cursor, shift);
    if len != 0 {
        io::copy(&mut io::repeat(pad).take(len), writer)?;
    }
    Ok(cursor + len)
}

/// Largest end position the container can reach with `shift`: every block
/// stored plain and every block start padded by a full unit minus one.
pub fn worst_case_end(data_start: u64, total_size: u64, block_count: u64, shift: u8) -> u64 {
    let unit_slack = (1u64 << shift) - 1;
    data_start
        .saturating_add(total_size)
        .saturating_add(block_count.saturating_mul(unit_slack))
}

/// Smallest shift whose worst-case end still fits the 31-bit offset field.
pub fn min_alignment_shift(data_start: u64, total_size: u64, block_count: u64) -> Option<u8> {
    (0..=MAX_ALIGNMENT_SHIFT).find(|&s| {
        worst_case_end(data_start, total_size, block_count, s) >> s <= OFFSET_MASK as u64
    })
}

/// Resolve the shift a conversion will actually use.
pub fn resolve_alignment_shift(
    requested: u8,
    policy: AlignmentPolicy,
    data_start: u64,
    total_size: u64,
    block_count: u64,
) -> Result<u8> {
    let required = min_alignment_shift(data_start, total_size, block_count).ok_or_else(|| {
        Error::Config(format!("{total_size} bytes cannot be addressed by any alignment shift"))
    })?;
    if requested >= required {
        return Ok(requested);
    }
    match policy {
        AlignmentPolicy::Raise => {
            log::warn!(
                "alignment shift {requested} cannot address {total_size} bytes, raising to {required}"
            );
            Ok(required)
        }
        AlignmentPolicy::Refuse => Err(Error::Alignment {
            block: block_count,
            offset: worst_case_end(data_start, total_size, block_count, requested),
            shift: requested,
        }),
    }
}
