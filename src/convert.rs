//! Path-level API and conversion options.
//!
//! ```no_run
//! use ciso::convert::{compress_file, decompress_file, CompressOptions};
//! use ciso::FormatTag;
//!
//! let opts = CompressOptions { format: FormatTag::Ziso, ..CompressOptions::default() };
//! let stats = compress_file("game.iso", "game.zso", &opts)?;
//! println!("{} bytes, {}%", stats.compressed_size, stats.ratio);
//!
//! decompress_file("game.zso", "restored.iso")?;
//! # Ok::<(), ciso::Error>(())
//! ```

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use crate::align::{AlignmentPolicy, MAX_ALIGNMENT_SHIFT};
use crate::block::{DEFAULT_LEVEL, DEFAULT_THRESHOLD};
use crate::error::{Error, Result};
use crate::header::{FormatTag, DEFAULT_BLOCK_SIZE};
use crate::io_stream::{CisoReader, CisoWriter, CompressStats, ContainerInfo};
use crate::parallel::DEFAULT_BATCH_BLOCKS;
use crate::sector::SectorTable;

pub const DEFAULT_PAD_BYTE: u8 = b'X';

/// Configuration for one compression run.
#[derive(Debug, Clone)]
pub struct CompressOptions {
    pub format:           FormatTag,
    /// Default level 1-9 for blocks without a sector override.
    pub level:            u32,
    /// Store a block plain when `100 * compressed / original >= threshold`.
    pub threshold:        u32,
    pub block_size:       u32,
    pub alignment_shift:  u8,
    pub alignment_policy: AlignmentPolicy,
    pub pad_byte:         u8,
    /// Worker threads; 0 compresses on the calling thread.
    pub workers:          usize,
    pub batch_blocks:     usize,
    pub sector_table:     Option<SectorTable>,
}

impl Default for CompressOptions {
    fn default() -> Self {
        Self {
            format:           FormatTag::Ciso,
            level:            DEFAULT_LEVEL,
            threshold:        DEFAULT_THRESHOLD,
            block_size:       DEFAULT_BLOCK_SIZE,
            alignment_shift:  0,
            alignment_policy: AlignmentPolicy::Raise,
            pad_byte:         DEFAULT_PAD_BYTE,
            workers:          0,
            batch_blocks:     DEFAULT_BATCH_BLOCKS,
            sector_table:     None,
        }
    }
}

impl CompressOptions {
    pub fn validate(&self) -> Result<()> {
        if !(1..=9).contains(&self.level) {
            return Err(Error::Config(format!("compression level {} outside 1-9", self.level)));
        }
        if !(1..=100).contains(&self.threshold) {
            return Err(Error::Config(format!("threshold {}% outside 1-100", self.threshold)));
        }
        if self.block_size == 0 {
            return Err(Error::Config("block size must be non-zero".into()));
        }
        if self.alignment_shift > MAX_ALIGNMENT_SHIFT {
            return Err(Error::Config(format!(
                "alignment shift {} exceeds {MAX_ALIGNMENT_SHIFT}",
                self.alignment_shift
            )));
        }
        if self.workers > 0 && self.batch_blocks == 0 {
            return Err(Error::Config("batch size must be non-zero".into()));
        }
        if let Some(level) = self.sector_table.as_ref().and_then(SectorTable::invalid_level) {
            return Err(Error::Config(format!("sector table level {level} outside 1-9")));
        }
        Ok(())
    }

    /// Level for block `i` after sector overrides.
    #[inline]
    pub fn level_for(&self, block: u64) -> u32 {
        match &self.sector_table {
            Some(t) => t.level_for(block, self.level),
            None => self.level,
        }
    }
}

/// Compress `input` into a new container at `output`.  A failed run leaves
/// no output file behind.
pub fn compress_file<P: AsRef<Path>, Q: AsRef<Path>>(
    input: P,
    output: Q,
    opts: &CompressOptions,
) -> Result<CompressStats> {
    opts.validate()?;
    let input = input.as_ref();
    let output = output.as_ref();

    let src = File::open(input).map_err(|e| Error::io("open input", 0, e))?;
    let total_size = src.metadata().map_err(|e| Error::io("stat input", 0, e))?.len();

    log::info!("Compress '{}' to '{}'", input.display(), output.display());
    discard_on_error(output, || {
        let dst = File::create(output).map_err(|e| Error::io("create output", 0, e))?;
        let mut writer = CisoWriter::new(BufWriter::new(dst), opts.clone())?;
        let stats = writer.compress(BufReader::new(src), total_size)?;
        writer
            .into_inner()
            .flush()
            .map_err(|e| Error::io("flush output", stats.compressed_size, e))?;
        Ok(stats)
    })
}

/// Restore the raw image in `input` to `output`.  Returns bytes written.
pub fn decompress_file<P: AsRef<Path>, Q: AsRef<Path>>(input: P, output: Q) -> Result<u64> {
    let input = input.as_ref();
    let output = output.as_ref();

    let src = File::open(input).map_err(|e| Error::io("open input", 0, e))?;
    let mut reader = CisoReader::new(BufReader::new(src))?;

    log::info!("Decompress '{}' to '{}'", input.display(), output.display());
    discard_on_error(output, || {
        let dst = File::create(output).map_err(|e| Error::io("create output", 0, e))?;
        let mut out = BufWriter::new(dst);
        let written = reader.decompress_to(&mut out)?;
        out.flush().map_err(|e| Error::io("flush output", written, e))?;
        Ok(written)
    })
}

pub fn read_info<P: AsRef<Path>>(path: P) -> Result<ContainerInfo> {
    let src = File::open(path.as_ref()).map_err(|e| Error::io("open input", 0, e))?;
    let mut reader = CisoReader::new(BufReader::new(src))?;
    reader.info()
}

fn discard_on_error<T>(output: &Path, run: impl FnOnce() -> Result<T>) -> Result<T> {
    let result = run();
    if result.is_err() && output.exists() {
        if let Err(e) = fs::remove_file(output) {
            log::warn!("could not remove partial output '{}': {e}", output.display());
        }
    }
    result
}
