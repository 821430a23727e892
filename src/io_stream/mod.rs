//! Streaming container engine: writer and reader.
//!
//! # Writer
//! [`CisoWriter`] writes the header, reserves a zero-filled index, then
//! streams blocks in order: compress, pad to alignment, write, record the
//! index entry.  With workers configured, blocks are compressed in batches
//! on the pool but padding, indexing and writes still happen here, in block
//! order.  The finished index is patched over the placeholder at the end.
//!
//! # Reader
//! [`CisoReader`] validates the header and loads the whole index before
//! touching block data.  Any block can then be restored on its own
//! ([`CisoReader::read_block`], [`CisoReader::read_at`]); a full restore
//! ([`CisoReader::decompress_to`]) walks blocks strictly in order.

use std::io::{Read, Seek, SeekFrom, Write};

use crate::align::{resolve_alignment_shift, write_padding};
use crate::block::{compress_block, decompress_block, StoredBlock};
use crate::convert::CompressOptions;
use crate::error::{Error, Result};
use crate::header::{ContainerHeader, FormatError, FormatTag, HEADER_SIZE, VERSION};
use crate::index::IndexTable;
use crate::parallel::{BlockTask, Dispatcher};

/// Result of a compression run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressStats {
    pub header:          ContainerHeader,
    /// Final container size in bytes.
    pub compressed_size: u64,
    /// `100 * compressed_size / total_size`.
    pub ratio:           u64,
    pub plain_blocks:    u64,
}

/// Summary of an existing container.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ContainerInfo {
    pub format:          FormatTag,
    pub scheme:          &'static str,
    pub version:         u8,
    pub header_size:     u32,
    pub total_size:      u64,
    pub block_size:      u32,
    pub block_count:     u64,
    pub alignment:       u64,
    pub plain_blocks:    u64,
    pub compressed_size: u64,
    pub ratio:           u64,
}

// ── Progress ─────────────────────────────────────────────────────────────────

struct Progress {
    label:  &'static str,
    total:  u64,
    period: u64,
    next:   u64,
}

impl Progress {
    fn new(label: &'static str, total: u64) -> Self {
        let period = (total / 100).max(1);
        Self { label, total, period, next: period }
    }

    /// `done` blocks finished; `rate` is the running compression ratio.
    fn update(&mut self, done: u64, rate: Option<u64>) {
        if done < self.next || self.total < 100 {
            return;
        }
        self.next = (done / self.period + 1) * self.period;
        let pct = done * 100 / self.total;
        match rate {
            Some(r) => log::debug!("{} {pct:3}% average rate {r:3}%", self.label),
            None => log::debug!("{} {pct:3}%", self.label),
        }
    }
}

// ── Writer ───────────────────────────────────────────────────────────────────

pub struct CisoWriter<W: Write + Seek> {
    writer:  W,
    options: CompressOptions,
}

impl<W: Write + Seek> CisoWriter<W> {
    pub fn new(writer: W, options: CompressOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self { writer, options })
    }

    pub fn options(&self) -> &CompressOptions {
        &self.options
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    /// Compress `total_size` bytes from `input` into a complete container
    /// starting at offset 0 of the output.
    pub fn compress<R: Read>(&mut self, mut input: R, total_size: u64) -> Result<CompressStats> {
        let opts = &self.options;
        let mut header =
            ContainerHeader::new(opts.format, total_size, opts.block_size, opts.alignment_shift)?;
        let block_count = header.block_count();
        header.alignment_shift = resolve_alignment_shift(
            opts.alignment_shift,
            opts.alignment_policy,
            header.data_start(),
            total_size,
            block_count,
        )?;
        let shift = header.alignment_shift;

        log::info!(
            "Compression type: {} | total {} bytes | block {} bytes | index align {} | level {}",
            header.format.scheme(),
            total_size,
            header.block_size,
            1u64 << shift,
            opts.level,
        );

        // Header, then a zeroed index placeholder.
        let mut table = IndexTable::build(block_count, shift);
        self.writer.seek(SeekFrom::Start(0)).map_err(|e| Error::io("seek output", 0, e))?;
        header.write(&mut self.writer).map_err(|e| Error::io("write header", 0, e))?;
        self.writer
            .write_all(&vec![0u8; table.byte_len()])
            .map_err(|e| Error::io("reserve index", HEADER_SIZE as u64, e))?;

        let mut sink = BlockSink {
            writer: &mut self.writer,
            table: &mut table,
            cursor: header.data_start(),
            shift,
            pad: opts.pad_byte,
            plain_blocks: 0,
        };
        let mut progress = Progress::new("compress", block_count);

        if opts.workers == 0 {
            for i in 0..block_count {
                let data = read_block(&mut input, &header, i)?;
                let stored = compress_block(data, header.format, opts.level_for(i), opts.threshold)?;
                sink.emit(i, stored)?;
                let consumed = (i + 1) * header.block_size as u64;
                progress.update(i + 1, Some(100 * sink.cursor / consumed.min(total_size)));
            }
        } else {
            let dispatcher = Dispatcher::new(opts.workers, header.format, opts.threshold)?;
            log::info!("compressing on {} workers", dispatcher.workers());
            let batch = opts.batch_blocks as u64;
            let mut next = 0u64;
            while next < block_count {
                let end = (next + batch).min(block_count);
                let tasks = (next..end)
                    .map(|i| {
                        Ok::<_, Error>(BlockTask {
                            index: i,
                            data:  read_block(&mut input, &header, i)?,
                            level: opts.level_for(i),
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                for r in dispatcher.run(tasks)? {
                    sink.emit(r.index, r.block)?;
                }
                next = end;
                progress.update(next, None);
            }
        }

        let end = sink.cursor;
        let plain_blocks = sink.plain_blocks;
        table.finalize(end)?;

        self.writer
            .seek(SeekFrom::Start(HEADER_SIZE as u64))
            .map_err(|e| Error::io("seek output", HEADER_SIZE as u64, e))?;
        self.writer
            .write_all(&table.serialize())
            .map_err(|e| Error::io("write index", HEADER_SIZE as u64, e))?;
        self.writer.seek(SeekFrom::Start(end)).map_err(|e| Error::io("seek output", end, e))?;

        let ratio = end * 100 / total_size;
        log::info!("compress completed, total size = {end} bytes, rate {ratio}%");
        Ok(CompressStats { header, compressed_size: end, ratio, plain_blocks })
    }
}

/// Single writer for block payloads: pads, records, appends.
struct BlockSink<'a, W: Write> {
    writer:       &'a mut W,
    table:        &'a mut IndexTable,
    cursor:       u64,
    shift:        u8,
    pad:          u8,
    plain_blocks: u64,
}

impl<W: Write> BlockSink<'_, W> {
    fn emit(&mut self, i: u64, block: StoredBlock) -> Result<()> {
        self.cursor = write_padding(self.writer, self.cursor, self.shift, self.pad)
            .map_err(|e| Error::io("write padding", self.cursor, e))?;
        self.table.record(i, self.cursor, block.plain)?;
        self.writer
            .write_all(&block.payload)
            .map_err(|e| Error::io("write block", self.cursor, e))?;
        self.cursor += block.payload.len() as u64;
        self.plain_blocks += block.plain as u64;
        Ok(())
    }
}

fn read_block<R: Read>(input: &mut R, header: &ContainerHeader, i: u64) -> Result<Vec<u8>> {
    let mut data = vec![0u8; header.block_len(i)];
    input
        .read_exact(&mut data)
        .map_err(|e| Error::io("read input", i * header.block_size as u64, e))?;
    Ok(data)
}

// ── Reader ───────────────────────────────────────────────────────────────────

pub struct CisoReader<R: Read + Seek> {
    reader:     R,
    pub header: ContainerHeader,
    pub index:  IndexTable,
}

impl<R: Read + Seek> CisoReader<R> {
    /// Read the header and the full index.  Nothing past the index is read.
    pub fn new(mut reader: R) -> Result<Self> {
        reader.seek(SeekFrom::Start(0)).map_err(|e| Error::io("seek input", 0, e))?;
        let header = ContainerHeader::read(&mut reader)?;
        if header.version > VERSION {
            log::warn!("container version {} is newer than {VERSION}", header.version);
        }

        let block_count = header.block_count();
        let index_len = (block_count + 1) * crate::header::INDEX_ENTRY_SIZE;
        // Grown by the read, so a short file costs what it holds.
        let mut raw = Vec::new();
        (&mut reader)
            .take(index_len)
            .read_to_end(&mut raw)
            .map_err(|e| Error::io("read index", HEADER_SIZE as u64, e))?;
        let index = IndexTable::parse(&raw, block_count, header.alignment_shift)?;

        if block_count > 0 && index.block_span(0)?.offset < header.data_start() {
            return Err(FormatError::IndexNotMonotonic { block: 0 }.into());
        }

        Ok(Self { reader, header, index })
    }

    #[inline]
    pub fn block_count(&self) -> u64 {
        self.header.block_count()
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Restore block `i` alone.
    pub fn read_block(&mut self, i: u64) -> Result<Vec<u8>> {
        let span = self.index.block_span(i)?;
        self.reader
            .seek(SeekFrom::Start(span.offset))
            .map_err(|e| Error::io("seek block", span.offset, e))?;
        let mut raw = Vec::with_capacity(span.length.min(2 * self.header.block_size as u64) as usize);
        // The span of an aligned final block may run past EOF.
        (&mut self.reader)
            .take(span.length)
            .read_to_end(&mut raw)
            .map_err(|e| Error::io("read block", span.offset, e))?;

        decompress_block(&raw, span.plain, self.header.format, self.header.block_len(i)).map_err(
            |source| Error::CorruptBlock { block: i, offset: span.offset, length: span.length, source },
        )
    }

    /// Restore the full image into `out`, block by block.  Returns bytes written.
    pub fn decompress_to<W: Write>(&mut self, mut out: W) -> Result<u64> {
        let h = self.header;
        log::info!(
            "Compression type: {} | total {} bytes | block {} bytes | {} blocks | index align {}",
            h.format.scheme(),
            h.total_size,
            h.block_size,
            h.block_count(),
            1u64 << h.alignment_shift,
        );

        let mut progress = Progress::new("decompress", h.block_count());
        let mut written = 0u64;
        for i in 0..h.block_count() {
            let data = self.read_block(i)?;
            out.write_all(&data).map_err(|e| Error::io("write output", written, e))?;
            written += data.len() as u64;
            progress.update(i + 1, None);
        }
        log::info!("decompress completed, {written} bytes");
        Ok(written)
    }

    /// Random-access read of the raw image.  Fills `buf` from image offset
    /// `offset`, touching only the blocks that cover it.  Returns bytes copied.
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let total = self.header.total_size;
        if offset >= total || buf.is_empty() {
            return Ok(0);
        }
        let bs = self.header.block_size as u64;
        let want = buf.len().min((total - offset) as usize);

        let mut copied = 0usize;
        while copied < want {
            let pos = offset + copied as u64;
            let block = self.read_block(pos / bs)?;
            let start = (pos % bs) as usize;
            let n = (want - copied).min(block.len() - start);
            buf[copied..copied + n].copy_from_slice(&block[start..start + n]);
            copied += n;
        }
        Ok(copied)
    }

    pub fn info(&mut self) -> Result<ContainerInfo> {
        let h = self.header;
        let compressed_size = self
            .reader
            .seek(SeekFrom::End(0))
            .map_err(|e| Error::io("seek input", 0, e))?;
        Ok(ContainerInfo {
            format: h.format,
            scheme: h.format.scheme(),
            version: h.version,
            header_size: h.header_size,
            total_size: h.total_size,
            block_size: h.block_size,
            block_count: h.block_count(),
            alignment: 1u64 << h.alignment_shift,
            plain_blocks: self.index.plain_count(),
            compressed_size,
            ratio: compressed_size * 100 / h.total_size,
        })
    }
}
