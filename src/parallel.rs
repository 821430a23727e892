//! Batch block compression on a worker pool.
//!
//! Tasks go in as `(index, bytes, level)` and come back as
//! `(index, stored block)` in submission order, whatever order the workers
//! finish in.  Nothing is shared between tasks; all writing stays with the
//! caller.
//!
//! Without the `parallel` feature the dispatcher runs every batch on the
//! calling thread.

use crate::block::{compress_block, StoredBlock};
use crate::codec::CodecError;
use crate::error::Result;
use crate::header::FormatTag;

/// Default number of blocks handed to the pool per round.
pub const DEFAULT_BATCH_BLOCKS: usize = 16 * 1024;

#[derive(Debug)]
pub struct BlockTask {
    pub index: u64,
    pub data:  Vec<u8>,
    pub level: u32,
}

#[derive(Debug)]
pub struct BlockResult {
    pub index: u64,
    pub block: StoredBlock,
}

impl BlockTask {
    fn run(self, format: FormatTag, threshold: u32) -> std::result::Result<BlockResult, CodecError> {
        let block = compress_block(self.data, format, self.level, threshold)?;
        Ok(BlockResult { index: self.index, block })
    }
}

pub struct Dispatcher {
    format:    FormatTag,
    threshold: u32,
    #[cfg(feature = "parallel")]
    pool:      rayon::ThreadPool,
}

impl Dispatcher {
    /// Build a dispatcher owning a pool of `workers` threads.
    pub fn new(workers: usize, format: FormatTag, threshold: u32) -> Result<Self> {
        #[cfg(feature = "parallel")]
        {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .thread_name(|i| format!("ciso-worker-{i}"))
                .build()
                .map_err(|e| crate::Error::Config(format!("cannot start worker pool: {e}")))?;
            Ok(Self { format, threshold, pool })
        }

        #[cfg(not(feature = "parallel"))]
        {
            log::warn!("built without the `parallel` feature, ignoring {workers} workers");
            Ok(Self { format, threshold })
        }
    }

    pub fn workers(&self) -> usize {
        #[cfg(feature = "parallel")]
        {
            self.pool.current_num_threads()
        }
        #[cfg(not(feature = "parallel"))]
        {
            1
        }
    }

    /// Compress one batch.  The first failing task aborts the batch.
    pub fn run(&self, tasks: Vec<BlockTask>) -> std::result::Result<Vec<BlockResult>, CodecError> {
        let (format, threshold) = (self.format, self.threshold);

        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            self.pool.install(|| {
                tasks
                    .into_par_iter()
                    .map(|t| t.run(format, threshold))
                    .collect()
            })
        }

        #[cfg(not(feature = "parallel"))]
        {
            tasks.into_iter().map(|t| t.run(format, threshold)).collect()
        }
    }
}
