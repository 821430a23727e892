use clap::{Parser, Subcommand};
use ciso::convert::{compress_file, decompress_file, read_info, CompressOptions};
use ciso::{AlignmentPolicy, FormatTag, SectorTable};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ciso", version, about = "CSO/ZSO disc image compressor")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress a raw image into a CSO (deflate) or ZSO (LZ4) container
    Compress {
        input:  PathBuf,
        output: PathBuf,
        /// Compression level, 1 = fast/large, 9 = small/slow
        #[arg(short = 'c', long, default_value = "9", value_parser = clap::value_parser!(u32).range(1..=9))]
        level: u32,
        /// Store a block plain when compressed/original >= this percentage
        #[arg(short, long, default_value = "100", value_parser = clap::value_parser!(u32).range(1..=100))]
        threshold: u32,
        /// Block start alignment as a power of two (0 = byte aligned)
        #[arg(short, long, default_value = "0", value_parser = clap::value_parser!(u8).range(0..=31))]
        align: u8,
        /// Fail instead of raising the alignment when the image is too large for it
        #[arg(long)]
        strict_align: bool,
        /// Padding byte written before aligned blocks
        #[arg(short, long, default_value = "X")]
        pad: char,
        /// Use LZ4 (ZSO) instead of deflate (CSO)
        #[arg(short = 'z', long)]
        lz4: bool,
        /// Worker threads for compression (0 = single-threaded)
        #[arg(short = 'm', long, default_value = "0")]
        workers: usize,
        /// Blocks handed to the workers per round
        #[arg(long, default_value_t = ciso::parallel::DEFAULT_BATCH_BLOCKS)]
        batch: usize,
        /// Uncompressed bytes per block
        #[arg(long, default_value_t = ciso::header::DEFAULT_BLOCK_SIZE)]
        block_size: u32,
        /// Per-block level overrides (`N:L` or `A-B:L` per line)
        #[arg(long)]
        sectors: Option<PathBuf>,
    },
    /// Restore the raw image from a CSO/ZSO container
    Decompress {
        input:  PathBuf,
        output: PathBuf,
    },
    /// Show container metadata
    Info {
        input: PathBuf,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Cli::parse().command {

        // ── Compress ─────────────────────────────────────────────────────────
        Commands::Compress {
            input, output, level, threshold, align, strict_align, pad, lz4,
            workers, batch, block_size, sectors,
        } => {
            let pad_byte = u8::try_from(pad)
                .map_err(|_| format!("padding '{pad}' is not a single byte"))?;
            let sector_table = sectors.map(SectorTable::load).transpose()?;
            let opts = CompressOptions {
                format: if lz4 { FormatTag::Ziso } else { FormatTag::Ciso },
                level,
                threshold,
                block_size,
                alignment_shift: align,
                alignment_policy: if strict_align { AlignmentPolicy::Refuse } else { AlignmentPolicy::Raise },
                pad_byte,
                workers,
                batch_blocks: batch,
                sector_table,
            };
            let stats = compress_file(&input, &output, &opts)?;
            println!(
                "Created: {} ({} bytes, rate {}%, {} of {} blocks plain)",
                output.display(),
                stats.compressed_size,
                stats.ratio,
                stats.plain_blocks,
                stats.header.block_count(),
            );
        }

        // ── Decompress ───────────────────────────────────────────────────────
        Commands::Decompress { input, output } => {
            let written = decompress_file(&input, &output)?;
            println!("Restored: {} ({written} bytes)", output.display());
        }

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input, json } => {
            let info = read_info(&input)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
                return Ok(());
            }
            println!("── {} container ─────────────────────────────────────", info.format.extension().to_uppercase());
            println!("  Path            {}", input.display());
            println!("  Compression     {}", info.scheme);
            println!("  Version         {}", info.version);
            println!("  Total size      {} B", info.total_size);
            println!("  Block size      {} B", info.block_size);
            println!("  Blocks          {} ({} plain)", info.block_count, info.plain_blocks);
            println!("  Index align     {}", info.alignment);
            println!("  Container size  {} B ({}%)", info.compressed_size, info.ratio);
        }
    }

    Ok(())
}
