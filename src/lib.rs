pub mod header;
pub mod codec;
pub mod block;
pub mod index;
pub mod align;
pub mod sector;
pub mod parallel;
pub mod io_stream;
pub mod convert;
pub mod error;

pub use header::{ContainerHeader, FormatTag, FormatError, encode_header, decode_header};
pub use codec::{Codec, CodecError, get_codec};
pub use block::{StoredBlock, compress_block, decompress_block};
pub use index::{IndexTable, BlockSpan};
pub use align::AlignmentPolicy;
pub use sector::SectorTable;
pub use io_stream::{CisoReader, CisoWriter, CompressStats, ContainerInfo};
pub use convert::CompressOptions;
pub use error::{Error, Result};
