pub mod chunk_reader;

pub use chunk_reader::{Chunk, CsvChunkReader};
