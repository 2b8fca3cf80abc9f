pub mod extractor;

pub use extractor::{discover_archives, ArchiveExtractor};
