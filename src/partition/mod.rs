pub mod accumulator;

pub use accumulator::PartitionAccumulator;
