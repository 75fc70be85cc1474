pub mod fragment_combiner;
pub mod protos;
pub mod relay;
