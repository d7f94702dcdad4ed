pub mod flat;

pub use flat::FlatVectorStore;
