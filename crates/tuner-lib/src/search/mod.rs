//! Search tree over configuration states

mod digest;
mod node;
mod tree;

#[cfg(test)]
mod tests;

pub use digest::{BenchmarkContent, NodeDigest};
pub use node::{NodeId, SearchNode};
pub use tree::SearchTree;
