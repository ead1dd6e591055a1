//! Layers for padded graph batches.

mod embedding;
mod gather;
mod reduce;
mod slice;

pub use embedding::Embedding;
pub use gather::Gather;
pub use reduce::{Reduce, Reduction};
pub use slice::{Slice, SliceElem, SliceSpec};
