pub mod config;
mod error;
pub mod nn;
pub mod preprocessing;
pub mod tensor;

pub use config::LayerConfig;
pub use error::{Error, Result};
pub use nn::{Embedding, Gather, Reduce, Reduction, Slice, SliceElem, SliceSpec};
pub use preprocessing::{GraphBatch, MolGraph, Preprocessor, Tokenizer};
pub use tensor::{Context, Tensor};
