//! Batched gather of rows along the second axis.
//!
//! Used to pull atom states onto edges, e.g. with the target column of the
//! connectivity array as `indices`.

use ndarray::{ArrayD, IxDyn};
use tracing::instrument;

use crate::config::GatherConfig;
use crate::error::{Error, Result};
use crate::tensor::{Op, Tensor};

/// Batched gather along axis 1: `output[b, i] = data[b, indices[b, i]]`.
///
/// `data` is `[B, N, ...]` and `indices` is `[B, M...]`; the output is
/// `[B, M..., ...]`. Out-of-range indices are rejected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Gather;

impl Gather {
    pub fn new() -> Self {
        Self
    }

    #[instrument(skip(self, data, indices), fields(data = ?data.shape(), indices = ?indices.shape()))]
    pub fn forward<'a>(&self, data: Tensor<'a>, indices: &ArrayD<i64>) -> Result<Tensor<'a>> {
        let shape = data.shape();
        if shape.len() < 2 {
            return Err(Error::Shape(format!(
                "gather needs data of rank >= 2, got {:?}",
                shape
            )));
        }
        if indices.ndim() == 0 || indices.shape()[0] != shape[0] {
            return Err(Error::Shape(format!(
                "batch size mismatch: data {:?}, indices {:?}",
                shape,
                indices.shape()
            )));
        }

        let n = shape[1];
        let inner: usize = shape[2..].iter().product();
        let row = n * inner;

        let mut offsets = Vec::with_capacity(indices.len() * inner);
        for (pos, &index) in indices.indexed_iter() {
            if index < 0 || index as usize >= n {
                return Err(Error::IndexOutOfBounds { index, len: n });
            }
            let base = pos[0] * row + index as usize * inner;
            offsets.extend(base..base + inner);
        }

        let mut out_shape = indices.shape().to_vec();
        out_shape.extend_from_slice(&shape[2..]);
        let offsets = ArrayD::from_shape_vec(IxDyn(&out_shape), offsets)?;

        let flat: Vec<f32> = data.data().iter().copied().collect();
        let out = offsets.mapv(|p| flat[p]);
        Ok(data
            .context()
            .push(out, Op::Gather(data.idx(), offsets), None))
    }

    pub fn config(&self) -> GatherConfig {
        GatherConfig::default()
    }

    pub fn from_config(_config: GatherConfig) -> Self {
        Self
    }
}
