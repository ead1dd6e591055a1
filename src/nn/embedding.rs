//! Class-id embeddings with optional padding masks.

use ndarray::{ArrayD, IxDyn};
use rand::Rng;
use tracing::instrument;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};
use crate::tensor::{Context, Op, Tensor};

/// Lookup table from class ids to dense vectors.
pub struct Embedding<'a> {
    pub weight: Tensor<'a>,
    num_classes: usize,
    dim: usize,
    mask_zero: bool,
}

impl<'a> Embedding<'a> {
    /// Creates a `[num_classes, dim]` table initialised uniformly in [-0.05, 0.05].
    ///
    /// With `mask_zero`, class 0 is padding and outputs carry a mask that is
    /// `false` wherever the input id is 0.
    pub fn new(ctx: &'a Context, num_classes: usize, dim: usize, mask_zero: bool) -> Self {
        let mut rng = rand::rng();
        let scale = 0.05;
        let weight = ArrayD::from_shape_fn(IxDyn(&[num_classes, dim]), |_| {
            (rng.random::<f32>() - 0.5) * 2.0 * scale
        });

        Self {
            weight: ctx.array(weight),
            num_classes,
            dim,
            mask_zero,
        }
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    #[instrument(skip(self, indices), fields(shape = ?indices.shape(), dim = self.dim))]
    pub fn forward(&self, indices: &ArrayD<i64>) -> Result<Tensor<'a>> {
        let mut offsets = Vec::with_capacity(indices.len() * self.dim);
        for &class in indices.iter() {
            if class < 0 || class as usize >= self.num_classes {
                return Err(Error::IndexOutOfBounds {
                    index: class,
                    len: self.num_classes,
                });
            }
            let base = class as usize * self.dim;
            offsets.extend(base..base + self.dim);
        }

        let mut out_shape = indices.shape().to_vec();
        out_shape.push(self.dim);
        let offsets = ArrayD::from_shape_vec(IxDyn(&out_shape), offsets)?;

        let table: Vec<f32> = self.weight.data().iter().copied().collect();
        let out = offsets.mapv(|p| table[p]);
        let mask = self.mask_zero.then(|| indices.mapv(|c| c != 0));

        Ok(self
            .weight
            .context()
            .push(out, Op::Embedding(self.weight.idx(), offsets), mask))
    }

    /// Returns all trainable parameters
    pub fn params(&self) -> Vec<Tensor<'a>> {
        vec![self.weight]
    }

    pub fn config(&self) -> EmbeddingConfig {
        EmbeddingConfig {
            input_dim: self.num_classes,
            output_dim: self.dim,
            mask_zero: self.mask_zero,
        }
    }

    /// Builds a freshly initialised layer with the given hyperparameters.
    pub fn from_config(ctx: &'a Context, config: EmbeddingConfig) -> Self {
        Self::new(ctx, config.input_dim, config.output_dim, config.mask_zero)
    }
}
