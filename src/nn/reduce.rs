//! Segment reduction of edge states onto nodes.
//!
//! ```text
//! output[b, n] = reduce({ data[b, e] : segment_ids[b, e] == n, e unmasked })
//! ```
//!
//! Typical use is message passing on padded molecule batches: `data` holds
//! bond states `[B, E, F]`, `segment_ids` is the source column of the
//! connectivity array and `target` is the atom state `[B, N, F]` whose
//! second axis sets the number of segments.

use std::{fmt, str::FromStr};

use ndarray::{ArrayD, ArrayViewD, Axis, IxDyn};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::config::ReduceConfig;
use crate::error::{Error, Result};
use crate::tensor::{Op, Route, Tensor};

/// Aggregation applied within each segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reduction {
    #[default]
    Sum,
    Mean,
    Max,
    Min,
    Prod,
}

impl Reduction {
    pub const ALL: [Reduction; 5] = [
        Reduction::Sum,
        Reduction::Mean,
        Reduction::Max,
        Reduction::Min,
        Reduction::Prod,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Reduction::Sum => "sum",
            Reduction::Mean => "mean",
            Reduction::Max => "max",
            Reduction::Min => "min",
            Reduction::Prod => "prod",
        }
    }

    /// Reduces `values`, returning the result and d(result)/d(value) per input.
    fn apply(&self, values: &[f32]) -> (f32, Vec<f32>) {
        let n = values.len();
        match self {
            Reduction::Sum => (values.iter().sum(), vec![1.0; n]),
            Reduction::Mean => {
                let w = 1.0 / n as f32;
                (values.iter().sum::<f32>() * w, vec![w; n])
            }
            Reduction::Max | Reduction::Min => {
                let better = |a: f32, b: f32| match self {
                    Reduction::Max => a > b,
                    _ => a < b,
                };
                // First occurrence wins ties.
                let mut best = 0;
                for (i, &v) in values.iter().enumerate().skip(1) {
                    if better(v, values[best]) {
                        best = i;
                    }
                }
                let mut weights = vec![0.0; n];
                weights[best] = 1.0;
                (values[best], weights)
            }
            Reduction::Prod => {
                // weight_i = product of every other value, via prefix/suffix products
                let mut weights = vec![1.0; n];
                let mut prefix = 1.0;
                for i in 0..n {
                    weights[i] = prefix;
                    prefix *= values[i];
                }
                let mut suffix = 1.0;
                for i in (0..n).rev() {
                    weights[i] *= suffix;
                    suffix *= values[i];
                }
                (prefix, weights)
            }
        }
    }
}

impl fmt::Display for Reduction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Reduction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sum" => Ok(Reduction::Sum),
            "mean" => Ok(Reduction::Mean),
            "max" => Ok(Reduction::Max),
            "min" => Ok(Reduction::Min),
            "prod" => Ok(Reduction::Prod),
            other => Err(Error::UnknownReduction(other.to_string())),
        }
    }
}

/// Layer performing a [`Reduction`] over segments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reduce {
    reduction: Reduction,
}

impl Reduce {
    pub fn new(reduction: Reduction) -> Self {
        Self { reduction }
    }

    /// Builds the layer from a method name: `sum`, `mean`, `max`, `min` or `prod`.
    pub fn from_name(name: &str) -> Result<Self> {
        Ok(Self::new(name.parse()?))
    }

    pub fn reduction(&self) -> Reduction {
        self.reduction
    }

    /// Reduces `data` `[B, E, F...]` into `[B, N, F...]` where `N` is
    /// `target.shape()[1]`.
    ///
    /// Edges masked out in `data` are skipped. Segments that receive no edge
    /// are zero. The output carries the `[B, N]` part of the mask of `target`.
    #[instrument(
        skip(self, data, segment_ids, target),
        fields(reduction = %self.reduction, data = ?data.shape(), target = ?target.shape())
    )]
    pub fn forward<'a>(&self, data: Tensor<'a>, segment_ids: &ArrayD<i64>, target: Tensor<'a>) -> Result<Tensor<'a>> {
        let data_shape = data.shape();
        let target_shape = target.shape();
        if data_shape.len() < 2 || target_shape.len() < 2 {
            return Err(Error::Shape(format!(
                "reduce needs data and target of rank >= 2, got {:?} and {:?}",
                data_shape, target_shape
            )));
        }
        let (batch, edges) = (data_shape[0], data_shape[1]);
        if segment_ids.shape() != [batch, edges] {
            return Err(Error::Shape(format!(
                "segment ids must be [{}, {}], got {:?}",
                batch,
                edges,
                segment_ids.shape()
            )));
        }
        if target_shape[0] != batch {
            return Err(Error::Shape(format!(
                "batch size mismatch: data {:?}, target {:?}",
                data_shape, target_shape
            )));
        }
        let segments = target_shape[1];
        let inner: usize = data_shape[2..].iter().product();
        let mask = data.mask();
        if let Some(ref m) = mask {
            if !data_shape.starts_with(m.shape()) {
                return Err(Error::Shape(format!(
                    "data mask {:?} is not a prefix of data shape {:?}",
                    m.shape(),
                    data_shape
                )));
            }
        }

        // Edge ids belonging to each (batch, segment) pair.
        let mut members: Vec<Vec<usize>> = vec![Vec::new(); batch * segments];
        for b in 0..batch {
            for e in 0..edges {
                if let Some(ref m) = mask {
                    if !edge_kept(m.view(), b, e) {
                        continue;
                    }
                }
                let id = segment_ids[[b, e]];
                if id < 0 || id as usize >= segments {
                    return Err(Error::IndexOutOfBounds { index: id, len: segments });
                }
                members[b * segments + id as usize].push(e);
            }
        }

        let flat: Vec<f32> = data.data().iter().copied().collect();
        let mut out = vec![0.0; batch * segments * inner];
        let mut routes = Vec::new();
        let mut values = Vec::new();
        for (segment, edge_ids) in members.iter().enumerate() {
            if edge_ids.is_empty() {
                continue;
            }
            let b = segment / segments;
            for f in 0..inner {
                let sources: Vec<usize> = edge_ids.iter().map(|&e| (b * edges + e) * inner + f).collect();
                values.clear();
                values.extend(sources.iter().map(|&s| flat[s]));

                let dst = segment * inner + f;
                let (value, weights) = self.reduction.apply(&values);
                out[dst] = value;
                routes.extend(
                    sources
                        .iter()
                        .zip(weights)
                        .filter(|(_, w)| *w != 0.0)
                        .map(|(&src, weight)| Route { src, dst, weight }),
                );
            }
        }
        debug!(routes = routes.len(), "segment reduction");

        let mut out_shape = vec![batch, segments];
        out_shape.extend_from_slice(&data_shape[2..]);
        let out = ArrayD::from_shape_vec(IxDyn(&out_shape), out)?;
        Ok(data
            .context()
            .push(out, Op::SegmentReduce(data.idx(), routes), target.mask().map(segment_mask)))
    }

    pub fn config(&self) -> ReduceConfig {
        ReduceConfig {
            reduction: self.reduction,
        }
    }

    pub fn from_config(config: ReduceConfig) -> Self {
        Self::new(config.reduction)
    }
}

/// Whether edge `e` of batch row `b` is a real (unpadded) position.
fn edge_kept(mask: ArrayViewD<'_, bool>, b: usize, e: usize) -> bool {
    if mask.ndim() == 0 {
        return mask.iter().all(|&x| x);
    }
    let row = mask.index_axis_move(Axis(0), b);
    if row.ndim() == 0 {
        return row.iter().all(|&x| x);
    }
    row.index_axis_move(Axis(0), e).iter().any(|&x| x)
}

/// Collapses a target mask onto its `[B, N]` axes; a node is kept if any of its entries is.
fn segment_mask(mut mask: ArrayD<bool>) -> ArrayD<bool> {
    while mask.ndim() > 2 {
        mask = mask.map_axis(Axis(2), |lane| lane.iter().any(|&x| x));
    }
    mask
}
