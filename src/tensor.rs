use std::{
    cell::RefCell,
    fmt,
    ops::{Add, Mul, Sub},
};

use ndarray::{ArrayD, Axis, IxDyn};
use tracing::{debug, instrument};

use crate::error::{Error, Result};

#[derive(Debug)]
pub struct Context {
    tensors: RefCell<Vec<TensorData>>,
}

impl Default for Context {
    fn default() -> Self {
        Self {
            tensors: RefCell::new(Vec::new()),
        }
    }
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn zero_grad(&self) {
        for t in self.tensors.borrow_mut().iter_mut() {
            t.grad = None;
        }
    }

    /// Prune all tensors after the given index, keeping only the first `keep` tensors.
    /// Use this to remove intermediate computation tensors while preserving parameters.
    /// Returns the number of pruned tensors.
    pub fn prune(&self, keep: usize) -> usize {
        let mut tensors = self.tensors.borrow_mut();
        let old_len = tensors.len();
        tensors.truncate(keep);
        old_len.saturating_sub(keep)
    }

    /// Returns the current number of tensors in the arena.
    pub fn len(&self) -> usize {
        self.tensors.borrow().len()
    }

    /// Returns true if the arena contains no tensors.
    pub fn is_empty(&self) -> bool {
        self.tensors.borrow().is_empty()
    }

    /// Creates a leaf tensor from row-major data.
    #[instrument(skip(self, data), fields(numel = data.len()))]
    pub fn tensor(&self, data: &[f32], shape: &[usize]) -> Result<Tensor<'_>> {
        let numel: usize = shape.iter().product();
        if numel != data.len() {
            return Err(Error::Shape(format!(
                "shape {:?} needs {} elements, got {}",
                shape,
                numel,
                data.len()
            )));
        }
        let data = ArrayD::from_shape_vec(IxDyn(shape), data.to_vec())?;
        Ok(self.array(data))
    }

    /// Creates a leaf tensor that takes ownership of an existing array.
    pub fn array(&self, data: ArrayD<f32>) -> Tensor<'_> {
        self.push(data, Op::None, None)
    }

    pub(crate) fn push(&self, data: ArrayD<f32>, op: Op, mask: Option<ArrayD<bool>>) -> Tensor<'_> {
        let mut tensors = self.tensors.borrow_mut();
        let idx = TensorIdx(tensors.len());
        debug!(idx = idx.0, op = op.name(), shape = ?data.shape(), "push tensor");
        tensors.push(TensorData {
            data,
            grad: None,
            op,
            mask,
        });
        Tensor { idx, ctx: self }
    }

    fn backward(&self, idx: TensorIdx) {
        let mut tensors = self.tensors.borrow_mut();

        let shape = tensors[idx.0].data.raw_dim();
        tensors[idx.0].grad = Some(ArrayD::ones(shape));

        for i in (0..=idx.0).rev() {
            let Some(grad) = tensors[i].grad.clone() else {
                continue;
            };
            let _span = tracing::debug_span!("backward", idx = i, op = tensors[i].op.name()).entered();
            let deltas = input_grads(&tensors, i, &grad);
            for (input, delta) in deltas {
                let target = &mut tensors[input.0];
                if let Some(ref mut g) = target.grad {
                    *g += &delta;
                } else {
                    target.grad = Some(delta);
                }
            }
        }
    }
}

/// Gradients that the op of tensor `i` sends to each of its inputs.
fn input_grads(tensors: &[TensorData], i: usize, grad: &ArrayD<f32>) -> Vec<(TensorIdx, ArrayD<f32>)> {
    match tensors[i].op {
        Op::None => vec![],
        Op::Add(a, b) => vec![
            (a, unbroadcast(grad, tensors[a.0].data.shape())),
            (b, unbroadcast(grad, tensors[b.0].data.shape())),
        ],
        Op::Sub(a, b) => {
            let neg = grad.mapv(|x| -x);
            vec![
                (a, unbroadcast(grad, tensors[a.0].data.shape())),
                (b, unbroadcast(&neg, tensors[b.0].data.shape())),
            ]
        }
        Op::Mul(a, b) => {
            let a_delta = &tensors[b.0].data * grad;
            let b_delta = &tensors[a.0].data * grad;
            vec![
                (a, unbroadcast(&a_delta, tensors[a.0].data.shape())),
                (b, unbroadcast(&b_delta, tensors[b.0].data.shape())),
            ]
        }
        Op::ReLU(a) => {
            let a_delta = &tensors[a.0].data.mapv(|x| if x > 0.0 { 1.0 } else { 0.0 }) * grad;
            vec![(a, a_delta)]
        }
        Op::Sum(a) => {
            // grad is a scalar, distributed to all elements
            let scalar = grad[[0]];
            vec![(a, ArrayD::from_elem(tensors[a.0].data.raw_dim(), scalar))]
        }
        Op::Mean(a, n) => {
            let scalar = grad[[0]] / n as f32;
            vec![(a, ArrayD::from_elem(tensors[a.0].data.raw_dim(), scalar))]
        }
        Op::Scale(a, scalar) => vec![(a, grad.mapv(|g| g * scalar))],
        Op::Slice(a, ref offsets) | Op::Gather(a, ref offsets) | Op::Embedding(a, ref offsets) => {
            let routes = offsets.iter().zip(grad.iter()).map(|(&src, &g)| (src, g));
            vec![(a, scatter_add(tensors[a.0].data.shape(), routes))]
        }
        Op::SegmentReduce(a, ref routes) => {
            let g: Vec<f32> = grad.iter().copied().collect();
            let routes = routes.iter().map(|r| (r.src, g[r.dst] * r.weight));
            vec![(a, scatter_add(tensors[a.0].data.shape(), routes))]
        }
    }
}

/// Sums `grad` over the axes that broadcasting expanded to reach `shape`.
fn unbroadcast(grad: &ArrayD<f32>, shape: &[usize]) -> ArrayD<f32> {
    let mut g = grad.clone();
    while g.ndim() > shape.len() {
        g = g.sum_axis(Axis(0));
    }
    for (axis, &len) in shape.iter().enumerate() {
        if len == 1 && g.shape()[axis] != 1 {
            g = g.sum_axis(Axis(axis)).insert_axis(Axis(axis));
        }
    }
    g
}

/// Accumulates `(flat offset, value)` pairs into a zero array of `shape`.
fn scatter_add(shape: &[usize], routes: impl Iterator<Item = (usize, f32)>) -> ArrayD<f32> {
    let mut out = ArrayD::<f32>::zeros(IxDyn(shape));
    let mut flat = vec![0.0; out.len()];
    for (offset, value) in routes {
        flat[offset] += value;
    }
    // `zeros` is row-major, so logical order matches the flat offsets.
    for (slot, value) in out.iter_mut().zip(flat) {
        *slot = value;
    }
    out
}

/// Fits an operand's mask to the leading axes of a broadcast result.
///
/// The operand is right-aligned against `out_shape`, so a lower-rank operand
/// gets length-1 axes in front before broadcasting. Returns `None` when the
/// mask cannot be stretched to the result.
fn broadcast_mask(mask: &ArrayD<bool>, operand_ndim: usize, out_shape: &[usize]) -> Option<ArrayD<bool>> {
    let offset = out_shape.len().checked_sub(operand_ndim)?;
    let mut view = mask.view();
    for _ in 0..offset {
        view = view.insert_axis(Axis(0));
    }
    let lead = out_shape.get(..view.ndim())?;
    view.broadcast(IxDyn(lead)).map(|m| m.to_owned())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TensorIdx(pub(crate) usize);

#[derive(Debug, Clone, Copy)]
pub struct Tensor<'a> {
    idx: TensorIdx,
    ctx: &'a Context,
}

/// One contribution of a source element to a segment output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Route {
    pub src: usize,
    pub dst: usize,
    pub weight: f32,
}

#[derive(Debug)]
pub(crate) enum Op {
    None,
    Add(TensorIdx, TensorIdx),
    Sub(TensorIdx, TensorIdx),
    Mul(TensorIdx, TensorIdx),
    ReLU(TensorIdx),
    Sum(TensorIdx),
    Mean(TensorIdx, usize), // stores input idx and number of elements
    Scale(TensorIdx, f32),
    // output.flat[k] = input.flat[offsets.flat[k]]
    Slice(TensorIdx, ArrayD<usize>),
    Gather(TensorIdx, ArrayD<usize>),
    Embedding(TensorIdx, ArrayD<usize>),
    SegmentReduce(TensorIdx, Vec<Route>),
}

impl Op {
    fn name(&self) -> &'static str {
        match self {
            Op::None => "none",
            Op::Add(..) => "add",
            Op::Sub(..) => "sub",
            Op::Mul(..) => "mul",
            Op::ReLU(..) => "relu",
            Op::Sum(..) => "sum",
            Op::Mean(..) => "mean",
            Op::Scale(..) => "scale",
            Op::Slice(..) => "slice",
            Op::Gather(..) => "gather",
            Op::Embedding(..) => "embedding",
            Op::SegmentReduce(..) => "segment_reduce",
        }
    }
}

#[derive(Debug)]
struct TensorData {
    data: ArrayD<f32>,
    grad: Option<ArrayD<f32>>,
    op: Op,
    mask: Option<ArrayD<bool>>,
}

impl<'a> Tensor<'a> {
    pub fn shape(&self) -> Vec<usize> {
        self.ctx.tensors.borrow()[self.idx.0].data.shape().to_vec()
    }

    pub fn context(&self) -> &'a Context {
        self.ctx
    }

    pub(crate) fn idx(&self) -> TensorIdx {
        self.idx
    }

    pub fn backward(&self) {
        self.ctx.backward(self.idx);
    }

    fn unary(&self, op: Op, f: impl Fn(&ArrayD<f32>) -> ArrayD<f32>) -> Tensor<'a> {
        let (result_data, mask) = {
            let tensors = self.ctx.tensors.borrow();
            let t = &tensors[self.idx.0];
            (f(&t.data), t.mask.clone())
        };
        self.ctx.push(result_data, op, mask)
    }

    pub fn relu(&self) -> Tensor<'a> {
        self.unary(Op::ReLU(self.idx), |d| d.mapv(|x| x.max(0.0)))
    }

    pub fn scale(&self, scalar: f32) -> Tensor<'a> {
        self.unary(Op::Scale(self.idx, scalar), |d| d.mapv(|x| x * scalar))
    }

    pub fn sum(&self) -> Tensor<'a> {
        let result_data = {
            let tensors = self.ctx.tensors.borrow();
            ArrayD::from_elem(IxDyn(&[1]), tensors[self.idx.0].data.sum())
        };
        self.ctx.push(result_data, Op::Sum(self.idx), None)
    }

    pub fn mean(&self) -> Tensor<'a> {
        let (result_data, n) = {
            let tensors = self.ctx.tensors.borrow();
            let data = &tensors[self.idx.0].data;
            let n = data.len();
            let mean = data.sum() / n as f32;
            (ArrayD::from_elem(IxDyn(&[1]), mean), n)
        };
        self.ctx.push(result_data, Op::Mean(self.idx, n), None)
    }

    pub fn data(&self) -> ArrayD<f32> {
        self.ctx.tensors.borrow()[self.idx.0].data.clone()
    }

    pub fn grad(&self) -> Option<ArrayD<f32>> {
        self.ctx.tensors.borrow()[self.idx.0].grad.clone()
    }

    pub fn set_data(&self, data: ArrayD<f32>) {
        self.ctx.tensors.borrow_mut()[self.idx.0].data = data;
    }

    /// The padding mask, `true` at real positions.
    pub fn mask(&self) -> Option<ArrayD<bool>> {
        self.ctx.tensors.borrow()[self.idx.0].mask.clone()
    }

    /// Attaches (or clears) a mask. Its shape must be a prefix of the tensor's shape.
    pub fn set_mask(&self, mask: Option<ArrayD<bool>>) -> Result<()> {
        let mut tensors = self.ctx.tensors.borrow_mut();
        let t = &mut tensors[self.idx.0];
        if let Some(ref m) = mask {
            if !t.data.shape().starts_with(m.shape()) {
                return Err(Error::Shape(format!(
                    "mask shape {:?} is not a prefix of tensor shape {:?}",
                    m.shape(),
                    t.data.shape()
                )));
            }
        }
        t.mask = mask;
        Ok(())
    }

    fn binary(self, rhs: Tensor<'a>, op: Op, f: impl Fn(&ArrayD<f32>, &ArrayD<f32>) -> ArrayD<f32>) -> Tensor<'a> {
        let (result_data, mask) = {
            let tensors = self.ctx.tensors.borrow();
            let (a, b) = (&tensors[self.idx.0], &tensors[rhs.idx.0]);
            let out = f(&a.data, &b.data);
            let fit = |t: &TensorData| {
                t.mask
                    .as_ref()
                    .and_then(|m| broadcast_mask(m, t.data.ndim(), out.shape()))
            };
            let mask = fit(a).or_else(|| fit(b));
            (out, mask)
        };
        self.ctx.push(result_data, op, mask)
    }
}

impl<'a> Add for Tensor<'a> {
    type Output = Tensor<'a>;

    fn add(self, rhs: Self) -> Self::Output {
        self.binary(rhs, Op::Add(self.idx, rhs.idx), |a, b| a + b)
    }
}

impl<'a> Sub for Tensor<'a> {
    type Output = Tensor<'a>;

    fn sub(self, rhs: Self) -> Self::Output {
        self.binary(rhs, Op::Sub(self.idx, rhs.idx), |a, b| a - b)
    }
}

impl<'a> Mul for Tensor<'a> {
    type Output = Tensor<'a>;

    fn mul(self, rhs: Self) -> Self::Output {
        self.binary(rhs, Op::Mul(self.idx, rhs.idx), |a, b| a * b)
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tensors = self.tensors.borrow();
        for (i, t) in tensors.iter().enumerate() {
            writeln!(f, "Tensor {} ({})", i, t.op.name())?;
            writeln!(f, "  shape: {:?}", t.data.shape())?;
            writeln!(f, "  data:  {:?}", t.data)?;
            if let Some(ref g) = t.grad {
                writeln!(f, "  grad:  {:?}", g)?;
            }
            if let Some(ref m) = t.mask {
                writeln!(f, "  mask:  {:?}", m)?;
            }
        }
        Ok(())
    }
}
