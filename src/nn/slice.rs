//! Basic (numpy-style) slicing of tensors and index arrays.
//!
//! A [`SliceSpec`] is the Rust form of an index expression such as
//! `x[:, :, 0]` or `x[..., 1:3, None]`. Applying it follows numpy's basic
//! slicing rules: negative indices count from the end, range bounds are
//! clamped, negative steps walk backwards, integers drop their axis and
//! `NewAxis` inserts a length-1 axis.

use std::{fmt, str::FromStr};

use ndarray::{ArrayD, Axis};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::config::SliceConfig;
use crate::error::{Error, Result};
use crate::tensor::{Op, Tensor};

/// One element of an index expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SliceElem {
    Index(isize),
    Range {
        start: Option<isize>,
        end: Option<isize>,
        step: isize,
    },
    NewAxis,
    Ellipsis,
}

impl SliceElem {
    /// The `:` element.
    pub const fn full() -> Self {
        SliceElem::Range {
            start: None,
            end: None,
            step: 1,
        }
    }

    /// `start:end` with unit step.
    pub const fn range(start: isize, end: isize) -> Self {
        SliceElem::Range {
            start: Some(start),
            end: Some(end),
            step: 1,
        }
    }

    fn consumes_axis(&self) -> bool {
        matches!(self, SliceElem::Index(_) | SliceElem::Range { .. })
    }
}

impl fmt::Display for SliceElem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            SliceElem::Index(i) => write!(f, "{}", i),
            SliceElem::Range { start, end, step } => {
                if let Some(s) = start {
                    write!(f, "{}", s)?;
                }
                write!(f, ":")?;
                if let Some(e) = end {
                    write!(f, "{}", e)?;
                }
                if step != 1 {
                    write!(f, ":{}", step)?;
                }
                Ok(())
            }
            SliceElem::NewAxis => write!(f, "None"),
            SliceElem::Ellipsis => write!(f, "..."),
        }
    }
}

/// An ordered index expression, e.g. `:, :, 0`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SliceSpec {
    elems: Vec<SliceElem>,
}

impl SliceSpec {
    pub fn new(elems: Vec<SliceElem>) -> Self {
        Self { elems }
    }

    /// Parses numpy index syntax: `0`, `-1`, `1:3`, `::2`, `None`, `...`.
    pub fn parse(text: &str) -> Result<Self> {
        let mut parts: Vec<&str> = text.split(',').map(str::trim).collect();
        // `x[0,]` and `x[]` are both legal
        if parts.last() == Some(&"") {
            parts.pop();
        }
        let elems = parts
            .into_iter()
            .map(parse_elem)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { elems })
    }

    pub fn elems(&self) -> &[SliceElem] {
        &self.elems
    }

    /// Replaces the ellipsis (or the implicit trailing one) with full ranges so
    /// that exactly `ndim` elements consume an axis.
    fn expand(&self, ndim: usize) -> Result<Vec<SliceElem>> {
        let ellipses = self
            .elems
            .iter()
            .filter(|e| matches!(e, SliceElem::Ellipsis))
            .count();
        if ellipses > 1 {
            return Err(Error::InvalidSlice(format!(
                "'{}' has more than one ellipsis",
                self
            )));
        }
        let consumed = self.elems.iter().filter(|e| e.consumes_axis()).count();
        if consumed > ndim {
            return Err(Error::InvalidSlice(format!(
                "'{}' indexes {} axes but the array has {}",
                self, consumed, ndim
            )));
        }
        let fill = ndim - consumed;

        let mut out = Vec::with_capacity(self.elems.len() + fill);
        for elem in &self.elems {
            if let SliceElem::Ellipsis = elem {
                out.extend(std::iter::repeat_n(SliceElem::full(), fill));
            } else {
                out.push(*elem);
            }
        }
        if ellipses == 0 {
            out.extend(std::iter::repeat_n(SliceElem::full(), fill));
        }
        Ok(out)
    }

    /// Applies the expression to any array.
    pub fn apply<T: Clone>(&self, array: &ArrayD<T>) -> Result<ArrayD<T>> {
        let mut result = array.to_owned();
        // Axis of `result` that the next element addresses.
        let mut axis = 0;
        for elem in self.expand(array.ndim())? {
            match elem {
                SliceElem::Index(i) => {
                    let k = resolve_index(i, result.len_of(Axis(axis)))?;
                    result = result.index_axis_move(Axis(axis), k);
                }
                SliceElem::Range { start, end, step } => {
                    let picks = range_indices(start, end, step, result.len_of(Axis(axis)))?;
                    result = result.select(Axis(axis), &picks);
                    axis += 1;
                }
                SliceElem::NewAxis => {
                    result = result.insert_axis(Axis(axis));
                    axis += 1;
                }
                SliceElem::Ellipsis => unreachable!("ellipsis is removed by expand"),
            }
        }
        Ok(result)
    }

    /// True when the first `axes` axes of an array of `shape` pass through
    /// untouched, i.e. each is addressed by a range selecting `0..len` in order.
    pub fn preserves_leading(&self, shape: &[usize], axes: usize) -> Result<bool> {
        let elems = self.expand(shape.len())?;
        if elems.len() < axes || shape.len() < axes {
            return Ok(false);
        }
        for (elem, &len) in elems[..axes].iter().zip(shape) {
            let SliceElem::Range { start, end, step } = *elem else {
                return Ok(false);
            };
            let picks = range_indices(start, end, step, len)?;
            if !picks.iter().copied().eq(0..len) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl fmt::Display for SliceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, elem) in self.elems.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", elem)?;
        }
        Ok(())
    }
}

impl FromStr for SliceSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<Vec<SliceElem>> for SliceSpec {
    fn from(elems: Vec<SliceElem>) -> Self {
        Self::new(elems)
    }
}

fn parse_elem(part: &str) -> Result<SliceElem> {
    match part {
        "..." => return Ok(SliceElem::Ellipsis),
        "None" | "newaxis" | "np.newaxis" => return Ok(SliceElem::NewAxis),
        _ => {}
    }

    let parse_int = |s: &str| -> Result<Option<isize>> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(None);
        }
        s.parse::<isize>()
            .map(Some)
            .map_err(|_| Error::InvalidSlice(format!("cannot parse '{}' as an integer", s)))
    };

    if !part.contains(':') {
        return parse_int(part)?
            .map(SliceElem::Index)
            .ok_or_else(|| Error::InvalidSlice("empty index".to_string()));
    }

    let fields: Vec<&str> = part.split(':').collect();
    if fields.len() > 3 {
        return Err(Error::InvalidSlice(format!("too many ':' in '{}'", part)));
    }
    let start = parse_int(fields[0])?;
    let end = parse_int(fields[1])?;
    let step = match fields.get(2) {
        Some(s) => parse_int(s)?.unwrap_or(1),
        None => 1,
    };
    if step == 0 {
        return Err(Error::InvalidSlice("slice step cannot be zero".to_string()));
    }
    Ok(SliceElem::Range { start, end, step })
}

fn resolve_index(index: isize, len: usize) -> Result<usize> {
    let signed_len = len as isize;
    let resolved = if index < 0 { index + signed_len } else { index };
    if resolved < 0 || resolved >= signed_len {
        return Err(Error::IndexOutOfBounds {
            index: index as i64,
            len,
        });
    }
    Ok(resolved as usize)
}

/// Positions selected by `start:end:step` on an axis of length `len`.
fn range_indices(start: Option<isize>, end: Option<isize>, step: isize, len: usize) -> Result<Vec<usize>> {
    if step == 0 {
        return Err(Error::InvalidSlice("slice step cannot be zero".to_string()));
    }
    let len = len as isize;
    let resolve = |v: isize| if v < 0 { v + len } else { v };

    if step > 0 {
        let s = start.map_or(0, |v| resolve(v).clamp(0, len));
        let e = end.map_or(len, |v| resolve(v).clamp(0, len));
        Ok((s..e.max(s)).step_by(step as usize).map(|i| i as usize).collect())
    } else {
        // -1 stands for "before the first element"
        let s = start.map_or(len - 1, |v| resolve(v).clamp(-1, len - 1));
        let e = end.map_or(-1, |v| resolve(v).clamp(-1, len - 1));
        let mut picks = Vec::new();
        let mut i = s;
        while i > e {
            picks.push(i as usize);
            i += step;
        }
        Ok(picks)
    }
}

/// Layer wrapping a fixed [`SliceSpec`].
#[derive(Debug, Clone, PartialEq)]
pub struct Slice {
    spec: SliceSpec,
}

impl Slice {
    pub fn new(spec: impl Into<SliceSpec>) -> Self {
        Self { spec: spec.into() }
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(Self::new(SliceSpec::parse(text)?))
    }

    pub fn spec(&self) -> &SliceSpec {
        &self.spec
    }

    /// Slices a float tensor. The gradient flows back to the selected positions.
    #[instrument(skip(self, input), fields(spec = %self.spec, shape = ?input.shape()))]
    pub fn forward<'a>(&self, input: Tensor<'a>) -> Result<Tensor<'a>> {
        let data = input.data();
        // Slicing the flat positions tells the backward pass where each output came from.
        let positions = ArrayD::from_shape_vec(data.raw_dim(), (0..data.len()).collect())?;
        let offsets = self.spec.apply(&positions)?;

        let flat: Vec<f32> = data.iter().copied().collect();
        let out = offsets.mapv(|p| flat[p]);

        let mask = match input.mask() {
            Some(m) if self.spec.preserves_leading(data.shape(), m.ndim())? => Some(m),
            _ => None,
        };
        Ok(input
            .context()
            .push(out, Op::Slice(input.idx(), offsets), mask))
    }

    /// Slices an index array such as a connectivity tensor.
    #[instrument(skip(self, indices), fields(spec = %self.spec, shape = ?indices.shape()))]
    pub fn forward_indices(&self, indices: &ArrayD<i64>) -> Result<ArrayD<i64>> {
        self.spec.apply(indices)
    }

    pub fn config(&self) -> SliceConfig {
        SliceConfig {
            slice: self.spec.clone(),
        }
    }

    pub fn from_config(config: SliceConfig) -> Self {
        Self::new(config.slice)
    }
}
