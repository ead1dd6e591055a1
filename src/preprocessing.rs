//! Turns molecule graphs into padded integer arrays.
//!
//! Class id 0 is padding and 1 is the unknown token, so embeddings built on
//! these ids should use `mask_zero`. Every undirected bond becomes two
//! directed edges, sorted by `(source, target)`, which keeps all edges leaving
//! an atom contiguous in the connectivity array.

use std::collections::HashMap;

use ndarray::{Array2, Array3, ArrayD};
use tracing::{debug, instrument};

use crate::error::{Error, Result};

pub const PAD: i64 = 0;
pub const UNK: i64 = 1;

/// Maps string features to class ids.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    classes: HashMap<String, i64>,
    train: bool,
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self {
            classes: HashMap::new(),
            train: true,
        }
    }
}

impl Tokenizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// While training, unseen tokens get the next free id; otherwise they map to [`UNK`].
    pub fn set_train(&mut self, train: bool) {
        self.train = train;
    }

    pub fn tokenize(&mut self, item: &str) -> i64 {
        if let Some(&class) = self.classes.get(item) {
            return class;
        }
        if !self.train {
            return UNK;
        }
        let class = self.num_classes() as i64;
        self.classes.insert(item.to_string(), class);
        class
    }

    /// Number of ids in use, including padding and unknown.
    pub fn num_classes(&self) -> usize {
        self.classes.len() + 2
    }
}

/// A molecule as atom labels plus undirected, labelled bonds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MolGraph {
    pub atoms: Vec<String>,
    pub bonds: Vec<(usize, usize, String)>,
}

impl MolGraph {
    pub fn new<S: Into<String>>(atoms: impl IntoIterator<Item = S>) -> Self {
        Self {
            atoms: atoms.into_iter().map(Into::into).collect(),
            bonds: Vec::new(),
        }
    }

    pub fn bond(mut self, a: usize, b: usize, label: impl Into<String>) -> Self {
        self.bonds.push((a, b, label.into()));
        self
    }
}

/// Unpadded class ids and connectivity of one molecule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureMatrices {
    pub atom: Vec<i64>,
    pub bond: Vec<i64>,
    pub connectivity: Vec<[i64; 2]>,
}

/// Padded arrays for a batch of molecules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphBatch {
    /// `[B, max_atoms]`
    pub atom: ArrayD<i64>,
    /// `[B, max_edges]`
    pub bond: ArrayD<i64>,
    /// `[B, max_edges, 2]`
    pub connectivity: ArrayD<i64>,
}

impl GraphBatch {
    /// Pads per-molecule features with zeros up to the largest molecule.
    pub fn pad(features: &[FeatureMatrices]) -> Self {
        let batch = features.len();
        let max_atoms = features.iter().map(|f| f.atom.len()).max().unwrap_or(0);
        let max_edges = features.iter().map(|f| f.bond.len()).max().unwrap_or(0);

        let mut atom = Array2::<i64>::zeros((batch, max_atoms));
        let mut bond = Array2::<i64>::zeros((batch, max_edges));
        let mut connectivity = Array3::<i64>::zeros((batch, max_edges, 2));
        for (b, f) in features.iter().enumerate() {
            for (i, &class) in f.atom.iter().enumerate() {
                atom[[b, i]] = class;
            }
            for (e, (&class, pair)) in f.bond.iter().zip(&f.connectivity).enumerate() {
                bond[[b, e]] = class;
                connectivity[[b, e, 0]] = pair[0];
                connectivity[[b, e, 1]] = pair[1];
            }
        }

        Self {
            atom: atom.into_dyn(),
            bond: bond.into_dyn(),
            connectivity: connectivity.into_dyn(),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.atom.shape()[0]
    }
}

/// Tokenizes molecule graphs into model inputs.
#[derive(Debug, Clone, Default)]
pub struct Preprocessor {
    pub atom_tokenizer: Tokenizer,
    pub bond_tokenizer: Tokenizer,
}

impl Preprocessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_train(&mut self, train: bool) {
        self.atom_tokenizer.set_train(train);
        self.bond_tokenizer.set_train(train);
    }

    pub fn atom_classes(&self) -> usize {
        self.atom_tokenizer.num_classes()
    }

    pub fn bond_classes(&self) -> usize {
        self.bond_tokenizer.num_classes()
    }

    pub fn construct_feature_matrices(&mut self, graph: &MolGraph) -> Result<FeatureMatrices> {
        let n_atoms = graph.atoms.len();
        let mut edges = Vec::with_capacity(graph.bonds.len() * 2);
        for (a, b, label) in &graph.bonds {
            if *a >= n_atoms || *b >= n_atoms {
                return Err(Error::InvalidGraph(format!(
                    "bond ({}, {}) references a missing atom; molecule has {}",
                    a, b, n_atoms
                )));
            }
            if a == b {
                return Err(Error::InvalidGraph(format!("self-bond on atom {}", a)));
            }
            edges.push((*a, *b, label.as_str()));
            edges.push((*b, *a, label.as_str()));
        }
        edges.sort_by_key(|&(src, dst, _)| (src, dst));

        let atom = graph
            .atoms
            .iter()
            .map(|a| self.atom_tokenizer.tokenize(a))
            .collect();
        let bond = edges
            .iter()
            .map(|&(_, _, label)| self.bond_tokenizer.tokenize(label))
            .collect();
        let connectivity = edges
            .iter()
            .map(|&(src, dst, _)| [src as i64, dst as i64])
            .collect();

        Ok(FeatureMatrices {
            atom,
            bond,
            connectivity,
        })
    }

    #[instrument(skip(self, graphs), fields(batch = graphs.len()))]
    pub fn batch(&mut self, graphs: &[MolGraph]) -> Result<GraphBatch> {
        let features = graphs
            .iter()
            .map(|g| self.construct_feature_matrices(g))
            .collect::<Result<Vec<_>>>()?;
        let batch = GraphBatch::pad(&features);
        debug!(
            atoms = ?batch.atom.shape(),
            edges = ?batch.bond.shape(),
            "padded batch"
        );
        Ok(batch)
    }
}
