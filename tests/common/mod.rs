#![allow(dead_code)]

use approx::assert_abs_diff_eq;
use ndarray::{Array1, ArrayView2, ArrayViewD, Axis};
use nfp::{GraphBatch, MolGraph, Preprocessor, Reduction};

/// tert-butanol and ethanol, heavy atoms only.
///
/// tert-butanol edges (sorted by source atom):
///   0: 0->1, 1: 1->0, 2: 1->2, 3: 1->3, 4: 1->4, 5: 2->1, 6: 3->1, 7: 4->1
/// ethanol edges:
///   0: 0->1, 1: 1->0, 2: 1->2, 3: 2->1, then 4 padded edges
pub fn smiles_inputs() -> (Preprocessor, GraphBatch) {
    let graphs = vec![
        MolGraph::new(["C", "C", "C", "C", "O"])
            .bond(0, 1, "C-C")
            .bond(1, 2, "C-C")
            .bond(1, 3, "C-C")
            .bond(1, 4, "C-O"),
        MolGraph::new(["C", "C", "O"])
            .bond(0, 1, "C-C")
            .bond(1, 2, "C-O"),
    ];
    let mut preprocessor = Preprocessor::new();
    let inputs = preprocessor.batch(&graphs).unwrap();
    (preprocessor, inputs)
}

/// Reference aggregation over the rows of `rows`, computed directly with ndarray.
pub fn aggregate(reduction: Reduction, rows: ArrayView2<'_, f32>) -> Array1<f32> {
    match reduction {
        Reduction::Sum => rows.sum_axis(Axis(0)),
        Reduction::Mean => rows.mean_axis(Axis(0)).unwrap(),
        Reduction::Max => rows.fold_axis(Axis(0), f32::NEG_INFINITY, |&a, &b| a.max(b)),
        Reduction::Min => rows.fold_axis(Axis(0), f32::INFINITY, |&a, &b| a.min(b)),
        Reduction::Prod => rows.fold_axis(Axis(0), 1.0, |&a, &b| a * b),
    }
}

pub fn assert_close(actual: ArrayViewD<'_, f32>, expected: ArrayViewD<'_, f32>) {
    assert_eq!(actual.shape(), expected.shape());
    for (a, e) in actual.iter().zip(expected.iter()) {
        assert_abs_diff_eq!(*a, *e, epsilon = 1e-6);
    }
}
