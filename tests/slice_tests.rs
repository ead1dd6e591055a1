use ndarray::{Array2, ArrayD, IxDyn, array};
use nfp::{Context, Error, Slice, SliceElem, SliceSpec};

fn connectivity() -> ArrayD<i64> {
    // [[1, 2, 3, 4, 5], [6, 7, 8, 9, 0]].T with a leading batch axis
    let pairs: Array2<i64> = array![[1, 2, 3, 4, 5], [6, 7, 8, 9, 0]];
    pairs.reversed_axes().insert_axis(ndarray::Axis(0)).into_dyn()
}

#[test]
fn test_slice_indices() {
    let inputs = connectivity();
    assert_eq!(inputs.shape(), &[1, 5, 2]);

    let out0 = Slice::parse(":, :, 0").unwrap().forward_indices(&inputs).unwrap();
    let out1 = Slice::parse(":, :, 1").unwrap().forward_indices(&inputs).unwrap();

    assert_eq!(out0, array![[1i64, 2, 3, 4, 5]].into_dyn());
    assert_eq!(out1, array![[6i64, 7, 8, 9, 0]].into_dyn());
}

#[test]
fn test_slice_from_elems_matches_parsed() {
    let built = Slice::new(vec![
        SliceElem::full(),
        SliceElem::full(),
        SliceElem::Index(0),
    ]);
    let parsed = Slice::parse(":, :, 0").unwrap();
    assert_eq!(built, parsed);
}

#[test]
fn test_slice_tensor_forward() {
    let ctx = Context::new();
    let x = ctx
        .tensor(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0], &[2, 3, 2])
        .unwrap();

    let y = Slice::parse(":, 1:, -1").unwrap().forward(x).unwrap();

    assert_eq!(y.shape(), vec![2, 2]);
    assert_eq!(y.data(), array![[3.0f32, 5.0], [9.0, 11.0]].into_dyn());
}

#[test]
fn test_slice_reversed_and_stepped() {
    let ctx = Context::new();
    let x = ctx.tensor(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0], &[1, 6]).unwrap();

    let y = Slice::parse(":, ::-2").unwrap().forward(x).unwrap();
    assert_eq!(y.data(), array![[5.0f32, 3.0, 1.0]].into_dyn());

    let z = Slice::parse("0, 4:1:-1").unwrap().forward(x).unwrap();
    assert_eq!(z.data(), array![4.0f32, 3.0, 2.0].into_dyn());
}

#[test]
fn test_slice_newaxis() {
    let ctx = Context::new();
    let x = ctx.tensor(&[1.0, 2.0, 3.0], &[3]).unwrap();

    let y = Slice::parse("None, :").unwrap().forward(x).unwrap();
    assert_eq!(y.shape(), vec![1, 3]);
}

#[test]
fn test_slice_backward_scatters_into_selection() {
    let ctx = Context::new();
    let x = ctx.tensor(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[3, 2]).unwrap();

    let y = Slice::parse("::2, 1").unwrap().forward(x).unwrap();
    assert_eq!(y.data(), array![2.0f32, 6.0].into_dyn());

    let w = ctx.tensor(&[10.0, 100.0], &[2]).unwrap();
    (y * w).sum().backward();

    assert_eq!(
        x.grad().unwrap(),
        array![[0.0f32, 10.0], [0.0, 0.0], [0.0, 100.0]].into_dyn()
    );
}

#[test]
fn test_slice_keeps_mask_when_leading_axes_untouched() {
    let ctx = Context::new();
    let x = ctx.array(ArrayD::zeros(IxDyn(&[2, 3, 4])));
    let mask = array![[true, true, false], [true, false, false]].into_dyn();
    x.set_mask(Some(mask.clone())).unwrap();

    let features = Slice::parse("..., 1:3").unwrap().forward(x).unwrap();
    assert_eq!(features.mask(), Some(mask));

    let first_row = Slice::parse("0").unwrap().forward(x).unwrap();
    assert_eq!(first_row.mask(), None);
}

#[test]
fn test_slice_errors() {
    let ctx = Context::new();
    let x = ctx.tensor(&[1.0, 2.0], &[2]).unwrap();
    let before = ctx.len();

    let err = Slice::parse("5").unwrap().forward(x).unwrap_err();
    assert_eq!(err, Error::IndexOutOfBounds { index: 5, len: 2 });

    let err = Slice::parse("0, 0").unwrap().forward(x).unwrap_err();
    assert!(matches!(err, Error::InvalidSlice(_)));

    // failed calls leave the arena untouched
    assert_eq!(ctx.len(), before);
}

#[test]
fn test_slice_spec_from_str() {
    let spec: SliceSpec = ":, :, 0".parse().unwrap();
    assert_eq!(spec.elems().len(), 3);
    assert!(matches!(
        "1:2:0".parse::<SliceSpec>(),
        Err(Error::InvalidSlice(_))
    ));
}

#[test]
fn test_slice_keeps_mask_with_explicit_full_ranges() {
    let ctx = Context::new();
    let x = ctx.array(ArrayD::zeros(IxDyn(&[2, 3, 4])));
    let mask = array![[true, true, false], [true, false, false]].into_dyn();
    x.set_mask(Some(mask.clone())).unwrap();

    let features = Slice::parse("0:, 0:3, 1:3").unwrap().forward(x).unwrap();
    assert_eq!(features.shape(), vec![2, 3, 2]);
    assert_eq!(features.mask(), Some(mask));

    let tail = Slice::parse(":, 1:").unwrap().forward(x).unwrap();
    assert_eq!(tail.mask(), None);
}
