use nfp::{Context, Embedding, MolGraph, Preprocessor, Reduce, Reduction, Slice};
use tracing_subscriber::EnvFilter;

fn main() -> nfp::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // ethanol and acetic acid, heavy atoms only
    let graphs = vec![
        MolGraph::new(["C", "C", "O"])
            .bond(0, 1, "single")
            .bond(1, 2, "single"),
        MolGraph::new(["C", "C", "O", "O"])
            .bond(0, 1, "single")
            .bond(1, 2, "double")
            .bond(1, 3, "single"),
    ];
    let mut preprocessor = Preprocessor::new();
    let inputs = preprocessor.batch(&graphs)?;

    let ctx = Context::new();
    let atom_embed = Embedding::new(&ctx, preprocessor.atom_classes(), 4, true);
    let bond_embed = Embedding::new(&ctx, preprocessor.bond_classes(), 4, true);

    let atom_state = atom_embed.forward(&inputs.atom)?;
    let bond_state = bond_embed.forward(&inputs.bond)?;
    let source = Slice::parse(":, :, 0")?.forward_indices(&inputs.connectivity)?;
    let messages = Reduce::new(Reduction::Sum).forward(bond_state, &source, atom_state)?;

    let updated = atom_state + messages;
    updated.sum().backward();

    println!("{}", ctx);
    Ok(())
}
