//! Graph fixtures shared by the integration tests

#![allow(dead_code)]

use loopnest::expr::Literal;
use loopnest::ir::{AxisSpec, CorrespondenceTable, OpKind, TensorGraph, TensorId};

pub fn setup_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// `T0 -> op1 -> T1 -> ... -> Tn`, every tensor shaped `dims`
pub fn pointwise_chain(len: usize, dims: &[i64]) -> TensorGraph {
    let mut g = TensorGraph::new();
    let mut prev = g.add_tensor("T0", dims.iter().copied());
    g.mark_input(prev);
    for i in 1..=len {
        let next = g.add_tensor(&format!("T{}", i), dims.iter().copied());
        g.add_op(OpKind::pointwise(&format!("op{}", i)), vec![prev.into()], vec![next.into()]);
        prev = next;
    }
    g.mark_output(prev);
    g
}

/// `x[4, 8] -> sum -> r[4, r8] -> neg -> y[4]`
pub fn reduction_graph() -> TensorGraph {
    let mut g = TensorGraph::new();
    let x = g.add_tensor("x", [4, 8]);
    let r = g.add_tensor("r", [AxisSpec::iter(4), AxisSpec::reduction(8)]);
    let y = g.add_tensor("y", [4]);
    g.mark_input(x);
    g.add_op(
        OpKind::reduction("sum", Literal::Float(0.0)),
        vec![x.into()],
        vec![r.into()],
    );
    g.add_op(OpKind::pointwise("neg"), vec![r.into()], vec![y.into()]);
    g.mark_output(y);
    g
}

/// `x -> exp -> a`, `x -> neg -> b`, `add(a, b) -> y`
pub fn diamond_graph() -> TensorGraph {
    let mut g = TensorGraph::new();
    let x = g.add_tensor("x", [4, 8]);
    let a = g.add_tensor("a", [4, 8]);
    let b = g.add_tensor("b", [4, 8]);
    let y = g.add_tensor("y", [4, 8]);
    g.mark_input(x);
    g.add_op(OpKind::pointwise("exp"), vec![x.into()], vec![a.into()]);
    g.add_op(OpKind::pointwise("neg"), vec![x.into()], vec![b.into()]);
    g.add_op(OpKind::pointwise("add"), vec![a.into(), b.into()], vec![y.into()]);
    g.mark_output(y);
    g
}

/// One operation writing `mean` and `var`, both read by `add`
pub fn multi_output_graph() -> TensorGraph {
    let mut g = TensorGraph::new();
    let x = g.add_tensor("x", [4, 8]);
    let mean = g.add_tensor("mean", [4, 8]);
    let var = g.add_tensor("var", [4, 8]);
    let y = g.add_tensor("y", [4, 8]);
    g.mark_input(x);
    g.add_op(OpKind::pointwise("moments"), vec![x.into()], vec![mean.into(), var.into()]);
    g.add_op(OpKind::pointwise("add"), vec![mean.into(), var.into()], vec![y.into()]);
    g.mark_output(y);
    g
}

/// `p[4, 8]` read transposed by `c[8, 4]`
pub fn transpose_graph() -> (TensorGraph, CorrespondenceTable) {
    let mut g = TensorGraph::new();
    let x = g.add_tensor("x", [4, 8]);
    let p = g.add_tensor("p", [4, 8]);
    let c = g.add_tensor("c", [8, 4]);
    g.mark_input(x);
    g.add_op(OpKind::pointwise("exp"), vec![x.into()], vec![p.into()]);
    g.add_op(OpKind::pointwise("transpose"), vec![p.into()], vec![c.into()]);
    g.mark_output(c);

    let mut corr = CorrespondenceTable::new();
    corr.link_identity(&g, x, p);
    corr.link_positions(&g, p, c, &[(0, 1), (1, 0)]);
    (g, corr)
}

/// Every fixture with its correspondence, by name
pub fn all_graphs() -> Vec<(&'static str, TensorGraph, CorrespondenceTable)> {
    let with_identity = |name, g: TensorGraph| {
        let corr = CorrespondenceTable::identity(&g);
        (name, g, corr)
    };
    let (transpose, transpose_corr) = transpose_graph();
    vec![
        with_identity("chain", pointwise_chain(3, &[4, 8, 16])),
        with_identity("reduction", reduction_graph()),
        with_identity("diamond", diamond_graph()),
        with_identity("multi_output", multi_output_graph()),
        ("transpose", transpose, transpose_corr),
    ]
}

pub fn commits(g: &TensorGraph) -> Vec<(TensorId, usize)> {
    g.tensors().map(|t| (t.id, t.commit_position)).collect()
}
