mod common;

use std::collections::HashMap;

use common::{assert_close, eval, numeric_grad, Bindings};
use ndarray::{arr1, arr2};
use rstest::rstest;
use symgrad::{grad, DType, GradError, GradOptions, Graph, TensorType, Var};

fn sin_times<'g>(x: Var<'g>) -> Var<'g> {
    (x.sin() * x).sum()
}

fn exp_ratio<'g>(x: Var<'g>) -> Var<'g> {
    (x.exp() / (x.sqr() + 1.)).sum()
}

fn tanh_dot<'g>(x: Var<'g>) -> Var<'g> {
    x.tanh().dot(x).unwrap()
}

fn signed_square<'g>(x: Var<'g>) -> Var<'g> {
    (x * x.abs()).sum()
}

fn log_sqrt<'g>(x: Var<'g>) -> Var<'g> {
    ((x.sqr() + 1.).log() - (x.sqr() + 2.).sqrt() * x.cosh()).sum()
}

fn max<'g>(x: Var<'g>) -> Var<'g> {
    x.max(0).unwrap() * x.sum()
}

fn neg_div<'g>(x: Var<'g>) -> Var<'g> {
    (-x / (x.sqr() + 3.)).sum()
}

#[rstest]
#[case::sin_times(sin_times)]
#[case::exp_ratio(exp_ratio)]
#[case::tanh_dot(tanh_dot)]
#[case::signed_square(signed_square)]
#[case::log_sqrt(log_sqrt)]
#[case::max(max)]
fn matches_finite_differences(#[case] f: for<'g> fn(Var<'g>) -> Var<'g>) {
    common::init_logger();
    let graph = Graph::new();
    let x = graph.vector("x");
    let cost = f(x);
    let g = grad(&graph, cost, x, &GradOptions::default())
        .unwrap()
        .single()
        .unwrap();
    let bindings = HashMap::from([(x.id(), arr1(&[0.3, -1.2, 0.7]).into_dyn())]);
    assert_close(
        &eval(&graph, g, &bindings),
        &numeric_grad(&graph, cost.id(), x.id(), &bindings),
    );
}

#[test]
fn positive_domain() {
    let graph = Graph::new();
    let p = graph.vector("p");
    let q = graph.vector("q");
    let cost = neg_div(p) + (p.pow(q) * q.tan()).sum() + (p.log2() * q.copy()).sum();
    let grads = grad(&graph, cost, [p, q], &GradOptions::default())
        .unwrap()
        .into_vec();
    let bindings = HashMap::from([
        (p.id(), arr1(&[0.5, 1.5, 2.5]).into_dyn()),
        (q.id(), arr1(&[0.2, -0.4, 1.1]).into_dyn()),
    ]);
    for (var, g) in [p, q].into_iter().zip(grads) {
        assert_close(
            &eval(&graph, g, &bindings),
            &numeric_grad(&graph, cost.id(), var.id(), &bindings),
        );
    }
}

#[test]
fn linearity() {
    let graph = Graph::new();
    let x = graph.vector("x");
    let f = sin_times(x);
    let h = x.exp().sum();
    let options = GradOptions::default();
    let gf = grad(&graph, f, x, &options).unwrap().into_vec()[0];
    let gh = grad(&graph, h, x, &options).unwrap().into_vec()[0];
    let gsum = grad(&graph, f + h * 3., x, &options).unwrap().into_vec()[0];

    let bindings = HashMap::from([(x.id(), arr1(&[0.1, 0.2, -0.5]).into_dyn())]);
    let expected = eval(&graph, gf, &bindings) + eval(&graph, gh, &bindings) * 3.;
    assert_close(&eval(&graph, gsum, &bindings), &expected);
}

fn check_all<'g>(graph: &'g Graph, cost: Var<'g>, wrt: &[Var<'g>], bindings: &Bindings) {
    let grads = cost.grad(wrt).unwrap();
    for (var, g) in wrt.iter().zip(grads) {
        assert_eq!(g.ty(), var.ty());
        assert_close(
            &eval(graph, g.id(), bindings),
            &numeric_grad(graph, cost.id(), var.id(), bindings),
        );
    }
}

#[test]
fn matrix_vector_products() {
    let graph = Graph::new();
    let w = graph.matrix("w");
    let x = graph.vector("x");
    let v = graph.vector("v");
    let m = graph.matrix("m");
    let cost = w.dot(x).unwrap().tanh().sum()
        + v.dot(w).unwrap().sin().sum()
        + w.dot(m.t()).unwrap().sqr().sum();
    let bindings = HashMap::from([
        (w.id(), arr2(&[[0.1, -0.2, 0.3], [0.4, 0.5, -0.6]]).into_dyn()),
        (x.id(), arr1(&[1., 2., -1.]).into_dyn()),
        (v.id(), arr1(&[0.7, -0.3]).into_dyn()),
        (m.id(), arr2(&[[1., 0., 0.5], [0.2, -1., 0.]]).into_dyn()),
    ]);
    check_all(&graph, cost, &[w, x, v, m], &bindings);
}

#[test]
fn broadcasting_is_summed_back() {
    let graph = Graph::new();
    let m = graph.matrix("m");
    let v = graph.vector("v");
    let r = graph.row("r");
    let s = graph.scalar("s");
    let cost = ((m * v + r) * s).exp().sum() + m.sum_axis(1).unwrap().sqr().sum();
    let bindings = HashMap::from([
        (m.id(), arr2(&[[0.1, 0.2, 0.3], [-0.1, 0.0, 0.4]]).into_dyn()),
        (v.id(), arr1(&[1., -1., 0.5]).into_dyn()),
        (r.id(), arr2(&[[0.3, 0.2, 0.1]]).into_dyn()),
        (s.id(), ndarray::arr0(0.9).into_dyn()),
    ]);
    check_all(&graph, cost, &[m, v, r, s], &bindings);
}

#[test]
fn argmax_routes_to_the_maximum() {
    let graph = Graph::new();
    let m = graph.matrix("m");
    let (max, _index) = m.argmax(1).unwrap();
    let cost = (max * max).sum();
    let g = cost.grad(&[m]).unwrap()[0];
    let bindings = HashMap::from([(m.id(), arr2(&[[1., 3., 2.], [4., 0., -1.]]).into_dyn())]);
    assert_eq!(
        eval(&graph, g.id(), &bindings),
        arr2(&[[0., 6., 0.], [8., 0., 0.]]).into_dyn()
    );
}

#[test]
fn second_order() {
    let graph = Graph::new();
    let x = graph.scalar("x");
    let y = x.sqr() * x;
    let dy = y.grad(&[x]).unwrap()[0];
    let ddy = dy.grad(&[x]).unwrap()[0];
    let bindings = HashMap::from([(x.id(), ndarray::arr0(1.5).into_dyn())]);
    assert_close(&eval(&graph, ddy.id(), &bindings), &ndarray::arr0(9.).into_dyn());
}

#[test]
fn size_one_axis_stretches_only_when_broadcastable() {
    let graph = Graph::new();
    let x = graph.vector("x");
    let y = graph.vector("y");
    let cost = (x * y).sum();
    let g = cost.grad(&[x]).unwrap()[0];
    let bindings = HashMap::from([
        (x.id(), arr1(&[5.]).into_dyn()),
        (y.id(), arr1(&[1., 2., 3.]).into_dyn()),
    ]);
    assert!(matches!(cost.eval(&bindings), Err(GradError::Perform { .. })));
    assert!(matches!(g.eval(&bindings), Err(GradError::Perform { .. })));

    let b = graph.input("b", TensorType::from_shape(DType::Float64, &[1]));
    let cost = (b * y).sum();
    let g = cost.grad(&[b]).unwrap()[0];
    let bindings = HashMap::from([
        (b.id(), arr1(&[5.]).into_dyn()),
        (y.id(), arr1(&[1., 2., 3.]).into_dyn()),
    ]);
    assert_close(&eval(&graph, cost.id(), &bindings), &ndarray::arr0(30.).into_dyn());
    assert_close(&eval(&graph, g.id(), &bindings), &arr1(&[6.]).into_dyn());
    assert_close(
        &eval(&graph, g.id(), &bindings),
        &numeric_grad(&graph, cost.id(), b.id(), &bindings),
    );
}

// Names nest the whole expression under `expr_name`.
#[cfg(not(feature = "expr_name"))]
#[test]
fn deep_chain_does_not_recurse() {
    let graph = Graph::new();
    let x = graph.scalar("x");
    let mut y = x;
    for _ in 0..100_000 {
        y = y.sin();
    }
    let g = y.grad(&[x]).unwrap()[0];
    let bindings = HashMap::from([(x.id(), ndarray::arr0(0.5).into_dyn())]);
    let value = eval(&graph, g.id(), &bindings).sum();
    assert!(value.is_finite() && value > 0.);
}
