#![allow(dead_code)]

use std::collections::HashMap;

use approx::assert_abs_diff_eq;
use ndarray::{indices_of, ArrayD, Dimension};
use symgrad::{Graph, VarId};

pub type Bindings = HashMap<VarId, ArrayD<f64>>;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn eval(graph: &Graph, var: VarId, bindings: &Bindings) -> ArrayD<f64> {
    graph.eval(&[var], bindings).unwrap().remove(0)
}

/// Central finite difference of a scalar `cost` with respect to the value bound to `wrt`.
pub fn numeric_grad(graph: &Graph, cost: VarId, wrt: VarId, bindings: &Bindings) -> ArrayD<f64> {
    let eps = 1e-6;
    let base = bindings[&wrt].clone();
    let mut out = ArrayD::zeros(base.raw_dim());
    for idx in indices_of(&base) {
        let idx = idx.slice();
        let mut shifted = bindings.clone();
        let at = |delta: f64, shifted: &mut Bindings| {
            let mut value = base.clone();
            value[idx] += delta;
            shifted.insert(wrt, value);
            eval(graph, cost, shifted).sum()
        };
        let plus = at(eps, &mut shifted);
        let minus = at(-eps, &mut shifted);
        out[idx] = (plus - minus) / (2. * eps);
    }
    out
}

pub fn assert_close(actual: &ArrayD<f64>, expected: &ArrayD<f64>) {
    assert_eq!(actual.shape(), expected.shape());
    for (a, e) in actual.iter().zip(expected.iter()) {
        assert_abs_diff_eq!(*a, *e, epsilon = 1e-5);
    }
}
