mod common;

use std::collections::HashMap;

use ndarray::arr0;
use symgrad::{grad, GradOptions, Graph};

#[test]
fn main() {
    common::init_logger();
    let graph = Graph::new();
    let a = graph.scalar("a");
    let b = graph.scalar("b");
    let c = graph.scalar("c");
    let ab = a + b;
    let ac = a + c;
    let abac = ab + ac;

    let grads = grad(&graph, abac, [a, b, c], &GradOptions::default())
        .unwrap()
        .into_vec();
    println!("abac: {}", abac.expr_string());
    let bindings = HashMap::from([
        (a.id(), arr0(1.).into_dyn()),
        (b.id(), arr0(3.).into_dyn()),
        (c.id(), arr0(5.).into_dyn()),
    ]);
    let values = graph.eval(&grads, &bindings).unwrap();
    assert_eq!(values[0], arr0(2.).into_dyn());
    assert_eq!(values[1], arr0(1.).into_dyn());
    assert_eq!(values[2], arr0(1.).into_dyn());
    assert_eq!(graph.expr_string(grads[0]), "(1 + 1)");
}

#[test]
fn cube() {
    let graph = Graph::new();
    let x = graph.scalar("x");
    let y = x * x * x;
    let dy = y.grad(&[x]).unwrap()[0];
    let bindings = HashMap::from([(x.id(), arr0(2.).into_dyn())]);
    assert_eq!(dy.eval(&bindings).unwrap(), arr0(12.).into_dyn());
}
