use std::collections::HashMap;

use ndarray::arr0;
use symgrad::{grad, GradOptions, Graph};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let graph = Graph::new();
    let a = graph.scalar("a");
    let b = graph.scalar("b");
    let c = graph.scalar("c");
    let ab = a + b;
    let abc = ab * c;
    println!("(a + b) * c: {}", abc.expr_string());

    let grads = grad(&graph, abc, [a, b, c], &GradOptions::default())?.into_vec();
    for (name, g) in ["a", "b", "c"].into_iter().zip(&grads) {
        println!("d((a + b) * c) / d{name} = {}", graph.expr_string(*g));
    }

    let d = graph.scalar("d");
    let abcd = abc / d;
    let abcd_c = graph.var(grad(&graph, abcd, c, &GradOptions::default())?.into_vec()[0]);
    println!("d((a + b) * c / d) / dc = {}", abcd_c.expr_string());

    let bindings = HashMap::from([
        (a.id(), arr0(123.).into_dyn()),
        (b.id(), arr0(321.).into_dyn()),
        (c.id(), arr0(42.).into_dyn()),
        (d.id(), arr0(2.).into_dyn()),
    ]);
    let values = graph.eval(&grads, &bindings)?;
    for (name, value) in ["a", "b", "c"].into_iter().zip(&values) {
        println!("d((a + b) * c) / d{name} at (123, 321, 42) = {value}");
    }
    println!(
        "d((a + b) * c / d) / dc at (123, 321, 42, 2) = {}",
        abcd_c.eval(&bindings)?
    );

    let mut stdout = std::io::stdout();
    graph
        .dot_builder()
        .roots([abcd_c])
        .highlights([c])
        .dot(&mut stdout)?;
    Ok(())
}
