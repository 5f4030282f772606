//! Reverse traversal of the graph, building gradient expressions as it goes.
//!
//! Every relevant variable counts the distinct relevant applications consuming it, and
//! every relevant application counts its outputs whose gradient is not final yet. An
//! application is visited once all of its outputs are final, so each application runs its
//! gradient rule exactly once and only after every path through its outputs has
//! contributed. The traversal uses a work queue and never recurses.

use std::collections::VecDeque;

use indexmap::IndexMap;
use log::{debug, trace};

use crate::{
    config::{BackpropConfig, DiscretePolicy},
    error::{GradError, Result},
    gradient::{accumulate, Grad},
    graph::{ApplyId, Graph, VarId},
    reach::Reachability,
};

/// Computes the gradients of the `wrt` variables given seed gradients of the sources.
///
/// `sources` pairs each source variable with the gradient flowing into it; several seeds
/// for the same variable are summed. The sources need not be scalars, but every seed must
/// have the rank of its source. The result follows the order of `wrt` and reports
/// [`Grad::Disconnected`] for inputs no source depends on and [`Grad::Undefined`] where
/// some path has no defined derivative.
pub fn grad_sources_inputs(
    graph: &Graph,
    sources: &[(VarId, VarId)],
    wrt: &[VarId],
    config: &BackpropConfig,
) -> Result<IndexMap<VarId, Grad>> {
    validate(graph, sources, wrt, config)?;

    let mut result = IndexMap::with_capacity(wrt.len());
    let mut targets = Vec::with_capacity(wrt.len());
    for &var in wrt {
        if graph.ty(var).is_differentiable() {
            targets.push(var);
        } else {
            result.insert(var, Grad::Disconnected);
        }
    }

    let totals = Backprop::new(graph, sources, &targets, config).run()?;
    for &var in wrt {
        if !result.contains_key(&var) {
            result.insert(var, totals.get(var));
        }
    }
    Ok(result)
}

/// Checks that every `wrt` variable belongs to `graph` and, unless discrete inputs are
/// reported as disconnected, that it has a differentiable dtype.
pub(crate) fn check_wrt(graph: &Graph, wrt: &[VarId], config: &BackpropConfig) -> Result<()> {
    for &var in wrt {
        graph.check(var)?;
    }
    if config.discrete_wrt == DiscretePolicy::Raise {
        if let Some(&var) = wrt.iter().find(|&&var| !graph.ty(var).is_differentiable()) {
            return Err(GradError::NonDifferentiableType {
                name: graph.name(var),
                dtype: graph.ty(var).dtype,
            });
        }
    }
    Ok(())
}

fn validate(
    graph: &Graph,
    sources: &[(VarId, VarId)],
    wrt: &[VarId],
    config: &BackpropConfig,
) -> Result<()> {
    check_wrt(graph, wrt, config)?;
    for &var in &config.consider_constant {
        graph.check(var)?;
    }
    for &(var, seed) in sources.iter().chain(&config.known_grads) {
        graph.check(var)?;
        graph.check(seed)?;
        let (expected, actual) = (graph.ty(var).ndim(), graph.ty(seed).ndim());
        if expected != actual {
            return Err(GradError::ShapeMismatch {
                name: graph.name(seed),
                expected,
                actual,
            });
        }
    }
    Ok(())
}

/// Final gradients of the variables visited by a traversal.
struct Totals(Vec<Option<Grad>>);

impl Totals {
    fn get(&self, var: VarId) -> Grad {
        self.0
            .get(var.index())
            .copied()
            .flatten()
            .unwrap_or(Grad::Disconnected)
    }
}

struct Backprop<'a> {
    graph: &'a Graph,
    config: &'a BackpropConfig,
    wrt: Vec<VarId>,
    num_sources: usize,
    reach: Reachability,
    contributions: Vec<Vec<Grad>>,
    totals: Vec<Option<Grad>>,
    /// Relevant consumers of each variable that have not contributed yet.
    pending: Vec<usize>,
    /// Relevant outputs of each application whose gradient is not final yet.
    outstanding: Vec<usize>,
    ready: VecDeque<VarId>,
    queue: VecDeque<ApplyId>,
}

impl<'a> Backprop<'a> {
    fn new(
        graph: &'a Graph,
        sources: &[(VarId, VarId)],
        wrt: &[VarId],
        config: &'a BackpropConfig,
    ) -> Self {
        let source_vars: Vec<VarId> = sources.iter().map(|(var, _)| *var).collect();
        let fixed: Vec<VarId> = config.known_grads.iter().map(|(var, _)| *var).collect();
        let reach = Reachability::compute(
            graph,
            &source_vars,
            wrt,
            &config.consider_constant,
            &fixed,
        );

        let mut contributions = vec![vec![]; reach.num_vars()];
        for &(var, seed) in sources {
            contributions[var.index()].push(Grad::Expr(seed));
        }

        let mut pending = vec![0; reach.num_vars()];
        let mut ready = VecDeque::new();
        for var in reach.relevant_vars() {
            if config.known_grad_of(var).is_none() {
                pending[var.index()] = graph
                    .consumers(var)
                    .into_iter()
                    .filter(|apply| reach.is_relevant(*apply))
                    .count();
            }
            if pending[var.index()] == 0 {
                ready.push_back(var);
            }
        }

        let mut outstanding = vec![0; reach.num_applies()];
        for apply in reach.relevant_applies() {
            outstanding[apply.index()] = graph
                .outputs(apply)
                .into_iter()
                .filter(|output| reach.is_connected(*output))
                .count();
        }

        Self {
            graph,
            config,
            wrt: wrt.to_vec(),
            num_sources: sources.len(),
            contributions,
            totals: vec![None; reach.num_vars()],
            pending,
            outstanding,
            ready,
            queue: VecDeque::new(),
            reach,
        }
    }

    fn run(mut self) -> Result<Totals> {
        if !self.wrt.iter().any(|var| self.reach.is_connected(*var)) {
            debug!("backprop: no requested input is connected to a source");
            return Ok(Totals(self.totals));
        }
        let relevant = self.reach.relevant_applies().count();
        debug!(
            "backprop: {} sources, {} inputs, {relevant} relevant applications",
            self.num_sources,
            self.wrt.len()
        );

        let mut visited = 0;
        loop {
            while let Some(var) = self.ready.pop_front() {
                self.finalize(var);
            }
            let Some(apply) = self.queue.pop_front() else {
                break;
            };
            self.visit(apply)?;
            visited += 1;
        }

        if visited != relevant {
            return Err(GradError::CyclicGraph);
        }
        Ok(Totals(self.totals))
    }

    fn finalize(&mut self, var: VarId) {
        let total = match self.config.known_grad_of(var) {
            Some(known) => Grad::Expr(known),
            None => accumulate(self.graph, &self.contributions[var.index()]),
        };
        self.totals[var.index()] = Some(total);
        if let Some(apply) = self.graph.producer(var) {
            if self.reach.is_relevant(apply) {
                let outstanding = &mut self.outstanding[apply.index()];
                *outstanding -= 1;
                if *outstanding == 0 {
                    self.queue.push_back(apply);
                }
            }
        }
    }

    /// The gradient an output passes on to its producer.
    fn output_grad(&self, output: VarId) -> Grad {
        if self.config.is_blocked(output) {
            return Grad::Disconnected;
        }
        self.totals
            .get(output.index())
            .copied()
            .flatten()
            .unwrap_or(Grad::Disconnected)
    }

    fn visit(&mut self, apply: ApplyId) -> Result<()> {
        let graph = self.graph;
        let op = graph.op(apply);
        let inputs = graph.inputs(apply);
        let outputs = graph.outputs(apply);
        let output_grads: Vec<Grad> = outputs.iter().map(|o| self.output_grad(*o)).collect();
        trace!(
            "backprop: visiting {apply} ({}) with output gradients [{}]",
            op.name(),
            output_grads
                .iter()
                .map(|g| g.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );

        let input_grads = if output_grads.iter().all(Grad::is_disconnected) {
            vec![Grad::Disconnected; inputs.len()]
        } else {
            let grads = op.local_grad(graph, &inputs, &outputs, &output_grads)?;
            if grads.len() != inputs.len() {
                return Err(GradError::GradientArity {
                    op: op.name(),
                    expected: inputs.len(),
                    actual: grads.len(),
                });
            }
            for (index, (input, g)) in inputs.iter().zip(&grads).enumerate() {
                if let Grad::Expr(g) = g {
                    graph.check(*g)?;
                    let (expected, actual) = (graph.ty(*input).ndim(), graph.ty(*g).ndim());
                    if expected != actual {
                        return Err(GradError::GradientType {
                            op: op.name(),
                            index,
                            expected,
                            actual,
                        });
                    }
                }
            }
            grads
        };

        for (slot, (input, g)) in inputs.iter().zip(&input_grads).enumerate() {
            if !self.reach.is_connected(*input) || self.config.known_grad_of(*input).is_some() {
                continue;
            }
            self.contributions[input.index()].push(*g);
            // Count this application once even if it consumes the input in several slots.
            if inputs[..slot].contains(input) {
                continue;
            }
            let pending = &mut self.pending[input.index()];
            *pending -= 1;
            if *pending == 0 {
                self.ready.push_back(*input);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{op::Op, types::TensorType};
    use ndarray::ArrayD;

    fn seed<'g>(graph: &'g Graph, cost: crate::graph::Var<'g>) -> Vec<(VarId, VarId)> {
        vec![(cost.id(), graph.scalar_constant(1., cost.ty().dtype).id())]
    }

    #[test]
    fn test_square() {
        let graph = Graph::new();
        let x = graph.scalar("x");
        let cost = x * x;
        let grads =
            grad_sources_inputs(&graph, &seed(&graph, cost), &[x.id()], &Default::default())
                .unwrap();
        let Grad::Expr(gx) = grads[&x.id()] else {
            panic!("expected an expression");
        };
        assert_eq!(graph.expr_string(gx), "((1 * x) + (1 * x))");
    }

    #[test]
    fn test_unreached() {
        let graph = Graph::new();
        let x = graph.scalar("x");
        let y = graph.scalar("y");
        let cost = x.exp();
        let grads = grad_sources_inputs(
            &graph,
            &seed(&graph, cost),
            &[y.id(), x.id()],
            &Default::default(),
        )
        .unwrap();
        assert_eq!(grads.keys().copied().collect::<Vec<_>>(), vec![y.id(), x.id()]);
        assert_eq!(grads[&y.id()], Grad::Disconnected);
        assert!(grads[&x.id()].expr().is_some());
    }

    #[test]
    fn test_seed_rank() {
        let graph = Graph::new();
        let x = graph.vector("x");
        let cost = x.exp();
        let one = graph.scalar_constant(1., cost.ty().dtype);
        let err = grad_sources_inputs(
            &graph,
            &[(cost.id(), one.id())],
            &[x.id()],
            &Default::default(),
        )
        .unwrap_err();
        assert!(matches!(err, GradError::ShapeMismatch { expected: 1, actual: 0, .. }));
    }

    #[test]
    fn test_all_disconnected_skips_rule() {
        #[derive(Debug)]
        struct Refuses;
        impl Op for Refuses {
            fn name(&self) -> String {
                "refuses".to_string()
            }
            fn make_outputs(&self, inputs: &[TensorType]) -> Result<Vec<TensorType>> {
                Ok(vec![inputs[0].clone()])
            }
            fn perform(&self, inputs: &[ArrayD<f64>]) -> Result<Vec<ArrayD<f64>>> {
                Ok(vec![inputs[0].clone()])
            }
            fn local_grad(
                &self,
                _graph: &Graph,
                _inputs: &[VarId],
                _outputs: &[VarId],
                _output_grads: &[Grad],
            ) -> Result<Vec<Grad>> {
                panic!("must not be called")
            }
        }

        let graph = Graph::new();
        let x = graph.scalar("x");
        let r = graph.var(graph.apply(Refuses, &[x.id()]).unwrap()[0]);
        // The sign is piecewise constant, so nothing flows back into `r`.
        let cost = r.sgn() + x;
        let grads =
            grad_sources_inputs(&graph, &seed(&graph, cost), &[x.id()], &Default::default())
                .unwrap();
        assert_eq!(graph.expr_string(grads[&x.id()].expr().unwrap()), "1");
    }

    #[test]
    fn test_wrong_arity() {
        #[derive(Debug)]
        struct Sloppy;
        impl Op for Sloppy {
            fn name(&self) -> String {
                "sloppy".to_string()
            }
            fn make_outputs(&self, inputs: &[TensorType]) -> Result<Vec<TensorType>> {
                Ok(vec![inputs[0].clone()])
            }
            fn perform(&self, inputs: &[ArrayD<f64>]) -> Result<Vec<ArrayD<f64>>> {
                Ok(vec![inputs[0].clone()])
            }
            fn local_grad(
                &self,
                _graph: &Graph,
                _inputs: &[VarId],
                _outputs: &[VarId],
                output_grads: &[Grad],
            ) -> Result<Vec<Grad>> {
                Ok(vec![output_grads[0]; 2])
            }
        }

        let graph = Graph::new();
        let x = graph.scalar("x");
        let cost = graph.var(graph.apply(Sloppy, &[x.id()]).unwrap()[0]);
        let err =
            grad_sources_inputs(&graph, &seed(&graph, cost), &[x.id()], &Default::default())
                .unwrap_err();
        assert_eq!(
            err,
            GradError::GradientArity {
                op: "sloppy".to_string(),
                expected: 1,
                actual: 2
            }
        );
    }
}
