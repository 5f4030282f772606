//! Finds the part of the graph that lies between the requested inputs and the sources.

use crate::graph::{ApplyId, Graph, VarId};

/// Nodes that are both downstream of some requested input and upstream of some source.
///
/// Only nodes that existed when the analysis ran are considered; anything appended to
/// the graph afterwards lies outside the snapshot.
#[derive(Clone, Debug)]
pub struct Reachability {
    vars: Vec<bool>,
    applies: Vec<bool>,
}

impl Reachability {
    /// `blocked` variables do not lead backward into their producers. `fixed` variables
    /// act as extra sources and are never entered from their consumers.
    pub fn compute(
        graph: &Graph,
        sources: &[VarId],
        wrt: &[VarId],
        blocked: &[VarId],
        fixed: &[VarId],
    ) -> Self {
        let num_vars = graph.num_vars();
        let num_applies = graph.num_applies();

        let (fwd_vars, fwd_applies) = forward(graph, wrt, num_vars, num_applies);
        let (bwd_vars, bwd_applies) =
            backward(graph, sources, blocked, fixed, num_vars, num_applies);

        Self {
            vars: fwd_vars.iter().zip(&bwd_vars).map(|(f, b)| *f && *b).collect(),
            applies: fwd_applies
                .iter()
                .zip(&bwd_applies)
                .map(|(f, b)| *f && *b)
                .collect(),
        }
    }

    pub fn num_vars(&self) -> usize {
        self.vars.len()
    }

    pub fn num_applies(&self) -> usize {
        self.applies.len()
    }

    /// Whether `var` lies on a path from a requested input to a source.
    pub fn is_connected(&self, var: VarId) -> bool {
        self.vars.get(var.index()).copied().unwrap_or(false)
    }

    pub fn is_relevant(&self, apply: ApplyId) -> bool {
        self.applies.get(apply.index()).copied().unwrap_or(false)
    }

    pub fn relevant_applies(&self) -> impl Iterator<Item = ApplyId> + '_ {
        self.applies
            .iter()
            .enumerate()
            .filter(|(_, relevant)| **relevant)
            .map(|(i, _)| ApplyId(i as u32))
    }

    pub fn relevant_vars(&self) -> impl Iterator<Item = VarId> + '_ {
        self.vars
            .iter()
            .enumerate()
            .filter(|(_, relevant)| **relevant)
            .map(|(i, _)| VarId(i as u32))
    }
}

fn forward(
    graph: &Graph,
    wrt: &[VarId],
    num_vars: usize,
    num_applies: usize,
) -> (Vec<bool>, Vec<bool>) {
    let mut vars = vec![false; num_vars];
    let mut applies = vec![false; num_applies];
    let mut stack: Vec<VarId> = wrt.to_vec();
    while let Some(var) = stack.pop() {
        if var.index() >= num_vars || vars[var.index()] {
            continue;
        }
        vars[var.index()] = true;
        for apply in graph.consumers(var) {
            if apply.index() >= num_applies || applies[apply.index()] {
                continue;
            }
            applies[apply.index()] = true;
            stack.extend(graph.outputs(apply));
        }
    }
    (vars, applies)
}

fn backward(
    graph: &Graph,
    sources: &[VarId],
    blocked: &[VarId],
    fixed: &[VarId],
    num_vars: usize,
    num_applies: usize,
) -> (Vec<bool>, Vec<bool>) {
    let mut vars = vec![false; num_vars];
    let mut applies = vec![false; num_applies];
    let mut stack: Vec<VarId> = sources.iter().chain(fixed).copied().collect();
    while let Some(var) = stack.pop() {
        if var.index() >= num_vars || vars[var.index()] {
            continue;
        }
        vars[var.index()] = true;
        if blocked.contains(&var) {
            continue;
        }
        let Some(apply) = graph.producer(var) else {
            continue;
        };
        if apply.index() >= num_applies || applies[apply.index()] {
            continue;
        }
        applies[apply.index()] = true;
        stack.extend(
            graph
                .inputs(apply)
                .into_iter()
                .filter(|input| !fixed.contains(input)),
        );
    }
    (vars, applies)
}
