//! Graphviz output for inspecting forward and gradient graphs.

use std::io::Write;

use crate::graph::{ApplyId, Graph, VarId};

/// Writes the part of a [`Graph`] feeding some root variables as a graphviz dot file.
///
/// Variables are drawn as ellipses and applications as boxes.
pub struct DotBuilder<'g> {
    graph: &'g Graph,
    roots: Vec<VarId>,
    highlights: Vec<VarId>,
    show_types: bool,
}

impl Graph {
    pub fn dot_builder(&self) -> DotBuilder<'_> {
        DotBuilder {
            graph: self,
            roots: vec![],
            highlights: vec![],
            show_types: false,
        }
    }
}

impl<'g> DotBuilder<'g> {
    /// Restricts the output to what the given variables depend on. Without roots the
    /// whole graph is written.
    pub fn roots(mut self, roots: impl IntoIterator<Item = impl Into<VarId>>) -> Self {
        self.roots.extend(roots.into_iter().map(Into::into));
        self
    }

    /// Variables to draw filled, such as the inputs being differentiated.
    pub fn highlights(mut self, vars: impl IntoIterator<Item = impl Into<VarId>>) -> Self {
        self.highlights.extend(vars.into_iter().map(Into::into));
        self
    }

    pub fn show_types(mut self, b: bool) -> Self {
        self.show_types = b;
        self
    }

    /// Write graphviz dot file to the given writer.
    pub fn dot(&self, writer: &mut impl Write) -> std::io::Result<()> {
        let graph = self.graph;
        let (vars, applies) = self.collect();
        writeln!(writer, "digraph G {{\nrankdir=\"LR\";")?;
        for var in vars {
            let mut label = graph.name(var);
            if self.show_types {
                label = format!("{label}\\n{}", graph.ty(var));
            }
            let style = if self.highlights.contains(&var) {
                " style=filled fillcolor=\"#ffff7f\""
            } else {
                ""
            };
            writeln!(writer, "{var} [label=\"{}\"{style}];", escape(&label))?;
        }
        for apply in applies {
            writeln!(
                writer,
                "{apply} [label=\"{}\" shape=box];",
                escape(&graph.op(apply).name())
            )?;
            for input in graph.inputs(apply) {
                writeln!(writer, "{input} -> {apply};")?;
            }
            for output in graph.outputs(apply) {
                writeln!(writer, "{apply} -> {output};")?;
            }
        }
        writeln!(writer, "}}")?;
        Ok(())
    }

    fn collect(&self) -> (Vec<VarId>, Vec<ApplyId>) {
        let graph = self.graph;
        let mut vars = vec![self.roots.is_empty(); graph.num_vars()];
        let mut applies = vec![self.roots.is_empty(); graph.num_applies()];
        let mut stack: Vec<VarId> = self
            .roots
            .iter()
            .copied()
            .filter(|root| graph.contains(*root))
            .collect();
        while let Some(var) = stack.pop() {
            if vars[var.index()] {
                continue;
            }
            vars[var.index()] = true;
            if let Some(apply) = graph.producer(var) {
                if !applies[apply.index()] {
                    applies[apply.index()] = true;
                    let outputs = graph.outputs(apply);
                    stack.extend(graph.inputs(apply).into_iter().chain(outputs));
                }
            }
        }
        (
            enumerate_set(&vars).map(|i| VarId(i as u32)).collect(),
            enumerate_set(&applies).map(|i| ApplyId(i as u32)).collect(),
        )
    }
}

fn enumerate_set(set: &[bool]) -> impl Iterator<Item = usize> + '_ {
    set.iter()
        .enumerate()
        .filter(|(_, b)| **b)
        .map(|(i, _)| i)
}

fn escape(label: &str) -> String {
    label.replace('"', "\\\"")
}
