//! Gradient values flowing through the backward pass.

use std::fmt::Display;

use crate::{
    graph::{Graph, VarId},
    ops,
};

/// A gradient expression, or one of the two sentinels that stand in for it.
///
/// Sentinels are never expressions, so they cannot be evaluated or fed to an operation
/// by accident.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Grad {
    /// A symbolic gradient living in the graph.
    Expr(VarId),
    /// The output provably does not depend on this value.
    Disconnected,
    /// The derivative is not defined, or no rule is implemented for it.
    Undefined,
}

impl Grad {
    pub fn expr(&self) -> Option<VarId> {
        match self {
            Grad::Expr(id) => Some(*id),
            _ => None,
        }
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, Grad::Disconnected)
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Grad::Undefined)
    }
}

impl From<VarId> for Grad {
    fn from(id: VarId) -> Self {
        Grad::Expr(id)
    }
}

impl Display for Grad {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Grad::Expr(id) => write!(f, "{id}"),
            Grad::Disconnected => write!(f, "<disconnected>"),
            Grad::Undefined => write!(f, "<undefined>"),
        }
    }
}

/// Sums the contributions a variable received from its consumers and seeds.
///
/// `Undefined` poisons the sum, `Disconnected` is absorbed by any real expression, and an
/// empty or all-disconnected list stays `Disconnected`. Real expressions are added in the
/// order they were contributed, so the same traversal always builds the same expression.
pub fn accumulate(graph: &Graph, contributions: &[Grad]) -> Grad {
    if contributions.iter().any(Grad::is_undefined) {
        return Grad::Undefined;
    }
    let mut total: Option<VarId> = None;
    for contribution in contributions {
        if let Grad::Expr(term) = contribution {
            total = Some(match total {
                None => *term,
                Some(acc) => ops::add(graph, acc, *term),
            });
        }
    }
    total.map_or(Grad::Disconnected, Grad::Expr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use Grad::*;

    #[test]
    fn test_disconnected_absorbed() {
        let graph = Graph::new();
        let a = graph.scalar("a").id();
        assert_eq!(accumulate(&graph, &[]), Disconnected);
        assert_eq!(accumulate(&graph, &[Disconnected, Disconnected]), Disconnected);
        assert_eq!(accumulate(&graph, &[Disconnected, Expr(a)]), Expr(a));
    }

    #[test]
    fn test_undefined_wins() {
        let graph = Graph::new();
        let a = graph.scalar("a").id();
        assert_eq!(accumulate(&graph, &[Expr(a), Undefined]), Undefined);
        assert_eq!(accumulate(&graph, &[Undefined, Disconnected]), Undefined);
    }

    #[test]
    fn test_sum_in_order() {
        let graph = Graph::new();
        let a = graph.scalar("a").id();
        let b = graph.scalar("b").id();
        let c = graph.scalar("c").id();
        let Expr(sum) = accumulate(&graph, &[Expr(a), Disconnected, Expr(b), Expr(c)]) else {
            panic!("expected an expression");
        };
        assert_eq!(graph.expr_string(sum), "((a + b) + c)");
    }
}
