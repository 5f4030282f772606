//! The user-facing differentiation call.

use log::warn;

use crate::{
    backprop::{check_wrt, grad_sources_inputs},
    config::{DisconnectedPolicy, GradOptions},
    error::{GradError, Result},
    gradient::Grad,
    graph::{Graph, Var, VarId},
    ops::zeros_like,
};

/// The variables to differentiate with respect to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Wrt {
    Single(VarId),
    Many(Vec<VarId>),
}

impl Wrt {
    fn as_slice(&self) -> &[VarId] {
        match self {
            Wrt::Single(var) => std::slice::from_ref(var),
            Wrt::Many(vars) => vars,
        }
    }
}

impl From<VarId> for Wrt {
    fn from(var: VarId) -> Self {
        Wrt::Single(var)
    }
}

impl<'g> From<Var<'g>> for Wrt {
    fn from(var: Var<'g>) -> Self {
        Wrt::Single(var.id())
    }
}

impl From<Vec<VarId>> for Wrt {
    fn from(vars: Vec<VarId>) -> Self {
        Wrt::Many(vars)
    }
}

impl From<&[VarId]> for Wrt {
    fn from(vars: &[VarId]) -> Self {
        Wrt::Many(vars.to_vec())
    }
}

impl<'g> From<&[Var<'g>]> for Wrt {
    fn from(vars: &[Var<'g>]) -> Self {
        Wrt::Many(vars.iter().map(Var::id).collect())
    }
}

impl<'g, const N: usize> From<[Var<'g>; N]> for Wrt {
    fn from(vars: [Var<'g>; N]) -> Self {
        Wrt::Many(vars.iter().map(Var::id).collect())
    }
}

/// Gradients in the same shape as the [`Wrt`] they were requested with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Gradients {
    Single(VarId),
    Many(Vec<VarId>),
}

impl Gradients {
    pub fn single(&self) -> Option<VarId> {
        match self {
            Gradients::Single(grad) => Some(*grad),
            Gradients::Many(_) => None,
        }
    }

    pub fn into_vec(self) -> Vec<VarId> {
        match self {
            Gradients::Single(grad) => vec![grad],
            Gradients::Many(grads) => grads,
        }
    }
}

/// Builds the symbolic gradient of `cost` with respect to each variable in `wrt`.
///
/// The cost must be a scalar unless `options.seed` supplies its gradient. Every returned
/// gradient is an expression in `graph` with the type of its input. A disconnected input
/// is an error unless `options.disconnected_inputs` says otherwise, in which case it gets
/// zeros. An undefined gradient is always an error.
pub fn grad(
    graph: &Graph,
    cost: impl Into<VarId>,
    wrt: impl Into<Wrt>,
    options: &GradOptions,
) -> Result<Gradients> {
    let cost = cost.into();
    let wrt = wrt.into();
    graph.check(cost)?;
    check_wrt(graph, wrt.as_slice(), &options.backprop)?;

    let seed = match options.seed {
        Some(seed) => seed,
        None => {
            let ty = graph.ty(cost);
            if !ty.is_scalar() {
                return Err(GradError::ShapeMismatch {
                    name: graph.name(cost),
                    expected: 0,
                    actual: ty.ndim(),
                });
            }
            graph.scalar_constant(1., ty.dtype.to_continuous()).id()
        }
    };

    let grads = grad_sources_inputs(graph, &[(cost, seed)], wrt.as_slice(), &options.backprop)?;

    let mut out = Vec::with_capacity(wrt.as_slice().len());
    for var in wrt.as_slice() {
        let g = match grads.get(var).copied().unwrap_or(Grad::Disconnected) {
            Grad::Expr(g) => g,
            Grad::Undefined => {
                return Err(GradError::UndefinedGradient {
                    name: graph.name(*var),
                })
            }
            Grad::Disconnected => match options.disconnected_inputs {
                DisconnectedPolicy::Raise => {
                    return Err(GradError::DisconnectedInput {
                        name: graph.name(*var),
                    })
                }
                DisconnectedPolicy::Warn => {
                    warn!(
                        "`{}` is not connected to the cost; using zeros as its gradient",
                        graph.name(*var)
                    );
                    zeros_like(graph, *var)
                }
                DisconnectedPolicy::Ignore => zeros_like(graph, *var),
            },
        };
        out.push(g);
    }

    Ok(match wrt {
        Wrt::Single(_) => Gradients::Single(out[0]),
        Wrt::Many(_) => Gradients::Many(out),
    })
}

impl<'g> Var<'g> {
    /// Gradients of this scalar with respect to `wrt`, using the default options.
    pub fn grad(&self, wrt: &[Var<'g>]) -> Result<Vec<Var<'g>>> {
        let grads = grad(self.graph(), self.id(), wrt, &GradOptions::default())?;
        Ok(grads.into_vec().into_iter().map(|g| self.wrap(g)).collect())
    }
}
