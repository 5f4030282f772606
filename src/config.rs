//! Options controlling a differentiation call.

use crate::graph::VarId;

/// What to do when a requested input has a discrete dtype.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DiscretePolicy {
    /// Fail with [`crate::GradError::NonDifferentiableType`].
    #[default]
    Raise,
    /// Report the input as disconnected.
    Disconnected,
}

/// What [`crate::grad`] does with an input that is not connected to the cost.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DisconnectedPolicy {
    #[default]
    Raise,
    /// Log a warning and return zeros shaped like the input.
    Warn,
    /// Return zeros shaped like the input.
    Ignore,
}

/// Options of the backward traversal itself.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BackpropConfig {
    /// Variables whose gradient does not flow to their producers.
    pub consider_constant: Vec<VarId>,
    /// Gradients supplied by the caller, replacing whatever the traversal would compute.
    pub known_grads: Vec<(VarId, VarId)>,
    pub discrete_wrt: DiscretePolicy,
}

impl BackpropConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn consider_constant(mut self, vars: impl IntoIterator<Item = impl Into<VarId>>) -> Self {
        self.consider_constant.extend(vars.into_iter().map(Into::into));
        self
    }

    pub fn known_grad(mut self, var: impl Into<VarId>, grad: impl Into<VarId>) -> Self {
        self.known_grads.push((var.into(), grad.into()));
        self
    }

    pub fn discrete_wrt(mut self, policy: DiscretePolicy) -> Self {
        self.discrete_wrt = policy;
        self
    }

    pub(crate) fn is_blocked(&self, var: VarId) -> bool {
        self.consider_constant.contains(&var)
    }

    pub(crate) fn known_grad_of(&self, var: VarId) -> Option<VarId> {
        // The last entry for a variable takes effect.
        self.known_grads
            .iter()
            .rev()
            .find(|(v, _)| *v == var)
            .map(|(_, g)| *g)
    }
}

/// Options of [`crate::grad`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GradOptions {
    pub backprop: BackpropConfig,
    pub disconnected_inputs: DisconnectedPolicy,
    /// Gradient of the cost with respect to itself. Required when the cost is not a
    /// scalar; defaults to a unit constant otherwise.
    pub seed: Option<VarId>,
}

impl GradOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backprop(mut self, backprop: BackpropConfig) -> Self {
        self.backprop = backprop;
        self
    }

    pub fn consider_constant(mut self, vars: impl IntoIterator<Item = impl Into<VarId>>) -> Self {
        self.backprop = self.backprop.consider_constant(vars);
        self
    }

    pub fn known_grad(mut self, var: impl Into<VarId>, grad: impl Into<VarId>) -> Self {
        self.backprop = self.backprop.known_grad(var, grad);
        self
    }

    pub fn disconnected_inputs(mut self, policy: DisconnectedPolicy) -> Self {
        self.disconnected_inputs = policy;
        self
    }

    pub fn seed(mut self, seed: impl Into<VarId>) -> Self {
        self.seed = Some(seed.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;

    #[test]
    fn test_builder() {
        let graph = Graph::new();
        let x = graph.scalar("x");
        let y = graph.scalar("y");
        let options = GradOptions::new()
            .consider_constant([x])
            .known_grad(y, x)
            .known_grad(y, y)
            .disconnected_inputs(DisconnectedPolicy::Ignore);
        assert!(options.backprop.is_blocked(x.id()));
        assert!(!options.backprop.is_blocked(y.id()));
        assert_eq!(options.backprop.known_grad_of(y.id()), Some(y.id()));
        assert_eq!(options.backprop.known_grad_of(x.id()), None);
        assert_eq!(options.backprop.discrete_wrt, DiscretePolicy::Raise);
    }
}
