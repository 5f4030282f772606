//! The interface every operation implements to take part in differentiation.

use ndarray::ArrayD;

use crate::{
    error::{GradError, Result},
    gradient::Grad,
    graph::{Graph, VarId},
    types::TensorType,
};

/// An operation that can be applied to variables of a [`Graph`].
///
/// It needs to implement type propagation, a reference evaluation and, to be
/// differentiable, the local gradient rule.
pub trait Op: std::fmt::Debug {
    fn name(&self) -> String;

    /// Validates the input types and returns the type of every output.
    fn make_outputs(&self, inputs: &[TensorType]) -> Result<Vec<TensorType>>;

    /// Computes the outputs from concrete input values.
    fn perform(&self, inputs: &[ArrayD<f64>]) -> Result<Vec<ArrayD<f64>>>;

    /// Checks concrete input values against the declared input types before
    /// [`Op::perform`] runs. Accepts everything by default.
    fn check_inputs(&self, _types: &[TensorType], _values: &[ArrayD<f64>]) -> Result<()> {
        Ok(())
    }

    /// Builds the gradient flowing into each input from the gradients of the outputs.
    ///
    /// `output_grads` holds one entry per output, which is the total gradient flowing
    /// back into it. The result must hold exactly one entry per input, in input order.
    /// Each entry is either an expression with the rank of its input or a sentinel.
    ///
    /// Return [`Grad::Disconnected`] for an input the outputs do not depend on (integer
    /// arguments, shape-only models) and [`Grad::Undefined`] where no derivative is
    /// defined, never a zero expression. Return an error only to refuse
    /// differentiation altogether; the error reaches the caller unchanged.
    ///
    /// The default reports that no gradient rule is implemented.
    fn local_grad(
        &self,
        _graph: &Graph,
        inputs: &[VarId],
        _outputs: &[VarId],
        _output_grads: &[Grad],
    ) -> Result<Vec<Grad>> {
        Ok(vec![Grad::Undefined; inputs.len()])
    }

    /// Renders an application of this operation for debugging output.
    fn fmt_expr(&self, inputs: &[String], output: usize, n_outputs: usize) -> String {
        let call = format!("{}({})", self.name(), inputs.join(", "));
        if n_outputs == 1 {
            call
        } else {
            format!("{call}[{output}]")
        }
    }
}

/// Unpacks the gradient flowing into a single-output operation.
///
/// When the gradient is a sentinel, returns the input gradients the operation should
/// report instead: the same sentinel for differentiable inputs, `Disconnected` for
/// discrete ones.
pub fn upstream(
    graph: &Graph,
    inputs: &[VarId],
    output_grad: Grad,
) -> std::result::Result<VarId, Vec<Grad>> {
    match output_grad {
        Grad::Expr(gz) => Ok(gz),
        sentinel => Err(inputs
            .iter()
            .map(|&input| {
                if graph.ty(input).is_differentiable() {
                    sentinel
                } else {
                    Grad::Disconnected
                }
            })
            .collect()),
    }
}

pub(crate) fn check_arity(op: &dyn Op, inputs: &[TensorType], expected: usize) -> Result<()> {
    if inputs.len() == expected {
        Ok(())
    } else {
        Err(GradError::TypeError {
            op: op.name(),
            reason: format!("expected {expected} inputs, got {}", inputs.len()),
        })
    }
}

pub(crate) fn check_values(op: &dyn Op, inputs: &[ArrayD<f64>], expected: usize) -> Result<()> {
    if inputs.len() == expected {
        Ok(())
    } else {
        Err(GradError::Perform {
            op: op.name(),
            reason: format!("expected {expected} values, got {}", inputs.len()),
        })
    }
}
