use ndarray::{ArrayD, Axis};

use crate::{
    error::{GradError, Result},
    gradient::Grad,
    graph::{Graph, VarId},
    op::{check_arity, check_values, Op},
    types::TensorType,
};

/// Selects one entry along the first axis, `x[index]`.
///
/// Differentiation is refused: scattering the gradient back into a zero tensor of the
/// input shape is not implemented.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Subtensor {
    pub index: usize,
}

impl Op for Subtensor {
    fn name(&self) -> String {
        "subtensor".to_string()
    }

    fn make_outputs(&self, inputs: &[TensorType]) -> Result<Vec<TensorType>> {
        check_arity(self, inputs, 1)?;
        let x = &inputs[0];
        if x.is_scalar() {
            return Err(GradError::TypeError {
                op: self.name(),
                reason: "cannot index a scalar".to_string(),
            });
        }
        Ok(vec![TensorType::new(x.dtype, x.broadcastable[1..].to_vec())])
    }

    fn perform(&self, inputs: &[ArrayD<f64>]) -> Result<Vec<ArrayD<f64>>> {
        check_values(self, inputs, 1)?;
        let x = &inputs[0];
        if x.ndim() == 0 || self.index >= x.shape()[0] {
            return Err(GradError::Perform {
                op: self.name(),
                reason: format!("index {} is out of bounds for shape {:?}", self.index, x.shape()),
            });
        }
        Ok(vec![x.index_axis(Axis(0), self.index).to_owned()])
    }

    fn local_grad(
        &self,
        _graph: &Graph,
        _inputs: &[VarId],
        _outputs: &[VarId],
        _output_grads: &[Grad],
    ) -> Result<Vec<Grad>> {
        Err(GradError::NotDifferentiable {
            op: self.name(),
            reason: "the gradient of indexing is not implemented".to_string(),
        })
    }

    fn fmt_expr(&self, inputs: &[String], _output: usize, _n_outputs: usize) -> String {
        format!("{}[{}]", inputs[0], self.index)
    }
}
