//! Reductions over one or all axes.

use ndarray::{arr0, ArrayD, Axis};

use super::{cast, eq, fill, insert_axis, mul};
use crate::{
    error::{GradError, Result},
    gradient::Grad,
    graph::{Graph, VarId},
    op::{check_arity, check_values, upstream, Op},
    types::{DType, TensorType},
};

fn check_axis(op: &dyn Op, axis: usize, ndim: usize) -> Result<()> {
    if axis < ndim {
        Ok(())
    } else {
        Err(GradError::TypeError {
            op: op.name(),
            reason: format!("axis {axis} is out of range for rank {ndim}"),
        })
    }
}

fn without_axis(pattern: &[bool], axis: usize) -> Vec<bool> {
    pattern
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != axis)
        .map(|(_, b)| *b)
        .collect()
}

/// Sum of all elements, or of the elements along one axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sum {
    pub axis: Option<usize>,
}

impl Op for Sum {
    fn name(&self) -> String {
        "sum".to_string()
    }

    fn make_outputs(&self, inputs: &[TensorType]) -> Result<Vec<TensorType>> {
        check_arity(self, inputs, 1)?;
        let x = &inputs[0];
        let dtype = if x.dtype == DType::Bool {
            DType::Int64
        } else {
            x.dtype
        };
        let pattern = match self.axis {
            None => vec![],
            Some(axis) => {
                check_axis(self, axis, x.ndim())?;
                without_axis(&x.broadcastable, axis)
            }
        };
        Ok(vec![TensorType::new(dtype, pattern)])
    }

    fn perform(&self, inputs: &[ArrayD<f64>]) -> Result<Vec<ArrayD<f64>>> {
        check_values(self, inputs, 1)?;
        let x = &inputs[0];
        let out = match self.axis {
            None => arr0(x.sum()).into_dyn(),
            Some(axis) => {
                check_axis(self, axis, x.ndim())?;
                x.sum_axis(Axis(axis))
            }
        };
        Ok(vec![out])
    }

    fn local_grad(
        &self,
        graph: &Graph,
        inputs: &[VarId],
        _outputs: &[VarId],
        output_grads: &[Grad],
    ) -> Result<Vec<Grad>> {
        let gz = match upstream(graph, inputs, output_grads[0]) {
            Ok(gz) => gz,
            Err(grads) => return Ok(grads),
        };
        let x = inputs[0];
        if !graph.ty(x).is_differentiable() {
            return Ok(vec![Grad::Disconnected]);
        }
        let spread = match self.axis {
            None => gz,
            Some(axis) => insert_axis(graph, gz, axis)?,
        };
        Ok(vec![Grad::Expr(fill(graph, x, spread))])
    }

    fn fmt_expr(&self, inputs: &[String], _output: usize, _n_outputs: usize) -> String {
        match self.axis {
            None => format!("sum({})", inputs[0]),
            Some(axis) => format!("sum({}, axis={axis})", inputs[0]),
        }
    }
}

/// Maximum along an axis together with its position.
///
/// The first output is the maximum. The second is the index of its first occurrence, an
/// `Int64` value that carries no gradient.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Argmax {
    pub axis: usize,
}

impl Op for Argmax {
    fn name(&self) -> String {
        "argmax".to_string()
    }

    fn make_outputs(&self, inputs: &[TensorType]) -> Result<Vec<TensorType>> {
        check_arity(self, inputs, 1)?;
        let x = &inputs[0];
        check_axis(self, self.axis, x.ndim())?;
        let pattern = without_axis(&x.broadcastable, self.axis);
        Ok(vec![
            TensorType::new(x.dtype, pattern.clone()),
            TensorType::new(DType::Int64, pattern),
        ])
    }

    fn perform(&self, inputs: &[ArrayD<f64>]) -> Result<Vec<ArrayD<f64>>> {
        check_values(self, inputs, 1)?;
        let x = &inputs[0];
        check_axis(self, self.axis, x.ndim())?;
        if x.shape()[self.axis] == 0 {
            return Err(GradError::Perform {
                op: self.name(),
                reason: format!("axis {} is empty", self.axis),
            });
        }
        let max = x.map_axis(Axis(self.axis), |lane| {
            lane.iter().copied().fold(f64::NEG_INFINITY, f64::max)
        });
        let index = x.map_axis(Axis(self.axis), |lane| {
            let mut best = 0;
            for (i, v) in lane.iter().enumerate() {
                if *v > lane[best] {
                    best = i;
                }
            }
            best as f64
        });
        Ok(vec![max, index])
    }

    fn local_grad(
        &self,
        graph: &Graph,
        inputs: &[VarId],
        outputs: &[VarId],
        output_grads: &[Grad],
    ) -> Result<Vec<Grad>> {
        let x = inputs[0];
        let tx = graph.ty(x);
        if !tx.is_differentiable() {
            return Ok(vec![Grad::Disconnected]);
        }
        // Only the maximum carries a gradient; the index is piecewise constant.
        let g_max = match output_grads[0] {
            Grad::Expr(g) => g,
            sentinel => return Ok(vec![sentinel]),
        };
        let max = insert_axis(graph, outputs[0], self.axis)?;
        let mask = cast(graph, eq(graph, x, max), tx.dtype);
        let spread = insert_axis(graph, g_max, self.axis)?;
        Ok(vec![Grad::Expr(mul(graph, mask, spread))])
    }

    fn fmt_expr(&self, inputs: &[String], output: usize, _n_outputs: usize) -> String {
        let name = if output == 0 { "max" } else { "argmax" };
        format!("{name}({}, axis={})", inputs[0], self.axis)
    }
}
