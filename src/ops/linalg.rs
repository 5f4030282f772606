//! Linear algebra and axis manipulation.

use ndarray::{arr0, ArrayD, Axis, Ix1, Ix2};

use super::{dot, insert_axis, mul, sum, transpose};
use crate::{
    error::{GradError, Result},
    gradient::Grad,
    graph::{Graph, VarId},
    op::{check_arity, check_values, upstream, Op},
    types::TensorType,
};

/// Reverses the order of the axes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Transpose;

impl Op for Transpose {
    fn name(&self) -> String {
        "transpose".to_string()
    }

    fn make_outputs(&self, inputs: &[TensorType]) -> Result<Vec<TensorType>> {
        check_arity(self, inputs, 1)?;
        let mut pattern = inputs[0].broadcastable.clone();
        pattern.reverse();
        Ok(vec![TensorType::new(inputs[0].dtype, pattern)])
    }

    fn perform(&self, inputs: &[ArrayD<f64>]) -> Result<Vec<ArrayD<f64>>> {
        check_values(self, inputs, 1)?;
        Ok(vec![inputs[0].clone().reversed_axes()])
    }

    fn local_grad(
        &self,
        graph: &Graph,
        inputs: &[VarId],
        _outputs: &[VarId],
        output_grads: &[Grad],
    ) -> Result<Vec<Grad>> {
        match upstream(graph, inputs, output_grads[0]) {
            Ok(gz) => Ok(vec![Grad::Expr(transpose(graph, gz))]),
            Err(grads) => Ok(grads),
        }
    }

    fn fmt_expr(&self, inputs: &[String], _output: usize, _n_outputs: usize) -> String {
        format!("{}.T", inputs[0])
    }
}

/// Inserts a new broadcastable axis of length 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InsertAxis {
    pub axis: usize,
}

impl Op for InsertAxis {
    fn name(&self) -> String {
        "insert_axis".to_string()
    }

    fn make_outputs(&self, inputs: &[TensorType]) -> Result<Vec<TensorType>> {
        check_arity(self, inputs, 1)?;
        let x = &inputs[0];
        if self.axis > x.ndim() {
            return Err(GradError::TypeError {
                op: self.name(),
                reason: format!("cannot insert axis {} into rank {}", self.axis, x.ndim()),
            });
        }
        let mut pattern = x.broadcastable.clone();
        pattern.insert(self.axis, true);
        Ok(vec![TensorType::new(x.dtype, pattern)])
    }

    fn perform(&self, inputs: &[ArrayD<f64>]) -> Result<Vec<ArrayD<f64>>> {
        check_values(self, inputs, 1)?;
        if self.axis > inputs[0].ndim() {
            return Err(GradError::Perform {
                op: self.name(),
                reason: format!(
                    "cannot insert axis {} into rank {}",
                    self.axis,
                    inputs[0].ndim()
                ),
            });
        }
        Ok(vec![inputs[0].clone().insert_axis(Axis(self.axis))])
    }

    fn local_grad(
        &self,
        graph: &Graph,
        inputs: &[VarId],
        _outputs: &[VarId],
        output_grads: &[Grad],
    ) -> Result<Vec<Grad>> {
        match upstream(graph, inputs, output_grads[0]) {
            Ok(gz) => Ok(vec![Grad::Expr(sum(graph, gz, Some(self.axis))?)]),
            Err(grads) => Ok(grads),
        }
    }

    fn fmt_expr(&self, inputs: &[String], _output: usize, _n_outputs: usize) -> String {
        format!("insert_axis({}, {})", inputs[0], self.axis)
    }
}

/// Inner product of vectors and matrices.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Dot;

impl Dot {
    fn mismatch(&self, lhs: &[usize], rhs: &[usize]) -> GradError {
        GradError::Perform {
            op: self.name(),
            reason: format!("shapes {lhs:?} and {rhs:?} are not aligned"),
        }
    }
}

impl Op for Dot {
    fn name(&self) -> String {
        "dot".to_string()
    }

    fn make_outputs(&self, inputs: &[TensorType]) -> Result<Vec<TensorType>> {
        check_arity(self, inputs, 2)?;
        let (x, y) = (&inputs[0], &inputs[1]);
        let (bx, by) = (&x.broadcastable, &y.broadcastable);
        let pattern = match (x.ndim(), y.ndim()) {
            (2, 2) => vec![bx[0], by[1]],
            (2, 1) => vec![bx[0]],
            (1, 2) => vec![by[1]],
            (1, 1) => vec![],
            (rx, ry) => {
                return Err(GradError::TypeError {
                    op: self.name(),
                    reason: format!("expected vectors or matrices, got ranks {rx} and {ry}"),
                })
            }
        };
        Ok(vec![TensorType::new(x.dtype.upcast(y.dtype), pattern)])
    }

    fn perform(&self, inputs: &[ArrayD<f64>]) -> Result<Vec<ArrayD<f64>>> {
        check_values(self, inputs, 2)?;
        let (x, y) = (&inputs[0], &inputs[1]);
        let (sx, sy) = (x.shape(), y.shape());
        let inner_x = sx.last().copied();
        let inner_y = if y.ndim() == 2 { sy.first() } else { sy.last() }.copied();
        if inner_x != inner_y {
            return Err(self.mismatch(sx, sy));
        }
        let rank_err = |_| self.mismatch(sx, sy);
        let out = match (x.ndim(), y.ndim()) {
            (2, 2) => {
                let a = x.view().into_dimensionality::<Ix2>().map_err(rank_err)?;
                let b = y.view().into_dimensionality::<Ix2>().map_err(rank_err)?;
                a.dot(&b).into_dyn()
            }
            (2, 1) => {
                let a = x.view().into_dimensionality::<Ix2>().map_err(rank_err)?;
                let b = y.view().into_dimensionality::<Ix1>().map_err(rank_err)?;
                a.dot(&b).into_dyn()
            }
            (1, 2) => {
                let a = x.view().into_dimensionality::<Ix1>().map_err(rank_err)?;
                let b = y.view().into_dimensionality::<Ix2>().map_err(rank_err)?;
                a.dot(&b).into_dyn()
            }
            (1, 1) => {
                let a = x.view().into_dimensionality::<Ix1>().map_err(rank_err)?;
                let b = y.view().into_dimensionality::<Ix1>().map_err(rank_err)?;
                arr0(a.dot(&b)).into_dyn()
            }
            _ => return Err(self.mismatch(sx, sy)),
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
        let (x, y) = (inputs[0], inputs[1]);
        let (tx, ty) = (graph.ty(x), graph.ty(y));

        // Outer products are written as a dot of a column and a row.
        let gx = if !tx.is_differentiable() {
            Grad::Disconnected
        } else {
            Grad::Expr(match (tx.ndim(), ty.ndim()) {
                (2, 2) => dot(graph, gz, transpose(graph, y))?,
                (2, 1) => {
                    let col = insert_axis(graph, gz, 1)?;
                    let row = insert_axis(graph, y, 0)?;
                    dot(graph, col, row)?
                }
                (1, 2) => dot(graph, y, gz)?,
                _ => mul(graph, gz, y),
            })
        };
        let gy = if !ty.is_differentiable() {
            Grad::Disconnected
        } else {
            Grad::Expr(match (tx.ndim(), ty.ndim()) {
                (2, 2) | (2, 1) => dot(graph, transpose(graph, x), gz)?,
                (1, 2) => {
                    let col = insert_axis(graph, x, 1)?;
                    let row = insert_axis(graph, gz, 0)?;
                    dot(graph, col, row)?
                }
                _ => mul(graph, gz, x),
            })
        };
        Ok(vec![gx, gy])
    }
}
