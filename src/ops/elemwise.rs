//! Elementwise operations with numpy-style broadcasting.

use std::{f64::consts::LN_2, rc::Rc};

use ndarray::{ArrayD, Axis, Zip};

use super::{add, binary, cast, div, fill, mul, neg, sub, unary};
use crate::{
    error::{GradError, Result},
    gradient::Grad,
    graph::{Graph, VarId},
    op::{check_arity, check_values, upstream, Op},
    types::{DType, TensorType},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnaryKind {
    Neg,
    Abs,
    Exp,
    Log,
    Log2,
    Sgn,
    Sqr,
    Sqrt,
    Cos,
    Sin,
    Tan,
    Cosh,
    Sinh,
    Tanh,
    Identity,
}

impl UnaryKind {
    pub fn name(&self) -> &'static str {
        use UnaryKind::*;
        match self {
            Neg => "neg",
            Abs => "abs",
            Exp => "exp",
            Log => "log",
            Log2 => "log2",
            Sgn => "sgn",
            Sqr => "sqr",
            Sqrt => "sqrt",
            Cos => "cos",
            Sin => "sin",
            Tan => "tan",
            Cosh => "cosh",
            Sinh => "sinh",
            Tanh => "tanh",
            Identity => "copy",
        }
    }

    fn f(&self, x: f64) -> f64 {
        use UnaryKind::*;
        match self {
            Neg => -x,
            Abs => x.abs(),
            Exp => x.exp(),
            Log => x.ln(),
            Log2 => x.log2(),
            Sgn => {
                if x > 0. {
                    1.
                } else if x < 0. {
                    -1.
                } else {
                    0.
                }
            }
            Sqr => x * x,
            Sqrt => x.sqrt(),
            Cos => x.cos(),
            Sin => x.sin(),
            Tan => x.tan(),
            Cosh => x.cosh(),
            Sinh => x.sinh(),
            Tanh => x.tanh(),
            Identity => x,
        }
    }

    /// Functions that map integers to integers keep the input dtype.
    fn preserves_dtype(&self) -> bool {
        use UnaryKind::*;
        matches!(self, Neg | Abs | Sgn | Sqr | Identity)
    }

    pub fn output_type(&self, x: &TensorType) -> TensorType {
        if self.preserves_dtype() {
            x.clone()
        } else {
            x.with_dtype(x.dtype.to_continuous())
        }
    }
}

/// An elementwise function of one argument.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Unary {
    pub kind: UnaryKind,
}

impl Op for Unary {
    fn name(&self) -> String {
        self.kind.name().to_string()
    }

    fn make_outputs(&self, inputs: &[TensorType]) -> Result<Vec<TensorType>> {
        check_arity(self, inputs, 1)?;
        Ok(vec![self.kind.output_type(&inputs[0])])
    }

    fn perform(&self, inputs: &[ArrayD<f64>]) -> Result<Vec<ArrayD<f64>>> {
        check_values(self, inputs, 1)?;
        Ok(vec![inputs[0].mapv(|x| self.kind.f(x))])
    }

    fn local_grad(
        &self,
        graph: &Graph,
        inputs: &[VarId],
        outputs: &[VarId],
        output_grads: &[Grad],
    ) -> Result<Vec<Grad>> {
        let gz = match upstream(graph, inputs, output_grads[0]) {
            Ok(gz) => gz,
            Err(grads) => return Ok(grads),
        };
        let (x, z) = (inputs[0], outputs[0]);
        let tx = graph.ty(x);
        if !tx.is_differentiable() {
            return Ok(vec![Grad::Disconnected]);
        }
        let c = |value: f64| graph.scalar_constant(value, tx.dtype).id();

        use UnaryKind::*;
        let gx = match self.kind {
            Neg => neg(graph, gz),
            Abs => mul(graph, gz, unary(graph, Sgn, x)),
            Exp => mul(graph, gz, z),
            Log => div(graph, gz, x),
            Log2 => div(graph, gz, mul(graph, x, c(LN_2))),
            // piecewise constant
            Sgn => return Ok(vec![Grad::Disconnected]),
            Sqr => mul(graph, gz, mul(graph, c(2.), x)),
            Sqrt => div(graph, mul(graph, gz, c(0.5)), z),
            Cos => neg(graph, mul(graph, gz, unary(graph, Sin, x))),
            Sin => mul(graph, gz, unary(graph, Cos, x)),
            Tan => mul(graph, gz, add(graph, c(1.), unary(graph, Sqr, z))),
            Cosh => mul(graph, gz, unary(graph, Sinh, x)),
            Sinh => mul(graph, gz, unary(graph, Cosh, x)),
            Tanh => mul(graph, gz, sub(graph, c(1.), unary(graph, Sqr, z))),
            Identity => gz,
        };
        Ok(vec![Grad::Expr(gx)])
    }

    fn fmt_expr(&self, inputs: &[String], _output: usize, _n_outputs: usize) -> String {
        match self.kind {
            UnaryKind::Neg => format!("-{}", inputs[0]),
            _ => format!("{}({})", self.kind.name(), inputs[0]),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryKind {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Mod,
    /// Broadcasts the second operand to the shape of both; the first only supplies a shape.
    Second,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
}

impl BinaryKind {
    pub fn name(&self) -> &'static str {
        use BinaryKind::*;
        match self {
            Add => "add",
            Sub => "sub",
            Mul => "mul",
            Div => "div",
            Pow => "pow",
            Mod => "mod",
            Second => "fill",
            Lt => "lt",
            Le => "le",
            Gt => "gt",
            Ge => "ge",
            Eq => "eq",
        }
    }

    fn symbol(&self) -> Option<&'static str> {
        use BinaryKind::*;
        Some(match self {
            Add => "+",
            Sub => "-",
            Mul => "*",
            Div => "/",
            Pow => "**",
            Mod => "%",
            Lt => "<",
            Le => "<=",
            Gt => ">",
            Ge => ">=",
            Eq => "==",
            Second => return None,
        })
    }

    fn f(&self, x: f64, y: f64) -> f64 {
        use BinaryKind::*;
        let truth = |b: bool| if b { 1. } else { 0. };
        match self {
            Add => x + y,
            Sub => x - y,
            Mul => x * y,
            Div => x / y,
            Pow => x.powf(y),
            // The result takes the sign of the divisor.
            Mod => x - y * (x / y).floor(),
            Second => y,
            Lt => truth(x < y),
            Le => truth(x <= y),
            Gt => truth(x > y),
            Ge => truth(x >= y),
            Eq => truth(x == y),
        }
    }

    pub fn is_comparison(&self) -> bool {
        use BinaryKind::*;
        matches!(self, Lt | Le | Gt | Ge | Eq)
    }

    pub fn output_type(&self, x: &TensorType, y: &TensorType) -> TensorType {
        let dtype = if self.is_comparison() {
            DType::Bool
        } else if *self == BinaryKind::Second {
            y.dtype
        } else {
            x.dtype.upcast(y.dtype)
        };
        TensorType::new(
            dtype,
            TensorType::broadcast_pattern(&x.broadcastable, &y.broadcastable),
        )
    }
}

/// An elementwise function of two arguments.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Binary {
    pub kind: BinaryKind,
}

impl Binary {
    fn lhs_grad(&self, graph: &Graph, x: VarId, y: VarId, z: VarId, gz: VarId) -> Grad {
        use BinaryKind::*;
        match self.kind {
            Add | Sub | Mod => Grad::Expr(gz),
            Mul => Grad::Expr(mul(graph, gz, y)),
            Div => Grad::Expr(div(graph, gz, y)),
            Pow => {
                let one = graph.scalar_constant(1., graph.ty(z).dtype.to_continuous());
                let dz = mul(graph, y, binary(graph, Pow, x, sub(graph, y, one.id())));
                Grad::Expr(mul(graph, gz, dz))
            }
            Second | Lt | Le | Gt | Ge | Eq => Grad::Disconnected,
        }
    }

    fn rhs_grad(&self, graph: &Graph, x: VarId, y: VarId, z: VarId, gz: VarId) -> Grad {
        use BinaryKind::*;
        match self.kind {
            Add | Second => Grad::Expr(gz),
            Sub => Grad::Expr(neg(graph, gz)),
            Mul => Grad::Expr(mul(graph, gz, x)),
            // d(x / y)/dy = -x / y^2 = -z / y
            Div => Grad::Expr(neg(graph, div(graph, mul(graph, gz, z), y))),
            Pow => Grad::Expr(mul(graph, gz, mul(graph, z, unary(graph, UnaryKind::Log, x)))),
            Mod => Grad::Undefined,
            Lt | Le | Gt | Ge | Eq => Grad::Disconnected,
        }
    }
}

impl Op for Binary {
    fn name(&self) -> String {
        self.kind.name().to_string()
    }

    fn make_outputs(&self, inputs: &[TensorType]) -> Result<Vec<TensorType>> {
        check_arity(self, inputs, 2)?;
        Ok(vec![self.kind.output_type(&inputs[0], &inputs[1])])
    }

    fn perform(&self, inputs: &[ArrayD<f64>]) -> Result<Vec<ArrayD<f64>>> {
        check_values(self, inputs, 2)?;
        Ok(vec![zip_broadcast(self, &inputs[0], &inputs[1], |x, y| {
            self.kind.f(x, y)
        })?])
    }

    /// Rejects stretching a size-1 axis the declared type does not mark broadcastable,
    /// since the gradient would keep the stretched shape.
    fn check_inputs(&self, types: &[TensorType], values: &[ArrayD<f64>]) -> Result<()> {
        check_values(self, values, 2)?;
        let ndim = values[0].ndim().max(values[1].ndim());
        for (n, (ty, value)) in types.iter().zip(values).enumerate() {
            let other = values[1 - n].shape();
            let offset = ndim - value.ndim();
            let axes = value.shape().iter().zip(&ty.broadcastable).enumerate();
            for (axis, (&size, &broadcastable)) in axes {
                if size == 1 && !broadcastable && dim_at(other, ndim, axis + offset) != 1 {
                    return Err(GradError::Perform {
                        op: self.name(),
                        reason: format!(
                            "axis {axis} of input {n} has size 1 but is not broadcastable"
                        ),
                    });
                }
            }
        }
        Ok(())
    }

    fn local_grad(
        &self,
        graph: &Graph,
        inputs: &[VarId],
        outputs: &[VarId],
        output_grads: &[Grad],
    ) -> Result<Vec<Grad>> {
        if self.kind.is_comparison() {
            return Ok(vec![Grad::Disconnected; inputs.len()]);
        }
        let gz = match upstream(graph, inputs, output_grads[0]) {
            Ok(gz) => gz,
            Err(grads) => return Ok(grads),
        };
        let (x, y, z) = (inputs[0], inputs[1], outputs[0]);
        let wants = |input: VarId| graph.ty(input).is_differentiable();
        let gx = if wants(x) {
            self.lhs_grad(graph, x, y, z, gz)
        } else {
            Grad::Disconnected
        };
        let gy = if wants(y) {
            self.rhs_grad(graph, x, y, z, gz)
        } else {
            Grad::Disconnected
        };
        Ok([(x, gx), (y, gy)]
            .into_iter()
            .map(|(input, g)| match g {
                Grad::Expr(g) => Grad::Expr(sum_like(graph, g, input)),
                sentinel => sentinel,
            })
            .collect())
    }

    fn fmt_expr(&self, inputs: &[String], _output: usize, _n_outputs: usize) -> String {
        match self.kind.symbol() {
            Some(symbol) => format!("({} {symbol} {})", inputs[0], inputs[1]),
            None => format!("{}({}, {})", self.kind.name(), inputs[0], inputs[1]),
        }
    }
}

/// Reduces `grad` to the broadcast pattern of `model` by summing over the dimensions
/// that were broadcast in the forward pass. Returns `grad` itself when nothing was.
pub fn sum_like(graph: &Graph, grad: VarId, model: VarId) -> VarId {
    let (tg, tm) = (graph.ty(grad), graph.ty(model));
    if tg.fits_pattern_of(&tm) {
        return grad;
    }
    let ty = tm.with_dtype(tg.dtype);
    graph.apply_typed(Rc::new(SumLike), &[grad, model], vec![ty])[0]
}

/// Sums its first input down to the shape of its second input.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SumLike;

impl Op for SumLike {
    fn name(&self) -> String {
        "sum_like".to_string()
    }

    fn make_outputs(&self, inputs: &[TensorType]) -> Result<Vec<TensorType>> {
        check_arity(self, inputs, 2)?;
        let (grad, model) = (&inputs[0], &inputs[1]);
        if grad.ndim() < model.ndim() {
            return Err(GradError::TypeError {
                op: self.name(),
                reason: format!("cannot sum rank {} down to rank {}", grad.ndim(), model.ndim()),
            });
        }
        Ok(vec![model.with_dtype(grad.dtype)])
    }

    fn perform(&self, inputs: &[ArrayD<f64>]) -> Result<Vec<ArrayD<f64>>> {
        check_values(self, inputs, 2)?;
        let (grad, model) = (&inputs[0], &inputs[1]);
        let reduced = reduce_to(grad, model.shape()).ok_or_else(|| GradError::Perform {
            op: self.name(),
            reason: format!("cannot sum {:?} down to {:?}", grad.shape(), model.shape()),
        })?;
        Ok(vec![reduced])
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
        Ok(vec![
            Grad::Expr(fill(graph, inputs[0], gz)),
            Grad::Disconnected,
        ])
    }
}

/// Converts values to another dtype. Conversions to integers round toward zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cast {
    pub dtype: DType,
}

impl Op for Cast {
    fn name(&self) -> String {
        format!("cast_{}", self.dtype)
    }

    fn make_outputs(&self, inputs: &[TensorType]) -> Result<Vec<TensorType>> {
        check_arity(self, inputs, 1)?;
        Ok(vec![inputs[0].with_dtype(self.dtype)])
    }

    fn perform(&self, inputs: &[ArrayD<f64>]) -> Result<Vec<ArrayD<f64>>> {
        check_values(self, inputs, 1)?;
        let value = match self.dtype {
            DType::Bool => inputs[0].mapv(|x| if x != 0. { 1. } else { 0. }),
            dtype if dtype.is_discrete() => inputs[0].mapv(f64::trunc),
            _ => inputs[0].clone(),
        };
        Ok(vec![value])
    }

    fn local_grad(
        &self,
        graph: &Graph,
        inputs: &[VarId],
        _outputs: &[VarId],
        output_grads: &[Grad],
    ) -> Result<Vec<Grad>> {
        let tx = graph.ty(inputs[0]);
        if !tx.is_differentiable() || self.dtype.is_discrete() {
            return Ok(vec![Grad::Disconnected]);
        }
        let gz = match upstream(graph, inputs, output_grads[0]) {
            Ok(gz) => gz,
            Err(grads) => return Ok(grads),
        };
        Ok(vec![Grad::Expr(cast(graph, gz, tx.dtype))])
    }
}

fn dim_at(shape: &[usize], ndim: usize, i: usize) -> usize {
    let offset = ndim - shape.len();
    if i < offset {
        1
    } else {
        shape[i - offset]
    }
}

pub(crate) fn broadcast_shape(lhs: &[usize], rhs: &[usize]) -> Option<Vec<usize>> {
    let ndim = lhs.len().max(rhs.len());
    (0..ndim)
        .map(|i| {
            let (l, r) = (dim_at(lhs, ndim, i), dim_at(rhs, ndim, i));
            if l == r || r == 1 {
                Some(l)
            } else if l == 1 {
                Some(r)
            } else {
                None
            }
        })
        .collect()
}

pub(crate) fn zip_broadcast(
    op: &dyn Op,
    lhs: &ArrayD<f64>,
    rhs: &ArrayD<f64>,
    f: impl Fn(f64, f64) -> f64,
) -> Result<ArrayD<f64>> {
    let mismatch = || GradError::Perform {
        op: op.name(),
        reason: format!(
            "shapes {:?} and {:?} do not broadcast",
            lhs.shape(),
            rhs.shape()
        ),
    };
    let shape = broadcast_shape(lhs.shape(), rhs.shape()).ok_or_else(mismatch)?;
    let (Some(l), Some(r)) = (lhs.broadcast(shape.as_slice()), rhs.broadcast(shape.as_slice()))
    else {
        return Err(mismatch());
    };
    Ok(Zip::from(l).and(r).map_collect(|&x, &y| f(x, y)))
}

/// Sums `value` over leading and broadcast dimensions until it has `shape`.
pub(crate) fn reduce_to(value: &ArrayD<f64>, shape: &[usize]) -> Option<ArrayD<f64>> {
    if value.ndim() < shape.len() {
        return None;
    }
    let mut out = value.clone();
    while out.ndim() > shape.len() {
        out = out.sum_axis(Axis(0));
    }
    for (axis, &size) in shape.iter().enumerate() {
        if size == 1 && out.shape()[axis] != 1 {
            out = out.sum_axis(Axis(axis)).insert_axis(Axis(axis));
        }
    }
    if out.shape() == shape {
        Some(out)
    } else {
        out.broadcast(shape).map(|view| view.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2, IxDyn};

    #[test]
    fn test_broadcast_shape() {
        assert_eq!(broadcast_shape(&[3, 1], &[4]), Some(vec![3, 4]));
        assert_eq!(broadcast_shape(&[], &[2, 2]), Some(vec![2, 2]));
        assert_eq!(broadcast_shape(&[3], &[4]), None);
    }

    #[test]
    fn test_stretch_needs_broadcastable() {
        let op = Binary {
            kind: BinaryKind::Mul,
        };
        let vector = TensorType::vector(DType::Float64);
        let row = TensorType::row(DType::Float64);
        let one = arr1(&[5.]).into_dyn();
        let three = arr1(&[1., 2., 3.]).into_dyn();
        assert!(matches!(
            op.check_inputs(&[vector.clone(), vector.clone()], &[one.clone(), three.clone()]),
            Err(GradError::Perform { .. })
        ));
        assert!(op
            .check_inputs(&[vector.clone(), vector.clone()], &[one.clone(), one.clone()])
            .is_ok());
        let row_value = arr2(&[[5.]]).into_dyn();
        let matrix = arr2(&[[1., 2.], [3., 4.]]).into_dyn();
        assert!(op
            .check_inputs(&[row, TensorType::matrix(DType::Float64)], &[row_value, matrix])
            .is_ok());
        let scalar = ndarray::arr0(2.).into_dyn();
        assert!(op
            .check_inputs(&[TensorType::scalar(DType::Float64), vector], &[scalar, three])
            .is_ok());
    }

    #[test]
    fn test_reduce_to() {
        let value = ArrayD::from_elem(IxDyn(&[2, 3]), 1.);
        assert_eq!(
            reduce_to(&value, &[3]),
            Some(arr1(&[2., 2., 2.]).into_dyn())
        );
        assert_eq!(
            reduce_to(&value, &[2, 1]),
            Some(arr2(&[[3.], [3.]]).into_dyn())
        );
        assert_eq!(reduce_to(&value, &[]), Some(ndarray::arr0(6.).into_dyn()));
        assert_eq!(reduce_to(&arr1(&[1.]).into_dyn(), &[2, 2]), None);
    }

    #[test]
    fn test_binary_perform() {
        let op = Binary {
            kind: BinaryKind::Sub,
        };
        let out = op
            .perform(&[arr2(&[[1.], [2.]]).into_dyn(), arr1(&[1., 10.]).into_dyn()])
            .unwrap();
        assert_eq!(out[0], arr2(&[[0., -9.], [1., -8.]]).into_dyn());
    }

    #[test]
    fn test_comparison_type() {
        let ty = BinaryKind::Lt.output_type(
            &TensorType::vector(DType::Float64),
            &TensorType::scalar(DType::Float32),
        );
        assert_eq!(ty, TensorType::vector(DType::Bool));
    }

    #[test]
    fn test_mod_sign() {
        assert_eq!(BinaryKind::Mod.f(-7., 3.), 2.);
        assert_eq!(BinaryKind::Mod.f(7., -3.), -2.);
    }
}
