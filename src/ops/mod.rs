//! Concrete operations and the functions that build applications of them.
//!
//! The free functions work on [`VarId`]s and are what gradient rules use to build their
//! results. [`Var`] exposes the same operations as methods and operators.

pub mod elemwise;
pub mod linalg;
pub mod reduce;
pub mod subtensor;

use std::{
    ops::{Add, Div, Mul, Neg, Rem, Sub},
    rc::Rc,
};

pub use self::elemwise::{sum_like, Binary, BinaryKind, Cast, SumLike, Unary, UnaryKind};
pub use self::linalg::{Dot, InsertAxis, Transpose};
pub use self::reduce::{Argmax, Sum};
pub use self::subtensor::Subtensor;

use crate::{
    error::Result,
    graph::{Graph, Var, VarId},
    op::Op,
    types::DType,
};

fn first(outputs: Vec<VarId>) -> VarId {
    outputs[0]
}

pub fn unary(graph: &Graph, kind: UnaryKind, x: VarId) -> VarId {
    let ty = kind.output_type(&graph.ty(x));
    first(graph.apply_typed(Rc::new(Unary { kind }), &[x], vec![ty]))
}

pub fn binary(graph: &Graph, kind: BinaryKind, x: VarId, y: VarId) -> VarId {
    let ty = kind.output_type(&graph.ty(x), &graph.ty(y));
    first(graph.apply_typed(Rc::new(Binary { kind }), &[x, y], vec![ty]))
}

pub fn add(graph: &Graph, x: VarId, y: VarId) -> VarId {
    binary(graph, BinaryKind::Add, x, y)
}

pub fn sub(graph: &Graph, x: VarId, y: VarId) -> VarId {
    binary(graph, BinaryKind::Sub, x, y)
}

pub fn mul(graph: &Graph, x: VarId, y: VarId) -> VarId {
    binary(graph, BinaryKind::Mul, x, y)
}

pub fn div(graph: &Graph, x: VarId, y: VarId) -> VarId {
    binary(graph, BinaryKind::Div, x, y)
}

pub fn eq(graph: &Graph, x: VarId, y: VarId) -> VarId {
    binary(graph, BinaryKind::Eq, x, y)
}

pub fn neg(graph: &Graph, x: VarId) -> VarId {
    unary(graph, UnaryKind::Neg, x)
}

/// `value` broadcast to the shape of `model`.
pub fn fill(graph: &Graph, model: VarId, value: VarId) -> VarId {
    binary(graph, BinaryKind::Second, model, value)
}

pub fn zeros_like(graph: &Graph, model: VarId) -> VarId {
    let zero = graph.scalar_constant(0., graph.ty(model).dtype);
    fill(graph, model, zero.id())
}

pub fn ones_like(graph: &Graph, model: VarId) -> VarId {
    let one = graph.scalar_constant(1., graph.ty(model).dtype);
    fill(graph, model, one.id())
}

pub fn cast(graph: &Graph, x: VarId, dtype: DType) -> VarId {
    if graph.ty(x).dtype == dtype {
        return x;
    }
    let ty = graph.ty(x).with_dtype(dtype);
    first(graph.apply_typed(Rc::new(Cast { dtype }), &[x], vec![ty]))
}

pub fn transpose(graph: &Graph, x: VarId) -> VarId {
    let mut ty = graph.ty(x);
    ty.broadcastable.reverse();
    first(graph.apply_typed(Rc::new(Transpose), &[x], vec![ty]))
}

pub fn insert_axis(graph: &Graph, x: VarId, axis: usize) -> Result<VarId> {
    Ok(first(graph.apply(InsertAxis { axis }, &[x])?))
}

pub fn sum(graph: &Graph, x: VarId, axis: Option<usize>) -> Result<VarId> {
    Ok(first(graph.apply(Sum { axis }, &[x])?))
}

pub fn dot(graph: &Graph, x: VarId, y: VarId) -> Result<VarId> {
    Ok(first(graph.apply(Dot, &[x, y])?))
}

/// The maximum along `axis` and its index.
pub fn argmax(graph: &Graph, x: VarId, axis: usize) -> Result<(VarId, VarId)> {
    let outputs = graph.apply(Argmax { axis }, &[x])?;
    Ok((outputs[0], outputs[1]))
}

pub fn subtensor(graph: &Graph, x: VarId, index: usize) -> Result<VarId> {
    Ok(first(graph.apply(Subtensor { index }, &[x])?))
}

impl<'g> Var<'g> {
    fn unary(&self, kind: UnaryKind) -> Self {
        self.wrap(unary(self.graph(), kind, self.id()))
    }

    fn binary(&self, kind: BinaryKind, rhs: Var<'g>) -> Self {
        self.wrap(binary(self.graph(), kind, self.id(), rhs.id()))
    }

    fn constant(&self, value: f64) -> Self {
        let dtype = self.ty().dtype.to_continuous();
        self.graph().scalar_constant(value, dtype)
    }

    /// Applies a custom operation to this variable and `others`.
    pub fn apply(&self, op: impl Op + 'static, others: &[Var<'g>]) -> Result<Vec<Self>> {
        let inputs: Vec<VarId> = std::iter::once(self.id())
            .chain(others.iter().map(|v| v.id()))
            .collect();
        let outputs = self.graph().apply(op, &inputs)?;
        Ok(outputs.into_iter().map(|id| self.wrap(id)).collect())
    }

    pub fn abs(&self) -> Self {
        self.unary(UnaryKind::Abs)
    }

    pub fn exp(&self) -> Self {
        self.unary(UnaryKind::Exp)
    }

    pub fn log(&self) -> Self {
        self.unary(UnaryKind::Log)
    }

    pub fn log2(&self) -> Self {
        self.unary(UnaryKind::Log2)
    }

    pub fn sgn(&self) -> Self {
        self.unary(UnaryKind::Sgn)
    }

    pub fn sqr(&self) -> Self {
        self.unary(UnaryKind::Sqr)
    }

    pub fn sqrt(&self) -> Self {
        self.unary(UnaryKind::Sqrt)
    }

    pub fn cos(&self) -> Self {
        self.unary(UnaryKind::Cos)
    }

    pub fn sin(&self) -> Self {
        self.unary(UnaryKind::Sin)
    }

    pub fn tan(&self) -> Self {
        self.unary(UnaryKind::Tan)
    }

    pub fn cosh(&self) -> Self {
        self.unary(UnaryKind::Cosh)
    }

    pub fn sinh(&self) -> Self {
        self.unary(UnaryKind::Sinh)
    }

    pub fn tanh(&self) -> Self {
        self.unary(UnaryKind::Tanh)
    }

    /// A copy of the tensor as a new variable.
    pub fn copy(&self) -> Self {
        self.unary(UnaryKind::Identity)
    }

    pub fn pow(&self, exponent: Var<'g>) -> Self {
        self.binary(BinaryKind::Pow, exponent)
    }

    pub fn lt(&self, rhs: Var<'g>) -> Self {
        self.binary(BinaryKind::Lt, rhs)
    }

    pub fn le(&self, rhs: Var<'g>) -> Self {
        self.binary(BinaryKind::Le, rhs)
    }

    pub fn gt(&self, rhs: Var<'g>) -> Self {
        self.binary(BinaryKind::Gt, rhs)
    }

    pub fn ge(&self, rhs: Var<'g>) -> Self {
        self.binary(BinaryKind::Ge, rhs)
    }

    pub fn equal(&self, rhs: Var<'g>) -> Self {
        self.binary(BinaryKind::Eq, rhs)
    }

    /// `value` broadcast to the shape of this variable.
    pub fn fill(&self, value: Var<'g>) -> Self {
        self.binary(BinaryKind::Second, value)
    }

    pub fn zeros_like(&self) -> Self {
        self.wrap(zeros_like(self.graph(), self.id()))
    }

    pub fn ones_like(&self) -> Self {
        self.wrap(ones_like(self.graph(), self.id()))
    }

    pub fn cast(&self, dtype: DType) -> Self {
        self.wrap(cast(self.graph(), self.id(), dtype))
    }

    /// Sum of all elements.
    pub fn sum(&self) -> Self {
        let ty = crate::types::TensorType::scalar(match self.ty().dtype {
            DType::Bool => DType::Int64,
            dtype => dtype,
        });
        self.wrap(first(self.graph().apply_typed(
            Rc::new(Sum { axis: None }),
            &[self.id()],
            vec![ty],
        )))
    }

    pub fn sum_axis(&self, axis: usize) -> Result<Self> {
        Ok(self.wrap(sum(self.graph(), self.id(), Some(axis))?))
    }

    pub fn t(&self) -> Self {
        self.wrap(transpose(self.graph(), self.id()))
    }

    pub fn insert_axis(&self, axis: usize) -> Result<Self> {
        Ok(self.wrap(insert_axis(self.graph(), self.id(), axis)?))
    }

    pub fn dot(&self, rhs: Var<'g>) -> Result<Self> {
        Ok(self.wrap(dot(self.graph(), self.id(), rhs.id())?))
    }

    pub fn max(&self, axis: usize) -> Result<Self> {
        Ok(self.argmax(axis)?.0)
    }

    /// The maximum along `axis` and the index where it occurs.
    pub fn argmax(&self, axis: usize) -> Result<(Self, Self)> {
        let (max, index) = argmax(self.graph(), self.id(), axis)?;
        Ok((self.wrap(max), self.wrap(index)))
    }

    /// Selects `self[index]` along the first axis.
    pub fn index(&self, index: usize) -> Result<Self> {
        Ok(self.wrap(subtensor(self.graph(), self.id(), index)?))
    }
}

impl<'g> Add for Var<'g> {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        self.binary(BinaryKind::Add, rhs)
    }
}

impl<'g> Sub for Var<'g> {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        self.binary(BinaryKind::Sub, rhs)
    }
}

impl<'g> Mul for Var<'g> {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self::Output {
        self.binary(BinaryKind::Mul, rhs)
    }
}

impl<'g> Div for Var<'g> {
    type Output = Self;
    fn div(self, rhs: Self) -> Self::Output {
        self.binary(BinaryKind::Div, rhs)
    }
}

impl<'g> Rem for Var<'g> {
    type Output = Self;
    fn rem(self, rhs: Self) -> Self::Output {
        self.binary(BinaryKind::Mod, rhs)
    }
}

impl<'g> Neg for Var<'g> {
    type Output = Self;
    fn neg(self) -> Self::Output {
        self.unary(UnaryKind::Neg)
    }
}

impl<'g> Add<f64> for Var<'g> {
    type Output = Self;
    fn add(self, rhs: f64) -> Self::Output {
        self.binary(BinaryKind::Add, self.constant(rhs))
    }
}

impl<'g> Mul<f64> for Var<'g> {
    type Output = Self;
    fn mul(self, rhs: f64) -> Self::Output {
        self.binary(BinaryKind::Mul, self.constant(rhs))
    }
}

impl<'g> Mul<Var<'g>> for f64 {
    type Output = Var<'g>;
    fn mul(self, rhs: Var<'g>) -> Self::Output {
        rhs.constant(self).binary(BinaryKind::Mul, rhs)
    }
}
