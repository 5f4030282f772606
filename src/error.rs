use thiserror::Error;

use crate::types::DType;

/// Errors raised while building graphs, differentiating them or evaluating them.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GradError {
    #[error("`{name}` is not connected to the cost")]
    DisconnectedInput { name: String },
    #[error("the gradient of `{name}` is undefined along some path to the cost")]
    UndefinedGradient { name: String },
    #[error("`{name}` has non-differentiable type {dtype}")]
    NonDifferentiableType { name: String, dtype: DType },
    #[error("`{name}` has rank {actual}, expected rank {expected}")]
    ShapeMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("{op} is not differentiable: {reason}")]
    NotDifferentiable { op: String, reason: String },
    #[error("{op} returned {actual} gradients for {expected} inputs")]
    GradientArity {
        op: String,
        expected: usize,
        actual: usize,
    },
    #[error("{op} returned a gradient of rank {actual} for input {index} of rank {expected}")]
    GradientType {
        op: String,
        index: usize,
        expected: usize,
        actual: usize,
    },
    #[error("type error in {op}: {reason}")]
    TypeError { op: String, reason: String },
    #[error("{op} failed: {reason}")]
    Perform { op: String, reason: String },
    #[error("invalid value for `{name}`: {reason}")]
    InvalidValue { name: String, reason: String },
    #[error("no value is bound to input `{name}`. Bind it before calling `eval()`.")]
    MissingInput { name: String },
    #[error("variable id {id} does not belong to this graph")]
    UnknownVariable { id: u32 },
    #[error("graph contains a cycle and cannot be differentiated")]
    CyclicGraph,
}

pub type Result<T> = std::result::Result<T, GradError>;
