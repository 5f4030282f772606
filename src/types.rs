//! Static types of graph variables.
//!
//! A [`TensorType`] carries an element type and a broadcastable pattern, one flag per
//! dimension. A `true` flag means the dimension is statically 1 and broadcasts against
//! anything; the rank of the type is the length of the pattern.

use std::fmt::Display;

/// Element type of a tensor, ordered by upcasting priority.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    Complex64,
    Complex128,
}

impl DType {
    pub fn is_discrete(&self) -> bool {
        matches!(
            self,
            DType::Bool | DType::Int8 | DType::Int16 | DType::Int32 | DType::Int64
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DType::Float32 | DType::Float64)
    }

    pub fn is_complex(&self) -> bool {
        matches!(self, DType::Complex64 | DType::Complex128)
    }

    /// The type both operands are converted to in a binary operation.
    pub fn upcast(self, other: DType) -> DType {
        self.max(other)
    }

    /// Result type of a transcendental function: discrete inputs become `Float64`.
    pub fn to_continuous(self) -> DType {
        if self.is_discrete() {
            DType::Float64
        } else {
            self
        }
    }
}

impl Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DType::Bool => "bool",
            DType::Int8 => "int8",
            DType::Int16 => "int16",
            DType::Int32 => "int32",
            DType::Int64 => "int64",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
            DType::Complex64 => "complex64",
            DType::Complex128 => "complex128",
        };
        write!(f, "{name}")
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TensorType {
    pub dtype: DType,
    pub broadcastable: Vec<bool>,
}

impl TensorType {
    pub fn new(dtype: DType, broadcastable: impl Into<Vec<bool>>) -> Self {
        Self {
            dtype,
            broadcastable: broadcastable.into(),
        }
    }

    pub fn scalar(dtype: DType) -> Self {
        Self::new(dtype, vec![])
    }

    pub fn vector(dtype: DType) -> Self {
        Self::new(dtype, vec![false])
    }

    pub fn matrix(dtype: DType) -> Self {
        Self::new(dtype, vec![false, false])
    }

    pub fn row(dtype: DType) -> Self {
        Self::new(dtype, vec![true, false])
    }

    pub fn col(dtype: DType) -> Self {
        Self::new(dtype, vec![false, true])
    }

    /// Derives the pattern from a concrete shape: every dimension of size 1 broadcasts.
    pub fn from_shape(dtype: DType, shape: &[usize]) -> Self {
        Self::new(dtype, shape.iter().map(|&s| s == 1).collect::<Vec<_>>())
    }

    pub fn ndim(&self) -> usize {
        self.broadcastable.len()
    }

    pub fn is_scalar(&self) -> bool {
        self.broadcastable.is_empty()
    }

    /// Whether a continuous gradient can be attached to a value of this type.
    pub fn is_differentiable(&self) -> bool {
        !self.dtype.is_discrete()
    }

    pub fn with_dtype(&self, dtype: DType) -> Self {
        Self::new(dtype, self.broadcastable.clone())
    }

    /// Merges two patterns for an elementwise operation. Shorter patterns are padded on
    /// the left with broadcastable dimensions, and an output dimension broadcasts only if
    /// it does so in both operands.
    pub fn broadcast_pattern(lhs: &[bool], rhs: &[bool]) -> Vec<bool> {
        let ndim = lhs.len().max(rhs.len());
        let pad = |p: &[bool], i: usize| {
            let offset = ndim - p.len();
            if i < offset {
                true
            } else {
                p[i - offset]
            }
        };
        (0..ndim).map(|i| pad(lhs, i) && pad(rhs, i)).collect()
    }

    /// True if a value of type `self` can stand where `model` is expected without any
    /// summation over broadcast dimensions.
    pub fn fits_pattern_of(&self, model: &TensorType) -> bool {
        self.ndim() == model.ndim()
            && self
                .broadcastable
                .iter()
                .zip(model.broadcastable.iter())
                .all(|(&own, &theirs)| own || !theirs)
    }
}

impl Display for TensorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}(", self.dtype)?;
        for (i, b) in self.broadcastable.iter().enumerate() {
            if i != 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", if *b { "1" } else { "?" })?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_pattern() {
        assert_eq!(
            TensorType::broadcast_pattern(&[], &[false, true]),
            vec![false, true]
        );
        assert_eq!(
            TensorType::broadcast_pattern(&[true, false], &[false]),
            vec![false, false]
        );
        assert_eq!(
            TensorType::broadcast_pattern(&[true], &[true]),
            vec![true]
        );
    }

    #[test]
    fn test_differentiable() {
        assert!(TensorType::scalar(DType::Float32).is_differentiable());
        assert!(TensorType::scalar(DType::Complex64).is_differentiable());
        assert!(!TensorType::vector(DType::Int64).is_differentiable());
        assert!(!TensorType::scalar(DType::Bool).is_differentiable());
    }

    #[test]
    fn test_fits_pattern() {
        let row = TensorType::row(DType::Float64);
        let matrix = TensorType::matrix(DType::Float64);
        assert!(row.fits_pattern_of(&matrix));
        assert!(!matrix.fits_pattern_of(&row));
        assert!(!TensorType::vector(DType::Float64).fits_pattern_of(&matrix));
    }

    #[test]
    fn test_from_shape() {
        let ty = TensorType::from_shape(DType::Float64, &[3, 1]);
        assert_eq!(ty, TensorType::col(DType::Float64));
        assert_eq!(ty.to_string(), "float64(?, 1)");
    }
}
