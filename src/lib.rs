//! Symbolic reverse-mode differentiation of tensor expression graphs.
//!
//! Expressions are built in a [`Graph`] through [`Var`] handles. [`grad`] appends the
//! gradient expressions of a cost to the same graph, so gradients can be evaluated,
//! printed or differentiated again like any other expression.
//!
//! ```
//! use symgrad::{grad, GradOptions, Graph};
//!
//! let graph = Graph::new();
//! let x = graph.scalar("x");
//! let y = x.exp() * x;
//! let dy = grad(&graph, y, x, &GradOptions::default()).unwrap();
//! println!("{}", graph.expr_string(dy.single().unwrap()));
//! ```

mod backprop;
mod config;
mod dot;
pub mod error;
mod eval;
mod grad;
mod gradient;
mod graph;
mod op;
pub mod ops;
mod reach;
mod types;

pub use backprop::grad_sources_inputs;
pub use config::{BackpropConfig, DiscretePolicy, DisconnectedPolicy, GradOptions};
pub use dot::DotBuilder;
pub use error::{GradError, Result};
pub use grad::{grad, Gradients, Wrt};
pub use gradient::{accumulate, Grad};
pub use graph::{ApplyId, Graph, Var, VarId};
pub use op::{upstream, Op};
pub use reach::Reachability;
pub use types::{DType, TensorType};
