//! Implementation of shared memory arena for the graph nodes, aka a tape.
//!
//! A [`Graph`] owns two arenas: variables (values) and applications (operation
//! invocations). Nodes are referred to by `u32` indices, so a variable can be shared by
//! any number of consumers without reference counting. Nodes are only ever appended;
//! since an application can only consume variables that already exist, creation order is
//! a topological order and the graph cannot contain a cycle.

use std::{cell::RefCell, fmt::Display, rc::Rc};

use ndarray::ArrayD;

use crate::{
    error::{GradError, Result},
    op::Op,
    types::{DType, TensorType},
};

/// Index of a variable in its [`Graph`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarId(pub(crate) u32);

impl VarId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl Display for VarId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Index of an application in its [`Graph`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ApplyId(pub(crate) u32);

impl ApplyId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl Display for ApplyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "n{}", self.0)
    }
}

#[derive(Clone, Debug)]
struct VarNode {
    name: String,
    ty: TensorType,
    /// Producing application and the output slot this variable occupies in it.
    owner: Option<(ApplyId, usize)>,
    /// Applications consuming this variable, each listed once.
    clients: Vec<ApplyId>,
    /// Only constants carry a value.
    value: Option<ArrayD<f64>>,
}

#[derive(Clone, Debug)]
struct ApplyNode {
    op: Rc<dyn Op>,
    inputs: Vec<VarId>,
    outputs: Vec<VarId>,
}

#[derive(Default, Debug)]
pub struct Graph {
    vars: RefCell<Vec<VarNode>>,
    applies: RefCell<Vec<ApplyNode>>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_vars(&self) -> usize {
        self.vars.borrow().len()
    }

    pub fn num_applies(&self) -> usize {
        self.applies.borrow().len()
    }

    pub fn contains(&self, id: VarId) -> bool {
        id.index() < self.num_vars()
    }

    pub(crate) fn check(&self, id: VarId) -> Result<()> {
        if self.contains(id) {
            Ok(())
        } else {
            Err(GradError::UnknownVariable { id: id.0 })
        }
    }

    /// Wraps an id in a handle. Panics if the id does not belong to this graph.
    pub fn var(&self, id: VarId) -> Var<'_> {
        assert!(self.contains(id), "{id} does not belong to this graph");
        Var { graph: self, id }
    }

    pub fn input(&self, name: impl Into<String>, ty: TensorType) -> Var<'_> {
        let id = self.push_var(VarNode {
            name: name.into(),
            ty,
            owner: None,
            clients: vec![],
            value: None,
        });
        Var { graph: self, id }
    }

    pub fn scalar(&self, name: impl Into<String>) -> Var<'_> {
        self.input(name, TensorType::scalar(DType::Float64))
    }

    pub fn scalar_of(&self, name: impl Into<String>, dtype: DType) -> Var<'_> {
        self.input(name, TensorType::scalar(dtype))
    }

    pub fn vector(&self, name: impl Into<String>) -> Var<'_> {
        self.input(name, TensorType::vector(DType::Float64))
    }

    pub fn vector_of(&self, name: impl Into<String>, dtype: DType) -> Var<'_> {
        self.input(name, TensorType::vector(dtype))
    }

    pub fn matrix(&self, name: impl Into<String>) -> Var<'_> {
        self.input(name, TensorType::matrix(DType::Float64))
    }

    pub fn matrix_of(&self, name: impl Into<String>, dtype: DType) -> Var<'_> {
        self.input(name, TensorType::matrix(dtype))
    }

    pub fn row(&self, name: impl Into<String>) -> Var<'_> {
        self.input(name, TensorType::row(DType::Float64))
    }

    pub fn col(&self, name: impl Into<String>) -> Var<'_> {
        self.input(name, TensorType::col(DType::Float64))
    }

    /// A constant holding `value`. Dimensions of size 1 are broadcastable.
    pub fn constant(&self, value: ArrayD<f64>, dtype: DType) -> Var<'_> {
        let ty = TensorType::from_shape(dtype, value.shape());
        let name = if value.ndim() == 0 {
            value.iter().next().map_or_else(String::new, |v| v.to_string())
        } else {
            format!("c{}", self.num_vars())
        };
        let id = self.push_var(VarNode {
            name,
            ty,
            owner: None,
            clients: vec![],
            value: Some(value),
        });
        Var { graph: self, id }
    }

    pub fn scalar_constant(&self, value: f64, dtype: DType) -> Var<'_> {
        self.constant(ndarray::arr0(value).into_dyn(), dtype)
    }

    fn push_var(&self, node: VarNode) -> VarId {
        let mut vars = self.vars.borrow_mut();
        let idx = vars.len();
        vars.push(node);
        VarId(idx as u32)
    }

    /// Records an application of `op` to `inputs` and returns its outputs.
    ///
    /// The output types come from [`Op::make_outputs`], which also validates the inputs.
    pub fn apply(&self, op: impl Op + 'static, inputs: &[VarId]) -> Result<Vec<VarId>> {
        for &input in inputs {
            self.check(input)?;
        }
        let types: Vec<TensorType> = inputs.iter().map(|&input| self.ty(input)).collect();
        let out_types = op.make_outputs(&types)?;
        Ok(self.apply_typed(Rc::new(op), inputs, out_types))
    }

    /// Records an application whose output types are already known to be valid.
    pub(crate) fn apply_typed(
        &self,
        op: Rc<dyn Op>,
        inputs: &[VarId],
        out_types: Vec<TensorType>,
    ) -> Vec<VarId> {
        let n_outputs = out_types.len();
        #[cfg(feature = "expr_name")]
        let input_names: Vec<String> = inputs.iter().map(|&input| self.name(input)).collect();

        let mut vars = self.vars.borrow_mut();
        let mut applies = self.applies.borrow_mut();
        let apply_id = ApplyId(applies.len() as u32);
        let mut outputs = Vec::with_capacity(n_outputs);
        for (slot, ty) in out_types.into_iter().enumerate() {
            let idx = vars.len();
            #[cfg(feature = "expr_name")]
            let name = op.fmt_expr(&input_names, slot, n_outputs);
            #[cfg(not(feature = "expr_name"))]
            let name = format!("a{idx}");
            vars.push(VarNode {
                name,
                ty,
                owner: Some((apply_id, slot)),
                clients: vec![],
                value: None,
            });
            outputs.push(VarId(idx as u32));
        }
        for input in inputs {
            let clients = &mut vars[input.index()].clients;
            if !clients.contains(&apply_id) {
                clients.push(apply_id);
            }
        }
        applies.push(ApplyNode {
            op,
            inputs: inputs.to_vec(),
            outputs: outputs.clone(),
        });
        outputs
    }

    pub fn name(&self, id: VarId) -> String {
        self.vars.borrow()[id.index()].name.clone()
    }

    pub fn ty(&self, id: VarId) -> TensorType {
        self.vars.borrow()[id.index()].ty.clone()
    }

    /// The producing application and the output slot of `id` in it.
    pub fn owner(&self, id: VarId) -> Option<(ApplyId, usize)> {
        self.vars.borrow()[id.index()].owner
    }

    pub fn producer(&self, id: VarId) -> Option<ApplyId> {
        self.owner(id).map(|(apply, _)| apply)
    }

    pub fn consumers(&self, id: VarId) -> Vec<ApplyId> {
        self.vars.borrow()[id.index()].clients.clone()
    }

    pub fn is_constant(&self, id: VarId) -> bool {
        self.vars.borrow()[id.index()].value.is_some()
    }

    pub(crate) fn constant_value(&self, id: VarId) -> Option<ArrayD<f64>> {
        self.vars.borrow()[id.index()].value.clone()
    }

    pub fn inputs(&self, apply: ApplyId) -> Vec<VarId> {
        self.applies.borrow()[apply.index()].inputs.clone()
    }

    pub fn outputs(&self, apply: ApplyId) -> Vec<VarId> {
        self.applies.borrow()[apply.index()].outputs.clone()
    }

    pub fn op(&self, apply: ApplyId) -> Rc<dyn Op> {
        self.applies.borrow()[apply.index()].op.clone()
    }

    /// Renders the expression tree producing `id`, e.g. `(exp(x) * y)`.
    ///
    /// Shared subexpressions are printed once per use, so this is meant for debugging
    /// and comparing small graphs.
    pub fn expr_string(&self, id: VarId) -> String {
        match self.owner(id) {
            None => self.name(id),
            Some((apply, slot)) => {
                let op = self.op(apply);
                let n_outputs = self.outputs(apply).len();
                let args: Vec<String> = self
                    .inputs(apply)
                    .into_iter()
                    .map(|input| self.expr_string(input))
                    .collect();
                op.fmt_expr(&args, slot, n_outputs)
            }
        }
    }
}

/// A handle to a variable, borrowing the graph it lives in.
///
/// Handles are `Copy`, so they can be combined with the arithmetic operators freely.
#[derive(Copy, Clone)]
pub struct Var<'g> {
    graph: &'g Graph,
    id: VarId,
}

impl<'g> Var<'g> {
    pub fn id(&self) -> VarId {
        self.id
    }

    pub fn graph(&self) -> &'g Graph {
        self.graph
    }

    pub fn name(&self) -> String {
        self.graph.name(self.id)
    }

    pub fn ty(&self) -> TensorType {
        self.graph.ty(self.id)
    }

    pub fn expr_string(&self) -> String {
        self.graph.expr_string(self.id)
    }

    pub(crate) fn wrap(&self, id: VarId) -> Var<'g> {
        Var {
            graph: self.graph,
            id,
        }
    }
}

impl std::fmt::Debug for Var<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Var")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("ty", &self.ty())
            .finish()
    }
}

impl<'g> From<Var<'g>> for VarId {
    fn from(var: Var<'g>) -> Self {
        var.id
    }
}

impl<'g> From<&Var<'g>> for VarId {
    fn from(var: &Var<'g>) -> Self {
        var.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_structure() {
        let graph = Graph::new();
        let a = graph.scalar("a");
        let b = graph.scalar("b");
        let ab = a * b;
        let aab = a + ab;

        assert_eq!(graph.num_vars(), 4);
        assert_eq!(graph.num_applies(), 2);
        assert_eq!(graph.producer(a.id()), None);
        let mul = graph.producer(ab.id()).unwrap();
        assert_eq!(graph.inputs(mul), vec![a.id(), b.id()]);
        assert_eq!(graph.outputs(mul), vec![ab.id()]);
        assert_eq!(
            graph.consumers(a.id()),
            vec![mul, graph.producer(aab.id()).unwrap()]
        );
        assert_eq!(aab.expr_string(), "(a + (a * b))");
    }

    #[test]
    fn test_consumer_listed_once() {
        let graph = Graph::new();
        let a = graph.scalar("a");
        let aa = a * a;
        assert_eq!(graph.consumers(a.id()).len(), 1);
        assert_eq!(graph.inputs(graph.producer(aa.id()).unwrap()).len(), 2);
    }

    #[test]
    fn test_constant_pattern() {
        let graph = Graph::new();
        let c = graph.constant(ndarray::ArrayD::zeros(ndarray::IxDyn(&[1, 3])), DType::Float32);
        assert_eq!(c.ty(), TensorType::row(DType::Float32));
        assert!(graph.is_constant(c.id()));
        let two = graph.scalar_constant(2., DType::Float64);
        assert_eq!(two.name(), "2");
    }

    #[test]
    fn test_unknown_variable() {
        let graph = Graph::new();
        let other = Graph::new();
        other.scalar("a");
        let stray = other.scalar("b").id();
        assert_eq!(
            graph.check(stray),
            Err(GradError::UnknownVariable { id: stray.0 })
        );
    }
}
