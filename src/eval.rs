//! Reference evaluation of a graph on concrete values.

use std::collections::HashMap;

use ndarray::ArrayD;

use crate::{
    error::{GradError, Result},
    graph::{ApplyId, Graph, Var, VarId},
    types::{DType, TensorType},
};

impl Graph {
    /// Evaluates `outputs` given values for the free inputs they depend on.
    ///
    /// Only the applications the outputs need are run. Constants use their own values.
    pub fn eval(
        &self,
        outputs: &[VarId],
        bindings: &HashMap<VarId, ArrayD<f64>>,
    ) -> Result<Vec<ArrayD<f64>>> {
        for &output in outputs {
            self.check(output)?;
        }
        let num_applies = self.num_applies();
        let mut needed = vec![false; num_applies];
        let mut stack = outputs.to_vec();
        while let Some(var) = stack.pop() {
            if let Some(apply) = self.producer(var) {
                if !needed[apply.index()] {
                    needed[apply.index()] = true;
                    stack.extend(self.inputs(apply));
                }
            }
        }

        let mut values: Vec<Option<ArrayD<f64>>> = vec![None; self.num_vars()];
        // Arena order is a topological order.
        for (idx, _) in needed.iter().enumerate().filter(|(_, needed)| **needed) {
            let apply = ApplyId(idx as u32);
            let inputs = self
                .inputs(apply)
                .into_iter()
                .map(|input| self.value_of(input, &mut values, bindings))
                .collect::<Result<Vec<_>>>()?;
            let op = self.op(apply);
            let types: Vec<TensorType> = self
                .inputs(apply)
                .into_iter()
                .map(|input| self.ty(input))
                .collect();
            op.check_inputs(&types, &inputs)?;
            let results = op.perform(&inputs)?;
            let outs = self.outputs(apply);
            if results.len() != outs.len() {
                return Err(GradError::Perform {
                    op: op.name(),
                    reason: format!("produced {} values for {} outputs", results.len(), outs.len()),
                });
            }
            for (out, value) in outs.into_iter().zip(results) {
                values[out.index()] = Some(value);
            }
        }

        outputs
            .iter()
            .map(|&output| self.value_of(output, &mut values, bindings))
            .collect()
    }

    fn value_of(
        &self,
        var: VarId,
        values: &mut [Option<ArrayD<f64>>],
        bindings: &HashMap<VarId, ArrayD<f64>>,
    ) -> Result<ArrayD<f64>> {
        if let Some(value) = &values[var.index()] {
            return Ok(value.clone());
        }
        let value = if let Some(value) = self.constant_value(var) {
            value
        } else {
            let value = bindings.get(&var).ok_or_else(|| GradError::MissingInput {
                name: self.name(var),
            })?;
            check_binding(&self.name(var), &self.ty(var), value)?;
            value.clone()
        };
        values[var.index()] = Some(value.clone());
        Ok(value)
    }
}

/// Checks a value against the declared type of the input it is bound to.
fn check_binding(name: &str, ty: &TensorType, value: &ArrayD<f64>) -> Result<()> {
    let invalid = |reason: String| GradError::InvalidValue {
        name: name.to_string(),
        reason,
    };
    if value.ndim() != ty.ndim() {
        return Err(invalid(format!(
            "expected rank {}, got shape {:?}",
            ty.ndim(),
            value.shape()
        )));
    }
    for (axis, (&size, &broadcastable)) in value.shape().iter().zip(&ty.broadcastable).enumerate() {
        if broadcastable && size != 1 {
            return Err(invalid(format!(
                "axis {axis} is broadcastable but has size {size}"
            )));
        }
    }
    let whole = |x: &f64| x.fract() == 0.;
    match ty.dtype {
        DType::Bool if !value.iter().all(|x| *x == 0. || *x == 1.) => {
            Err(invalid("expected 0 or 1 for bool".to_string()))
        }
        dtype if dtype.is_discrete() && !value.iter().all(whole) => {
            Err(invalid(format!("expected whole numbers for {dtype}")))
        }
        _ => Ok(()),
    }
}

impl<'g> Var<'g> {
    pub fn eval(&self, bindings: &HashMap<VarId, ArrayD<f64>>) -> Result<ArrayD<f64>> {
        let mut values = self.graph().eval(&[self.id()], bindings)?;
        Ok(values.remove(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr0, arr1, arr2};

    #[test]
    fn test_eval() {
        let graph = Graph::new();
        let x = graph.vector("x");
        let w = graph.matrix("w");
        let y = (w.dot(x).unwrap() + 1.).sum();
        let bindings = HashMap::from([
            (x.id(), arr1(&[1., 2.]).into_dyn()),
            (w.id(), arr2(&[[1., 0.], [0., 1.]]).into_dyn()),
        ]);
        assert_eq!(y.eval(&bindings).unwrap(), arr0(5.).into_dyn());
    }

    #[test]
    fn test_only_needed_inputs() {
        let graph = Graph::new();
        let x = graph.scalar("x");
        let unused = graph.scalar("unused");
        let side = x * unused;
        let y = x.exp();
        let bindings = HashMap::from([(x.id(), arr0(0.).into_dyn())]);
        assert_eq!(y.eval(&bindings).unwrap(), arr0(1.).into_dyn());
        assert_eq!(
            side.eval(&bindings),
            Err(GradError::MissingInput {
                name: "unused".to_string()
            })
        );
    }

    #[test]
    fn test_binding_checked() {
        let graph = Graph::new();
        let r = graph.row("r");
        let bad = HashMap::from([(r.id(), arr2(&[[1.], [2.]]).into_dyn())]);
        assert!(matches!(
            r.sqr().eval(&bad),
            Err(GradError::InvalidValue { .. })
        ));
        let n = graph.scalar_of("n", DType::Int32);
        let frac = HashMap::from([(n.id(), arr0(0.5).into_dyn())]);
        assert!(n.eval(&frac).is_err());
    }
}
