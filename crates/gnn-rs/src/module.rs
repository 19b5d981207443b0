use crate::error::{GraphError, GraphResult};
use crate::tensor::Tensor;

pub type VisitParamsFn<'a> = dyn FnMut(&str, &Tensor) -> GraphResult<()> + 'a;
pub type VisitParamsMutFn<'a> = dyn FnMut(&str, &mut Tensor) -> GraphResult<()> + 'a;

fn check_segment(kind: &str, segment: &str) -> GraphResult<()> {
    if segment.is_empty() {
        return Err(GraphError::configuration(format!(
            "parameter {kind} must be non-empty"
        )));
    }
    if segment.contains('.') {
        return Err(GraphError::configuration(format!(
            "parameter {kind} must not contain '.', got '{segment}'"
        )));
    }
    if !segment.is_ascii() {
        return Err(GraphError::configuration(format!(
            "parameter {kind} must be ASCII, got '{segment}'"
        )));
    }
    Ok(())
}

#[derive(Default)]
struct ParamPath {
    segments: Vec<String>,
    scratch: String,
}

impl ParamPath {
    fn push(&mut self, segment: &str) -> GraphResult<()> {
        check_segment("path segments", segment)?;
        self.segments.push(segment.to_string());
        Ok(())
    }

    fn pop(&mut self) {
        let _ = self.segments.pop();
    }

    /// Dotted path of `leaf` under the current scope, e.g. `1.update.kernel`.
    fn join(&mut self, leaf: &str) -> GraphResult<&str> {
        check_segment("leaf names", leaf)?;
        self.scratch.clear();
        for seg in &self.segments {
            self.scratch.push_str(seg);
            self.scratch.push('.');
        }
        self.scratch.push_str(leaf);
        Ok(&self.scratch)
    }
}

/// Walks the weights of a layer tree, reporting each under its dotted path.
pub struct ParamVisitor<'a> {
    path: ParamPath,
    f: &'a mut VisitParamsFn<'a>,
}

impl<'a> ParamVisitor<'a> {
    pub fn new(f: &'a mut VisitParamsFn<'a>) -> Self {
        Self {
            path: ParamPath::default(),
            f,
        }
    }

    pub fn scoped(
        &mut self,
        segment: &str,
        inner: impl FnOnce(&mut Self) -> GraphResult<()>,
    ) -> GraphResult<()> {
        self.path.push(segment)?;
        let out = inner(self);
        self.path.pop();
        out
    }

    pub fn param(&mut self, leaf: &str, tensor: &Tensor) -> GraphResult<()> {
        let path = self.path.join(leaf)?;
        (self.f)(path, tensor)
    }
}

pub struct ParamVisitorMut<'a> {
    path: ParamPath,
    f: &'a mut VisitParamsMutFn<'a>,
}

impl<'a> ParamVisitorMut<'a> {
    pub fn new(f: &'a mut VisitParamsMutFn<'a>) -> Self {
        Self {
            path: ParamPath::default(),
            f,
        }
    }

    pub fn scoped(
        &mut self,
        segment: &str,
        inner: impl FnOnce(&mut Self) -> GraphResult<()>,
    ) -> GraphResult<()> {
        self.path.push(segment)?;
        let out = inner(self);
        self.path.pop();
        out
    }

    pub fn param(&mut self, leaf: &str, tensor: &mut Tensor) -> GraphResult<()> {
        let path = self.path.join(leaf)?;
        (self.f)(path, tensor)
    }
}

/// Anything owning weights. Stateless layers keep the default no-op visits.
pub trait Module {
    fn visit_params(&self, _v: &mut ParamVisitor<'_>) -> GraphResult<()> {
        Ok(())
    }

    fn visit_params_mut(&mut self, _v: &mut ParamVisitorMut<'_>) -> GraphResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Pair {
        a: Tensor,
        b: Tensor,
    }

    impl Module for Pair {
        fn visit_params(&self, v: &mut ParamVisitor<'_>) -> GraphResult<()> {
            v.scoped("inner", |v| v.param("a", &self.a))?;
            v.param("b", &self.b)
        }

        fn visit_params_mut(&mut self, v: &mut ParamVisitorMut<'_>) -> GraphResult<()> {
            v.scoped("inner", |v| v.param("a", &mut self.a))?;
            v.param("b", &mut self.b)
        }
    }

    #[test]
    fn paths_are_dotted() {
        let pair = Pair {
            a: Tensor::zeros([1]),
            b: Tensor::zeros([2]),
        };
        let mut seen = Vec::new();
        let mut f = |path: &str, t: &Tensor| {
            seen.push((path.to_string(), t.len()));
            Ok::<(), GraphError>(())
        };
        pair.visit_params(&mut ParamVisitor::new(&mut f)).unwrap();
        assert_eq!(seen, vec![("inner.a".to_string(), 1), ("b".to_string(), 2)]);
    }

    #[test]
    fn segments_with_dots_are_rejected() {
        let pair = Pair {
            a: Tensor::zeros([1]),
            b: Tensor::zeros([1]),
        };
        let mut f = |_: &str, _: &Tensor| Ok::<(), GraphError>(());
        let mut visitor = ParamVisitor::new(&mut f);
        assert!(visitor.scoped("a.b", |v| pair.visit_params(v)).is_err());
    }
}
