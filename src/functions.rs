//! Function registry: names bound to native callables or KaRL bodies.

use std::collections::HashMap;
use std::sync::Arc;

use crate::context::KnowledgeState;
use crate::error::KarlResult;
use crate::lang::CompiledExpression;
use crate::record::KnowledgeRecord;

/// Signature of a native function: ordered argument records plus exclusive
/// access to the same knowledge state the expression runs against.
pub type NativeFn =
    dyn Fn(&[KnowledgeRecord], &mut KnowledgeState) -> KarlResult<KnowledgeRecord> + Send + Sync;

/// A callable bound in the registry.
#[derive(Clone)]
pub enum KarlFunction {
    /// A native Rust function.
    Native(Arc<NativeFn>),
    /// A KaRL sub-expression evaluated against the caller's state.
    Expression(Arc<CompiledExpression>),
}

impl KarlFunction {
    /// Wraps a native closure.
    pub fn native<F>(f: F) -> Self
    where
        F: Fn(&[KnowledgeRecord], &mut KnowledgeState) -> KarlResult<KnowledgeRecord>
            + Send
            + Sync
            + 'static,
    {
        Self::Native(Arc::new(f))
    }

    /// Compiles KaRL source text into a function body.
    pub fn expression(source: &str) -> KarlResult<Self> {
        Ok(Self::Expression(Arc::new(CompiledExpression::compile(
            source,
        )?)))
    }

    /// Wraps an already-compiled expression.
    #[must_use]
    pub fn compiled(expression: CompiledExpression) -> Self {
        Self::Expression(Arc::new(expression))
    }
}

impl std::fmt::Debug for KarlFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Native(_) => f.write_str("KarlFunction::Native"),
            Self::Expression(e) => write!(f, "KarlFunction::Expression({:?})", e.source()),
        }
    }
}

/// Name → callable map. `define` is last-writer-wins; resolution of an
/// unknown name is the caller's `UndefinedFunction` failure.
#[derive(Debug, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, KarlFunction>,
}

impl FunctionRegistry {
    /// Binds `name`, silently replacing any prior binding.
    pub fn define(&mut self, name: impl Into<String>, function: KarlFunction) {
        self.functions.insert(name.into(), function);
    }

    /// Looks up a binding. The returned handle is a cheap clone.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<KarlFunction> {
        self.functions.get(name).cloned()
    }

    /// Removes a binding, returning true if it existed.
    pub fn remove(&mut self, name: &str) -> bool {
        self.functions.remove(name).is_some()
    }

    /// Number of bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// True if nothing is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn define_is_last_writer_wins() {
        let mut registry = FunctionRegistry::default();
        registry.define("f", KarlFunction::native(|_, _| Ok(KnowledgeRecord::from(1i64))));
        registry.define("f", KarlFunction::native(|_, _| Ok(KnowledgeRecord::from(2i64))));
        assert_eq!(registry.len(), 1);

        let mut state = KnowledgeState::default();
        let KarlFunction::Native(f) = registry.get("f").unwrap() else {
            panic!("expected native binding");
        };
        assert_eq!(f(&[], &mut state).unwrap().as_integer(), 2);
    }

    #[test]
    fn unknown_names_resolve_to_none() {
        let registry = FunctionRegistry::default();
        assert!(registry.get("missing").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn expression_functions_compile() {
        let f = KarlFunction::expression(".karl.arg0 * 2").unwrap();
        assert!(matches!(f, KarlFunction::Expression(_)));
        assert!(KarlFunction::expression("1 +").is_err());
    }

    #[test]
    fn remove_unbinds() {
        let mut registry = FunctionRegistry::default();
        registry.define("f", KarlFunction::native(|_, _| Ok(KnowledgeRecord::from(0i64))));
        assert!(registry.remove("f"));
        assert!(!registry.remove("f"));
    }
}
