//! The uniform `Pipeline` → `Pipeline` transform every operator implements.

use std::sync::Arc;

use crate::pipeline::Pipeline;

/// A transform from `Pipeline<A, E>` to `Pipeline<Self::Output, E>`.
///
/// `apply` takes `&self`, not `self`: the same operator *value* can be
/// applied to different upstream pipelines to produce independent
/// instances. `concurrent` relies on this — every worker gets its own
/// private copy of the sub-operator chain by calling `apply` again, so
/// stateful operators (`take`, `skip_while`, ...) never share mutable state
/// across concurrently in-flight items. Any per-stream state an operator
/// needs lives inside the task `apply` spawns, never in the operator value
/// itself.
pub trait Operator<A, E>: Send + Sync
where
    A: Send + 'static,
    E: Send + Sync + 'static,
{
    type Output: Send + 'static;

    fn apply(&self, upstream: Pipeline<A, E>) -> Pipeline<Self::Output, E>;
}

/// A homogeneous, dynamically-typed operator chain element, as held by
/// `concurrent`'s `Vec<BoxedOperator<V, E>>` of sub-operators.
pub type BoxedOperator<V, E> = Arc<dyn Operator<V, E, Output = V>>;

/// Folds a homogeneous sequence of same-typed operators over a pipeline,
/// left to right. `Pipeline::pipe` composes a single operator; this is the
/// dynamic-`Vec` counterpart used by callers (chiefly `concurrent`) that
/// hold a chain as data rather than as a fixed method-chain expression.
pub fn apply_chain<V, E>(mut pipeline: Pipeline<V, E>, ops: &[BoxedOperator<V, E>]) -> Pipeline<V, E>
where
    V: Send + 'static,
    E: Send + Sync + 'static,
{
    for op in ops {
        pipeline = op.apply(pipeline);
    }
    pipeline
}
