//! `flat_map`: for each upstream value, invoke an async function producing
//! zero or more downstream items, optionally running several invocations
//! concurrently (SPEC_FULL.md §4.5). Shares its worker-pool dispatcher with
//! `concurrent` via `ops::pool`; the difference is what a "job" runs —
//! here it's a single call to `f`, not a whole sub-operator chain.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::trace;

use crate::permit::{PermitSource, TokioPermitSource};
use crate::pipeline::Pipeline;
use crate::subject::Subject;

use super::pool::{spawn_pool, Outcome, ProcessResult};

/// One item `f` may produce. [`FlatMapItem::Stop`] ends the stream early
/// (as if upstream had completed) instead of being forwarded as a value.
pub enum FlatMapItem<R> {
    Value(R),
    Stop,
}

/// `flat_map(concurrency, f)`: invokes `f(v, index) -> Future<Output = Vec<FlatMapItem<R>>>`
/// for every upstream value, forwarding every [`FlatMapItem::Value`] it
/// returns. With `concurrency == 1` invocations are strictly sequential;
/// with `concurrency > 1`, up to that many run at once, `ordered`
/// controlling whether their outputs interleave by completion or are
/// serialized in upstream order.
pub struct FlatMap<V, R, E> {
    permits: Arc<dyn PermitSource>,
    ordered: bool,
    f: Arc<dyn Fn(V, usize) -> Pin<Box<dyn Future<Output = Vec<FlatMapItem<R>>> + Send>> + Send + Sync>,
    _marker: std::marker::PhantomData<fn() -> E>,
}

impl<V, R, E> FlatMap<V, R, E> {
    pub fn new<F, Fut>(permits: Arc<dyn PermitSource>, ordered: bool, f: F) -> Self
    where
        F: Fn(V, usize) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Vec<FlatMapItem<R>>> + Send + 'static,
    {
        Self {
            permits,
            ordered,
            f: Arc::new(move |v, i| Box::pin(f(v, i)) as Pin<Box<dyn Future<Output = Vec<FlatMapItem<R>>> + Send>>),
            _marker: std::marker::PhantomData,
        }
    }
}

impl<V, R, E> crate::operator::Operator<V, E> for FlatMap<V, R, E>
where
    V: Send + 'static,
    R: Send + 'static,
    E: Send + Sync + 'static,
{
    type Output = R;

    fn apply(&self, upstream: Pipeline<V, E>) -> Pipeline<R, E> {
        let (subject, pipeline) = Subject::channel();
        trace!(capacity = self.permits.capacity(), ordered = self.ordered, "flat_map operator spawned");
        let f = self.f.clone();
        let process: Box<
            dyn Fn(V, usize) -> Pin<Box<dyn Future<Output = ProcessResult<R, E>> + Send>> + Send + Sync,
        > = Box::new(move |value, index| {
            let f = f.clone();
            Box::pin(async move {
                let items = f(value, index).await;
                let mut values = Vec::with_capacity(items.len());
                let mut stopped = false;
                for item in items {
                    match item {
                        FlatMapItem::Value(r) => values.push(r),
                        FlatMapItem::Stop => {
                            stopped = true;
                            break;
                        }
                    }
                }
                ProcessResult {
                    values,
                    outcome: if stopped { Outcome::Stop } else { Outcome::Continue },
                }
            })
        });
        spawn_pool(upstream, subject, self.permits.clone(), self.ordered, Arc::from(process));
        pipeline
    }
}

/// `flat_map` whose downstream order matches upstream order regardless of
/// per-invocation latency.
pub fn flat_map_ordered<V, R, E, F, Fut>(concurrency: usize, f: F) -> FlatMap<V, R, E>
where
    F: Fn(V, usize) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Vec<FlatMapItem<R>>> + Send + 'static,
{
    FlatMap::new(TokioPermitSource::new(concurrency), true, f)
}

/// `flat_map` whose downstream order reflects completion order.
pub fn flat_map_unordered<V, R, E, F, Fut>(concurrency: usize, f: F) -> FlatMap<V, R, E>
where
    F: Fn(V, usize) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Vec<FlatMapItem<R>>> + Send + 'static,
{
    FlatMap::new(TokioPermitSource::new(concurrency), false, f)
}
