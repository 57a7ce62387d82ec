//! The bounded-parallelism operator: `concurrent_ordered` / `concurrent_unordered`.
//!
//! See SPEC_FULL.md §4.4 for the full scheduling design this implements —
//! a dispatcher/worker-pool shape shared with `flat_map` via `ops::pool`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::trace;

use crate::error::PipelineError;
use crate::operator::{apply_chain, BoxedOperator, Operator};
use crate::permit::PermitSource;
use crate::pipeline::Pipeline;
use crate::subject::Subject;

use super::pool::{spawn_pool, Outcome, ProcessResult};

/// A bounded-parallel map: runs up to `permits.capacity()` items through its
/// `ops` chain simultaneously. Each worker gets its own copy of the chain
/// (built by re-`apply`ing every operator), so stateful sub-operators never
/// see interleaved items from other workers.
pub struct Concurrent<V, E> {
    permits: Arc<dyn PermitSource>,
    ops: Vec<BoxedOperator<V, E>>,
    ordered: bool,
}

impl<V, E> Concurrent<V, E> {
    pub fn new(permits: Arc<dyn PermitSource>, ops: Vec<BoxedOperator<V, E>>, ordered: bool) -> Self {
        Self { permits, ops, ordered }
    }
}

impl<V, E> Operator<V, E> for Concurrent<V, E>
where
    V: Send + 'static,
    E: Send + Sync + 'static,
{
    type Output = V;

    fn apply(&self, upstream: Pipeline<V, E>) -> Pipeline<V, E> {
        let (subject, pipeline) = Subject::channel();
        trace!(
            capacity = self.permits.capacity(),
            ordered = self.ordered,
            "concurrent operator spawned"
        );
        let ops = self.ops.clone();
        let process: Box<
            dyn Fn(V, usize) -> Pin<Box<dyn Future<Output = ProcessResult<V, E>> + Send>> + Send + Sync,
        > = Box::new(move |value, _index| {
            let ops = ops.clone();
            Box::pin(async move {
                let single = crate::free::from_iterable::<V, E>(std::iter::once(value));
                let mut processed = apply_chain(single, &ops);
                let mut values = Vec::new();
                loop {
                    match processed.next().await {
                        Some(Ok(v)) => values.push(v),
                        Some(Err(PipelineError::Stream(e))) => {
                            return ProcessResult {
                                values,
                                outcome: Outcome::Error(e),
                            };
                        }
                        Some(Err(PipelineError::Cancelled)) => unreachable!("next() never cancels"),
                        None => break,
                    }
                }
                ProcessResult {
                    values,
                    outcome: Outcome::Continue,
                }
            })
        });
        spawn_pool(upstream, subject, self.permits.clone(), self.ordered, Arc::from(process));
        pipeline
    }
}

/// Bounded-parallel map that preserves upstream order downstream, regardless
/// of individual per-item latency.
pub fn concurrent_ordered<V, E>(permits: Arc<dyn PermitSource>, ops: Vec<BoxedOperator<V, E>>) -> Concurrent<V, E> {
    Concurrent::new(permits, ops, true)
}

/// Bounded-parallel map whose downstream order reflects completion order,
/// not upstream order.
pub fn concurrent_unordered<V, E>(permits: Arc<dyn PermitSource>, ops: Vec<BoxedOperator<V, E>>) -> Concurrent<V, E> {
    Concurrent::new(permits, ops, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::free::{from_iterable, to_vec};
    use crate::ops::map;
    use crate::permit::TokioPermitSource;
    use std::time::Duration;

    fn boxed_map<F>(f: F) -> BoxedOperator<i32, ()>
    where
        F: Fn(i32) -> i32 + Send + Sync + 'static,
    {
        Arc::new(map(f))
    }

    #[tokio::test(start_paused = true)]
    async fn ordered_preserves_source_order_under_varying_latency() {
        crate::test_support::init();
        // Worker chains each hold their own `Delay`, so items that enter
        // processing later can still finish sooner; `ordered` must still
        // emit downstream in upstream order regardless.
        let permits = TokioPermitSource::new(4);
        let ops: Vec<BoxedOperator<i32, ()>> = vec![Arc::new(crate::ops::basic::Delay::new(Duration::from_millis(1)))];
        let p = from_iterable::<_, ()>(1..=10i32);
        let p = p.pipe(&Concurrent::new(permits, ops, true));
        let out = to_vec(p).await.unwrap();
        assert_eq!(out, (1..=10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn unordered_is_a_permutation_of_ordered_output() {
        let permits = TokioPermitSource::new(4);
        let ops = vec![boxed_map(|x: i32| x * 2)];
        let p = from_iterable::<_, ()>(vec![1, 2, 3, 4, 5]);
        let p = p.pipe(&Concurrent::new(permits, ops, false));
        let mut out = to_vec(p).await.unwrap();
        out.sort();
        assert_eq!(out, vec![2, 4, 6, 8, 10]);
    }

    #[tokio::test]
    async fn bounds_in_flight_concurrency() {
        crate::test_support::init();
        use std::sync::atomic::{AtomicUsize, Ordering};

        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let in_flight2 = in_flight.clone();
        let max_seen2 = max_seen.clone();

        let permits = TokioPermitSource::new(2);
        let op = crate::ops::basic::Map::new(move |v: i32| {
            let cur = in_flight2.fetch_add(1, Ordering::SeqCst) + 1;
            max_seen2.fetch_max(cur, Ordering::SeqCst);
            in_flight2.fetch_sub(1, Ordering::SeqCst);
            v
        });
        let ops: Vec<BoxedOperator<i32, ()>> = vec![Arc::new(op)];
        let p = from_iterable::<_, ()>(1..=8i32);
        let p = p.pipe(&Concurrent::new(permits, ops, false));
        let out = to_vec(p).await.unwrap();
        assert_eq!(out.len(), 8);
        assert!(max_seen.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn releases_permit_on_downstream_disposal() {
        let permits = TokioPermitSource::new(1);
        let ops: Vec<BoxedOperator<i32, ()>> = vec![Arc::new(crate::ops::basic::Delay::new(Duration::from_millis(5)))];
        let (upstream_subject, upstream_pipeline) =
            Subject::<i32, ()>::channel_with(crate::ChannelConfig { buffer: 4 });
        upstream_subject.emit(1).await.unwrap();
        upstream_subject.emit(2).await.unwrap();
        upstream_subject.emit(3).await.unwrap();

        let mut p = upstream_pipeline.pipe(&Concurrent::new(permits, ops, true));
        assert!(p.next().await.is_some());
        p.dispose();

        // the dispatcher must unwind and dispose its upstream, not just
        // stop hanging — that's the actual disposal-propagation contract,
        // not merely "the test completes".
        crate::test_support::wait_for(50, || upstream_subject.is_disposed()).await;
    }
}
