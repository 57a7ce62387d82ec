//! The trivial leaf operators: stateless (at the type level) wrappers that
//! follow the standard operator shape directly — spawn a task, drive the
//! upstream, write to a fresh `Subject`, propagate terminal states.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::trace;

use crate::error::PipelineError;
use crate::operator::Operator;
use crate::pipeline::Pipeline;
use crate::subject::Subject;

/// What `step` wants done with one upstream value.
enum StepResult<B> {
    /// Emit `b` downstream and keep going.
    Forward(B),
    /// Drop the value, emit nothing, keep going.
    Skip,
    /// Emit `b` downstream, then end the stream (disposing upstream)
    /// without waiting for it to end on its own. Used by `take`.
    ForwardThenStop(B),
    /// End the stream immediately, without forwarding this value. Used by
    /// `take_while`.
    Stop,
}

/// The standard forwarding loop shared by every trivial operator: read
/// upstream, apply `step`, stop on downstream disposal or upstream
/// termination, propagate errors and completion per §4.3.
async fn run_loop<A, B, E, S>(mut upstream: Pipeline<A, E>, subject: Subject<B, E>, mut step: S)
where
    A: Send + 'static,
    B: Send + 'static,
    E: Send + Sync + 'static,
    S: FnMut(A) -> StepResult<B> + Send,
{
    let token = subject.cancellation();
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                upstream.dispose();
                return;
            }
            item = upstream.next() => match item {
                Some(Ok(v)) => match step(v) {
                    StepResult::Forward(b) => {
                        if subject.emit(b).await.is_err() {
                            upstream.dispose();
                            return;
                        }
                    }
                    StepResult::Skip => {}
                    StepResult::ForwardThenStop(b) => {
                        let _ = subject.emit(b).await;
                        upstream.dispose();
                        let _ = subject.complete();
                        return;
                    }
                    StepResult::Stop => {
                        upstream.dispose();
                        let _ = subject.complete();
                        return;
                    }
                },
                Some(Err(PipelineError::Stream(e))) => {
                    let _ = subject.error_shared(e);
                    return;
                }
                Some(Err(PipelineError::Cancelled)) => unreachable!("next() never cancels"),
                None => {
                    let _ = subject.complete();
                    return;
                }
            },
        }
    }
}

/// `map(f)`: transforms every value with `f`.
pub struct Map<F> {
    f: Arc<F>,
}

impl<F> Map<F> {
    pub fn new(f: F) -> Self {
        Self { f: Arc::new(f) }
    }
}

impl<A, B, E, F> Operator<A, E> for Map<F>
where
    A: Send + 'static,
    B: Send + 'static,
    E: Send + Sync + 'static,
    F: Fn(A) -> B + Send + Sync + 'static,
{
    type Output = B;

    fn apply(&self, upstream: Pipeline<A, E>) -> Pipeline<B, E> {
        let (subject, pipeline) = Subject::channel();
        let f = self.f.clone();
        trace!("map operator spawned");
        tokio::spawn(run_loop(upstream, subject, move |v| StepResult::Forward(f(v))));
        pipeline
    }
}

/// `filter(pred)`: keeps only values for which `pred` returns `true`.
pub struct Filter<F> {
    pred: Arc<F>,
}

impl<F> Filter<F> {
    pub fn new(pred: F) -> Self {
        Self { pred: Arc::new(pred) }
    }
}

impl<A, E, F> Operator<A, E> for Filter<F>
where
    A: Send + 'static,
    E: Send + Sync + 'static,
    F: Fn(&A) -> bool + Send + Sync + 'static,
{
    type Output = A;

    fn apply(&self, upstream: Pipeline<A, E>) -> Pipeline<A, E> {
        let (subject, pipeline) = Subject::channel();
        let pred = self.pred.clone();
        trace!("filter operator spawned");
        tokio::spawn(run_loop(upstream, subject, move |v| {
            if pred(&v) {
                StepResult::Forward(v)
            } else {
                StepResult::Skip
            }
        }));
        pipeline
    }
}

/// `skip(n)`: drops the first `n` values, forwards the rest.
pub struct Skip {
    n: usize,
}

impl Skip {
    pub fn new(n: usize) -> Self {
        Self { n }
    }
}

impl<A, E> Operator<A, E> for Skip
where
    A: Send + 'static,
    E: Send + Sync + 'static,
{
    type Output = A;

    fn apply(&self, upstream: Pipeline<A, E>) -> Pipeline<A, E> {
        let (subject, pipeline) = Subject::channel();
        let remaining = AtomicUsize::new(self.n);
        trace!(n = self.n, "skip operator spawned");
        tokio::spawn(run_loop(upstream, subject, move |v| {
            if remaining.load(Ordering::Relaxed) > 0 {
                remaining.fetch_sub(1, Ordering::Relaxed);
                StepResult::Skip
            } else {
                StepResult::Forward(v)
            }
        }));
        pipeline
    }
}

/// `take(n)`: forwards only the first `n` values, then ends the stream.
pub struct Take {
    n: usize,
}

impl Take {
    pub fn new(n: usize) -> Self {
        Self { n }
    }
}

impl<A, E> Operator<A, E> for Take
where
    A: Send + 'static,
    E: Send + Sync + 'static,
{
    type Output = A;

    fn apply(&self, upstream: Pipeline<A, E>) -> Pipeline<A, E> {
        let (subject, pipeline) = Subject::channel();
        let n = self.n;
        trace!(n, "take operator spawned");
        if n == 0 {
            drop(upstream);
            let _ = subject.complete();
            return pipeline;
        }
        let remaining = AtomicUsize::new(n);
        tokio::spawn(run_loop(upstream, subject, move |v| {
            let left = remaining.fetch_sub(1, Ordering::Relaxed);
            if left <= 1 {
                StepResult::ForwardThenStop(v)
            } else {
                StepResult::Forward(v)
            }
        }));
        pipeline
    }
}

/// `skip_while(pred)`: drops values while `pred` holds, forwards the rest
/// (including the first value for which `pred` returns `false`, and
/// everything after it regardless of `pred`).
pub struct SkipWhile<F> {
    pred: Arc<F>,
}

impl<F> SkipWhile<F> {
    pub fn new(pred: F) -> Self {
        Self { pred: Arc::new(pred) }
    }
}

impl<A, E, F> Operator<A, E> for SkipWhile<F>
where
    A: Send + 'static,
    E: Send + Sync + 'static,
    F: Fn(&A) -> bool + Send + Sync + 'static,
{
    type Output = A;

    fn apply(&self, upstream: Pipeline<A, E>) -> Pipeline<A, E> {
        let (subject, pipeline) = Subject::channel();
        let pred = self.pred.clone();
        let skipping = AtomicBool::new(true);
        trace!("skip_while operator spawned");
        tokio::spawn(run_loop(upstream, subject, move |v| {
            if skipping.load(Ordering::Relaxed) {
                if pred(&v) {
                    return StepResult::Skip;
                }
                skipping.store(false, Ordering::Relaxed);
            }
            StepResult::Forward(v)
        }));
        pipeline
    }
}

/// `take_while(pred)`: forwards values while `pred` holds, ends the stream
/// (without forwarding) at the first value for which it doesn't.
pub struct TakeWhile<F> {
    pred: Arc<F>,
}

impl<F> TakeWhile<F> {
    pub fn new(pred: F) -> Self {
        Self { pred: Arc::new(pred) }
    }
}

impl<A, E, F> Operator<A, E> for TakeWhile<F>
where
    A: Send + 'static,
    E: Send + Sync + 'static,
    F: Fn(&A) -> bool + Send + Sync + 'static,
{
    type Output = A;

    fn apply(&self, upstream: Pipeline<A, E>) -> Pipeline<A, E> {
        let (subject, pipeline) = Subject::channel();
        let pred = self.pred.clone();
        trace!("take_while operator spawned");
        tokio::spawn(run_loop(upstream, subject, move |v| {
            if pred(&v) {
                StepResult::Forward(v)
            } else {
                StepResult::Stop
            }
        }));
        pipeline
    }
}

/// `tap(f)`: runs `f` as a side effect on every value, forwards it
/// unchanged.
pub struct Tap<F> {
    f: Arc<F>,
}

impl<F> Tap<F> {
    pub fn new(f: F) -> Self {
        Self { f: Arc::new(f) }
    }
}

impl<A, E, F> Operator<A, E> for Tap<F>
where
    A: Send + 'static,
    E: Send + Sync + 'static,
    F: Fn(&A) + Send + Sync + 'static,
{
    type Output = A;

    fn apply(&self, upstream: Pipeline<A, E>) -> Pipeline<A, E> {
        let (subject, pipeline) = Subject::channel();
        let f = self.f.clone();
        trace!("tap operator spawned");
        tokio::spawn(run_loop(upstream, subject, move |v| {
            f(&v);
            StepResult::Forward(v)
        }));
        pipeline
    }
}

/// `finalize(f)`: runs `f` exactly once, after the stream reaches any
/// terminal state (end, error, or downstream disposal) — the async
/// equivalent of a `Drop` guard for cleanup that must observe *why* the
/// stream ended.
pub struct Finalize<F> {
    f: Arc<F>,
}

impl<F> Finalize<F> {
    pub fn new(f: F) -> Self {
        Self { f: Arc::new(f) }
    }
}

impl<A, E, F> Operator<A, E> for Finalize<F>
where
    A: Send + 'static,
    E: Send + Sync + 'static,
    F: Fn() + Send + Sync + 'static,
{
    type Output = A;

    fn apply(&self, upstream: Pipeline<A, E>) -> Pipeline<A, E> {
        let (subject, pipeline) = Subject::channel();
        let f = self.f.clone();
        trace!("finalize operator spawned");
        tokio::spawn(async move {
            run_loop(upstream, subject, StepResult::Forward).await;
            f();
        });
        pipeline
    }
}

/// `delay(d)`: holds every value for `d` before forwarding it. Per-value,
/// not a one-shot start delay — a slow downstream still only gates on
/// backpressure as usual, `delay` only adds a fixed latency per item.
pub struct Delay {
    duration: Duration,
}

impl Delay {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

impl<A, E> Operator<A, E> for Delay
where
    A: Send + 'static,
    E: Send + Sync + 'static,
{
    type Output = A;

    fn apply(&self, mut upstream: Pipeline<A, E>) -> Pipeline<A, E> {
        let (subject, pipeline) = Subject::channel();
        let duration = self.duration;
        trace!(?duration, "delay operator spawned");
        let token = pipeline.cancellation();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        upstream.dispose();
                        return;
                    }
                    item = upstream.next() => match item {
                        Some(Ok(v)) => {
                            tokio::time::sleep(duration).await;
                            if subject.emit(v).await.is_err() {
                                upstream.dispose();
                                return;
                            }
                        }
                        Some(Err(PipelineError::Stream(e))) => {
                            let _ = subject.error_shared(e);
                            return;
                        }
                        Some(Err(PipelineError::Cancelled)) => unreachable!("next() never cancels"),
                        None => {
                            let _ = subject.complete();
                            return;
                        }
                    },
                }
            }
        });
        pipeline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::free::{from_iterable, to_vec};

    async fn collect<A, E>(p: Pipeline<A, E>) -> Vec<A>
    where
        A: Send + 'static,
        E: Send + Sync + std::fmt::Debug + 'static,
    {
        to_vec(p).await.unwrap()
    }

    #[tokio::test]
    async fn map_transforms_every_value() {
        let p = from_iterable::<_, ()>(vec![1, 2, 3]);
        let p = p.pipe(&Map::new(|v: i32| v * 2));
        assert_eq!(collect(p).await, vec![2, 4, 6]);
    }

    #[tokio::test]
    async fn filter_keeps_matching_values() {
        let p = from_iterable::<_, ()>(vec![1, 2, 3, 4]);
        let p = p.pipe(&Filter::new(|v: &i32| v % 2 == 0));
        assert_eq!(collect(p).await, vec![2, 4]);
    }

    #[tokio::test]
    async fn skip_drops_leading_values() {
        let p = from_iterable::<_, ()>(vec![1, 2, 3, 4]);
        let p = p.pipe(&Skip::new(2));
        assert_eq!(collect(p).await, vec![3, 4]);
    }

    #[tokio::test]
    async fn take_stops_after_n() {
        let p = from_iterable::<_, ()>(vec![1, 2, 3, 4]);
        let p = p.pipe(&Take::new(2));
        assert_eq!(collect(p).await, vec![1, 2]);
    }

    #[tokio::test]
    async fn take_zero_completes_immediately() {
        let p = from_iterable::<_, ()>(vec![1, 2, 3]);
        let p = p.pipe(&Take::new(0));
        assert_eq!(collect(p).await, Vec::<i32>::new());
    }

    #[tokio::test]
    async fn skip_while_then_forwards_regardless() {
        let p = from_iterable::<_, ()>(vec![1, 2, 3, 1, 0]);
        let p = p.pipe(&SkipWhile::new(|v: &i32| *v < 3));
        assert_eq!(collect(p).await, vec![3, 1, 0]);
    }

    #[tokio::test]
    async fn take_while_stops_at_first_failure() {
        let p = from_iterable::<_, ()>(vec![1, 2, 3, 1, 0]);
        let p = p.pipe(&TakeWhile::new(|v: &i32| *v < 3));
        assert_eq!(collect(p).await, vec![1, 2]);
    }

    #[tokio::test]
    async fn tap_observes_without_changing_values() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let p = from_iterable::<_, ()>(vec![1, 2, 3]);
        let p = p.pipe(&Tap::new(move |v: &i32| seen2.lock().unwrap().push(*v)));
        assert_eq!(collect(p).await, vec![1, 2, 3]);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn finalize_runs_once_on_completion() {
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let p = from_iterable::<_, ()>(vec![1, 2]);
        let p = p.pipe(&Finalize::new(move || {
            count2.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(collect(p).await, vec![1, 2]);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_holds_each_value() {
        let p = from_iterable::<_, ()>(vec![1, 2]);
        let p = p.pipe(&Delay::new(Duration::from_millis(10)));
        let start = tokio::time::Instant::now();
        let values = collect(p).await;
        assert_eq!(values, vec![1, 2]);
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[tokio::test]
    async fn disposing_output_disposes_upstream_via_run_loop() {
        let (upstream_subject, upstream_pipeline) = Subject::<i32, ()>::channel();
        let mut downstream = upstream_pipeline.pipe(&Map::new(|v: i32| v));

        // no value has been emitted, so `run_loop` is blocked on
        // `upstream.next()`; disposing its output must still unblock and
        // dispose the upstream within a bounded number of cooperative steps.
        downstream.dispose();
        crate::test_support::wait_for(50, || upstream_subject.is_disposed()).await;
    }
}
