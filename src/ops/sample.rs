//! Time/trigger-gated operators: `sample_when`, `delay_when`, `sample_time`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::trace;

use crate::error::PipelineError;
use crate::operator::Operator;
use crate::pipeline::Pipeline;
use crate::subject::Subject;

/// `sample_when(trigger)`: holds the most recent upstream value; each time
/// `trigger` emits, forwards that value downstream only if it is new since
/// the last sample (tracked with a generation counter, since `V` need not
/// be `PartialEq`). A trigger firing with no new value since the previous
/// sample produces nothing.
pub struct SampleWhen<T, E> {
    trigger: Mutex<Option<Pipeline<T, E>>>,
}

impl<T, E> SampleWhen<T, E> {
    pub fn new(trigger: Pipeline<T, E>) -> Self {
        Self {
            trigger: Mutex::new(Some(trigger)),
        }
    }

    fn take_trigger(&self) -> Pipeline<T, E> {
        self.trigger
            .lock()
            .unwrap()
            .take()
            .expect("SampleWhen applied more than once")
    }
}

impl<V, T, E> Operator<V, E> for SampleWhen<T, E>
where
    V: Send + Clone + 'static,
    T: Send + 'static,
    E: Send + Sync + 'static,
{
    type Output = V;

    fn apply(&self, mut upstream: Pipeline<V, E>) -> Pipeline<V, E> {
        let (subject, pipeline) = Subject::channel();
        let mut trigger = self.take_trigger();
        trace!("sample_when operator spawned");
        let token = subject.cancellation();

        tokio::spawn(async move {
            let latest: Arc<Mutex<Option<V>>> = Arc::new(Mutex::new(None));
            let seen_generation = AtomicU64::new(0);
            let latest_generation = Arc::new(AtomicU64::new(0));

            let latest_for_upstream = latest.clone();
            let latest_generation_for_upstream = latest_generation.clone();
            let upstream_token = token.clone();
            let upstream_task = async move {
                loop {
                    tokio::select! {
                        biased;
                        _ = upstream_token.cancelled() => return None,
                        item = upstream.next() => match item {
                            Some(Ok(v)) => {
                                *latest_for_upstream.lock().unwrap() = Some(v);
                                latest_generation_for_upstream.fetch_add(1, Ordering::SeqCst);
                            }
                            Some(Err(PipelineError::Stream(e))) => return Some(Err(e)),
                            Some(Err(PipelineError::Cancelled)) => unreachable!("next() never cancels"),
                            None => return None,
                        },
                    }
                }
            };
            let upstream_handle = tokio::spawn(upstream_task);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        trigger.dispose();
                        upstream_handle.abort();
                        return;
                    }
                    item = trigger.next() => match item {
                        Some(Ok(_)) => {
                            let gen = latest_generation.load(Ordering::SeqCst);
                            if gen != seen_generation.swap(gen, Ordering::SeqCst) {
                                if let Some(v) = latest.lock().unwrap().clone() {
                                    if subject.emit(v).await.is_err() {
                                        trigger.dispose();
                                        upstream_handle.abort();
                                        return;
                                    }
                                }
                            }
                        }
                        Some(Err(PipelineError::Stream(e))) => {
                            let _ = subject.error_shared(e);
                            upstream_handle.abort();
                            return;
                        }
                        Some(Err(PipelineError::Cancelled)) => unreachable!("next() never cancels"),
                        None => break,
                    },
                }
            }

            match upstream_handle.await {
                Ok(Some(Err(e))) => {
                    let _ = subject.error_shared(e);
                }
                _ => {
                    let _ = subject.complete();
                }
            }
        });

        pipeline
    }
}

/// `delay_when(trigger)`: buffers one upstream value at a time, waiting for
/// `trigger` to emit once before forwarding it. Ends when either side ends.
pub struct DelayWhen<T, E> {
    trigger: Mutex<Option<Pipeline<T, E>>>,
}

impl<T, E> DelayWhen<T, E> {
    pub fn new(trigger: Pipeline<T, E>) -> Self {
        Self {
            trigger: Mutex::new(Some(trigger)),
        }
    }

    fn take_trigger(&self) -> Pipeline<T, E> {
        self.trigger
            .lock()
            .unwrap()
            .take()
            .expect("DelayWhen applied more than once")
    }
}

impl<V, T, E> Operator<V, E> for DelayWhen<T, E>
where
    V: Send + 'static,
    T: Send + 'static,
    E: Send + Sync + 'static,
{
    type Output = V;

    fn apply(&self, mut upstream: Pipeline<V, E>) -> Pipeline<V, E> {
        let (subject, pipeline) = Subject::channel();
        let mut trigger = self.take_trigger();
        trace!("delay_when operator spawned");
        let token = subject.cancellation();

        tokio::spawn(async move {
            loop {
                let value = tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        upstream.dispose();
                        trigger.dispose();
                        return;
                    }
                    item = upstream.next() => match item {
                        Some(Ok(v)) => v,
                        Some(Err(PipelineError::Stream(e))) => {
                            let _ = subject.error_shared(e);
                            trigger.dispose();
                            return;
                        }
                        Some(Err(PipelineError::Cancelled)) => unreachable!("next() never cancels"),
                        None => {
                            let _ = subject.complete();
                            trigger.dispose();
                            return;
                        }
                    },
                };

                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        upstream.dispose();
                        trigger.dispose();
                        return;
                    }
                    fired = trigger.next() => match fired {
                        Some(Ok(_)) => {
                            if subject.emit(value).await.is_err() {
                                upstream.dispose();
                                trigger.dispose();
                                return;
                            }
                        }
                        Some(Err(PipelineError::Stream(e))) => {
                            let _ = subject.error_shared(e);
                            upstream.dispose();
                            return;
                        }
                        Some(Err(PipelineError::Cancelled)) => unreachable!("next() never cancels"),
                        None => {
                            let _ = subject.complete();
                            upstream.dispose();
                            return;
                        }
                    },
                }
            }
        });

        pipeline
    }
}

/// `sample_time(period)`: `sample_when` driven by a `tokio::time::interval`
/// trigger instead of a user-supplied pipeline — the only time-based
/// operator named in SPEC_FULL.md §6 that isn't a trivial wrapper over
/// `tokio::time::sleep`.
pub struct SampleTime {
    period: Duration,
}

impl SampleTime {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }
}

impl<V, E> Operator<V, E> for SampleTime
where
    V: Send + Clone + 'static,
    E: Send + Sync + 'static,
{
    type Output = V;

    fn apply(&self, upstream: Pipeline<V, E>) -> Pipeline<V, E> {
        let (tick_subject, tick_pipeline) = Subject::<(), E>::channel();
        let period = self.period;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await; // first tick fires immediately; skip it
            loop {
                interval.tick().await;
                if tick_subject.emit(()).await.is_err() {
                    return;
                }
            }
        });
        SampleWhen::new(tick_pipeline).apply(upstream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::free::from_iterable;

    #[tokio::test]
    async fn delay_when_forwards_after_trigger_fires() {
        let upstream = from_iterable::<_, ()>(vec![1, 2]);
        let (trigger_subject, trigger_pipeline) = Subject::<(), ()>::channel();
        let p = upstream.pipe(&DelayWhen::new(trigger_pipeline));

        tokio::spawn(async move {
            trigger_subject.emit(()).await.unwrap();
            trigger_subject.emit(()).await.unwrap();
            trigger_subject.complete().unwrap();
        });

        let out = crate::free::to_vec(p).await.unwrap();
        assert_eq!(out, vec![1, 2]);
    }

    #[tokio::test]
    async fn sample_when_skips_unchanged_values() {
        let (upstream_subject, upstream_pipeline) = Subject::<i32, ()>::channel_with(crate::ChannelConfig { buffer: 8 });
        let (trigger_subject, trigger_pipeline) = Subject::<(), ()>::channel_with(crate::ChannelConfig { buffer: 8 });
        let p = upstream_pipeline.pipe(&SampleWhen::new(trigger_pipeline));

        upstream_subject.emit(1).await.unwrap();
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        trigger_subject.emit(()).await.unwrap();
        trigger_subject.emit(()).await.unwrap(); // no new value since last sample
        upstream_subject.emit(2).await.unwrap();
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        trigger_subject.emit(()).await.unwrap();
        upstream_subject.complete().unwrap();
        trigger_subject.complete().unwrap();

        let out = crate::free::to_vec(p).await.unwrap();
        assert_eq!(out, vec![1, 2]);
    }
}
