//! Multi-pipeline combinators: `merge`, `concat`, `zip`.
//!
//! Unlike the operators in `ops::basic`, these don't implement [`Operator`]
//! — they take a collection of pipelines rather than transforming a single
//! upstream — so they're exposed as free functions instead, matching
//! `merge`/`concat`/`zip` in the API surface named by SPEC_FULL.md §6.

use futures::future::join_all;
use tracing::trace;

use crate::error::PipelineError;
use crate::pipeline::Pipeline;
use crate::subject::Subject;

/// Spawns one task per source, each forwarding into a shared downstream.
/// Ends once every source has ended; errors (and cancels the remaining
/// sources) the moment any source errors. Disposing the merged downstream
/// disposes every source.
pub fn merge<V, E>(sources: Vec<Pipeline<V, E>>) -> Pipeline<V, E>
where
    V: Send + 'static,
    E: Send + Sync + 'static,
{
    let (subject, pipeline) = Subject::channel();
    trace!(n = sources.len(), "merge spawned");
    if sources.is_empty() {
        let _ = subject.complete();
        return pipeline;
    }

    let token = subject.cancellation();
    tokio::spawn(async move {
        let errored = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let subject = std::sync::Arc::new(subject);

        let tasks: Vec<_> = sources
            .into_iter()
            .map(|mut source| {
                let subject = subject.clone();
                let errored = errored.clone();
                let token = token.clone();
                async move {
                    loop {
                        if errored.load(std::sync::atomic::Ordering::Acquire) {
                            source.dispose();
                            return;
                        }
                        tokio::select! {
                            biased;
                            _ = token.cancelled() => {
                                source.dispose();
                                return;
                            }
                            item = source.next() => match item {
                                Some(Ok(v)) => {
                                    if subject.emit(v).await.is_err() {
                                        source.dispose();
                                        return;
                                    }
                                }
                                Some(Err(PipelineError::Stream(e))) => {
                                    if !errored.swap(true, std::sync::atomic::Ordering::AcqRel) {
                                        let _ = subject.error_shared(e);
                                    }
                                    return;
                                }
                                Some(Err(PipelineError::Cancelled)) => unreachable!("next() never cancels"),
                                None => return,
                            },
                        }
                    }
                }
            })
            .collect();

        join_all(tasks).await;
        if !errored.load(std::sync::atomic::Ordering::Acquire) {
            let _ = subject.complete();
        }
    });

    pipeline
}

/// Drains each source fully, in order, before touching the next one. Errors
/// stop the sequence (later sources are never started and are dropped,
/// which disposes them via `Drop for Pipeline`).
pub fn concat<V, E>(sources: Vec<Pipeline<V, E>>) -> Pipeline<V, E>
where
    V: Send + 'static,
    E: Send + Sync + 'static,
{
    let (subject, pipeline) = Subject::channel();
    trace!(n = sources.len(), "concat spawned");
    let token = subject.cancellation();
    tokio::spawn(async move {
        for mut source in sources {
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        source.dispose();
                        return;
                    }
                    item = source.next() => match item {
                        Some(Ok(v)) => {
                            if subject.emit(v).await.is_err() {
                                source.dispose();
                                return;
                            }
                        }
                        Some(Err(PipelineError::Stream(e))) => {
                            let _ = subject.error_shared(e);
                            return;
                        }
                        Some(Err(PipelineError::Cancelled)) => unreachable!("next() never cancels"),
                        None => break,
                    },
                }
            }
        }
        let _ = subject.complete();
    });
    pipeline
}

/// Emits a `Vec<V>` (ordered the same as `sources`) only once every source
/// has produced its next value; ends the instant any source ends, and
/// errors the instant any source errors. Disposes every source on downstream
/// disposal or on any termination path.
pub fn zip<V, E>(sources: Vec<Pipeline<V, E>>) -> Pipeline<Vec<V>, E>
where
    V: Send + 'static,
    E: Send + Sync + 'static,
{
    let (subject, pipeline) = Subject::channel();
    trace!(n = sources.len(), "zip spawned");
    if sources.is_empty() {
        let _ = subject.complete();
        return pipeline;
    }

    let token = subject.cancellation();
    tokio::spawn(async move {
        let mut sources = sources;
        loop {
            if token.is_cancelled() {
                for source in &mut sources {
                    source.dispose();
                }
                return;
            }

            let mut tuple = Vec::with_capacity(sources.len());
            for idx in 0..sources.len() {
                let gathered = tokio::select! {
                    biased;
                    _ = token.cancelled() => Gathered::Cancelled,
                    item = sources[idx].next() => Gathered::Item(item),
                };
                match gathered {
                    Gathered::Cancelled => {
                        for source in &mut sources {
                            source.dispose();
                        }
                        return;
                    }
                    Gathered::Item(Some(Ok(v))) => tuple.push(v),
                    Gathered::Item(Some(Err(PipelineError::Stream(e)))) => {
                        let _ = subject.error_shared(e);
                        for source in &mut sources {
                            source.dispose();
                        }
                        return;
                    }
                    Gathered::Item(Some(Err(PipelineError::Cancelled))) => {
                        unreachable!("next() never cancels")
                    }
                    Gathered::Item(None) => {
                        for source in &mut sources {
                            source.dispose();
                        }
                        let _ = subject.complete();
                        return;
                    }
                }
            }

            if subject.emit(tuple).await.is_err() {
                for source in &mut sources {
                    source.dispose();
                }
                return;
            }
        }
    });
    pipeline
}

/// Outcome of racing one source's `next()` against downstream cancellation,
/// so a slow/blocked source never delays observing a disposed downstream.
enum Gathered<V, E> {
    Item(Option<Result<V, PipelineError<E>>>),
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::free::{from_iterable, to_vec};

    #[tokio::test]
    async fn merge_forwards_all_sources() {
        let a = from_iterable::<_, ()>(vec![1, 2]);
        let b = from_iterable::<_, ()>(vec![3, 4]);
        let mut out = to_vec(merge(vec![a, b])).await.unwrap();
        out.sort();
        assert_eq!(out, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn concat_drains_in_order() {
        let a = from_iterable::<_, ()>(vec![1, 2]);
        let b = from_iterable::<_, ()>(vec![3, 4]);
        assert_eq!(to_vec(concat(vec![a, b])).await.unwrap(), vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn zip_lock_steps_and_ends_with_shortest() {
        let a = from_iterable::<_, ()>(vec![1, 2, 3]);
        let b = from_iterable::<_, ()>(vec![10, 20]);
        let zipped = to_vec(zip(vec![a, b])).await.unwrap();
        assert_eq!(zipped, vec![vec![1, 10], vec![2, 20]]);
    }

    #[tokio::test]
    async fn merge_of_empty_set_completes_immediately() {
        let out = to_vec(merge::<i32, ()>(vec![])).await.unwrap();
        assert_eq!(out, Vec::<i32>::new());
    }

    #[tokio::test]
    async fn disposing_merge_output_disposes_every_source() {
        let (a_subject, a_pipeline) = Subject::<i32, ()>::channel();
        let (b_subject, b_pipeline) = Subject::<i32, ()>::channel();
        let mut merged = merge(vec![a_pipeline, b_pipeline]);

        // neither source has emitted, so the per-source forwarders are
        // blocked on `next()`; disposing the merged output must still
        // unblock and dispose them within a bounded number of cooperative
        // steps.
        merged.dispose();
        crate::test_support::wait_for(50, || a_subject.is_disposed()).await;
        crate::test_support::wait_for(50, || b_subject.is_disposed()).await;
    }

    #[tokio::test]
    async fn disposing_concat_output_disposes_every_source() {
        let (a_subject, a_pipeline) = Subject::<i32, ()>::channel();
        let (b_subject, b_pipeline) = Subject::<i32, ()>::channel();
        let mut concatenated = concat(vec![a_pipeline, b_pipeline]);

        // `concat` is blocked draining `a`; `b` hasn't been touched yet.
        // Disposing the output must dispose the in-flight source and drop
        // (hence dispose) the untouched one.
        concatenated.dispose();
        crate::test_support::wait_for(50, || a_subject.is_disposed()).await;
        crate::test_support::wait_for(50, || b_subject.is_disposed()).await;
    }

    #[tokio::test]
    async fn disposing_zip_output_disposes_every_source() {
        let (a_subject, a_pipeline) = Subject::<i32, ()>::channel();
        let (b_subject, b_pipeline) = Subject::<i32, ()>::channel();
        let mut zipped = zip(vec![a_pipeline, b_pipeline]);

        zipped.dispose();
        crate::test_support::wait_for(50, || a_subject.is_disposed()).await;
        crate::test_support::wait_for(50, || b_subject.is_disposed()).await;
    }
}
