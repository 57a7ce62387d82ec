//! Free functions over `Pipeline`: constructing one from plain data
//! (`from_iterable`) and draining one to a result (`each`, `reduce`,
//! `to_vec`, `discard`). The multi-pipeline combinators (`merge`, `concat`,
//! `zip`) and `share` live in [`crate::ops`] but are re-exported here too,
//! since SPEC_FULL.md §6 lists all of them together as one API surface.

use tracing::trace;

pub use crate::ops::{concat, merge, share, zip};

use crate::error::PipelineError;
use crate::pipeline::Pipeline;
use crate::subject::Subject;

/// Builds a `Pipeline` that emits every item of `iter`, in order, then
/// completes. The producer side runs as an ordinary `tokio::spawn`ed task
/// that owns a `Subject` and `.emit(v).await`s each element — the Rust-
/// native form of a coroutine-based producer (SPEC_FULL.md's design notes).
pub fn from_iterable<V, E>(iter: impl IntoIterator<Item = V, IntoIter: Send + 'static> + Send + 'static) -> Pipeline<V, E>
where
    V: Send + 'static,
    E: Send + Sync + 'static,
{
    let (subject, pipeline) = Subject::channel();
    trace!("from_iterable producer spawned");
    tokio::spawn(async move {
        for v in iter {
            if subject.emit(v).await.is_err() {
                return;
            }
        }
        let _ = subject.complete();
    });
    pipeline
}

/// Drains `pipeline`, invoking `f` on every value. Stops early and returns
/// the stream error if one occurs.
pub async fn each<V, E, F>(mut pipeline: Pipeline<V, E>, mut f: F) -> Result<(), PipelineError<E>>
where
    V: Send + 'static,
    E: Send + Sync + 'static,
    F: FnMut(V),
{
    while let Some(item) = pipeline.next().await {
        f(item?);
    }
    Ok(())
}

/// Folds `pipeline` into a single value with `f`, starting from `init`.
pub async fn reduce<V, E, R, F>(mut pipeline: Pipeline<V, E>, init: R, mut f: F) -> Result<R, PipelineError<E>>
where
    V: Send + 'static,
    E: Send + Sync + 'static,
    F: FnMut(R, V) -> R,
{
    let mut acc = init;
    while let Some(item) = pipeline.next().await {
        acc = f(acc, item?);
    }
    Ok(acc)
}

/// Collects every value `pipeline` produces into a `Vec`, in order.
pub async fn to_vec<V, E>(mut pipeline: Pipeline<V, E>) -> Result<Vec<V>, PipelineError<E>>
where
    V: Send + 'static,
    E: Send + Sync + 'static,
{
    let mut out = Vec::new();
    while let Some(item) = pipeline.next().await {
        out.push(item?);
    }
    Ok(out)
}

/// Drains `pipeline` to completion without retaining its values, returning
/// how many were produced.
pub async fn discard<V, E>(mut pipeline: Pipeline<V, E>) -> Result<usize, PipelineError<E>>
where
    V: Send + 'static,
    E: Send + Sync + 'static,
{
    let mut count = 0;
    while let Some(item) = pipeline.next().await {
        item?;
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reduce_sums_values() {
        let p = from_iterable::<_, ()>(vec![1, 2, 3, 4, 5]);
        assert_eq!(reduce(p, 0, |a, b| a + b).await.unwrap(), 15);
    }

    #[tokio::test]
    async fn discard_counts_without_retaining() {
        let p = from_iterable::<_, ()>(vec!["a", "b", "c"]);
        assert_eq!(discard(p).await.unwrap(), 3);
        let empty = from_iterable::<i32, ()>(vec![]);
        assert_eq!(discard(empty).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn to_vec_round_trips_finite_input() {
        let xs = vec![1, 2, 3, 4];
        let p = from_iterable::<_, ()>(xs.clone());
        assert_eq!(to_vec(p).await.unwrap(), xs);
    }

    #[tokio::test]
    async fn error_surfaces_on_reduce_even_after_a_value() {
        let (subject, pipeline) = Subject::<i32, &'static str>::channel_with(crate::ChannelConfig { buffer: 4 });
        subject.emit(1).await.unwrap();
        subject.error("boom").unwrap();
        let result = reduce(pipeline, 0, |a, b| a + b).await;
        assert!(matches!(result, Err(PipelineError::Stream(e)) if *e == "boom"));
    }

    #[tokio::test]
    async fn each_invokes_callback_per_value() {
        let p = from_iterable::<_, ()>(vec![1, 2, 3]);
        let mut seen = Vec::new();
        each(p, |v| seen.push(v)).await.unwrap();
        assert_eq!(seen, vec![1, 2, 3]);
    }
}
