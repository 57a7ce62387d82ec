//! Producer handle onto an `EmitSource`.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::UsageError;
use crate::pipeline::Pipeline;
use crate::source::{ChannelConfig, EmitFuture, EmitSource};

/// The write side of a pipeline. Created together with its [`Pipeline`] via
/// [`Subject::channel`]; dropping a `Subject` without calling `complete` or
/// `error` first disposes the source, same as the teacher's `Sender` drop
/// marking its channel closed.
pub struct Subject<V, E> {
    source: Arc<EmitSource<V, E>>,
}

impl<V, E> Subject<V, E> {
    /// Creates a new unbuffered (`bound = 0`) pipeline: every emit either
    /// hands off directly to a parked consumer or waits for one.
    pub fn channel() -> (Self, Pipeline<V, E>) {
        Self::channel_with(ChannelConfig::default())
    }

    /// Creates a new pipeline with an explicit [`ChannelConfig`].
    pub fn channel_with(config: ChannelConfig) -> (Self, Pipeline<V, E>) {
        let source = EmitSource::new(config);
        let subject = Self {
            source: source.clone(),
        };
        (subject, Pipeline::new(source))
    }

    /// Returns a new handle onto this subject's consumer side. Intended for
    /// callers that construct a `Subject` before deciding how to hand out
    /// its `Pipeline` (e.g. `SharedSource`, which mints one per downstream);
    /// `Subject::channel` is the shortcut for the common one-shot case.
    pub fn as_pipeline(&self) -> Pipeline<V, E> {
        Pipeline::new(self.source.clone())
    }

    /// The disposal token of this subject's downstream source, cancelled
    /// the moment its consumer calls `dispose`. Operator tasks
    /// `tokio::select!` on this — via the *downstream* `Subject` they just
    /// created — to react to consumer abandonment without needing a live
    /// `Pipeline` handle (acquiring one just to read its token would itself
    /// dispose the source on drop).
    pub(crate) fn cancellation(&self) -> CancellationToken {
        self.source.cancellation()
    }

    /// Offers a value downstream. Resolves once the value has been accepted
    /// (buffered or handed directly to a parked consumer) — not once it has
    /// actually been consumed.
    pub fn emit(&self, value: V) -> EmitFuture<V, E> {
        self.source.emit(value)
    }

    /// Marks the stream complete. Any values already accepted (buffered or
    /// still queued as waiting emits) are still delivered to the consumer
    /// before it observes end-of-stream.
    ///
    /// Takes `&self`, not `self`: a `Subject` is sometimes shared (via `Arc`)
    /// across several concurrently-spawned forwarder tasks (e.g. `merge`),
    /// none of which individually owns the right to retire it. The
    /// underlying `EmitSource` already tracks its own terminal state, so
    /// there is nothing a consuming `self` would add beyond what `is_terminal`
    /// already reports to `Drop`.
    pub fn complete(&self) -> Result<(), UsageError> {
        self.source.complete()
    }

    /// Marks the stream failed with `e`. Aborts the consumer immediately:
    /// any value not yet taken by the time `error` runs is not delivered.
    pub fn error(&self, e: E) -> Result<(), UsageError> {
        self.source.error(e)
    }

    /// Forwards an already-shared failure value (an upstream
    /// `Arc<E>`) without requiring `E: Clone`. Used internally by operator
    /// tasks that propagate an upstream `PipelineError::Stream` downstream.
    pub(crate) fn error_shared(&self, e: Arc<E>) -> Result<(), UsageError> {
        self.source.error_shared(e)
    }

    pub fn is_complete(&self) -> bool {
        self.source.is_complete()
    }

    pub fn is_disposed(&self) -> bool {
        self.source.is_disposed()
    }

    /// True once the pipeline has reached any terminal state (completed,
    /// errored, or disposed by the consumer).
    pub fn is_terminal(&self) -> bool {
        self.source.is_terminal()
    }
}

impl<V, E> Drop for Subject<V, E> {
    fn drop(&mut self) {
        if !self.source.is_terminal() {
            self.source.disposed_by_producer();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn dropping_subject_disposes_pipeline() {
        let (subject, mut pipeline) = Subject::<i32, ()>::channel();
        drop(subject);
        assert!(pipeline.next().await.is_none());
    }

    #[tokio::test]
    async fn complete_then_drain_then_none() {
        let (subject, mut pipeline) = Subject::<i32, ()>::channel_with(ChannelConfig { buffer: 2 });
        subject.emit(1).await.unwrap();
        subject.emit(2).await.unwrap();
        subject.complete().unwrap();
        assert_eq!(pipeline.next().await.unwrap().unwrap(), 1);
        assert_eq!(pipeline.next().await.unwrap().unwrap(), 2);
        assert!(pipeline.next().await.is_none());
    }

    #[tokio::test]
    async fn stream_adapter_yields_values() {
        let (subject, pipeline) = Subject::<i32, ()>::channel_with(ChannelConfig { buffer: 4 });
        subject.emit(1).await.unwrap();
        subject.emit(2).await.unwrap();
        subject.complete().unwrap();
        let values: Vec<_> = pipeline.map(|r| r.unwrap()).collect().await;
        assert_eq!(values, vec![1, 2]);
    }
}
