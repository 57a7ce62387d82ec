//! Consumer handle onto an `EmitSource`.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;
use crate::operator::Operator;
use crate::source::EmitSource;

/// The read side of a pipeline. Single-consumer by construction: every
/// draining method takes `&mut self`, so the borrow checker — not a runtime
/// flag — is what rules out two tasks racing on the same `Pipeline`.
pub struct Pipeline<V, E> {
    source: Arc<EmitSource<V, E>>,
    disposed: bool,
}

impl<V, E> Pipeline<V, E> {
    pub(crate) fn new(source: Arc<EmitSource<V, E>>) -> Self {
        Self {
            source,
            disposed: false,
        }
    }

    /// Awaits the next value, the terminal error, or end-of-stream.
    pub async fn next(&mut self) -> Option<Result<V, PipelineError<E>>> {
        self.source.next().await
    }

    /// Like [`Pipeline::next`], but resolves early with
    /// [`PipelineError::Cancelled`] if `token` fires first. The channel
    /// itself is untouched by a cancellation: a value that arrives in the
    /// same instant the token fires is still delivered, never dropped,
    /// because the value-producing branch is polled before the
    /// cancellation branch on every wake (see the `biased` select below).
    pub async fn next_cancellable(
        &mut self,
        token: &CancellationToken,
    ) -> Result<Option<V>, PipelineError<E>> {
        tokio::select! {
            biased;
            resolved = self.source.next() => match resolved {
                Some(Ok(v)) => Ok(Some(v)),
                Some(Err(e)) => Err(e),
                None => Ok(None),
            },
            _ = token.cancelled() => Err(PipelineError::Cancelled),
        }
    }

    /// Releases the consumer side early. Idempotent; the producer side
    /// observes this as `EmitError::Disposed` on any emit still in flight.
    pub fn dispose(&mut self) {
        if !self.disposed {
            self.disposed = true;
            self.source.dispose();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.source.is_disposed()
    }

    pub fn is_complete(&self) -> bool {
        self.source.is_complete()
    }

    /// A token cancelled the moment this pipeline reaches any terminal
    /// state, for operators that need to watch a source without polling it
    /// directly (see `ops::concurrent`).
    pub(crate) fn cancellation(&self) -> CancellationToken {
        self.source.cancellation()
    }

    pub(crate) fn source_handle(&self) -> Arc<EmitSource<V, E>> {
        self.source.clone()
    }

    /// Applies a single [`Operator`], consuming this pipeline and returning
    /// the transformed one.
    pub fn pipe<O>(self, op: &O) -> Pipeline<O::Output, E>
    where
        O: Operator<V, E>,
    {
        op.apply(self)
    }

    /// Applies a sequence of same-typed operators in order. Useful when the
    /// chain is built dynamically (e.g. a `Vec<Box<dyn Operator<...>>>`).
    pub fn pipe_all<O>(self, ops: &[O]) -> Pipeline<V, E>
    where
        O: Operator<V, E, Output = V>,
    {
        ops.iter().fold(self, |p, op| op.apply(p))
    }
}

impl<V, E> Drop for Pipeline<V, E> {
    fn drop(&mut self) {
        if !self.disposed {
            self.source.dispose();
        }
    }
}

impl<V, E> Stream for Pipeline<V, E> {
    type Item = Result<V, PipelineError<E>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut fut = self.source.next();
        Pin::new(&mut fut).poll(cx)
    }
}

use std::future::Future;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subject::Subject;

    #[tokio::test]
    async fn dispose_is_idempotent() {
        let (_subject, mut pipeline) = Subject::<i32, ()>::channel();
        pipeline.dispose();
        pipeline.dispose();
        assert!(pipeline.is_disposed());
    }

    #[tokio::test]
    async fn cancellable_next_returns_cancelled() {
        let (_subject, mut pipeline) = Subject::<i32, ()>::channel();
        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(
            pipeline.next_cancellable(&token).await,
            Err(PipelineError::Cancelled)
        ));
    }
}
