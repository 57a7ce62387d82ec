//! Error taxonomy for the pipeline engine.
//!
//! Three distinct error types exist because they travel on three distinct
//! channels: [`PipelineError`] is what a consumer observes from a `Pipeline`,
//! [`EmitError`] is what a producer observes from a pending `emit`, and
//! [`UsageError`] is returned synchronously by `complete`/`error` when the
//! source is already terminal.

use std::sync::Arc;

/// Error surfaced to a consumer driving a [`crate::Pipeline`].
#[derive(Debug, thiserror::Error)]
pub enum PipelineError<E> {
    /// The producer called `error(e)`; `e` is shared so repeated observation
    /// (e.g. a second `next()` on an already-errored source) re-raises the
    /// same value rather than requiring `E: Clone`.
    #[error("stream error")]
    Stream(Arc<E>),

    /// A `next_cancellable` call was cancelled while suspended. Local to the
    /// call: the channel is untouched and a later call may still succeed.
    #[error("operation was cancelled")]
    Cancelled,
}

impl<E> PipelineError<E> {
    /// Borrows the stream failure value, if this is a [`PipelineError::Stream`].
    pub fn as_stream_error(&self) -> Option<&E> {
        match self {
            PipelineError::Stream(e) => Some(e),
            PipelineError::Cancelled => None,
        }
    }
}

impl<E> Clone for PipelineError<E> {
    fn clone(&self) -> Self {
        match self {
            PipelineError::Stream(e) => PipelineError::Stream(e.clone()),
            PipelineError::Cancelled => PipelineError::Cancelled,
        }
    }
}

/// Error resolved by a pending [`crate::Subject::emit`] future.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum EmitError {
    /// The source was disposed before the value was accepted.
    #[error("emit target was disposed")]
    Disposed,

    /// `emit` was called after the source already terminated with an error.
    /// Distinct from the lenient no-op that follows a normal `complete()`.
    #[error("emit called after the source already errored")]
    AlreadyErrored,
}

/// Returned synchronously by `complete()`/`error()` on contract misuse.
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum UsageError {
    /// `complete()` or `error()` called on a source that is already terminal.
    #[error("complete()/error() called on an already-terminal source")]
    DoubleComplete,
}
