//! The backpressured hand-off buffer shared by exactly one [`crate::Subject`]
//! and one [`crate::Pipeline`].
//!
//! This is the engine's equivalent of the teacher crate's lock-free SPSC
//! `Channel`: a single shared struct split between a producer half and a
//! consumer half. Unlike the teacher, capacity is a runtime `usize` (not a
//! const generic power of two) and synchronization is a single
//! [`std::sync::Mutex`] rather than per-field atomics with acquire/release
//! pairing, because the contract this channel must uphold — suspension,
//! disposal, cancellation, re-raised errors — has much more state than a
//! ring of slots, and getting *that* right matters more here than shaving
//! cache misses off a hot loop.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{EmitError, PipelineError, UsageError};
use crate::id::SourceId;

/// Channel capacity and other per-source tuning knobs.
///
/// Mirrors the builder-style config structs used throughout this corpus
/// (e.g. `ChannelPipeline::with_channel_size` in `hua0512/pipeline-common`).
#[derive(Debug, Clone, Copy)]
pub struct ChannelConfig {
    /// Number of accepted-but-not-yet-taken values `buffer` may hold before
    /// further emits must wait. `0` (the default) means every emit either
    /// hands its value directly to a parked consumer or waits.
    pub buffer: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self { buffer: 0 }
    }
}

pub(crate) struct EmitSource<V, E> {
    id: SourceId,
    state: Mutex<State<V, E>>,
    disposal_token: CancellationToken,
}

struct State<V, E> {
    buffer: VecDeque<V>,
    bound: usize,
    waiting_emits: VecDeque<WaitingEmit<V>>,
    consumer_waker: Option<Waker>,
    terminal: Option<Terminal<E>>,
}

enum Terminal<E> {
    Completed,
    Errored(Arc<E>),
    Disposed,
}

struct WaitingEmit<V> {
    value: V,
    slot: Arc<EmitSlot>,
}

struct EmitSlot {
    inner: Mutex<EmitSlotInner>,
}

struct EmitSlotInner {
    result: Option<Result<(), EmitError>>,
    waker: Option<Waker>,
}

impl EmitSlot {
    fn new() -> Self {
        Self {
            inner: Mutex::new(EmitSlotInner {
                result: None,
                waker: None,
            }),
        }
    }

    fn resolve(&self, result: Result<(), EmitError>) {
        let mut inner = self.inner.lock().unwrap();
        if inner.result.is_none() {
            inner.result = Some(result);
            if let Some(waker) = inner.waker.take() {
                waker.wake();
            }
        }
    }
}

enum AcceptOutcome<V> {
    Accepted,
    /// Source already completed normally; the emit is a harmless no-op.
    NoOp,
    Rejected(EmitError),
    Wait(V),
}

impl<V, E> EmitSource<V, E> {
    pub(crate) fn new(config: ChannelConfig) -> Arc<Self> {
        let id = SourceId::next();
        trace!(%id, bound = config.buffer, "emit source created");
        Arc::new(Self {
            id,
            state: Mutex::new(State {
                buffer: VecDeque::new(),
                bound: config.buffer,
                waiting_emits: VecDeque::new(),
                consumer_waker: None,
                terminal: None,
            }),
            disposal_token: CancellationToken::new(),
        })
    }

    pub(crate) fn id(&self) -> SourceId {
        self.id
    }

    pub(crate) fn cancellation(&self) -> CancellationToken {
        self.disposal_token.clone()
    }

    pub(crate) fn is_disposed(&self) -> bool {
        matches!(
            self.state.lock().unwrap().terminal,
            Some(Terminal::Disposed)
        )
    }

    pub(crate) fn is_complete(&self) -> bool {
        matches!(
            self.state.lock().unwrap().terminal,
            Some(Terminal::Completed)
        )
    }

    pub(crate) fn is_errored(&self) -> bool {
        matches!(self.state.lock().unwrap().terminal, Some(Terminal::Errored(_)))
    }

    pub(crate) fn is_terminal(&self) -> bool {
        self.state.lock().unwrap().terminal.is_some()
    }

    // --- producer side -----------------------------------------------

    fn try_accept(state: &mut State<V, E>, value: V) -> AcceptOutcome<V> {
        match &state.terminal {
            Some(Terminal::Disposed) => return AcceptOutcome::Rejected(EmitError::Disposed),
            Some(Terminal::Completed) => return AcceptOutcome::NoOp,
            Some(Terminal::Errored(_)) => return AcceptOutcome::Rejected(EmitError::AlreadyErrored),
            None => {}
        }

        if let Some(waker) = state.consumer_waker.take() {
            state.buffer.push_back(value);
            waker.wake();
            return AcceptOutcome::Accepted;
        }

        if state.buffer.len() < state.bound {
            state.buffer.push_back(value);
            return AcceptOutcome::Accepted;
        }

        AcceptOutcome::Wait(value)
    }

    pub(crate) fn emit(self: &Arc<Self>, value: V) -> EmitFuture<V, E> {
        EmitFuture {
            source: self.clone(),
            value: Some(value),
            waiting: None,
        }
    }

    pub(crate) fn complete(&self) -> Result<(), UsageError> {
        let mut state = self.state.lock().unwrap();
        if state.terminal.is_some() {
            return Err(UsageError::DoubleComplete);
        }
        state.terminal = Some(Terminal::Completed);
        if let Some(waker) = state.consumer_waker.take() {
            waker.wake();
        }
        debug!(id = %self.id, "source completed");
        Ok(())
    }

    pub(crate) fn error(&self, e: E) -> Result<(), UsageError> {
        self.error_shared(Arc::new(e))
    }

    /// Same as [`EmitSource::error`], but takes an already-shared failure
    /// value. Used by operator tasks forwarding an upstream
    /// `PipelineError::Stream(Arc<E>)` downstream without requiring `E:
    /// Clone` to unwrap it first.
    pub(crate) fn error_shared(&self, e: Arc<E>) -> Result<(), UsageError> {
        let mut state = self.state.lock().unwrap();
        if state.terminal.is_some() {
            return Err(UsageError::DoubleComplete);
        }
        state.terminal = Some(Terminal::Errored(e));
        if let Some(waker) = state.consumer_waker.take() {
            waker.wake();
        }
        for waiting in state.waiting_emits.drain(..) {
            waiting.slot.resolve(Err(EmitError::AlreadyErrored));
        }
        debug!(id = %self.id, "source errored");
        Ok(())
    }

    /// Releases the producer side without a definitive terminal state; if
    /// the source isn't already terminal this is the producer-side
    /// auto-dispose contract (dropping a `Subject` mid-stream).
    pub(crate) fn disposed_by_producer(&self) {
        self.dispose_inner();
    }

    // --- consumer side -------------------------------------------------

    pub(crate) fn dispose(&self) {
        self.dispose_inner();
    }

    fn dispose_inner(&self) {
        let mut state = self.state.lock().unwrap();
        if state.terminal.is_some() {
            return;
        }
        state.terminal = Some(Terminal::Disposed);
        if let Some(waker) = state.consumer_waker.take() {
            waker.wake();
        }
        for waiting in state.waiting_emits.drain(..) {
            waiting.slot.resolve(Err(EmitError::Disposed));
        }
        self.disposal_token.cancel();
        debug!(id = %self.id, "source disposed");
    }

    /// Promotes one waiting emit into `buffer`, maintaining the invariant
    /// that `waiting_emits` is only non-empty while `buffer` is at capacity.
    fn promote_waiting_emit(state: &mut State<V, E>) {
        if state.buffer.len() < state.bound {
            if let Some(waiting) = state.waiting_emits.pop_front() {
                state.buffer.push_back(waiting.value);
                waiting.slot.resolve(Ok(()));
            }
        }
    }

    fn poll_next(&self, cx: &mut Context<'_>) -> Poll<Option<Result<V, PipelineError<E>>>> {
        let mut state = self.state.lock().unwrap();

        // Errored/disposed are immediate aborts: buffered values that were
        // never taken before the abort are simply not delivered. See
        // SPEC_FULL.md's resolution of the "1 may or may not have been
        // consumed" scenario.
        match &state.terminal {
            Some(Terminal::Errored(e)) => return Poll::Ready(Some(Err(PipelineError::Stream(e.clone())))),
            Some(Terminal::Disposed) => return Poll::Ready(None),
            Some(Terminal::Completed) | None => {}
        }

        if let Some(value) = state.buffer.pop_front() {
            Self::promote_waiting_emit(&mut state);
            return Poll::Ready(Some(Ok(value)));
        }

        if let Some(waiting) = state.waiting_emits.pop_front() {
            waiting.slot.resolve(Ok(()));
            return Poll::Ready(Some(Ok(waiting.value)));
        }

        if state.terminal.is_some() {
            // Completed, and now fully drained.
            return Poll::Ready(None);
        }

        state.consumer_waker = Some(cx.waker().clone());
        Poll::Pending
    }

    pub(crate) fn next(self: &Arc<Self>) -> NextFuture<V, E> {
        NextFuture {
            source: self.clone(),
        }
    }
}

/// Future returned by [`crate::Subject::emit`].
#[must_use = "futures do nothing unless polled"]
pub struct EmitFuture<V, E> {
    source: Arc<EmitSource<V, E>>,
    value: Option<V>,
    waiting: Option<Arc<EmitSlot>>,
}

impl<V, E> Unpin for EmitFuture<V, E> {}

impl<V, E> Future for EmitFuture<V, E> {
    type Output = Result<(), EmitError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(slot) = self.waiting.clone() {
            let mut inner = slot.inner.lock().unwrap();
            if let Some(result) = inner.result {
                return Poll::Ready(result);
            }
            inner.waker = Some(cx.waker().clone());
            return Poll::Pending;
        }

        let value = self.value.take().expect("EmitFuture polled after completion");
        let mut state = self.source.state.lock().unwrap();
        match EmitSource::try_accept(&mut state, value) {
            AcceptOutcome::Accepted | AcceptOutcome::NoOp => Poll::Ready(Ok(())),
            AcceptOutcome::Rejected(e) => Poll::Ready(Err(e)),
            AcceptOutcome::Wait(value) => {
                let slot = Arc::new(EmitSlot::new());
                slot.inner.lock().unwrap().waker = Some(cx.waker().clone());
                state.waiting_emits.push_back(WaitingEmit {
                    value,
                    slot: slot.clone(),
                });
                drop(state);
                self.waiting = Some(slot);
                Poll::Pending
            }
        }
    }
}

/// Future returned by [`crate::Pipeline::next`].
#[must_use = "futures do nothing unless polled"]
pub(crate) struct NextFuture<V, E> {
    source: Arc<EmitSource<V, E>>,
}

impl<V, E> Unpin for NextFuture<V, E> {}

impl<V, E> Future for NextFuture<V, E> {
    type Output = Option<Result<V, PipelineError<E>>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.source.poll_next(cx)
    }
}
