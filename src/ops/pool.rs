//! Shared worker-pool scheduling for the bounded-concurrency operators
//! (`concurrent`, `flat_map`). Both follow the exact dispatcher/worker shape
//! from SPEC_FULL.md §4.4: a dispatcher acquires a permit per upstream
//! value, hands it to an idle worker (spawning up to N, never more), and
//! each worker processes its job, rejoins the idle queue and releases its
//! permit (in that order), then — in ordered mode — waits its turn before
//! emitting results downstream.
//!
//! Workers are fed through their own private inbox: literally a
//! `Subject<Job<V>, E>` from this same crate, per SPEC_FULL.md's note that
//! this is internal plumbing built on the engine's own channel primitive
//! rather than a second, parallel mechanism.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Notify};
use tracing::trace;

use crate::error::PipelineError;
use crate::permit::{Permit, PermitSource};
use crate::pipeline::Pipeline;
use crate::subject::Subject;

/// What one job produced: the values to forward downstream, plus how the
/// pool as a whole should proceed afterward.
pub(crate) struct ProcessResult<R, E> {
    pub(crate) values: Vec<R>,
    pub(crate) outcome: Outcome<E>,
}

pub(crate) enum Outcome<E> {
    Continue,
    Error(Arc<E>),
    /// Ends the stream early without it being an error — `flat_map`'s `STOP`.
    Stop,
}

pub(crate) type BoxProcess<V, R, E> =
    Arc<dyn Fn(V, usize) -> Pin<Box<dyn Future<Output = ProcessResult<R, E>> + Send>> + Send + Sync>;

struct Job<V> {
    value: V,
    index: usize,
    permit: Permit,
    wait_for: Option<oneshot::Receiver<()>>,
    done: oneshot::Sender<()>,
}

/// Drives `upstream` through up to `permits.capacity()` concurrently active
/// invocations of `process`, forwarding every produced value to `downstream`
/// — in upstream order if `ordered`, in completion order otherwise.
pub(crate) fn spawn_pool<V, R, E>(
    mut upstream: Pipeline<V, E>,
    downstream: Subject<R, E>,
    permits: Arc<dyn PermitSource>,
    ordered: bool,
    process: BoxProcess<V, R, E>,
) where
    V: Send + 'static,
    R: Send + 'static,
    E: Send + Sync + 'static,
{
    let downstream = Arc::new(downstream);
    let capacity = permits.capacity();
    let stopped = Arc::new(AtomicBool::new(false));
    let stop_notify = Arc::new(Notify::new());
    let token = downstream.cancellation();

    tokio::spawn(async move {
        let (idle_tx, mut idle_rx) = mpsc::unbounded_channel::<usize>();
        let mut inboxes: Vec<Subject<Job<V>, E>> = Vec::with_capacity(capacity);
        let mut worker_handles = Vec::with_capacity(capacity);
        let mut prev_done: Option<oneshot::Receiver<()>> = None;
        let mut index = 0usize;

        'dispatch: loop {
            if stopped.load(Ordering::Acquire) || token.is_cancelled() {
                break;
            }

            let permit = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = stop_notify.notified() => break,
                permit = permits.acquire() => permit,
            };
            if stopped.load(Ordering::Acquire) || token.is_cancelled() {
                drop(permit);
                break;
            }

            let item = tokio::select! {
                biased;
                _ = token.cancelled() => { drop(permit); break; }
                _ = stop_notify.notified() => { drop(permit); break; }
                item = upstream.next() => item,
            };

            let value = match item {
                Some(Ok(v)) => v,
                Some(Err(PipelineError::Stream(e))) => {
                    drop(permit);
                    let _ = downstream.error_shared(e);
                    stopped.store(true, Ordering::Release);
                    break;
                }
                Some(Err(PipelineError::Cancelled)) => unreachable!("next() never cancels"),
                None => {
                    drop(permit);
                    break;
                }
            };

            let worker_idx = if let Ok(idx) = idle_rx.try_recv() {
                idx
            } else if inboxes.len() < capacity {
                let idx = inboxes.len();
                let (inbox, inbox_pipeline) = Subject::channel();
                inboxes.push(inbox);
                let handle = spawn_worker(
                    idx,
                    inbox_pipeline,
                    downstream.clone(),
                    process.clone(),
                    idle_tx.clone(),
                    stopped.clone(),
                    stop_notify.clone(),
                );
                worker_handles.push(handle);
                idx
            } else {
                match idle_rx.recv().await {
                    Some(idx) => idx,
                    None => break 'dispatch,
                }
            };

            let (done_tx, done_rx) = oneshot::channel();
            let job = Job {
                value,
                index,
                permit,
                wait_for: if ordered { prev_done.take() } else { None },
                done: done_tx,
            };
            index += 1;
            if ordered {
                prev_done = Some(done_rx);
            }
            if inboxes[worker_idx].emit(job).await.is_err() {
                break;
            }
        }

        upstream.dispose();
        for inbox in inboxes {
            let _ = inbox.complete();
        }
        for handle in worker_handles {
            let _ = handle.await;
        }

        if !stopped.load(Ordering::Acquire) {
            let _ = downstream.complete();
        }
    });
}

#[allow(clippy::too_many_arguments)]
fn spawn_worker<V, R, E>(
    idx: usize,
    mut inbox: Pipeline<Job<V>, E>,
    downstream: Arc<Subject<R, E>>,
    process: BoxProcess<V, R, E>,
    idle_tx: mpsc::UnboundedSender<usize>,
    stopped: Arc<AtomicBool>,
    stop_notify: Arc<Notify>,
) -> tokio::task::JoinHandle<()>
where
    V: Send + 'static,
    R: Send + 'static,
    E: Send + Sync + 'static,
{
    tokio::spawn(async move {
        trace!(worker = idx, "pool worker spawned");
        loop {
            let job = match inbox.next().await {
                Some(Ok(job)) => job,
                Some(Err(_)) => unreachable!("a pool inbox never errors"),
                None => break,
            };

            let result = process(job.value, job.index).await;

            // Rejoin the idle queue, *then* release the permit: this
            // ordering is what guarantees the dispatcher, once unblocked by
            // the permit, always finds this worker already idle.
            let _ = idle_tx.send(idx);
            drop(job.permit);

            if let Some(wait_for) = job.wait_for {
                let _ = wait_for.await;
            }

            match result.outcome {
                Outcome::Continue => {
                    for v in result.values {
                        if downstream.emit(v).await.is_err() {
                            let _ = job.done.send(());
                            return;
                        }
                    }
                    let _ = job.done.send(());
                }
                Outcome::Error(e) => {
                    for v in result.values {
                        let _ = downstream.emit(v).await;
                    }
                    let _ = downstream.error_shared(e);
                    stopped.store(true, Ordering::Release);
                    stop_notify.notify_waiters();
                    let _ = job.done.send(());
                    return;
                }
                Outcome::Stop => {
                    for v in result.values {
                        let _ = downstream.emit(v).await;
                    }
                    let _ = downstream.complete();
                    stopped.store(true, Ordering::Release);
                    stop_notify.notify_waiters();
                    let _ = job.done.send(());
                    return;
                }
            }
        }
    })
}
