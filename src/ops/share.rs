//! `share`: one producer, many consumers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use tokio::sync::Notify;
use tracing::trace;

use crate::error::PipelineError;
use crate::pipeline::Pipeline;
use crate::subject::Subject;

/// A multicast source built from a single upstream `Pipeline`. Every value
/// the upstream produces is forwarded to every currently-live downstream
/// (minted by [`SharedSource::as_pipeline`]); the upstream only advances once
/// every live downstream has accepted the value, so the slowest consumer
/// gates the rest. The upstream is disposed once the last downstream has
/// disposed or completed, provided at least one downstream ever existed —
/// promptly, not merely the next time the upstream happens to produce a
/// value: every downstream's disposal is raced against the upstream read via
/// a shared [`Notify`], one per-downstream watcher task firing it.
pub struct SharedSource<V, E> {
    downstreams: Arc<Mutex<Vec<Subject<V, E>>>>,
    ever_subscribed: Arc<AtomicBool>,
    terminal_notify: Arc<Notify>,
}

/// Wraps `pipeline` as a multicast [`SharedSource`]. Spawns the driver task
/// immediately; downstreams may be minted (via `as_pipeline`) at any point
/// afterward, but only see values emitted after they subscribe.
pub fn share<V, E>(upstream: Pipeline<V, E>) -> SharedSource<V, E>
where
    V: Send + Clone + 'static,
    E: Send + Sync + 'static,
{
    SharedSource::new(upstream)
}

/// Drops terminal downstreams from `guard`; returns whether the driver
/// should now dispose the upstream (at least one downstream ever subscribed,
/// and none remain live).
fn prune_and_should_exit<V, E>(guard: &mut Vec<Subject<V, E>>, ever_subscribed: &AtomicBool) -> bool {
    guard.retain(|s| !s.is_terminal());
    ever_subscribed.load(Ordering::Acquire) && guard.is_empty()
}

impl<V, E> SharedSource<V, E>
where
    V: Send + Clone + 'static,
    E: Send + Sync + 'static,
{
    fn new(mut upstream: Pipeline<V, E>) -> Self {
        let downstreams: Arc<Mutex<Vec<Subject<V, E>>>> = Arc::new(Mutex::new(Vec::new()));
        let ever_subscribed = Arc::new(AtomicBool::new(false));
        let terminal_notify = Arc::new(Notify::new());

        let downstreams_task = downstreams.clone();
        let ever_subscribed_task = ever_subscribed.clone();
        let terminal_notify_task = terminal_notify.clone();
        trace!("share driver spawned");
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    // A downstream disposed (or otherwise went terminal) while
                    // we were blocked on the upstream read; check promptly
                    // rather than waiting for the next upstream value.
                    _ = terminal_notify_task.notified() => {
                        let mut guard = downstreams_task.lock().unwrap();
                        let done = prune_and_should_exit(&mut guard, &ever_subscribed_task);
                        drop(guard);
                        if done {
                            upstream.dispose();
                            return;
                        }
                    }
                    item = upstream.next() => match item {
                        Some(Ok(v)) => {
                            let live = downstreams_task.lock().unwrap().len();
                            if live == 0 {
                                continue;
                            }
                            let futures: Vec<_> = {
                                let guard = downstreams_task.lock().unwrap();
                                guard.iter().map(|s| s.emit(v.clone())).collect()
                            };
                            join_all(futures).await;

                            let mut guard = downstreams_task.lock().unwrap();
                            let done = prune_and_should_exit(&mut guard, &ever_subscribed_task);
                            drop(guard);
                            if done {
                                upstream.dispose();
                                return;
                            }
                        }
                        Some(Err(PipelineError::Stream(e))) => {
                            let guard = downstreams_task.lock().unwrap();
                            for s in guard.iter() {
                                let _ = s.error_shared(e.clone());
                            }
                            return;
                        }
                        Some(Err(PipelineError::Cancelled)) => unreachable!("next() never cancels"),
                        None => {
                            let guard = downstreams_task.lock().unwrap();
                            for s in guard.iter() {
                                let _ = s.complete();
                            }
                            return;
                        }
                    },
                }
            }
        });

        Self {
            downstreams,
            ever_subscribed,
            terminal_notify,
        }
    }

    /// Mints a new downstream `Pipeline`. Only sees values emitted by the
    /// upstream after this call returns. Also spawns a small watcher task
    /// that notifies the driver the instant this downstream is disposed, so
    /// a disposal that happens while the driver is blocked on the upstream
    /// read is observed within a bounded number of cooperative steps rather
    /// than only after the next upstream value arrives.
    pub fn as_pipeline(&self) -> Pipeline<V, E> {
        let (subject, pipeline) = Subject::channel();
        let token = subject.cancellation();
        let notify = self.terminal_notify.clone();
        tokio::spawn(async move {
            token.cancelled().await;
            notify.notify_one();
        });
        self.downstreams.lock().unwrap().push(subject);
        self.ever_subscribed.store(true, Ordering::Release);
        pipeline
    }

    /// Number of downstreams that have not yet reached a terminal state.
    pub fn live_downstreams(&self) -> usize {
        self.downstreams.lock().unwrap().iter().filter(|s| !s.is_terminal()).count()
    }
}
