//! The semaphore collaborator `concurrent`/`flat_map` bound their in-flight
//! work against. Injected as a trait so callers may supply a distributed or
//! otherwise non-`tokio` implementation; [`TokioPermitSource`] wraps
//! `tokio::sync::Semaphore` as the default.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// A permit granted by a [`PermitSource`]. Concurrency is capped only for
/// as long as this value lives: dropping it — on any exit path, including
/// an error or a cancellation — releases the slot. Held inside a `Job`
/// struct so the compiler, not cleanup code, guarantees release.
pub struct Permit(#[allow(dead_code)] Box<dyn Send + Sync>);

impl Permit {
    fn new<T: Send + Sync + 'static>(inner: T) -> Self {
        Self(Box::new(inner))
    }
}

/// Object-safe semaphore interface. The engine assumes only: acquisition
/// yields a permit that can be held and dropped, permits are granted FIFO,
/// and dropping a permit never fails.
#[async_trait]
pub trait PermitSource: Send + Sync {
    /// Total concurrency this source allows.
    fn capacity(&self) -> usize;

    /// Suspends until a permit is available.
    async fn acquire(&self) -> Permit;
}

/// The default [`PermitSource`], backed by `tokio::sync::Semaphore`.
pub struct TokioPermitSource {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl TokioPermitSource {
    pub fn new(capacity: usize) -> Arc<Self> {
        assert!(capacity > 0, "concurrency must be at least 1");
        Arc::new(Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        })
    }
}

#[async_trait]
impl PermitSource for TokioPermitSource {
    fn capacity(&self) -> usize {
        self.capacity
    }

    async fn acquire(&self) -> Permit {
        let owned: OwnedSemaphorePermit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore is never closed while its TokioPermitSource is alive");
        Permit::new(owned)
    }
}
