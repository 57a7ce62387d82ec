use std::sync::atomic::{AtomicU64, Ordering};

static SOURCE_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for an [`crate::source::EmitSource`], used only for
/// log correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(u64);

impl SourceId {
    pub(crate) fn next() -> Self {
        Self(SOURCE_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "src#{}", self.0)
    }
}
