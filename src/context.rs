//! Process-wide state shared by every job
//!
//! The chart priority counter is the only mutable state jobs share. It lives here
//! instead of in a global so the scheduler owns it and hands it to jobs explicitly.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::output::Output;

/// First priority handed out to a chart
pub const DEFAULT_FIRST_PRIORITY: u64 = 70_000;

/// Monotonic chart priority source
#[derive(Debug)]
pub struct PriorityRegistry {
    next: AtomicU64,
}

impl PriorityRegistry {
    pub fn new(first: u64) -> Self {
        Self { next: AtomicU64::new(first) }
    }

    /// Hand out the next priority; never returns the same value twice
    pub fn next_priority(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Peek at the value the next call to [`next_priority`](Self::next_priority) returns
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for PriorityRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_FIRST_PRIORITY)
    }
}

/// Everything a job borrows from the process
pub struct PluginContext {
    pub plugin_name: String,
    pub priorities: PriorityRegistry,
    pub output: Arc<dyn Output>,
}

impl PluginContext {
    pub fn new(plugin_name: impl Into<String>, output: Arc<dyn Output>) -> Arc<Self> {
        Arc::new(Self {
            plugin_name: plugin_name.into(),
            priorities: PriorityRegistry::default(),
            output,
        })
    }
}

impl std::fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContext")
            .field("plugin_name", &self.plugin_name)
            .field("next_priority", &self.priorities.peek())
            .finish_non_exhaustive()
    }
}
