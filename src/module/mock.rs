//! Closure-driven module for tests and embedding

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use super::{CollectorFault, Module};
use crate::Snapshot;
use crate::chart::Charts;

type InitFn = Box<dyn FnMut() -> Result<(), CollectorFault> + Send>;
type ChartsFn = Box<dyn FnMut() -> Option<Charts> + Send>;
type CollectFn = Box<dyn FnMut(&mut Charts) -> Result<Option<Snapshot>, CollectorFault> + Send>;

/// Module whose behaviour is supplied as closures
///
/// Unset `init`/`check` succeed, unset `charts`/`collect` return `None`.
#[derive(Default)]
pub struct MockModule {
    init: Option<InitFn>,
    check: Option<InitFn>,
    charts: Option<ChartsFn>,
    collect: Option<CollectFn>,
    update_every: Option<u32>,
    cleanup_done: Arc<AtomicBool>,
}

impl MockModule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_init(
        mut self,
        f: impl FnMut() -> Result<(), CollectorFault> + Send + 'static,
    ) -> Self {
        self.init = Some(Box::new(f));
        self
    }

    pub fn with_check(
        mut self,
        f: impl FnMut() -> Result<(), CollectorFault> + Send + 'static,
    ) -> Self {
        self.check = Some(Box::new(f));
        self
    }

    pub fn with_charts(mut self, f: impl FnMut() -> Option<Charts> + Send + 'static) -> Self {
        self.charts = Some(Box::new(f));
        self
    }

    pub fn with_collect(
        mut self,
        f: impl FnMut(&mut Charts) -> Result<Option<Snapshot>, CollectorFault> + Send + 'static,
    ) -> Self {
        self.collect = Some(Box::new(f));
        self
    }

    /// Report this interval back to the job after `check`
    pub fn with_update_every(mut self, update_every: u32) -> Self {
        self.update_every = Some(update_every);
        self
    }

    /// Flag flipped by `cleanup`, observable after the module moved into a job
    pub fn cleanup_flag(&self) -> Arc<AtomicBool> {
        self.cleanup_done.clone()
    }
}

#[async_trait]
impl Module for MockModule {
    fn update_every(&self) -> Option<u32> {
        self.update_every
    }

    async fn init(&mut self) -> Result<(), CollectorFault> {
        self.init.as_mut().map_or(Ok(()), |f| f())
    }

    async fn check(&mut self) -> Result<(), CollectorFault> {
        self.check.as_mut().map_or(Ok(()), |f| f())
    }

    fn charts(&mut self) -> Option<Charts> {
        self.charts.as_mut().and_then(|f| f())
    }

    async fn collect(&mut self, charts: &mut Charts) -> Result<Option<Snapshot>, CollectorFault> {
        self.collect.as_mut().map_or(Ok(None), |f| f(charts))
    }

    fn cleanup(&mut self) {
        self.cleanup_done.store(true, Ordering::SeqCst);
    }
}
