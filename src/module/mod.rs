//! Collector capability
//!
//! A module wraps one data source. The job drives it through
//! `init → check → charts → collect…` and never lets a fault escape: every call goes
//! through [`isolate`], which turns panics into [`CollectorFault::Panic`].

pub mod example;
pub mod mock;
pub mod registry;
pub mod system;

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures::FutureExt;
use thiserror::Error;

use crate::Snapshot;
use crate::chart::Charts;

pub use registry::{Creator, ModuleRegistry};

/// A failed collector call
#[derive(Debug, Error)]
pub enum CollectorFault {
    /// The collector panicked; the payload message is kept for logging
    #[error("panic: {0}")]
    Panic(String),

    #[error("{0}")]
    Failed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CollectorFault {
    pub fn failed(msg: impl Into<String>) -> Self {
        CollectorFault::Failed(msg.into())
    }

    pub fn is_panic(&self) -> bool {
        matches!(self, CollectorFault::Panic(_))
    }
}

/// Interface every data source implements
///
/// The setters run before `init`; a module that wants to override the configured
/// `update_every` or its module name reports it through the getters, which the job reads
/// after a successful `check`.
#[async_trait]
pub trait Module: Send {
    fn set_update_every(&mut self, _update_every: u32) {}

    fn update_every(&self) -> Option<u32> {
        None
    }

    fn set_module_name(&mut self, _name: &str) {}

    fn module_name(&self) -> Option<&str> {
        None
    }

    /// Span of the owning job, for work the module runs outside its own calls
    fn set_logger(&mut self, _span: tracing::Span) {}

    async fn init(&mut self) -> Result<(), CollectorFault>;

    async fn check(&mut self) -> Result<(), CollectorFault>;

    /// Charts known up front; `None` or an empty set means the module cannot run
    fn charts(&mut self) -> Option<Charts>;

    /// Collect one snapshot
    ///
    /// `charts` is the job's live chart set; a module may add charts or dimensions for
    /// entities it discovers while collecting.
    async fn collect(&mut self, charts: &mut Charts) -> Result<Option<Snapshot>, CollectorFault>;

    fn cleanup(&mut self) {}
}

/// Run a collector call, converting a panic into [`CollectorFault::Panic`]
pub async fn isolate<T, F>(call: F) -> Result<T, CollectorFault>
where
    F: Future<Output = Result<T, CollectorFault>>,
{
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(CollectorFault::Panic(panic_message(payload.as_ref()))),
    }
}

/// Synchronous counterpart of [`isolate`]
pub fn isolate_sync<T>(call: impl FnOnce() -> T) -> Result<T, CollectorFault> {
    std::panic::catch_unwind(AssertUnwindSafe(call))
        .map_err(|payload| CollectorFault::Panic(panic_message(payload.as_ref())))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        String::from("unknown panic payload")
    }
}
