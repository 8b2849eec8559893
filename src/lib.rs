//! Job scheduling and chart lifecycle engine for pluggable metric collectors
//!
//! A [`module::Module`] wraps one data source. Each configured job drives one module
//! through detection and periodic collection, reconciles the collected values against its
//! [`chart::Charts`] and writes the result to an [`output::Output`] in the external plugin
//! line protocol. The [`actors::scheduler::Scheduler`] ticks every job on a shared clock.

pub mod actors;
pub mod chart;
pub mod config;
pub mod context;
pub mod error;
pub mod module;
pub mod output;

/// Values collected for one tick, keyed by dimension or variable id
pub type Snapshot = std::collections::HashMap<String, i64>;
