//! Synthetic data source, useful to exercise the plugin end to end

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{Span, debug};

use super::{CollectorFault, Module};
use crate::Snapshot;
use crate::chart::{Chart, Charts, Dim};

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExampleOptions {
    /// Number of charts
    pub charts: usize,
    /// Dimensions per chart
    pub dims: usize,
}

impl Default for ExampleOptions {
    fn default() -> Self {
        Self { charts: 1, dims: 2 }
    }
}

#[derive(Debug)]
pub struct Example {
    options: ExampleOptions,
    collections: u64,
    span: Span,
}

pub(crate) fn create(options: &serde_json::Value) -> Result<Box<dyn Module>, String> {
    let options = if options.is_null() {
        ExampleOptions::default()
    } else {
        ExampleOptions::deserialize(options).map_err(|e| e.to_string())?
    };

    Ok(Box::new(Example::new(options)))
}

impl Example {
    pub fn new(options: ExampleOptions) -> Self {
        Self { options, collections: 0, span: Span::none() }
    }

    fn chart_id(chart: usize) -> String {
        format!("random_{chart}")
    }

    fn dim_id(chart: usize, dim: usize) -> String {
        format!("random_{chart}_{dim}")
    }
}

#[async_trait]
impl Module for Example {
    fn set_logger(&mut self, span: Span) {
        self.span = span;
    }

    async fn init(&mut self) -> Result<(), CollectorFault> {
        if self.options.charts == 0 || self.options.dims == 0 {
            return Err(CollectorFault::failed("'charts' and 'dims' must be at least 1"));
        }

        Ok(())
    }

    async fn check(&mut self) -> Result<(), CollectorFault> {
        Ok(())
    }

    fn charts(&mut self) -> Option<Charts> {
        let charts = (0..self.options.charts).map(|c| {
            (0..self.options.dims).fold(
                Chart::new(Self::chart_id(c))
                    .title(format!("A Random Number {c}"))
                    .units("random")
                    .family("random")
                    .context("example.random"),
                |chart, d| chart.dim(Dim::new(Self::dim_id(c, d))),
            )
        });

        Charts::from_charts(charts).ok()
    }

    async fn collect(&mut self, _charts: &mut Charts) -> Result<Option<Snapshot>, CollectorFault> {
        self.collections = self.collections.wrapping_add(1);

        let mut snapshot = Snapshot::new();
        for c in 0..self.options.charts {
            for d in 0..self.options.dims {
                let step = (c as u64 * 31 + d as u64 * 17 + 1).wrapping_mul(self.collections);
                let value = i64::try_from(step % 100).unwrap_or_default();
                snapshot.insert(Self::dim_id(c, d), value);
            }
        }

        debug!(parent: &self.span, collections = self.collections, "example collected");

        Ok(Some(snapshot))
    }
}
