//! Host resources via `sysinfo`
//!
//! CPU, memory, swap and load charts are declared up front. Temperature sensors are
//! discovered while collecting and added to the chart set as they show up.

use async_trait::async_trait;
use sysinfo::{Components, System};
use tracing::{Span, debug};

use super::{CollectorFault, Module};
use crate::Snapshot;
use crate::chart::{Chart, ChartType, Charts, Dim};

const MIB: i64 = 1024 * 1024;
const TEMPERATURE_CHART: &str = "temperature";

pub struct SystemModule {
    sys: Option<System>,
    span: Span,
}

pub(crate) fn create(options: &serde_json::Value) -> Result<Box<dyn Module>, String> {
    if !options.is_null() && options.as_object().is_none_or(|o| !o.is_empty()) {
        return Err(String::from("the system module takes no options"));
    }

    Ok(Box::new(SystemModule::new()))
}

impl SystemModule {
    pub fn new() -> Self {
        Self { sys: None, span: Span::none() }
    }
}

impl Default for SystemModule {
    fn default() -> Self {
        Self::new()
    }
}

fn bytes(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Scale a float so it survives the integer protocol; the chart divides it back
fn scaled(value: f64, scale: i64) -> i64 {
    (value * scale as f64).round() as i64
}

fn sensor_id(label: &str) -> String {
    let id: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    format!("temp_{id}")
}

#[async_trait]
impl Module for SystemModule {
    fn set_logger(&mut self, span: Span) {
        self.span = span;
    }

    async fn init(&mut self) -> Result<(), CollectorFault> {
        let mut sys = System::new();
        sys.refresh_cpu_usage();
        sys.refresh_memory();
        self.sys = Some(sys);

        Ok(())
    }

    async fn check(&mut self) -> Result<(), CollectorFault> {
        let Some(sys) = &self.sys else {
            return Err(CollectorFault::failed("not initialized"));
        };

        if sys.total_memory() == 0 {
            return Err(CollectorFault::failed("unable to read memory information"));
        }

        Ok(())
    }

    fn charts(&mut self) -> Option<Charts> {
        Charts::from_charts([
            Chart::new("cpu")
                .title("Total CPU utilization")
                .units("percentage")
                .family("cpu")
                .context("system.cpu")
                .chart_type(ChartType::Area)
                .dim(Dim::new("cpu_usage").name("usage").divisor(1000)),
            Chart::new("ram")
                .title("System RAM")
                .units("MiB")
                .family("ram")
                .context("system.ram")
                .chart_type(ChartType::Stacked)
                .dim(Dim::new("mem_used").name("used").divisor(MIB))
                .dim(Dim::new("mem_free").name("free").divisor(MIB)),
            Chart::new("swap")
                .title("System Swap")
                .units("MiB")
                .family("swap")
                .context("system.swap")
                .chart_type(ChartType::Stacked)
                .dim(Dim::new("swap_used").name("used").divisor(MIB))
                .dim(Dim::new("swap_free").name("free").divisor(MIB)),
            Chart::new("load")
                .title("System Load Average")
                .units("load")
                .family("load")
                .context("system.load")
                .dim(Dim::new("load1").divisor(1000))
                .dim(Dim::new("load5").divisor(1000))
                .dim(Dim::new("load15").divisor(1000)),
        ])
        .ok()
    }

    async fn collect(&mut self, charts: &mut Charts) -> Result<Option<Snapshot>, CollectorFault> {
        let Some(sys) = self.sys.as_mut() else {
            return Err(CollectorFault::failed("not initialized"));
        };

        sys.refresh_cpu_usage();
        sys.refresh_memory();

        let mut snapshot = Snapshot::new();

        snapshot.insert("cpu_usage".into(), scaled(f64::from(sys.global_cpu_usage()), 1000));

        let (total, used) = (sys.total_memory(), sys.used_memory());
        snapshot.insert("mem_used".into(), bytes(used));
        snapshot.insert("mem_free".into(), bytes(total.saturating_sub(used)));

        let (total, used) = (sys.total_swap(), sys.used_swap());
        snapshot.insert("swap_used".into(), bytes(used));
        snapshot.insert("swap_free".into(), bytes(total.saturating_sub(used)));

        let load = System::load_average();
        snapshot.insert("load1".into(), scaled(load.one, 1000));
        snapshot.insert("load5".into(), scaled(load.five, 1000));
        snapshot.insert("load15".into(), scaled(load.fifteen, 1000));

        let components = Components::new_with_refreshed_list();
        for component in components.iter() {
            let Some(temperature) = component.temperature() else {
                continue;
            };

            let id = sensor_id(component.label());
            if !charts.contains(TEMPERATURE_CHART) {
                let chart = Chart::new(TEMPERATURE_CHART)
                    .title("Sensor Temperature")
                    .units("Celsius")
                    .family("sensors")
                    .context("system.temperature");
                charts.add(chart).map_err(|e| CollectorFault::failed(e.to_string()))?;
            }

            let known = charts
                .get(TEMPERATURE_CHART)
                .is_some_and(|chart| chart.dims().iter().any(|d| d.id == id));
            if !known {
                debug!(parent: &self.span, sensor = %component.label(), "discovered sensor");
                let dim = Dim::new(id.clone()).name(component.label()).divisor(100);
                charts.add_dim(TEMPERATURE_CHART, dim).map_err(|e| CollectorFault::failed(e.to_string()))?;
            }

            snapshot.insert(id, scaled(f64::from(temperature), 100));
        }

        Ok(Some(snapshot))
    }

    fn cleanup(&mut self) {
        self.sys = None;
    }
}
