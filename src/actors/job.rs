//! Job - drives one module through detection and collection
//!
//! ## Lifecycle
//!
//! ```text
//! Uninitialized → Initializing ─(fail, retry > 0)→ Failed ─(sleep)→ Initializing
//!                      │
//!                      └─(init + check ok)→ PostCheck → Ready → Running
//!                                                                 │
//!                         Shutdown / retries exhausted ──→ ShuttingDown | Panicked → Stopped
//! ```
//!
//! Every module call is isolated: a panic or error is logged and counted, never propagated.
//! Each collected snapshot is reconciled against the chart arena and the resulting protocol
//! text for the tick is written to the sink in one piece.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info, info_span, instrument, trace, warn};

use super::messages::{ExitReason, JobExit, JobPhase, TickDelivery};
use crate::Snapshot;
use crate::chart::{Chart, Charts, Step};
use crate::config::ResolvedJobConfig;
use crate::context::PluginContext;
use crate::module::{CollectorFault, Module, isolate, isolate_sync};
use crate::output::{
    ChartOwner, write_begin, write_chart, write_dimension, write_end, write_set, write_variable,
};

/// What a single tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The clock is not a multiple of `update_every`
    Skipped,
    Collected,
    /// Collection errored, panicked or returned nothing
    Failed,
    /// More consecutive failures than `retries` allows; the job must stop
    RetriesExhausted,
}

pub struct Job {
    config: ResolvedJobConfig,
    full_name: String,
    module: Box<dyn Module>,
    module_name: String,
    update_every: u32,
    /// `update_every` as seen by handles, updated by `PostCheck`
    published_update_every: Arc<AtomicU32>,
    charts: Charts,
    context: Arc<PluginContext>,

    initialized: bool,
    panicked: bool,
    retries: u32,
    /// Start of the last tick that updated at least one chart
    prev_run: Option<Instant>,

    span: Span,
    phase: watch::Sender<JobPhase>,
}

impl Job {
    pub fn new(
        config: ResolvedJobConfig,
        mut module: Box<dyn Module>,
        context: Arc<PluginContext>,
    ) -> Self {
        let full_name = config.full_name();
        let span = info_span!("job", job = %full_name);

        module.set_update_every(config.update_every);
        module.set_module_name(&config.module);
        module.set_logger(span.clone());

        let (phase, _) = watch::channel(JobPhase::Uninitialized);

        Self {
            module_name: config.module.clone(),
            update_every: config.update_every,
            published_update_every: Arc::new(AtomicU32::new(config.update_every)),
            full_name,
            config,
            module,
            charts: Charts::new(),
            context,
            initialized: false,
            panicked: false,
            retries: 0,
            prev_run: None,
            span,
            phase,
        }
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// Effective interval, possibly changed by the module during `PostCheck`
    pub fn update_every(&self) -> u32 {
        self.update_every
    }

    pub fn initialized(&self) -> bool {
        self.initialized
    }

    /// Whether the module ever panicked
    pub fn panicked(&self) -> bool {
        self.panicked
    }

    /// Consecutive failed collections
    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn charts(&self) -> &Charts {
        &self.charts
    }

    pub fn phase(&self) -> JobPhase {
        *self.phase.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<JobPhase> {
        self.phase.subscribe()
    }

    fn set_phase(&self, phase: JobPhase) {
        trace!(parent: &self.span, ?phase, "phase change");
        self.phase.send_replace(phase);
    }

    fn record_fault(&mut self, fault: &CollectorFault) {
        if fault.is_panic() {
            self.panicked = true;
        }
    }

    /// Run the module's `init`, once per job lifetime
    pub async fn init(&mut self) -> Result<(), CollectorFault> {
        if self.initialized {
            return Ok(());
        }

        match isolate(self.module.init()).await {
            Ok(()) => {
                self.initialized = true;
                Ok(())
            }
            Err(e) => {
                self.record_fault(&e);
                Err(e)
            }
        }
    }

    pub async fn check(&mut self) -> Result<(), CollectorFault> {
        isolate(self.module.check()).await.inspect_err(|e| self.record_fault(e))
    }

    /// Take over the module's final settings and its initial chart set
    pub fn post_check(&mut self) -> Result<(), ExitReason> {
        if let Some(update_every) = self.module.update_every().filter(|&n| n >= 1) {
            if update_every != self.update_every {
                debug!(parent: &self.span, update_every, "module changed update_every");
            }
            self.update_every = update_every;
            self.published_update_every.store(update_every, Ordering::Release);
        }
        if let Some(name) = self.module.module_name() {
            self.module_name = name.to_string();
        }

        let module = &mut self.module;
        match isolate_sync(|| module.charts()) {
            Ok(Some(charts)) if !charts.is_empty() => {
                self.charts = charts;
                Ok(())
            }
            Ok(_) => {
                error!(parent: &self.span, "module declared no charts");
                Err(ExitReason::NoCharts)
            }
            Err(e) => {
                self.record_fault(&e);
                error!(parent: &self.span, "failed to get charts: {e}");
                Err(ExitReason::NoCharts)
            }
        }
    }

    async fn auto_detection(&mut self) -> Result<(), CollectorFault> {
        self.init().await?;
        self.check().await
    }

    /// Init + Check, retried every `autodetection_retry` seconds until they pass or the job
    /// is cancelled, then PostCheck
    pub async fn detect(&mut self, cancel: &CancellationToken) -> Result<(), ExitReason> {
        loop {
            self.set_phase(JobPhase::Initializing);

            let Err(e) = self.auto_detection().await else {
                break;
            };

            self.set_phase(JobPhase::Failed);

            let retry = self.config.autodetection_retry;
            if retry == 0 {
                error!(parent: &self.span, "auto-detection failed: {e}");
                return Err(ExitReason::DetectionFailed);
            }

            warn!(parent: &self.span, "auto-detection failed, retrying in {retry}s: {e}");
            tokio::select! {
                _ = cancel.cancelled() => return Err(ExitReason::Shutdown),
                _ = tokio::time::sleep(Duration::from_secs(retry.into())) => {}
            }
        }

        self.post_check()?;
        self.set_phase(JobPhase::Ready);

        Ok(())
    }

    /// Handle one scheduler tick
    #[instrument(level = "trace", skip(self))]
    pub async fn process_tick(&mut self, clock: u64) -> TickOutcome {
        if clock % u64::from(self.update_every) != 0 {
            return TickOutcome::Skipped;
        }

        let started = Instant::now();
        let since_last_us = self.prev_run.map_or(0, |prev| {
            u64::try_from(started.duration_since(prev).as_micros()).unwrap_or(u64::MAX)
        });

        let outcome = match isolate(self.module.collect(&mut self.charts)).await {
            Err(e) => {
                self.record_fault(&e);
                self.retries += 1;
                error!(retries = self.retries, "collection failed: {e}");
                TickOutcome::Failed
            }
            Ok(snapshot) => {
                let snapshot = snapshot.unwrap_or_default();
                if snapshot.is_empty() {
                    self.retries += 1;
                    debug!(retries = self.retries, "module returned no data");
                } else {
                    self.retries = 0;
                }

                let before: Vec<_> = self.charts.iter().map(Chart::progress).collect();
                let mut buf = String::new();
                let updated = self.reconcile(&snapshot, since_last_us, &mut buf);

                match self.write(&buf) {
                    Ok(()) if updated => self.prev_run = Some(started),
                    Ok(()) => {}
                    Err(e) => {
                        // Nothing of this tick reached the sink; replay its transitions next time.
                        error!("failed to write output: {e}");
                        for (chart, progress) in self.charts.iter_mut().zip(before) {
                            chart.rewind(progress);
                        }
                    }
                }

                if snapshot.is_empty() { TickOutcome::Failed } else { TickOutcome::Collected }
            }
        };

        if self.retries > self.config.retries {
            TickOutcome::RetriesExhausted
        } else {
            outcome
        }
    }

    fn write(&self, buf: &str) -> std::io::Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        self.context.output.write_chunk(buf)
    }

    /// Advance every chart one step and render what the step calls for
    ///
    /// Returns whether any chart received a value.
    fn reconcile(&mut self, snapshot: &Snapshot, since_last_us: u64, buf: &mut String) -> bool {
        let owner = ChartOwner {
            type_id: &self.full_name,
            update_every: self.update_every,
            plugin: &self.context.plugin_name,
            module: &self.module_name,
        };
        let cleanup_after = self.config.chart_cleanup;
        let mut any_updated = false;

        for chart in self.charts.iter_mut() {
            let step = chart.advance(snapshot, &self.context.priorities);
            let priority = chart.priority().unwrap_or_default();

            match step {
                Step::Skip => continue,
                Step::Obsolete => {
                    debug!(chart = %chart.id, "chart is obsolete");
                    write_chart(buf, &owner, chart, priority, true);
                    continue;
                }
                Step::Announce => {
                    write_chart(buf, &owner, chart, priority, false);
                    for dim in chart.dims() {
                        write_dimension(buf, dim);
                    }
                }
                Step::Update => {}
            }

            let updated = chart.has_data(snapshot);

            write_begin(buf, owner.type_id, &chart.id, since_last_us);
            for dim in chart.dims() {
                if let Some(&value) = snapshot.get(&dim.id) {
                    write_set(buf, &dim.id, value);
                }
            }
            for var in chart.vars() {
                if let Some(&value) = snapshot.get(&var.id) {
                    write_variable(buf, &var.id, value);
                }
            }
            write_end(buf);

            chart.record_update(updated, cleanup_after);
            any_updated |= updated;
        }

        any_updated
    }

    /// Detect, then process ticks until cancelled or out of retries
    pub async fn run(
        mut self,
        mut tick_rx: mpsc::Receiver<u64>,
        busy: Arc<AtomicBool>,
        cancel: CancellationToken,
    ) -> ExitReason {
        debug!("starting job");

        let reason = match self.detect(&cancel).await {
            Ok(()) => {
                info!(
                    update_every = self.update_every,
                    charts = self.charts.len(),
                    "auto-detection succeeded"
                );
                self.set_phase(JobPhase::Running);
                self.run_loop(&mut tick_rx, &busy, &cancel).await
            }
            Err(reason) => reason,
        };

        self.stop(reason);
        reason
    }

    async fn run_loop(
        &mut self,
        tick_rx: &mut mpsc::Receiver<u64>,
        busy: &AtomicBool,
        cancel: &CancellationToken,
    ) -> ExitReason {
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("received shutdown");
                    self.set_phase(JobPhase::ShuttingDown);
                    return ExitReason::Shutdown;
                }

                tick = tick_rx.recv() => {
                    let Some(clock) = tick else {
                        warn!("tick channel closed, shutting down");
                        self.set_phase(JobPhase::ShuttingDown);
                        return ExitReason::Shutdown;
                    };

                    let outcome = self.process_tick(clock).await;
                    busy.store(false, Ordering::Release);

                    if outcome == TickOutcome::RetriesExhausted {
                        error!(retries = self.retries, "too many failed collections, stopping job");
                        self.set_phase(JobPhase::Panicked);
                        return ExitReason::RetriesExhausted;
                    }
                }
            }
        }
    }

    fn stop(&mut self, reason: ExitReason) {
        let module = &mut self.module;
        if let Err(e) = isolate_sync(|| module.cleanup()) {
            self.record_fault(&e);
            error!("module cleanup failed: {e}");
        }

        self.set_phase(JobPhase::Stopped);
        info!(%reason, "job stopped");
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("full_name", &self.full_name)
            .field("update_every", &self.update_every)
            .field("phase", &self.phase())
            .field("retries", &self.retries)
            .finish_non_exhaustive()
    }
}

/// Handle for a running Job
///
/// Cloneable; the job keeps running when every handle is gone until its token is cancelled.
#[derive(Clone)]
pub struct JobHandle {
    name: String,
    module: String,
    update_every: Arc<AtomicU32>,
    tick_tx: mpsc::Sender<u64>,
    /// Set from delivery until the job finished processing the tick
    busy: Arc<AtomicBool>,
    phase: watch::Receiver<JobPhase>,
    cancel: CancellationToken,
}

impl JobHandle {
    /// Spawn the job's task; its exit is reported on `exit_tx`
    pub fn spawn(job: Job, cancel: CancellationToken, exit_tx: mpsc::Sender<JobExit>) -> Self {
        let (tick_tx, tick_rx) = mpsc::channel(1);
        let busy = Arc::new(AtomicBool::new(false));

        let handle = Self {
            name: job.full_name.clone(),
            module: job.config.module.clone(),
            update_every: job.published_update_every.clone(),
            tick_tx,
            busy: busy.clone(),
            phase: job.subscribe(),
            cancel: cancel.clone(),
        };

        let name = handle.name.clone();
        let span = job.span.clone();
        tokio::spawn(
            async move {
                let reason = job.run(tick_rx, busy, cancel).await;
                let exit = JobExit { name, reason, stopped_at: Utc::now() };
                if exit_tx.send(exit).await.is_err() {
                    trace!("exit not reported, scheduler is gone");
                }
            }
            .instrument(span),
        );

        handle
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    /// Effective interval; the module may have changed it during detection
    pub fn update_every(&self) -> u32 {
        self.update_every.load(Ordering::Acquire)
    }

    pub fn phase(&self) -> JobPhase {
        *self.phase.borrow()
    }

    /// Hand a tick to the job without waiting
    ///
    /// A job still busy with its previous tick does not get this one.
    pub fn tick(&self, clock: u64) -> TickDelivery {
        if self.phase() != JobPhase::Running {
            return TickDelivery::Inactive;
        }

        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return TickDelivery::Dropped;
        }

        match self.tick_tx.try_send(clock) {
            Ok(()) => TickDelivery::Sent,
            Err(TrySendError::Full(_)) => TickDelivery::Dropped,
            Err(TrySendError::Closed(_)) => {
                self.busy.store(false, Ordering::Release);
                TickDelivery::Inactive
            }
        }
    }

    /// Ask the job to stop; it finishes an in-flight collection first
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Wait until the job reached `Running`; false if it stopped instead
    pub async fn running(&self) -> bool {
        let mut phase = self.phase.clone();
        match phase.wait_for(|p| matches!(p, JobPhase::Running | JobPhase::Stopped)).await {
            Ok(p) => *p == JobPhase::Running,
            Err(_) => false,
        }
    }

    /// Wait until the job's task is done
    pub async fn stopped(&self) {
        let mut phase = self.phase.clone();
        let _ = phase.wait_for(JobPhase::is_terminal).await;
    }
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("name", &self.name)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}
