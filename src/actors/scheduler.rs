//! Scheduler - owns the clock and every job
//!
//! ## Message Flow
//!
//! ```text
//! Interval tick / TickNow → clock += 1 → JobHandle::tick (non-blocking) → [Job-1, Job-N, ...]
//!                                                                           │
//!                          remove job ← JobExit ←──────────────────────────┘
//! ```
//!
//! The scheduler stops when the last job has exited or on `Shutdown`, after cancelling every
//! job and waiting for them to finish their in-flight tick.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Interval, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::job::{Job, JobHandle};
use super::messages::{JobExit, JobSummary, SchedulerCommand, TickDelivery};
use crate::config::PluginConfig;
use crate::context::PluginContext;
use crate::module::ModuleRegistry;
use crate::output::Output;

/// How long jobs get to finish their current tick on shutdown
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Scheduler {
    jobs: Vec<JobHandle>,

    /// Value delivered with the next tick
    clock: u64,

    /// `None` disables the timer; ticks then only come from `TickNow`
    tick_interval: Option<Duration>,

    command_rx: mpsc::Receiver<SchedulerCommand>,
    exit_rx: mpsc::Receiver<JobExit>,

    /// Parent of every job's token
    cancel: CancellationToken,
    shutdown_timeout: Duration,
}

impl Scheduler {
    /// Validate the configured jobs and spawn one task for each
    ///
    /// Jobs with an invalid configuration or an unknown module are logged and skipped.
    pub fn new(
        config: &PluginConfig,
        registry: &ModuleRegistry,
        context: Arc<PluginContext>,
        tick_interval: Option<Duration>,
        command_rx: mpsc::Receiver<SchedulerCommand>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let (exit_tx, exit_rx) = mpsc::channel(32);

        let (resolved, errors) = config.resolve_jobs();
        for e in errors {
            error!("skipping job: {e}");
        }

        let jobs: Vec<_> = resolved
            .into_iter()
            .filter_map(|job_config| match registry.create(&job_config) {
                Ok(module) => {
                    let job = Job::new(job_config, module, context.clone());
                    Some(JobHandle::spawn(job, cancel.child_token(), exit_tx.clone()))
                }
                Err(e) => {
                    error!("skipping job: {e}");
                    None
                }
            })
            .collect();

        info!(jobs = jobs.len(), "jobs created");

        Self {
            jobs,
            clock: 0,
            tick_interval,
            command_rx,
            exit_rx,
            cancel,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    #[instrument(skip(self), fields(jobs = self.jobs.len()))]
    pub async fn run(mut self) {
        debug!("starting scheduler");

        let mut ticker = self.tick_interval.map(|period| {
            let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            if self.jobs.is_empty() {
                info!("no jobs left");
                break;
            }

            tokio::select! {
                _ = next_tick(&mut ticker) => {
                    self.tick();
                }

                Some(exit) = self.exit_rx.recv() => {
                    self.handle_exit(exit);
                }

                cmd = self.command_rx.recv() => match cmd {
                    Some(SchedulerCommand::TickNow { respond_to }) => {
                        let clock = self.tick();
                        let _ = respond_to.send(clock);
                    }

                    Some(SchedulerCommand::ListJobs { respond_to }) => {
                        let _ = respond_to.send(self.summaries());
                    }

                    Some(SchedulerCommand::Shutdown) => {
                        debug!("received shutdown command");
                        break;
                    }

                    None => {
                        warn!("command channel closed, shutting down");
                        break;
                    }
                }
            }
        }

        self.shutdown().await;
        debug!("scheduler stopped");
    }

    /// Deliver the current clock to every job; returns the delivered value
    fn tick(&mut self) -> u64 {
        let clock = self.clock;
        self.clock += 1;

        for job in &self.jobs {
            if job.tick(clock) == TickDelivery::Dropped {
                warn!(job = %job.name(), clock, "job is still busy, skipping tick");
            }
        }

        clock
    }

    fn handle_exit(&mut self, exit: JobExit) {
        info!(
            job = %exit.name,
            reason = %exit.reason,
            stopped_at = %exit.stopped_at.to_rfc3339(),
            "job exited"
        );
        self.jobs.retain(|job| job.name() != exit.name);
    }

    fn summaries(&self) -> Vec<JobSummary> {
        self.jobs
            .iter()
            .map(|job| JobSummary {
                name: job.name().to_string(),
                module: job.module().to_string(),
                update_every: job.update_every(),
                phase: job.phase(),
            })
            .collect()
    }

    async fn shutdown(&mut self) {
        self.cancel.cancel();

        let stopped = futures::future::join_all(self.jobs.iter().map(JobHandle::stopped));
        if tokio::time::timeout(self.shutdown_timeout, stopped).await.is_err() {
            warn!(
                timeout = ?self.shutdown_timeout,
                "jobs did not stop in time"
            );
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Handle for controlling the Scheduler
#[derive(Clone)]
pub struct SchedulerHandle {
    sender: mpsc::Sender<SchedulerCommand>,
    context: Arc<PluginContext>,
}

impl SchedulerHandle {
    /// Spawn a scheduler ticking every `tick_seconds`
    pub fn spawn(config: &PluginConfig, registry: &ModuleRegistry, output: Arc<dyn Output>) -> Self {
        let period = Duration::from_secs(config.tick_seconds.max(1));
        Self::spawn_with_interval(config, registry, output, Some(period))
    }

    /// Spawn a scheduler without a timer; every tick comes from [`tick_now`](Self::tick_now)
    pub fn spawn_manual(
        config: &PluginConfig,
        registry: &ModuleRegistry,
        output: Arc<dyn Output>,
    ) -> Self {
        Self::spawn_with_interval(config, registry, output, None)
    }

    fn spawn_with_interval(
        config: &PluginConfig,
        registry: &ModuleRegistry,
        output: Arc<dyn Output>,
        tick_interval: Option<Duration>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let context = PluginContext::new(config.plugin_name.clone(), output);

        let scheduler = Scheduler::new(config, registry, context.clone(), tick_interval, cmd_rx);
        tokio::spawn(scheduler.run());

        Self { sender: cmd_tx, context }
    }

    pub fn context(&self) -> &Arc<PluginContext> {
        &self.context
    }

    /// Deliver one tick immediately; returns the clock value delivered
    pub async fn tick_now(&self) -> Result<u64> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::TickNow { respond_to: tx })
            .await
            .context("failed to send TickNow command")?;

        rx.await.context("failed to receive response")
    }

    pub async fn list_jobs(&self) -> Result<Vec<JobSummary>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::ListJobs { respond_to: tx })
            .await
            .context("failed to send ListJobs command")?;

        rx.await.context("failed to receive response")
    }

    /// Stop every job, then the scheduler
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(SchedulerCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }

    /// Resolves once the scheduler has stopped
    pub async fn closed(&self) {
        self.sender.closed().await;
    }
}
