use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::Context;

use chart_orchestrator::{
    actors::scheduler::SchedulerHandle, config::read_config_file, module::ModuleRegistry,
    output::StdoutOutput,
};
use clap::Parser;
use tracing::{debug, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

/// How long the stdout writer gets to flush what the jobs wrote last
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,

    /// Log everything, down to TRACE
    #[arg(short, long)]
    debug: bool,
}

/// Logs go to stderr; stdout carries the protocol
fn init(debug: bool) {
    let level = if debug { LevelFilter::TRACE } else { LevelFilter::INFO };
    let filter = filter::Targets::new().with_targets(vec![
        ("chart_orchestrator", level),
        ("orchestrator", level),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init(args.debug);
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file)?;
    let registry = ModuleRegistry::builtin();
    debug!("available modules: {registry:?}");

    let (output, writer) = StdoutOutput::spawn().context("failed to start stdout writer")?;
    let scheduler = SchedulerHandle::spawn(&config, &registry, Arc::new(output));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("received ctrl-c, shutting down");
            if scheduler.shutdown().await.is_ok() {
                scheduler.closed().await;
            }
        }
        _ = scheduler.closed() => {
            info!("scheduler stopped");
        }
    }

    drop(scheduler);
    drain(writer).await;

    Ok(())
}

/// Wait for the writer thread to finish, which it does once every job released the output
async fn drain(writer: JoinHandle<()>) {
    let waited = tokio::time::timeout(DRAIN_TIMEOUT, async {
        while !writer.is_finished() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    if waited.is_err() {
        warn!("stdout writer did not finish in time");
    }
}
