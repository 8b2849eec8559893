//! Job detection, failure isolation and tick handling

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use chart_orchestrator::actors::job::{Job, JobHandle, TickOutcome};
use chart_orchestrator::actors::messages::{ExitReason, JobPhase, TickDelivery};
use chart_orchestrator::module::CollectorFault;
use chart_orchestrator::module::mock::MockModule;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::helpers::*;

#[tokio::test]
async fn test_panic_in_collect_skips_one_tick() {
    let (context, output) = test_context();
    let mut calls = 0;
    let module = MockModule::new().with_charts(ab_chart).with_collect(move |_| {
        calls += 1;
        if calls == 3 {
            panic!("collector exploded");
        }
        Ok(Some(data(&[("a", calls)])))
    });
    let mut job = detected_job(module, job_config(10), context).await;

    job.process_tick(1).await;
    job.process_tick(2).await;
    output.take();

    assert_eq!(job.process_tick(3).await, TickOutcome::Failed);
    assert_eq!(job.retries(), 1);
    assert!(job.panicked());
    assert_eq!(output.take(), "");

    assert_eq!(job.process_tick(4).await, TickOutcome::Collected);
    assert_eq!(job.retries(), 0);
    assert!(output.take().contains("SET 'a' = 4\n"));
}

#[tokio::test]
async fn test_retries_exhausted_after_max_plus_one_failures() {
    let (context, _output) = test_context();
    let module = MockModule::new()
        .with_charts(ab_chart)
        .with_collect(|_| Err(CollectorFault::failed("connection refused")));
    let mut config = job_config(10);
    config.retries = 2;
    let mut job = detected_job(module, config, context).await;

    assert_eq!(job.process_tick(0).await, TickOutcome::Failed);
    assert_eq!(job.process_tick(1).await, TickOutcome::Failed);
    assert_eq!(job.process_tick(2).await, TickOutcome::RetriesExhausted);
    assert!(!job.panicked());
}

#[tokio::test]
async fn test_successful_collection_resets_retries() {
    let (context, _output) = test_context();
    let mut calls = 0;
    let module = MockModule::new().with_charts(ab_chart).with_collect(move |_| {
        calls += 1;
        if calls % 3 == 0 {
            Ok(Some(data(&[("a", 1)])))
        } else {
            Err(CollectorFault::failed("flaky"))
        }
    });
    let mut config = job_config(10);
    config.retries = 2;
    let mut job = detected_job(module, config, context).await;

    for clock in 0..12 {
        assert_ne!(job.process_tick(clock).await, TickOutcome::RetriesExhausted);
    }
}

#[tokio::test]
async fn test_stopped_job_processes_no_more_ticks() {
    let (context, _output) = test_context();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let module = MockModule::new().with_charts(ab_chart).with_collect(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(CollectorFault::failed("down"))
    });
    let cleanup = module.cleanup_flag();
    let mut config = job_config(10);
    config.retries = 2;
    let (exit_tx, mut exit_rx) = mpsc::channel(1);

    let job = Job::new(config, Box::new(module), context);
    let handle = JobHandle::spawn(job, CancellationToken::new(), exit_tx);
    assert!(handle.running().await);

    for clock in 0..3 {
        assert_eq!(deliver(&handle, clock).await, TickDelivery::Sent);
    }

    let exit = exit_rx.recv().await.unwrap();
    assert_eq!(exit.reason, ExitReason::RetriesExhausted);
    assert_eq!(handle.phase(), JobPhase::Stopped);
    assert_eq!(handle.tick(3), TickDelivery::Inactive);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(cleanup.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn test_begin_carries_time_since_last_update() {
    let (context, output) = test_context();
    let a = Some(data(&[("a", 1)]));
    let mut job = detected_job(scripted(vec![a.clone(), a.clone(), None, a]), job_config(10), context).await;

    job.process_tick(0).await;
    assert!(output.take().contains("BEGIN 'mock.c' 0\n"));

    tokio::time::advance(Duration::from_secs(1)).await;
    job.process_tick(1).await;
    assert!(output.take().contains("BEGIN 'mock.c' 1000000\n"));

    // A tick without data does not count as a run.
    tokio::time::advance(Duration::from_secs(1)).await;
    job.process_tick(2).await;
    output.take();

    tokio::time::advance(Duration::from_secs(1)).await;
    job.process_tick(3).await;
    assert!(output.take().contains("BEGIN 'mock.c' 2000000\n"));
}

#[tokio::test]
async fn test_update_every_filters_ticks() {
    let (context, output) = test_context();
    let module = MockModule::new()
        .with_charts(ab_chart)
        .with_collect(|_| Ok(Some(data(&[("a", 1)]))));
    let mut config = job_config(10);
    config.update_every = 3;
    let mut job = detected_job(module, config, context).await;

    let mut collected = vec![];
    for clock in 0..7 {
        if job.process_tick(clock).await == TickOutcome::Collected {
            collected.push(clock);
        }
    }

    assert_eq!(collected, vec![0, 3, 6]);
    assert!(output.contents().contains("'3' '' 'orchestrator' 'mock'"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tick_dropped_while_busy() {
    let (context, output) = test_context();
    let (entered_tx, mut entered_rx) = mpsc::unbounded_channel();
    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();

    let mut calls = 0;
    let module = MockModule::new().with_charts(ab_chart).with_collect(move |_| {
        calls += 1;
        if calls == 1 {
            let _ = entered_tx.send(());
            let _ = release_rx.recv();
        }
        Ok(Some(data(&[("a", calls)])))
    });

    let (exit_tx, _exit_rx) = mpsc::channel(1);
    let job = Job::new(job_config(10), Box::new(module), context);
    let handle = JobHandle::spawn(job, CancellationToken::new(), exit_tx);
    assert!(handle.running().await);

    assert_eq!(handle.tick(0), TickDelivery::Sent);
    entered_rx.recv().await.unwrap();

    assert_eq!(handle.tick(1), TickDelivery::Dropped);
    assert_eq!(handle.tick(2), TickDelivery::Dropped);

    release_tx.send(()).unwrap();
    wait_for_output(&output, "SET 'a' = 1\n").await;

    assert_eq!(deliver(&handle, 3).await, TickDelivery::Sent);
    wait_for_output(&output, "SET 'a' = 2\n").await;

    // The dropped ticks were never queued.
    assert_eq!(lines_starting(&output.contents(), "BEGIN ").len(), 2);

    handle.shutdown();
    handle.stopped().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_waits_for_in_flight_collection() {
    let (context, output) = test_context();
    let (entered_tx, mut entered_rx) = mpsc::unbounded_channel();
    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();

    let module = MockModule::new().with_charts(ab_chart).with_collect(move |_| {
        let _ = entered_tx.send(());
        let _ = release_rx.recv();
        Ok(Some(data(&[("a", 42)])))
    });
    let cleanup = module.cleanup_flag();

    let (exit_tx, mut exit_rx) = mpsc::channel(1);
    let job = Job::new(job_config(10), Box::new(module), context);
    let handle = JobHandle::spawn(job, CancellationToken::new(), exit_tx);
    assert!(handle.running().await);

    assert_eq!(handle.tick(0), TickDelivery::Sent);
    entered_rx.recv().await.unwrap();

    handle.shutdown();
    release_tx.send(()).unwrap();
    handle.stopped().await;

    assert!(output.contents().contains("SET 'a' = 42\n"));
    assert_eq!(exit_rx.recv().await.unwrap().reason, ExitReason::Shutdown);
    assert!(cleanup.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_detection_failure_still_cleans_up() {
    let (context, output) = test_context();
    let module = MockModule::new()
        .with_init(|| panic!("missing credentials"))
        .with_charts(ab_chart);
    let cleanup = module.cleanup_flag();

    let (exit_tx, mut exit_rx) = mpsc::channel(1);
    let job = Job::new(job_config(10), Box::new(module), context);
    let handle = JobHandle::spawn(job, CancellationToken::new(), exit_tx);

    assert!(!handle.running().await);
    assert_eq!(exit_rx.recv().await.unwrap().reason, ExitReason::DetectionFailed);
    assert!(cleanup.load(Ordering::SeqCst));
    assert_eq!(output.contents(), "");
}
