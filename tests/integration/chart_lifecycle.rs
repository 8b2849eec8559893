//! Chart state machine as seen through a job's output

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use chart_orchestrator::chart::{Chart, ChartState, Charts, Dim, Var};
use chart_orchestrator::config::ResolvedJobConfig;
use chart_orchestrator::context::PluginContext;
use chart_orchestrator::module::CollectorFault;
use chart_orchestrator::module::mock::MockModule;
use chart_orchestrator::output::{BufferOutput, Output};
use expect_test::expect;
use pretty_assertions::assert_eq;

use crate::helpers::*;

#[tokio::test]
async fn test_first_tick_announces_then_sets() {
    let (context, output) = test_context();
    let mut job = detected_job(scripted(vec![Some(data(&[("a", 5)]))]), job_config(10), context).await;

    job.process_tick(0).await;

    expect![[r#"
        CHART 'mock.c' '' 'c' '' 'c' '' 'line' '70000' '1' '' 'orchestrator' 'mock'
        DIMENSION 'a' 'a' 'absolute' '1' '1' ''
        DIMENSION 'b' 'b' 'absolute' '1' '1' ''
        BEGIN 'mock.c' 0
        SET 'a' = 5
        END
    "#]]
    .assert_eq(&output.contents());
}

#[tokio::test]
async fn test_only_present_dimensions_are_set() {
    let (context, output) = test_context();
    let a = Some(data(&[("a", 5), ("unrelated", 1)]));
    let mut job = detected_job(scripted(vec![a.clone(), a]), job_config(10), context).await;

    job.process_tick(0).await;
    output.take();
    job.process_tick(1).await;

    let text = output.take();
    assert_eq!(lines_starting(&text, "SET "), vec!["SET 'a' = 5"]);
    assert_eq!(lines_starting(&text, "BEGIN ").len(), 1);
    assert!(text.ends_with("SET 'a' = 5\nEND\n"));
}

#[tokio::test]
async fn test_obsoleted_after_cleanup_and_resurrected() {
    let (context, output) = test_context();
    let a = Some(data(&[("a", 1)]));
    let module = scripted(vec![a.clone(), a.clone(), None, None, None, a.clone(), a]);
    let mut job = detected_job(module, job_config(2), context).await;

    let expected = [
        ChartState::New,
        ChartState::Created,
        ChartState::Created,
        ChartState::MarkedObsolete,
        ChartState::Obsoleted,
        ChartState::New,
        ChartState::Created,
    ];

    let mut per_tick = vec![];
    for (clock, state) in (1..=7).zip(expected) {
        job.process_tick(clock).await;
        assert_eq!(job.charts().get("c").unwrap().state(), state, "tick {clock}");
        per_tick.push(output.take());
    }

    // Ticks 3 and 4 are still framed, with nothing in between.
    assert!(per_tick[2].starts_with("BEGIN 'mock.c' ") && per_tick[2].ends_with("\nEND\n"));
    assert!(lines_starting(&per_tick[3], "SET ").is_empty());

    // Tick 5 carries the obsolescence marker and nothing else.
    assert_eq!(per_tick[4].lines().count(), 1);
    assert!(per_tick[4].starts_with("CHART 'mock.c' "));
    assert!(per_tick[4].contains(" 'obsolete' "));

    // Tick 6 announces the chart again, under the priority it was first given.
    let first = lines_starting(&per_tick[0], "CHART ")[0];
    let again = lines_starting(&per_tick[5], "CHART ")[0];
    assert!(!again.contains("obsolete"));
    assert_eq!(chart_priority(again), chart_priority(first));

    assert!(per_tick[6].starts_with("BEGIN 'mock.c' "));
}

#[tokio::test]
async fn test_obsolete_chart_is_skipped_without_data() {
    let (context, output) = test_context();
    let a = Some(data(&[("a", 1)]));
    let mut job = detected_job(scripted(vec![a, None, None, None, None]), job_config(1), context).await;

    for clock in 0..3 {
        job.process_tick(clock).await;
    }
    assert_eq!(job.charts().get("c").unwrap().state(), ChartState::Obsoleted);
    output.take();

    job.process_tick(3).await;
    job.process_tick(4).await;

    assert_eq!(output.contents(), "");
    assert_eq!(job.charts().get("c").unwrap().state(), ChartState::Obsoleted);
}

#[tokio::test]
async fn test_cleanup_disabled_never_obsoletes() {
    let (context, _output) = test_context();
    let mut job = detected_job(scripted(vec![]), job_config(0), context).await;

    for clock in 0..50 {
        job.process_tick(clock).await;
    }

    let chart = job.charts().get("c").unwrap();
    assert_eq!(chart.state(), ChartState::Created);
    assert_eq!(chart.misses(), 50);
}

#[tokio::test]
async fn test_priorities_unique_across_jobs_and_stable() {
    let (context, output) = test_context();
    let two_charts = || {
        Charts::from_charts([
            Chart::new("x").dim(Dim::new("a")),
            Chart::new("y").dim(Dim::new("a")),
        ])
        .ok()
    };
    let first = MockModule::new()
        .with_charts(two_charts)
        .with_collect(|_| Ok(Some(data(&[("a", 1)]))));
    let second = scripted(vec![Some(data(&[("a", 1)])); 3]);

    let mut other = ResolvedJobConfig::new("mock");
    other.name = "other".to_string();

    let mut first = detected_job(first, job_config(10), context.clone()).await;
    let mut second = detected_job(second, other, context.clone()).await;

    for clock in 0..3 {
        first.process_tick(clock).await;
        second.process_tick(clock).await;
    }

    let priorities = |job: &chart_orchestrator::actors::job::Job| -> Vec<u64> {
        job.charts().iter().map(|c| c.priority().unwrap()).collect()
    };
    assert_eq!(priorities(&first), vec![70_000, 70_001]);
    assert_eq!(priorities(&second), vec![70_002]);
    assert_eq!(context.priorities.peek(), 70_003);

    let text = output.contents();
    assert_eq!(lines_starting(&text, "CHART ").len(), 3);
    assert!(text.contains("CHART 'mock_other.c' "));
}

#[tokio::test]
async fn test_charts_added_during_collection() {
    let (context, output) = test_context();
    let mut calls = 0;
    let module = MockModule::new().with_charts(ab_chart).with_collect(move |charts| {
        calls += 1;
        let fault = |e: chart_orchestrator::error::ChartError| CollectorFault::failed(e.to_string());
        if calls == 3 {
            charts.add(Chart::new("late").dim(Dim::new("x"))).map_err(fault)?;
        }
        if calls == 4 {
            charts.add_dim("c", Dim::new("d")).map_err(fault)?;
        }
        Ok(Some(data(&[("a", 1), ("x", 2), ("d", 3)])))
    });
    let mut job = detected_job(module, job_config(10), context).await;

    job.process_tick(0).await;
    job.process_tick(1).await;
    output.take();

    job.process_tick(2).await;
    let text = output.take();
    let announced = lines_starting(&text, "CHART ");
    assert_eq!(announced.len(), 1);
    assert!(announced[0].starts_with("CHART 'mock.late' "));
    assert_eq!(chart_priority(announced[0]), 70_001);

    job.process_tick(3).await;
    let text = output.take();
    let announced = lines_starting(&text, "CHART ");
    assert_eq!(announced.len(), 1);
    assert!(announced[0].starts_with("CHART 'mock.c' "));
    assert_eq!(chart_priority(announced[0]), 70_000);
    assert_eq!(lines_starting(&text, "DIMENSION ").len(), 3);
    assert!(text.contains("SET 'd' = 3\n"));
}

#[tokio::test]
async fn test_removed_chart_is_marked_once() {
    let (context, output) = test_context();
    let mut calls = 0;
    let module = MockModule::new().with_charts(ab_chart).with_collect(move |charts| {
        calls += 1;
        if calls == 3 {
            charts.remove("c").map_err(|e| CollectorFault::failed(e.to_string()))?;
        }
        Ok(Some(data(&[("a", 1)])))
    });
    let mut job = detected_job(module, job_config(10), context).await;

    job.process_tick(0).await;
    job.process_tick(1).await;
    output.take();

    job.process_tick(2).await;
    let text = output.take();
    assert_eq!(text.lines().count(), 1);
    assert!(text.contains(" 'obsolete' "));

    for clock in 3..6 {
        job.process_tick(clock).await;
    }
    assert_eq!(output.contents(), "");
    assert_eq!(job.charts().get("c").unwrap().state(), ChartState::MarkedDelete);
}

#[tokio::test]
async fn test_variables_follow_dimensions() {
    let (context, output) = test_context();
    let module = MockModule::new()
        .with_charts(|| Charts::from_charts([Chart::new("v").dim(Dim::new("a")).var(Var::new("limit"))]).ok())
        .with_collect(|_| Ok(Some(data(&[("a", 4), ("limit", 9)]))));
    let mut job = detected_job(module, job_config(10), context).await;

    job.process_tick(0).await;

    assert!(output.contents().ends_with("SET 'a' = 4\nVARIABLE CHART 'limit' = 9\nEND\n"));
}

/// Sink that rejects its first `failures` writes
struct Flaky {
    failures: AtomicU32,
    inner: BufferOutput,
}

impl Output for Flaky {
    fn write_chunk(&self, chunk: &str) -> io::Result<()> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(io::ErrorKind::WouldBlock.into());
        }
        self.inner.write_chunk(chunk)
    }
}

#[tokio::test]
async fn test_lost_announcement_is_repeated() {
    let sink = Arc::new(Flaky { failures: AtomicU32::new(1), inner: BufferOutput::new() });
    let context = PluginContext::new("orchestrator", sink.clone());
    let a = Some(data(&[("a", 1)]));
    let mut job = detected_job(scripted(vec![a.clone(), a.clone(), a.clone(), a]), job_config(10), context).await;

    job.process_tick(0).await;
    let chart = job.charts().get("c").unwrap();
    assert_eq!(chart.state(), ChartState::Initial);
    assert_eq!(chart.priority(), Some(70_000));

    for clock in 1..4 {
        job.process_tick(clock).await;
    }

    let text = sink.inner.contents();
    let announced = lines_starting(&text, "CHART ");
    assert_eq!(announced.len(), 1);
    assert_eq!(chart_priority(announced[0]), 70_000);
    assert!(text.starts_with("CHART 'mock.c' "));
    assert_eq!(lines_starting(&text, "BEGIN ").len(), 3);
    assert_eq!(job.charts().get("c").unwrap().state(), ChartState::Created);
}

#[tokio::test]
async fn test_lost_obsolete_marker_is_repeated() {
    let sink = Arc::new(Flaky { failures: AtomicU32::new(0), inner: BufferOutput::new() });
    let context = PluginContext::new("orchestrator", sink.clone());
    let mut job = detected_job(scripted(vec![Some(data(&[("a", 1)]))]), job_config(1), context).await;

    job.process_tick(0).await;
    job.process_tick(1).await;
    assert_eq!(job.charts().get("c").unwrap().state(), ChartState::MarkedObsolete);
    sink.inner.take();

    sink.failures.store(1, Ordering::SeqCst);
    job.process_tick(2).await;
    assert_eq!(job.charts().get("c").unwrap().state(), ChartState::MarkedObsolete);

    job.process_tick(3).await;
    assert_eq!(job.charts().get("c").unwrap().state(), ChartState::Obsoleted);
    assert!(sink.inner.contents().contains(" 'obsolete' "));
}
