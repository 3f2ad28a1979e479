//! End-to-end engine scenarios.
//!
//! These tests drive the worker, runner and interrupt handler against a real
//! jobs directory and real `bash` processes.

use std::fs;
use std::time::Duration;

use shellq::core::state::JobState;
use shellq::core::types::{Job, Lane, Outcome};
use shellq::engine::Engine;
use shellq::io::loader::{get_next_job, peek_queue};
use shellq::runner::Disposition;
use shellq::test_support::{TestJobs, fast_config, wait_until};
use shellq::worker::Cycle;
use tokio_util::sync::CancellationToken;

fn engine(jobs: &TestJobs) -> Engine {
    Engine::new(jobs.root(), fast_config())
}

async fn next_report(engine: &Engine) -> shellq::runner::RunReport {
    match engine.worker().run_once().await {
        Cycle::Ran(report) => report,
        other => panic!("expected a finished job, got {other:?}"),
    }
}

/// N descriptor jobs become N running scripts, in file order, with each body
/// written exactly as trimmed from the descriptor. The descriptor is left
/// empty but present.
#[test]
fn descriptor_round_trip() {
    let jobs = TestJobs::new().expect("jobs");
    let entries: Vec<(String, String)> = (1..=5)
        .map(|n| (format!("job{n}"), format!("echo {n}")))
        .collect();
    let borrowed: Vec<(&str, &str)> = entries
        .iter()
        .map(|(name, body)| (name.as_str(), body.as_str()))
        .collect();
    jobs.queue_descriptor("batch", &borrowed).expect("queue");

    let mut loaded = Vec::new();
    while let Some(job) = get_next_job(jobs.store()).expect("load") {
        loaded.push(job);
    }

    assert_eq!(loaded.len(), 5);
    for (job, (name, body)) in loaded.iter().zip(&entries) {
        assert_eq!(&job.name, name);
        assert_eq!(
            jobs.read_script(JobState::Running, job).expect("script"),
            body.as_str()
        );
    }
    assert!(
        jobs.store()
            .state_dir(JobState::Queued)
            .join("batch/todo.xml")
            .is_file()
    );
}

/// `0001_a` runs before `0002_b` regardless of when they were queued.
#[tokio::test]
async fn lanes_run_in_lexicographic_order() {
    let jobs = TestJobs::new().expect("jobs");
    jobs.queue_descriptor("0002_b", &[("later", "true")])
        .expect("queue");
    jobs.queue_descriptor("0001_a", &[("sooner", "true")])
        .expect("queue");
    let engine = engine(&jobs);

    assert_eq!(next_report(&engine).await.job.to_string(), "0001_a/sooner");
    assert_eq!(next_report(&engine).await.job.to_string(), "0002_b/later");
}

/// A standalone script that exits 0 lands in `success/` unchanged with its log.
#[tokio::test]
async fn success_keeps_script_byte_identical() {
    let jobs = TestJobs::new().expect("jobs");
    let body = "#!/bin/bash\n# comment kept\necho ok\n";
    jobs.queue_script("0001_a", "build.sh", body).expect("queue");
    let engine = engine(&jobs);

    let report = next_report(&engine).await;
    assert_eq!(report.outcome, Outcome::Success);
    assert_eq!(
        jobs.read_script(JobState::Success, &report.job).expect("script"),
        body
    );
    assert_eq!(
        jobs.read_log(JobState::Success, &report.job).expect("log"),
        "ok\n"
    );
}

#[tokio::test]
async fn nonzero_exit_lands_in_failed() {
    let jobs = TestJobs::new().expect("jobs");
    jobs.queue_descriptor("l", &[("broken", "echo trying\nfalse")])
        .expect("queue");
    let engine = engine(&jobs);

    let report = next_report(&engine).await;
    assert_eq!(report.outcome, Outcome::Failed);
    assert_eq!(report.exit_code, Some(1));
    assert_eq!(
        jobs.read_log(JobState::Failed, &report.job).expect("log"),
        "trying\n"
    );
}

/// Cancel mid-run: the job lands in `canceled/` with everything it printed,
/// and the next job runs normally.
#[tokio::test]
async fn cancel_mid_run_then_next_job_unaffected() {
    let jobs = TestJobs::new().expect("jobs");
    jobs.queue_descriptor(
        "l",
        &[
            ("long", "echo one\necho two\nsleep 30\necho never"),
            ("after", "echo fine"),
        ],
    )
    .expect("queue");
    let engine = engine(&jobs);

    let cancel = engine.cancel.clone();
    let active = engine.active.clone();
    let log = jobs
        .store()
        .log_path(JobState::Running, &Job::new("long", Lane::new("l").expect("lane")));
    tokio::spawn(async move {
        wait_until(Duration::from_secs(5), || {
            fs::read_to_string(&log).is_ok_and(|text| text.contains("two"))
        })
        .await;
        assert!(active.current().is_some());
        cancel.signal();
    });

    let canceled = next_report(&engine).await;
    assert_eq!(canceled.outcome, Outcome::Canceled);
    assert_eq!(
        jobs.read_log(JobState::Canceled, &canceled.job).expect("log"),
        "one\ntwo\n"
    );

    let after = next_report(&engine).await;
    assert_eq!(after.job.name, "after");
    assert_eq!(after.outcome, Outcome::Success);
}

/// A cancel request while idle does not affect the job that starts later.
#[tokio::test]
async fn idle_cancel_has_no_effect() {
    let jobs = TestJobs::new().expect("jobs");
    let engine = engine(&jobs);
    engine.cancel.signal();
    engine.cancel.signal();
    assert!(matches!(engine.worker().run_once().await, Cycle::Idle));

    jobs.queue_descriptor("l", &[("later", "sleep 0.3\necho done")])
        .expect("queue");
    let report = next_report(&engine).await;
    assert_eq!(report.outcome, Outcome::Success);
}

/// Interrupting the engine mid-job kills the child and files it as failed
/// with the output produced so far.
#[tokio::test]
async fn interrupt_files_active_job_as_failed() {
    let jobs = TestJobs::new().expect("jobs");
    jobs.queue_descriptor("l", &[("victim", "echo partial\nsleep 30")])
        .expect("queue");
    let engine = engine(&jobs);
    let job = Job::new("victim", Lane::new("l").expect("lane"));

    let worker = engine.worker();
    let run = tokio::spawn(async move { worker.run_once().await });

    let log = jobs.store().log_path(JobState::Running, &job);
    assert!(
        wait_until(Duration::from_secs(5), || {
            fs::read_to_string(&log).is_ok_and(|text| text.contains("partial"))
        })
        .await
    );

    let report = engine.interrupt().expect("active job");
    assert_eq!(report.job, job);
    assert_eq!(report.moved.expect("moved").to, JobState::Failed);
    assert_eq!(
        jobs.read_log(JobState::Failed, &job).expect("log"),
        "partial\n"
    );

    let cycle = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("runner returned")
        .expect("join");
    match cycle {
        Cycle::Ran(report) => assert_eq!(report.disposition, Disposition::Preempted),
        other => panic!("expected preempted run, got {other:?}"),
    }
    assert!(!jobs.store().script_path(JobState::Running, &job).exists());
    assert!(engine.interrupt().is_none());
}

/// Dropping the engine mid-job (no interrupt handler) leaves the job under
/// `running/`, and a fresh worker does not pick it up again.
#[tokio::test]
async fn crash_leaves_job_under_running() {
    let jobs = TestJobs::new().expect("jobs");
    jobs.queue_descriptor("l", &[("orphan", "echo started\nsleep 30")])
        .expect("queue");
    let job = Job::new("orphan", Lane::new("l").expect("lane"));

    let crashed = engine(&jobs);
    let worker = crashed.worker();
    let run = tokio::spawn(async move { worker.run_once().await });
    let log = jobs.store().log_path(JobState::Running, &job);
    assert!(
        wait_until(Duration::from_secs(5), || {
            fs::read_to_string(&log).is_ok_and(|text| text.contains("started"))
        })
        .await
    );
    run.abort();
    let _ = run.await;

    assert!(jobs.store().script_path(JobState::Running, &job).is_file());
    assert!(log.is_file());

    let restarted = engine(&jobs);
    assert!(matches!(restarted.worker().run_once().await, Cycle::Idle));
    assert!(jobs.store().script_path(JobState::Running, &job).is_file());
    for state in [JobState::Success, JobState::Failed, JobState::Canceled] {
        assert!(jobs.store().list(state).expect("list").is_empty());
    }
}

/// Shutdown arriving while the worker is still scanning a large queue must
/// not let a job start afterwards: once the interrupt handler has run, the
/// job is either still queued or filed as failed, never left in `running/`.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_during_scan_strands_nothing() {
    let jobs = TestJobs::new().expect("jobs");
    for n in 0..20_000 {
        jobs.queue_raw(&format!("aaaa/note-{n:05}.txt"), "")
            .expect("queue");
    }
    jobs.queue_descriptor("zzzz", &[("late", "sleep 30")])
        .expect("queue");
    let engine = engine(&jobs);

    let shutdown = CancellationToken::new();
    let worker = engine.worker();
    let task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { worker.run(shutdown).await }
    });
    tokio::time::sleep(Duration::from_millis(5)).await;

    shutdown.cancel();
    let interrupted = engine.interrupt();
    task.abort();
    let _ = task.await;

    if let Some(report) = interrupted {
        assert_eq!(report.moved.expect("moved").to, JobState::Failed);
    }
    assert!(jobs.store().list(JobState::Running).expect("list").is_empty());
    let queued = peek_queue(jobs.store()).expect("peek").len();
    let failed = jobs.store().list(JobState::Failed).expect("list").len();
    assert_eq!(queued + failed, 1, "queued={queued} failed={failed}");
    assert!(engine.active.is_closed());
    assert!(matches!(engine.worker().run_once().await, Cycle::Stopped));
}
