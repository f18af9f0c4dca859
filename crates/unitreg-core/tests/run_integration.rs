//! Integration tests driving the scheduler, executor and checkpoint store
//! end to end with real commands.
#![cfg(unix)]

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use unitreg_core::checkpoint::{
    config_fingerprint, CheckpointRecord, CheckpointStore, JournalHeader, JournalStore,
    MemoryStore,
};
use unitreg_core::executor::JobResult;
use unitreg_core::registry::WorkItem;
use unitreg_core::scheduler::{self, Concurrency, RunConfig, RunEvent};
use unitreg_core::status::{AcceptPolicy, Status};
use unitreg_core::RunError;

const PASSING_LOG: &str = "\
Timing Analysis Summary
  group setup: worst slack 0.213 (MET)
  group hold: worst slack 0.101 (MET)
Runtime: 00:04:12
";

/// Analysis stub: records its invocation into the workarea, then prints the
/// workarea's timing log. Arguments arrive as `--mode <mode> <target>`.
fn write_stub(dir: &Path, extra: &str) -> Vec<String> {
    let script = dir.join("unit-analyze.sh");
    let body = format!(
        "target=\"$3\"\n{extra}\necho invoked >> \"$target/invocations.log\"\ncat \"$target/timing.log\"\n"
    );
    std::fs::write(&script, body).expect("write stub");
    vec!["/bin/sh".to_string(), script.to_string_lossy().into_owned()]
}

fn make_workarea(root: &Path, unit: &str, log: &str) -> PathBuf {
    let target = root.join(unit);
    std::fs::create_dir_all(&target).expect("create workarea");
    std::fs::write(target.join("timing.log"), log).expect("write log");
    target
}

fn item(unit: &str, target: &Path) -> WorkItem {
    WorkItem {
        unit: unit.to_string(),
        group: "cpu".to_string(),
        target: target.to_path_buf(),
        meta: vec![],
    }
}

fn config(command: Vec<String>, jobs: usize) -> RunConfig {
    RunConfig {
        category: "timing".to_string(),
        command,
        jobs: Concurrency::Fixed(jobs),
        max_retries: 0,
        retry_delay: Duration::from_millis(10),
        timeout: Duration::from_secs(10),
    }
}

fn header(run_id: &str, fingerprint: &str) -> JournalHeader {
    JournalHeader {
        run_id: run_id.to_string(),
        fingerprint: fingerprint.to_string(),
        category: "timing".to_string(),
        created_at: Utc::now(),
    }
}

fn invocations(target: &Path) -> usize {
    std::fs::read_to_string(target.join("invocations.log"))
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

#[tokio::test]
async fn test_every_item_yields_exactly_one_result() {
    let dir = tempfile::tempdir().expect("tempdir");
    let command = write_stub(dir.path(), "");
    let units = ["alu_core", "ddr_phy", "lsu", "noc_router"];
    let items: Vec<WorkItem> = units
        .iter()
        .map(|u| item(u, &make_workarea(dir.path(), u, PASSING_LOG)))
        .collect();

    let store = Arc::new(MemoryStore::new("run-1", "fp"));
    let (_tx, rx) = watch::channel(false);
    let summary = scheduler::run(items, config(command, 2), store.clone(), None, rx)
        .await
        .expect("run");

    assert_eq!(summary.outcomes.len(), units.len());
    let got: Vec<&str> = summary.outcomes.iter().map(|o| o.item.unit.as_str()).collect();
    assert_eq!(got, units, "summary must be in registry order");
    assert_eq!(summary.count(Status::Passed), units.len());
    for index in 0..units.len() {
        assert!(store.is_complete(index).await, "index {index} not checkpointed");
    }
}

#[tokio::test]
async fn test_missing_target_scenario() {
    // Registry {A: valid, B: missing, C: valid}, concurrency 2: expect
    // [A:PASSED, B:MISSING, C:PASSED], counts {PASSED:2, MISSING:1}, exit 0
    // under the default policy and non-zero under strict.
    let dir = tempfile::tempdir().expect("tempdir");
    let command = write_stub(dir.path(), "");
    let items = vec![
        item("unit_a", &make_workarea(dir.path(), "unit_a", PASSING_LOG)),
        item("unit_b", &dir.path().join("never_created")),
        item("unit_c", &make_workarea(dir.path(), "unit_c", PASSING_LOG)),
    ];

    let store = Arc::new(MemoryStore::new("run-abc", "fp"));
    let (_tx, rx) = watch::channel(false);
    let summary = scheduler::run(items, config(command, 2), store, None, rx)
        .await
        .expect("run");

    let statuses: Vec<Status> = summary.outcomes.iter().map(|o| o.result.status).collect();
    assert_eq!(statuses, vec![Status::Passed, Status::Missing, Status::Passed]);
    assert_eq!(summary.count(Status::Passed), 2);
    assert_eq!(summary.count(Status::Missing), 1);
    assert!(summary.exit_ok(&AcceptPolicy::default()));
    assert!(!summary.exit_ok(&AcceptPolicy::strict()));
}

#[tokio::test]
async fn test_retry_exhaustion_through_scheduler() {
    let dir = tempfile::tempdir().expect("tempdir");
    let script = dir.path().join("always-fails.sh");
    std::fs::write(&script, "exit 3\n").expect("write stub");
    let command = vec!["/bin/sh".to_string(), script.to_string_lossy().into_owned()];

    let items = vec![item(
        "unit_a",
        &make_workarea(dir.path(), "unit_a", PASSING_LOG),
    )];
    let mut config = config(command, 1);
    config.max_retries = 2;

    let store = Arc::new(MemoryStore::new("run-r", "fp"));
    let (_tx, rx) = watch::channel(false);
    let summary = scheduler::run(items, config, store, None, rx).await.expect("run");

    let result = &summary.outcomes[0].result;
    assert_eq!(result.status, Status::Error);
    assert_eq!(result.attempts, 3);
    assert!(result.details.contains("3 attempt"), "{}", result.details);
}

#[tokio::test]
async fn test_concurrency_bound_never_exceeded() {
    let dir = tempfile::tempdir().expect("tempdir");
    let command = write_stub(dir.path(), "sleep 0.2");
    let items: Vec<WorkItem> = (0..8)
        .map(|i| {
            let unit = format!("unit_{i}");
            item(&unit, &make_workarea(dir.path(), &unit, PASSING_LOG))
        })
        .collect();

    let store = Arc::new(MemoryStore::new("run-c", "fp"));
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let (_tx, rx) = watch::channel(false);
    let summary = scheduler::run(items, config(command, 2), store, Some(events_tx), rx)
        .await
        .expect("run");
    assert_eq!(summary.outcomes.len(), 8);

    let mut active: i64 = 0;
    let mut max_active: i64 = 0;
    while let Ok(event) = events_rx.try_recv() {
        match event {
            RunEvent::ItemStarted { .. } => {
                active += 1;
                max_active = max_active.max(active);
            }
            RunEvent::ItemFinished { .. } => active -= 1,
            RunEvent::ItemSkipped { .. } => {}
        }
    }
    assert!(max_active <= 2, "active slots exceeded the limit: {max_active}");
    assert_eq!(max_active, 2, "run never reached the configured limit");
}

#[tokio::test]
async fn test_resume_reexecutes_nothing_and_matches() {
    let dir = tempfile::tempdir().expect("tempdir");
    let command = write_stub(dir.path(), "");
    let units = ["alu_core", "ddr_phy", "lsu"];
    let targets: Vec<PathBuf> = units
        .iter()
        .map(|u| make_workarea(dir.path(), u, PASSING_LOG))
        .collect();
    let items: Vec<WorkItem> = units
        .iter()
        .zip(&targets)
        .map(|(u, t)| item(u, t))
        .collect();

    let registry_path = dir.path().join("registry.tsv");
    let fingerprint = config_fingerprint("timing", &command, &registry_path, None, None);
    let journal_path = dir.path().join("run.jsonl");

    let first = {
        let store = Arc::new(
            JournalStore::create(&journal_path, header("run-res", &fingerprint))
                .await
                .expect("create journal"),
        );
        let (_tx, rx) = watch::channel(false);
        scheduler::run(items.clone(), config(command.clone(), 2), store, None, rx)
            .await
            .expect("first run")
    };
    for target in &targets {
        assert_eq!(invocations(target), 1);
    }

    let reopened = JournalStore::open(&journal_path).await.expect("open journal");
    reopened.ensure_fingerprint(&fingerprint).expect("fingerprint");
    let store = Arc::new(reopened);
    let (_tx, rx) = watch::channel(false);
    let second = scheduler::run(items, config(command, 2), store.clone(), None, rx)
        .await
        .expect("resumed run");

    // No command ran again, and the summaries agree item for item.
    for target in &targets {
        assert_eq!(invocations(target), 1, "resume must not re-execute");
    }
    assert_eq!(first.outcomes.len(), second.outcomes.len());
    for (a, b) in first.outcomes.iter().zip(second.outcomes.iter()) {
        assert_eq!(a.item.unit, b.item.unit);
        assert_eq!(a.result.status, b.result.status);
        assert_eq!(a.result.details, b.result.details);
    }
    assert_eq!(store.completed_count().await, units.len());
}

#[tokio::test]
async fn test_partial_resume_executes_only_unfinished_items() {
    let dir = tempfile::tempdir().expect("tempdir");
    let command = write_stub(dir.path(), "");
    let units = ["alu_core", "ddr_phy", "lsu"];
    let targets: Vec<PathBuf> = units
        .iter()
        .map(|u| make_workarea(dir.path(), u, PASSING_LOG))
        .collect();
    let items: Vec<WorkItem> = units
        .iter()
        .zip(&targets)
        .map(|(u, t)| item(u, t))
        .collect();

    let journal_path = dir.path().join("run.jsonl");
    let store = Arc::new(
        JournalStore::create(&journal_path, header("run-part", "fp"))
            .await
            .expect("create journal"),
    );

    // Pretend a previous run finished items 0 and 2 before being killed.
    for index in [0usize, 2] {
        store
            .record(CheckpointRecord {
                run_id: "run-part".to_string(),
                index,
                unit: units[index].to_string(),
                result: JobResult {
                    unit: units[index].to_string(),
                    status: Status::Warn,
                    details: "carried over from prior run".to_string(),
                    runtime: None,
                    flags: None,
                    attempts: 1,
                    duration_ms: 7,
                    finished_at: Utc::now(),
                },
                completed_at: Utc::now(),
            })
            .await
            .expect("seed record");
    }

    let (_tx, rx) = watch::channel(false);
    let summary = scheduler::run(items, config(command, 2), store, None, rx)
        .await
        .expect("run");

    assert_eq!(invocations(&targets[0]), 0);
    assert_eq!(invocations(&targets[1]), 1, "only the unfinished item runs");
    assert_eq!(invocations(&targets[2]), 0);

    assert_eq!(summary.outcomes[0].result.status, Status::Warn);
    assert_eq!(summary.outcomes[0].result.details, "carried over from prior run");
    assert_eq!(summary.outcomes[1].result.status, Status::Passed);
    assert_eq!(summary.outcomes[2].result.status, Status::Warn);
}

#[tokio::test]
async fn test_immediate_cancellation_leaves_journal_intact() {
    let dir = tempfile::tempdir().expect("tempdir");
    let command = write_stub(dir.path(), "");
    let items = vec![item(
        "alu_core",
        &make_workarea(dir.path(), "alu_core", PASSING_LOG),
    )];

    let journal_path = dir.path().join("run.jsonl");
    let store = Arc::new(
        JournalStore::create(&journal_path, header("run-can", "fp"))
            .await
            .expect("create journal"),
    );

    let (tx, rx) = watch::channel(false);
    tx.send(true).expect("signal cancel");
    let err = scheduler::run(items, config(command, 1), store, None, rx)
        .await
        .unwrap_err();
    assert!(matches!(err, RunError::Cancelled));

    // The journal is still a valid, resumable file.
    let reopened = JournalStore::open(&journal_path).await.expect("reopen");
    assert_eq!(reopened.completed_count().await, 0);
}

#[tokio::test]
async fn test_unknown_category_aborts_before_execution() {
    let dir = tempfile::tempdir().expect("tempdir");
    let target = make_workarea(dir.path(), "alu_core", PASSING_LOG);
    let items = vec![item("alu_core", &target)];
    let mut config = config(write_stub(dir.path(), ""), 1);
    config.category = "lvs".to_string();

    let store = Arc::new(MemoryStore::new("run-u", "fp"));
    let (_tx, rx) = watch::channel(false);
    let err = scheduler::run(items, config, store, None, rx).await.unwrap_err();
    assert!(matches!(err, RunError::UnknownCategory(c) if c == "lvs"));
    assert_eq!(invocations(&target), 0);
}
