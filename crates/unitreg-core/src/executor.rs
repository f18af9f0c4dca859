//! Job execution: one analysis command per work item, under a deadline and
//! a retry budget.
//!
//! The executor produces exactly one [`JobResult`] per work item. Timeouts
//! and non-zero exits are transient and retried; a missing execution target
//! and classifier-signalled `NO_DATA`/`NOT_FOUND` are terminal on the first
//! attempt — retrying cannot help either.

use crate::classify::Category;
use crate::registry::WorkItem;
use crate::status::Status;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Final outcome for one work item after all attempts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobResult {
    /// Unit identifier this result belongs to.
    pub unit: String,

    /// Terminal status.
    pub status: Status,

    /// Human-readable one-line summary.
    pub details: String,

    /// Tool-reported runtime from the log, if the classifier found one.
    pub runtime: Option<String>,

    /// Free-form flag set, if the classifier found one.
    pub flags: Option<String>,

    /// Number of command attempts made (0 when the target was missing).
    pub attempts: u32,

    /// Wall time spent on this item across all attempts.
    pub duration_ms: u64,

    pub finished_at: DateTime<Utc>,
}

/// Execution settings shared by every job in a run.
#[derive(Debug, Clone)]
pub struct ExecSettings {
    /// Analysis command: program plus fixed leading arguments. The executor
    /// appends `--mode <category>` and the execution target.
    pub command: Vec<String>,

    /// Per-attempt deadline.
    pub timeout: Duration,

    /// Transient failures retried beyond the first attempt.
    pub max_retries: u32,

    /// Pause between attempts.
    pub retry_delay: Duration,
}

/// Disposition of a single attempt.
enum Attempt {
    Completed { exit_code: i32, output: String },
    TimedOut,
    SpawnFailed(String),
    Cancelled,
}

/// Resolve when run-level cancellation is signalled.
///
/// Never resolves once the sender side is gone: a dropped sender means
/// cancellation can no longer arrive, not that it did.
pub(crate) async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Run the analysis command for one work item to a terminal [`JobResult`].
///
/// Returns `None` when run-level cancellation interrupted the item; the
/// in-flight attempt is lost and the item is redone on the next resume.
pub async fn execute(
    item: &WorkItem,
    settings: &ExecSettings,
    category: &Category,
    cancel: &mut watch::Receiver<bool>,
) -> Option<JobResult> {
    let started = Instant::now();

    if tokio::fs::metadata(&item.target).await.is_err() {
        debug!(unit = %item.unit, target = %item.target.display(), "execution target missing");
        return Some(JobResult {
            unit: item.unit.clone(),
            status: Status::Missing,
            details: format!("execution target not found: {}", item.target.display()),
            runtime: None,
            flags: None,
            attempts: 0,
            duration_ms: elapsed_ms(started),
            finished_at: Utc::now(),
        });
    }

    let mut attempt: u32 = 1;
    loop {
        let last_failure = match run_once(item, settings, category.mode_arg, cancel).await {
            Attempt::Cancelled => return None,
            Attempt::Completed { exit_code: 0, output } => {
                let c = category.classifier.classify(&output);
                debug!(unit = %item.unit, status = %c.status, attempt, "job classified");
                return Some(JobResult {
                    unit: item.unit.clone(),
                    status: c.status,
                    details: c.details,
                    runtime: c.runtime,
                    flags: c.flags,
                    attempts: attempt,
                    duration_ms: elapsed_ms(started),
                    finished_at: Utc::now(),
                });
            }
            Attempt::Completed { exit_code, .. } => format!("exit code {exit_code}"),
            Attempt::TimedOut => {
                format!("timed out after {:.1}s", settings.timeout.as_secs_f64())
            }
            Attempt::SpawnFailed(e) => format!("spawn failed: {e}"),
        };

        if attempt > settings.max_retries {
            warn!(unit = %item.unit, attempts = attempt, %last_failure, "retry budget exhausted");
            return Some(JobResult {
                unit: item.unit.clone(),
                status: Status::Error,
                details: format!("{attempt} attempt(s) exhausted; last failure: {last_failure}"),
                runtime: None,
                flags: None,
                attempts: attempt,
                duration_ms: elapsed_ms(started),
                finished_at: Utc::now(),
            });
        }

        debug!(unit = %item.unit, attempt, %last_failure, "transient failure, retrying");
        tokio::select! {
            _ = tokio::time::sleep(settings.retry_delay) => {}
            _ = cancelled(cancel) => return None,
        }
        attempt += 1;
    }
}

/// Run one attempt: spawn, capture combined output, enforce the deadline.
async fn run_once(
    item: &WorkItem,
    settings: &ExecSettings,
    mode_arg: &str,
    cancel: &mut watch::Receiver<bool>,
) -> Attempt {
    if settings.command.is_empty() {
        return Attempt::SpawnFailed("empty analysis command".to_string());
    }

    let mut cmd = Command::new(&settings.command[0]);
    cmd.args(&settings.command[1..])
        .arg("--mode")
        .arg(mode_arg)
        .arg(&item.target)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => return Attempt::SpawnFailed(e.to_string()),
    };

    let out_task = tokio::spawn(drain(child.stdout.take()));
    let err_task = tokio::spawn(drain(child.stderr.take()));

    enum Waited {
        Done(std::io::Result<std::process::ExitStatus>),
        TimedOut,
        Cancelled,
    }

    let waited = tokio::select! {
        status = child.wait() => Waited::Done(status),
        _ = tokio::time::sleep(settings.timeout) => Waited::TimedOut,
        _ = cancelled(cancel) => Waited::Cancelled,
    };

    match waited {
        Waited::Done(Ok(status)) => {
            let mut output = out_task.await.unwrap_or_default();
            output.push_str(&err_task.await.unwrap_or_default());
            Attempt::Completed {
                exit_code: status.code().unwrap_or(-1),
                output,
            }
        }
        Waited::Done(Err(e)) => Attempt::SpawnFailed(e.to_string()),
        Waited::TimedOut => {
            kill_tree(&mut child).await;
            Attempt::TimedOut
        }
        Waited::Cancelled => {
            kill_tree(&mut child).await;
            Attempt::Cancelled
        }
    }
}

async fn drain<R>(pipe: Option<R>) -> String
where
    R: AsyncRead + Unpin,
{
    let mut buf = String::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_string(&mut buf).await.ok();
    }
    buf
}

/// Kill the child and, on unix, its whole process group, so grandchildren
/// spawned by the analysis command do not outlive the deadline.
async fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(-(pid as i32), libc::SIGKILL);
        }
    }
    if let Err(e) = child.kill().await {
        debug!("kill after deadline: {e}");
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
