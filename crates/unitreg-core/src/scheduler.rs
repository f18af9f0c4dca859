//! Bounded-concurrency dispatch over the filtered work-item list.
//!
//! The scheduler walks the registry in order, satisfies checkpointed items
//! from the journal without consuming a slot, and runs everything else
//! through the executor behind a counting semaphore. The final summary is
//! always in registry order regardless of completion order.

use crate::checkpoint::{CheckpointRecord, CheckpointStore};
use crate::classify;
use crate::error::{CheckpointError, Result, RunError};
use crate::executor::{self, ExecSettings, JobResult};
use crate::obs;
use crate::registry::WorkItem;
use crate::status::Status;
use crate::summary::{self, ItemOutcome, Overall, RunSummary};
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, Semaphore};
use tracing::{debug, info};

/// Requested concurrency: a fixed worker count or host-derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Concurrency {
    Auto,
    Fixed(usize),
}

/// Ceiling applied to `auto` so a large host cannot stampede the license
/// pool the analysis tool draws from.
pub const MAX_AUTO_JOBS: usize = 8;

/// Resolve the effective worker count, once, at run start.
///
/// Pure function: the host parallelism probe happens at the call site so
/// the scheduler itself stays free of environment probing.
pub fn resolve_concurrency(
    requested: Concurrency,
    host_parallelism: usize,
    item_count: usize,
) -> usize {
    let limit = match requested {
        Concurrency::Fixed(n) => n.max(1),
        Concurrency::Auto => host_parallelism.clamp(1, MAX_AUTO_JOBS),
    };
    limit.min(item_count).max(1)
}

/// Run-level configuration, immutable for the duration of a run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Analysis category name (selects command mode and classifier).
    pub category: String,

    /// Analysis command: program plus fixed leading arguments.
    pub command: Vec<String>,

    pub jobs: Concurrency,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub timeout: Duration,
}

/// Progress events emitted while a run is in flight.
///
/// The CLI renders these; tests use them to observe the concurrency gauge.
#[derive(Debug, Clone)]
pub enum RunEvent {
    ItemStarted {
        index: usize,
        unit: String,
    },
    /// Item satisfied from a prior checkpoint; no slot was consumed.
    ItemSkipped {
        index: usize,
        unit: String,
        status: Status,
    },
    ItemFinished {
        index: usize,
        unit: String,
        status: Status,
    },
}

enum TaskOutcome {
    Done(JobResult),
    Cancelled,
    Checkpoint(CheckpointError),
}

/// Execute the run and block until every item has a terminal result.
///
/// Cancellation (a `true` on the watch channel) propagates to every
/// in-flight executor; the run then returns [`RunError::Cancelled`] with
/// the checkpoint journal intact — committed items stay committed,
/// in-flight attempts are lost and redone on resume.
pub async fn run(
    items: Vec<WorkItem>,
    config: RunConfig,
    store: Arc<dyn CheckpointStore>,
    events: Option<mpsc::UnboundedSender<RunEvent>>,
    mut cancel: watch::Receiver<bool>,
) -> Result<RunSummary> {
    let category = classify::category(&config.category)
        .ok_or_else(|| RunError::UnknownCategory(config.category.clone()))?;
    let category = Arc::new(category);

    let started = Instant::now();
    let limit = resolve_concurrency(config.jobs, num_cpus::get(), items.len());

    let _span = obs::RunSpan::enter(store.run_id());
    obs::emit_run_started(store.run_id(), &config.category, items.len(), limit);

    let semaphore = Arc::new(Semaphore::new(limit));
    let settings = Arc::new(ExecSettings {
        command: config.command.clone(),
        timeout: config.timeout,
        max_retries: config.max_retries,
        retry_delay: config.retry_delay,
    });

    let mut slots: Vec<Option<JobResult>> = (0..items.len()).map(|_| None).collect();
    let mut handles = Vec::new();
    let mut dispatch_cancelled = false;

    for (index, item) in items.iter().cloned().enumerate() {
        if *cancel.borrow() {
            dispatch_cancelled = true;
            break;
        }

        // Checkpointed items short-circuit without consuming a slot.
        if store.is_complete(index).await {
            match store.prior_result(index).await {
                Some(prior) => {
                    debug!(unit = %item.unit, index, "satisfied from checkpoint");
                    emit(
                        &events,
                        RunEvent::ItemSkipped {
                            index,
                            unit: item.unit.clone(),
                            status: prior.status,
                        },
                    );
                    slots[index] = Some(prior);
                    continue;
                }
                None => {
                    return Err(CheckpointError::Corrupt {
                        line: 0,
                        reason: format!("item {index} marked complete but has no stored result"),
                    }
                    .into());
                }
            }
        }

        // Acquire the slot before spawning: the limit is never exceeded,
        // not even transiently.
        let permit = tokio::select! {
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    dispatch_cancelled = true;
                    break;
                }
            },
            _ = executor::cancelled(&mut cancel) => {
                dispatch_cancelled = true;
                break;
            }
        };

        let settings = Arc::clone(&settings);
        let category = Arc::clone(&category);
        let store = Arc::clone(&store);
        let events = events.clone();
        let mut cancel = cancel.clone();

        handles.push(tokio::spawn(async move {
            let _permit = permit;
            emit(
                &events,
                RunEvent::ItemStarted {
                    index,
                    unit: item.unit.clone(),
                },
            );

            match executor::execute(&item, &settings, &category, &mut cancel).await {
                Some(result) => {
                    // Terminal outcome: checkpoint before releasing the slot.
                    let record = CheckpointRecord {
                        run_id: store.run_id().to_string(),
                        index,
                        unit: item.unit.clone(),
                        result: result.clone(),
                        completed_at: Utc::now(),
                    };
                    if let Err(e) = store.record(record).await {
                        return (index, TaskOutcome::Checkpoint(e));
                    }

                    obs::emit_item_finished(
                        store.run_id(),
                        &item.unit,
                        result.status.as_str(),
                        result.attempts,
                        result.duration_ms,
                    );
                    emit(
                        &events,
                        RunEvent::ItemFinished {
                            index,
                            unit: item.unit.clone(),
                            status: result.status,
                        },
                    );
                    (index, TaskOutcome::Done(result))
                }
                None => (index, TaskOutcome::Cancelled),
            }
        }));
    }

    let mut task_cancelled = false;
    let mut checkpoint_failure: Option<CheckpointError> = None;
    for joined in join_all(handles).await {
        let (index, outcome) = joined?;
        match outcome {
            TaskOutcome::Done(result) => slots[index] = Some(result),
            TaskOutcome::Cancelled => task_cancelled = true,
            TaskOutcome::Checkpoint(e) => checkpoint_failure = Some(e),
        }
    }

    if let Some(e) = checkpoint_failure {
        return Err(e.into());
    }
    if dispatch_cancelled || task_cancelled {
        info!(run_id = %store.run_id(), "run cancelled; committed checkpoints preserved");
        return Err(RunError::Cancelled);
    }

    let mut outcomes = Vec::with_capacity(items.len());
    for (item, slot) in items.into_iter().zip(slots) {
        match slot {
            Some(result) => outcomes.push(ItemOutcome { item, result }),
            None => return Err(RunError::Cancelled),
        }
    }

    let summary = summary::summarize(store.run_id(), &config.category, outcomes, started.elapsed());
    obs::emit_run_finished(
        store.run_id(),
        summary.duration_ms,
        summary.outcomes.len(),
        summary.overall == Overall::Failing,
    );
    Ok(summary)
}

fn emit(events: &Option<mpsc::UnboundedSender<RunEvent>>, event: RunEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event);
    }
}
