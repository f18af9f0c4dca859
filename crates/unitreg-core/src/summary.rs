//! Aggregation of job results into the run summary artifact.
//!
//! [`summarize`] is a pure function: it groups outcomes by status, counts
//! them, and derives the overall indicator. The resulting [`RunSummary`] is
//! the sole contract with the external dashboard renderer.

use crate::executor::JobResult;
use crate::registry::WorkItem;
use crate::status::{AcceptPolicy, Status};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// One work item paired with its terminal result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemOutcome {
    pub item: WorkItem,
    pub result: JobResult,
}

/// Derived overall-run indicator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Overall {
    Passing,
    Failing,
}

/// Aggregated outcome of one run, ordered as the filtered registry was.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub category: String,

    /// One entry per filtered work item, in registry order.
    pub outcomes: Vec<ItemOutcome>,

    /// Per-status counts over `outcomes`.
    pub counts: BTreeMap<Status, usize>,

    pub overall: Overall,
    pub duration_ms: u64,
    pub generated_at: DateTime<Utc>,
}

impl RunSummary {
    /// Whether the run exits zero under the given policy.
    pub fn exit_ok(&self, policy: &AcceptPolicy) -> bool {
        self.outcomes.iter().all(|o| policy.accepts(o.result.status))
    }

    /// Count for one status (0 when absent).
    pub fn count(&self, status: Status) -> usize {
        self.counts.get(&status).copied().unwrap_or(0)
    }
}

/// Statuses that make the overall-run indicator failing wherever they
/// appear, regardless of the configured exit policy.
const OVERALL_FAILING: [Status; 4] = [
    Status::Crashed,
    Status::Failed,
    Status::Error,
    Status::Missing,
];

/// Reduce the full outcome set to a [`RunSummary`].
pub fn summarize(
    run_id: &str,
    category: &str,
    outcomes: Vec<ItemOutcome>,
    duration: Duration,
) -> RunSummary {
    let mut counts: BTreeMap<Status, usize> = BTreeMap::new();
    for outcome in &outcomes {
        *counts.entry(outcome.result.status).or_insert(0) += 1;
    }

    let failing = outcomes
        .iter()
        .any(|o| OVERALL_FAILING.contains(&o.result.status));

    RunSummary {
        run_id: run_id.to_string(),
        category: category.to_string(),
        outcomes,
        counts,
        overall: if failing {
            Overall::Failing
        } else {
            Overall::Passing
        },
        duration_ms: duration.as_millis() as u64,
        generated_at: Utc::now(),
    }
}
