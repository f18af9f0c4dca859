//! Status taxonomy shared by every analysis category.
//!
//! The taxonomy and its severity ordering are a cross-cutting policy of the
//! core: classifiers report sub-signals and call [`Status::reduce`] instead
//! of re-inventing precedence rules per category.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Terminal status of one work item, category-independent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Passed,
    PartialPass,
    Warn,
    Unresolved,
    Failed,
    Crashed,
    /// The workarea log shows the tool still in flight. Terminal for this
    /// run: the orchestrator inspects workareas, it does not wait on
    /// foreign tools.
    Running,
    /// Executor-level failure after the retry budget was exhausted.
    Error,
    /// The expected report section was absent from the output.
    NotFound,
    /// Output was present but carried nothing to evaluate.
    NoData,
    /// The execution target itself does not exist or is inaccessible.
    Missing,
    Unknown,
}

impl Status {
    /// Upper-case name as it appears in reports and journals.
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Passed => "PASSED",
            Status::PartialPass => "PARTIAL_PASS",
            Status::Warn => "WARN",
            Status::Unresolved => "UNRESOLVED",
            Status::Failed => "FAILED",
            Status::Crashed => "CRASHED",
            Status::Running => "RUNNING",
            Status::Error => "ERROR",
            Status::NotFound => "NOT_FOUND",
            Status::NoData => "NO_DATA",
            Status::Missing => "MISSING",
            Status::Unknown => "UNKNOWN",
        }
    }

    /// Severity rank used when reducing several sub-signals to one status.
    ///
    /// `CRASHED > FAILED > RUNNING > UNRESOLVED > PARTIAL_PASS > WARN > PASSED`.
    /// `ERROR` sits above `CRASHED` (an executor giving up outranks anything
    /// a log can say). The no-evaluation statuses rank zero; they are
    /// handled by the short-circuit in [`Status::reduce`], not by rank.
    fn severity(&self) -> u8 {
        match self {
            Status::Error => 8,
            Status::Crashed => 7,
            Status::Failed => 6,
            Status::Running => 5,
            Status::Unresolved => 4,
            Status::PartialPass => 3,
            Status::Warn => 2,
            Status::Passed => 1,
            Status::NotFound | Status::NoData | Status::Missing | Status::Unknown => 0,
        }
    }

    /// Reduce several sub-signals to one overall status.
    ///
    /// `MISSING`/`NOT_FOUND`/`NO_DATA` short-circuit before severity is
    /// consulted: if there was nothing to evaluate, the severity of the
    /// other signals is moot. Among the short-circuit statuses themselves,
    /// `MISSING` outranks `NOT_FOUND` outranks `NO_DATA`.
    pub fn reduce(signals: &[Status]) -> Status {
        if signals.is_empty() {
            return Status::NoData;
        }
        for short in [Status::Missing, Status::NotFound, Status::NoData] {
            if signals.contains(&short) {
                return short;
            }
        }
        let worst = signals
            .iter()
            .copied()
            .max_by_key(|s| s.severity())
            .unwrap_or(Status::Unknown);
        if worst.severity() == 0 {
            Status::Unknown
        } else {
            worst
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The statuses a finished run may contain and still exit zero.
///
/// The source tooling re-derived this per category; here it is one explicit
/// configuration value applied uniformly to the whole run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptPolicy {
    rejected: BTreeSet<Status>,
}

impl AcceptPolicy {
    /// Build a policy from an explicit rejected-status set.
    pub fn new(rejected: impl IntoIterator<Item = Status>) -> Self {
        Self {
            rejected: rejected.into_iter().collect(),
        }
    }

    /// Strict policy: additionally rejects `MISSING` and `NO_DATA`.
    pub fn strict() -> Self {
        let mut policy = Self::default();
        policy.rejected.insert(Status::Missing);
        policy.rejected.insert(Status::NoData);
        policy
    }

    /// Whether a single item status is acceptable.
    pub fn accepts(&self, status: Status) -> bool {
        !self.rejected.contains(&status)
    }

    /// Statuses this policy rejects, in taxonomy order.
    pub fn rejected(&self) -> impl Iterator<Item = Status> + '_ {
        self.rejected.iter().copied()
    }
}

impl Default for AcceptPolicy {
    /// Reject `ERROR`, `FAILED` and `CRASHED`; everything else (including
    /// `MISSING`) is acceptable for the process exit code.
    fn default() -> Self {
        Self::new([Status::Error, Status::Failed, Status::Crashed])
    }
}
