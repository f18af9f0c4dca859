//! Result classifiers: one per analysis category.
//!
//! A classifier turns the raw text the analysis command produced for one
//! work item into a structured [`Classification`]. Classifiers are pure
//! functions of their input and must never fail on malformed text —
//! absent markers map to `NOT_FOUND` / `NO_DATA`, never to a panic.

use crate::status::Status;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Structured interpretation of one job's raw output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Classification {
    /// Overall status after severity reduction of the sub-signals.
    pub status: Status,

    /// Human-readable one-line summary.
    pub details: String,

    /// Tool-reported runtime as printed in the log, if present.
    pub runtime: Option<String>,

    /// Free-form flag set (scenario names, waiver notes), if present.
    pub flags: Option<String>,
}

/// Interprets the raw output of one analysis category.
pub trait Classifier: Send + Sync {
    fn classify(&self, raw: &str) -> Classification;
}

/// A named analysis category: selects the command mode argument and the
/// classifier that interprets its output.
pub struct Category {
    pub name: &'static str,

    /// Value handed to the analysis command after `--mode`.
    pub mode_arg: &'static str,

    /// One-line description for the CLI listing.
    pub describe: &'static str,

    pub classifier: Box<dyn Classifier>,
}

/// Look up a category by name.
pub fn category(name: &str) -> Option<Category> {
    match name {
        "timing" => Some(Category {
            name: "timing",
            mode_arg: "sta",
            describe: "static timing analysis summary (path-group slack)",
            classifier: Box::new(TimingClassifier::new()),
        }),
        "drc" => Some(Category {
            name: "drc",
            mode_arg: "drc",
            describe: "design-rule scan report (violation and waiver counts)",
            classifier: Box::new(DrcClassifier::new()),
        }),
        "sim" => Some(Category {
            name: "sim",
            mode_arg: "sim",
            describe: "simulation regression log (per-test verdicts)",
            classifier: Box::new(SimClassifier::new()),
        }),
        _ => None,
    }
}

/// Names of all known categories, in listing order.
pub fn category_names() -> &'static [&'static str] {
    &["timing", "drc", "sim"]
}

/// Markers that mean the tool died rather than finished, in any category.
fn crash_marker() -> Regex {
    Regex::new(r"(?im)^.*(fatal error|internal error|segmentation fault|core dumped).*$")
        .expect("static pattern")
}

// ---------------------------------------------------------------------------
// timing
// ---------------------------------------------------------------------------

/// Classifier for static timing analysis summaries.
///
/// Expected shape:
/// ```text
/// Timing Analysis Summary
///   group setup: worst slack -0.042 (VIOLATED)
///   group hold: worst slack 0.013 (MET)
/// Runtime: 00:12:31
/// Scenarios: ss_0p72v_125c
/// ```
pub struct TimingClassifier {
    group_re: Regex,
    runtime_re: Regex,
    scenarios_re: Regex,
    crash_re: Regex,
}

/// Slack below this (but non-negative) classifies a path group as WARN.
const SLACK_WARN_MARGIN: f64 = 0.050;

impl TimingClassifier {
    pub fn new() -> Self {
        Self {
            group_re: Regex::new(r"(?m)^\s*group\s+(\S+):\s+worst slack\s+(-?\d+(?:\.\d+)?)")
                .expect("static pattern"),
            runtime_re: Regex::new(r"(?m)^Runtime:\s*(\S.*)$").expect("static pattern"),
            scenarios_re: Regex::new(r"(?m)^Scenarios:\s*(\S.*)$").expect("static pattern"),
            crash_re: crash_marker(),
        }
    }
}

impl Default for TimingClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier for TimingClassifier {
    fn classify(&self, raw: &str) -> Classification {
        if raw.trim().is_empty() {
            return Classification {
                status: Status::NoData,
                details: "empty analysis output".to_string(),
                runtime: None,
                flags: None,
            };
        }

        let runtime = self
            .runtime_re
            .captures(raw)
            .map(|c| c[1].trim().to_string());
        let flags = self
            .scenarios_re
            .captures(raw)
            .map(|c| c[1].trim().to_string());

        if let Some(m) = self.crash_re.find(raw) {
            return Classification {
                status: Status::Crashed,
                details: m.as_str().trim().to_string(),
                runtime,
                flags,
            };
        }

        if raw.contains("analysis in progress") {
            return Classification {
                status: Status::Running,
                details: "timing analysis still in progress".to_string(),
                runtime,
                flags,
            };
        }

        if !raw.contains("Timing Analysis Summary") {
            return Classification {
                status: Status::NotFound,
                details: "no timing summary section in output".to_string(),
                runtime,
                flags,
            };
        }

        let mut signals = Vec::new();
        let mut worst: Option<(String, f64)> = None;
        for caps in self.group_re.captures_iter(raw) {
            let group = caps[1].to_string();
            let slack: f64 = caps[2].parse().unwrap_or(0.0);
            signals.push(if slack < 0.0 {
                Status::Failed
            } else if slack < SLACK_WARN_MARGIN {
                Status::Warn
            } else {
                Status::Passed
            });
            if worst.as_ref().map(|(_, w)| slack < *w).unwrap_or(true) {
                worst = Some((group, slack));
            }
        }

        match worst {
            Some((group, slack)) => Classification {
                status: Status::reduce(&signals),
                details: format!(
                    "{} path group(s), worst slack {:.3} ({})",
                    signals.len(),
                    slack,
                    group
                ),
                runtime,
                flags,
            },
            None => Classification {
                status: Status::NoData,
                details: "timing summary present but no path groups reported".to_string(),
                runtime,
                flags,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// drc
// ---------------------------------------------------------------------------

/// Classifier for design-rule scan reports.
pub struct DrcClassifier {
    total_re: Regex,
    waived_re: Regex,
    elapsed_re: Regex,
    crash_re: Regex,
}

impl DrcClassifier {
    pub fn new() -> Self {
        Self {
            total_re: Regex::new(r"(?m)^Total violations:\s*(\d+)").expect("static pattern"),
            waived_re: Regex::new(r"(?m)^Waived:\s*(\d+)").expect("static pattern"),
            elapsed_re: Regex::new(r"(?m)^Elapsed:\s*(\S.*)$").expect("static pattern"),
            crash_re: crash_marker(),
        }
    }
}

impl Default for DrcClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier for DrcClassifier {
    fn classify(&self, raw: &str) -> Classification {
        if raw.trim().is_empty() {
            return Classification {
                status: Status::NoData,
                details: "empty analysis output".to_string(),
                runtime: None,
                flags: None,
            };
        }

        let runtime = self
            .elapsed_re
            .captures(raw)
            .map(|c| c[1].trim().to_string());

        if let Some(m) = self.crash_re.find(raw) {
            return Classification {
                status: Status::Crashed,
                details: m.as_str().trim().to_string(),
                runtime,
                flags: None,
            };
        }

        if raw.contains("scan in progress") {
            return Classification {
                status: Status::Running,
                details: "rule scan still in progress".to_string(),
                runtime,
                flags: None,
            };
        }

        if !raw.contains("DRC Scan Report") {
            return Classification {
                status: Status::NotFound,
                details: "no DRC report section in output".to_string(),
                runtime,
                flags: None,
            };
        }

        let total: Option<u64> = self
            .total_re
            .captures(raw)
            .and_then(|c| c[1].parse().ok());
        let waived: u64 = self
            .waived_re
            .captures(raw)
            .and_then(|c| c[1].parse().ok())
            .unwrap_or(0);

        let flags = (waived > 0).then(|| format!("waived={waived}"));

        match total {
            None => Classification {
                status: Status::NoData,
                details: "DRC report present but no violation total".to_string(),
                runtime,
                flags,
            },
            Some(0) => Classification {
                status: Status::Passed,
                details: "clean, 0 violations".to_string(),
                runtime,
                flags,
            },
            Some(total) if total.saturating_sub(waived) == 0 => Classification {
                status: Status::Warn,
                details: format!("all {total} violation(s) waived"),
                runtime,
                flags,
            },
            Some(total) => Classification {
                status: Status::Failed,
                details: format!(
                    "{} open violation(s) of {} total",
                    total.saturating_sub(waived),
                    total
                ),
                runtime,
                flags,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// sim
// ---------------------------------------------------------------------------

/// Classifier for simulation regression logs with per-test verdict lines.
pub struct SimClassifier {
    test_re: Regex,
    finish_re: Regex,
    crash_re: Regex,
}

impl SimClassifier {
    pub fn new() -> Self {
        Self {
            test_re: Regex::new(r"(?m)^TEST\s+(\S+)\s+(PASSED|FAILED|UNRESOLVED|WARN)\s*$")
                .expect("static pattern"),
            finish_re: Regex::new(r"(?m)^Simulation finished in\s+(\S+)").expect("static pattern"),
            crash_re: crash_marker(),
        }
    }
}

impl Default for SimClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier for SimClassifier {
    fn classify(&self, raw: &str) -> Classification {
        if raw.trim().is_empty() {
            return Classification {
                status: Status::NoData,
                details: "empty analysis output".to_string(),
                runtime: None,
                flags: None,
            };
        }

        let runtime = self.finish_re.captures(raw).map(|c| c[1].to_string());

        if let Some(m) = self.crash_re.find(raw) {
            return Classification {
                status: Status::Crashed,
                details: m.as_str().trim().to_string(),
                runtime,
                flags: None,
            };
        }

        let mut signals = Vec::new();
        let mut passed = 0usize;
        let mut failed = 0usize;
        let mut unresolved = 0usize;
        let mut warned = 0usize;
        for caps in self.test_re.captures_iter(raw) {
            let signal = match &caps[2] {
                "PASSED" => {
                    passed += 1;
                    Status::Passed
                }
                "FAILED" => {
                    failed += 1;
                    Status::Failed
                }
                "UNRESOLVED" => {
                    unresolved += 1;
                    Status::Unresolved
                }
                _ => {
                    warned += 1;
                    Status::Warn
                }
            };
            signals.push(signal);
        }

        if signals.is_empty() {
            let status = if raw.contains("Simulation") {
                Status::NoData
            } else {
                Status::NotFound
            };
            return Classification {
                status,
                details: "no test verdict lines in output".to_string(),
                runtime,
                flags: None,
            };
        }

        let total = passed + failed + unresolved + warned;

        // A verdict list without the finish marker means the regression is
        // still going; that outranks any per-test verdict except FAILED.
        if runtime.is_none() {
            signals.push(Status::Running);
        }

        Classification {
            status: Status::reduce(&signals),
            details: format!(
                "{total} test(s): {passed} passed, {failed} failed, {unresolved} unresolved, {warned} warned"
            ),
            runtime,
            flags: None,
        }
    }
}
