//! Work-item registry: loading and filtering the design-unit table.

use crate::error::RegistryError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// One independently analyzable design unit.
///
/// Immutable once loaded; lifetime is a single run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkItem {
    /// Unit identifier, unique within a run.
    pub unit: String,

    /// Grouping tag (block, subsystem, release train).
    pub group: String,

    /// Workarea path the analysis command is pointed at.
    pub target: PathBuf,

    /// Remaining registry columns, display only (release date, owner, ...).
    pub meta: Vec<String>,
}

/// Column layout of the registry source.
///
/// Column order and semantics are configuration, not parsing logic: the
/// same loader reads any delimited table as long as the three required
/// columns are mapped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryFormat {
    pub delimiter: char,
    pub unit_col: usize,
    pub group_col: usize,
    pub target_col: usize,
}

impl Default for RegistryFormat {
    fn default() -> Self {
        Self {
            delimiter: '\t',
            unit_col: 0,
            group_col: 1,
            target_col: 2,
        }
    }
}

/// Load the registry from a delimited text file.
///
/// One row per work item. Blank lines and `#` comments are skipped.
/// Row order is preserved; it is the order the scheduler dispatches in and
/// the order of the final report.
pub fn load(path: &Path, format: &RegistryFormat) -> Result<Vec<WorkItem>, RegistryError> {
    let content = std::fs::read_to_string(path).map_err(|source| RegistryError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&content, format)
}

fn parse(content: &str, format: &RegistryFormat) -> Result<Vec<WorkItem>, RegistryError> {
    let required = format
        .unit_col
        .max(format.group_col)
        .max(format.target_col);

    let mut items = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for (lineno, raw) in content.lines().enumerate() {
        let line = lineno + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = raw.split(format.delimiter).map(str::trim).collect();
        if fields.len() <= required {
            return Err(RegistryError::Malformed {
                line,
                reason: format!(
                    "expected at least {} columns, found {}",
                    required + 1,
                    fields.len()
                ),
            });
        }

        let unit = fields[format.unit_col].to_string();
        if unit.is_empty() {
            return Err(RegistryError::Malformed {
                line,
                reason: "empty unit identifier".to_string(),
            });
        }
        if !seen.insert(unit.clone()) {
            return Err(RegistryError::DuplicateUnit { unit, line });
        }

        let mapped = [format.unit_col, format.group_col, format.target_col];
        let meta = fields
            .iter()
            .enumerate()
            .filter(|(i, _)| !mapped.contains(i))
            .map(|(_, f)| f.to_string())
            .collect();

        items.push(WorkItem {
            unit,
            group: fields[format.group_col].to_string(),
            target: PathBuf::from(fields[format.target_col]),
            meta,
        });
    }

    Ok(items)
}

/// Filter the loaded registry by group and/or unit, preserving order.
///
/// Empty filters return the input unmodified. A filter value that matches
/// nothing is an error (see [`RegistryError`]).
pub fn filter(
    items: Vec<WorkItem>,
    group: Option<&str>,
    unit: Option<&str>,
) -> Result<Vec<WorkItem>, RegistryError> {
    let mut filtered = items;

    if let Some(group) = group {
        filtered.retain(|item| item.group == group);
        if filtered.is_empty() {
            return Err(RegistryError::GroupNotFound(group.to_string()));
        }
    }

    if let Some(unit) = unit {
        filtered.retain(|item| item.unit == unit);
        if filtered.is_empty() {
            return Err(RegistryError::UnitNotFound(unit.to_string()));
        }
    }

    Ok(filtered)
}
