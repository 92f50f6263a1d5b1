//! Structural and range checks on the input files of one sub-volume.
use crate::record::ConfigRecord;
use crate::store::{find_group, DataStore, SourceFile};
use ndarray::Array1;
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use tracing::warn;

/// A single reason a sub-volume failed validation.
#[derive(Debug, Clone, PartialEq)]
pub enum Finding {
    /// The record itself breaks its invariants; nothing else is checked.
    InvalidConfig(String),
    SnapshotMismatch {
        requested: u32,
        configured: u32,
    },
    MissingFile {
        path: PathBuf,
        reason: String,
    },
    MissingGroup {
        path: PathBuf,
        group: String,
    },
    MissingDataset {
        path: PathBuf,
        group: String,
        dataset: String,
    },
    Unreadable {
        path: PathBuf,
        dataset: String,
        reason: String,
    },
    OutOfBounds {
        path: PathBuf,
        dataset: String,
        count: usize,
        low: Option<f64>,
        high: Option<f64>,
    },
}

fn bound(limit: Option<f64>) -> String {
    limit.map_or_else(|| "none".to_string(), |v| v.to_string())
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(reason) => write!(f, "Invalid configuration: {reason}"),
            Self::SnapshotMismatch {
                requested,
                configured,
            } => write!(
                f,
                "Snapshot {requested} requested but configuration is for snapshot {configured}"
            ),
            Self::MissingFile { path, reason } => {
                write!(f, "{} could not be opened: {reason}", path.display())
            }
            Self::MissingGroup { path, group } => {
                write!(f, "Group {group} not found in {}", path.display())
            }
            Self::MissingDataset {
                path,
                group,
                dataset,
            } => write!(f, "Dataset {group}/{dataset} not found in {}", path.display()),
            Self::Unreadable {
                path,
                dataset,
                reason,
            } => write!(f, "Dataset {dataset} in {} unreadable: {reason}", path.display()),
            Self::OutOfBounds {
                path,
                dataset,
                count,
                low,
                high,
            } => write!(
                f,
                "{count} values of {dataset} in {} outside [{}, {}]",
                path.display(),
                bound(*low),
                bound(*high)
            ),
        }
    }
}

/// Whether `value` lies within the inclusive bounds. A missing bound leaves
/// that side open; NaN never lies within a declared bound.
pub fn within(value: f64, low: Option<f64>, high: Option<f64>) -> bool {
    if low.is_none() && high.is_none() {
        return true;
    }
    low.map_or(true, |lo| value >= lo) && high.map_or(true, |hi| value <= hi)
}

pub fn count_out_of_bounds(values: &Array1<f64>, low: Option<f64>, high: Option<f64>) -> usize {
    values.iter().filter(|v| !within(**v, low, high)).count()
}

/// Collects every problem with the input files of `subvolume`.
pub fn inspect<S: DataStore>(
    store: &S,
    config: &ConfigRecord,
    snapshot: u32,
    subvolume: u32,
) -> Vec<Finding> {
    if let Err(e) = config.check() {
        return vec![Finding::InvalidConfig(e.to_string())];
    }
    let mut findings = vec![];
    if snapshot != config.snap {
        findings.push(Finding::SnapshotMismatch {
            requested: snapshot,
            configured: config.snap,
        });
    }

    let mut files: BTreeSet<&str> = config.selection.keys().map(String::as_str).collect();
    if let Some(redshift) = &config.file_redshift {
        files.insert(redshift.file.as_str());
    }

    for file in files {
        let path = config.input_path(subvolume, file);
        let source = match store.open(&path) {
            Ok(source) => source,
            Err(e) => {
                findings.push(Finding::MissingFile {
                    path,
                    reason: e.to_string(),
                });
                continue;
            }
        };
        if let Some(spec) = config.selection.get(file) {
            let entries = spec.entries().map(|(d, _, lo, hi)| (d, lo, hi));
            check_group(&source, &path, &spec.group, entries, &mut findings);
        }
        if let Some(redshift) = config.file_redshift.as_ref().filter(|r| r.file == file) {
            let entries = std::iter::once((redshift.dataset.as_str(), None, None));
            check_group(&source, &path, &redshift.group, entries, &mut findings);
        }
    }
    findings
}

fn check_group<'a, F: SourceFile>(
    source: &F,
    path: &std::path::Path,
    declared: &str,
    entries: impl Iterator<Item = (&'a str, Option<f64>, Option<f64>)>,
    findings: &mut Vec<Finding>,
) {
    let group = match find_group(source, declared) {
        Ok(Some(group)) => group,
        Ok(None) => {
            findings.push(Finding::MissingGroup {
                path: path.to_path_buf(),
                group: declared.to_string(),
            });
            return;
        }
        Err(e) => {
            findings.push(Finding::MissingFile {
                path: path.to_path_buf(),
                reason: e.to_string(),
            });
            return;
        }
    };
    let present = source.datasets(&group).unwrap_or_default();
    for (dataset, low, high) in entries {
        if !present.iter().any(|d| d == dataset) {
            findings.push(Finding::MissingDataset {
                path: path.to_path_buf(),
                group: group.clone(),
                dataset: dataset.to_string(),
            });
            continue;
        }
        if low.is_none() && high.is_none() {
            continue;
        }
        match source.read(&group, dataset) {
            Ok(column) => {
                let count = count_out_of_bounds(&column.to_f64(), low, high);
                if count > 0 {
                    findings.push(Finding::OutOfBounds {
                        path: path.to_path_buf(),
                        dataset: dataset.to_string(),
                        count,
                        low,
                        high,
                    });
                }
            }
            Err(e) => findings.push(Finding::Unreadable {
                path: path.to_path_buf(),
                dataset: dataset.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

/// Checks the input files of one sub-volume. Problems are reported, never
/// raised: the return value tells the caller whether to count a failure.
pub fn validate<S: DataStore>(
    store: &S,
    config: &ConfigRecord,
    snapshot: u32,
    subvolume: u32,
    verbose: bool,
) -> bool {
    let findings = inspect(store, config, snapshot, subvolume);
    if verbose {
        for finding in &findings {
            warn!(subvolume, "{finding}");
        }
    }
    findings.is_empty()
}
