//! Random subsampling of generated files into small test fixtures.
use crate::record::{ConfigRecord, OUTPUT_GROUP};
use crate::store::{Column, DataStore, SinkFile, SourceFile};
use color_eyre::eyre::{eyre, Result, WrapErr};
use rand::seq::index;
use rand::Rng;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{info, warn};

/// Number of rows drawn for `percentage`% of `total`.
///
/// Rounded to the nearest row, but never zero when both the percentage and
/// the row count are positive.
pub fn sample_size(total: usize, percentage: f64) -> usize {
    if total == 0 || percentage <= 0.0 {
        return 0;
    }
    let rows = (total as f64 * percentage / 100.0).round() as usize;
    rows.clamp(1, total)
}

/// Splits `rows` into `parts` sizes differing by at most one, the larger
/// ones first.
pub fn partition_sizes(rows: usize, parts: usize) -> Vec<usize> {
    if parts == 0 {
        return vec![];
    }
    let base = rows / parts;
    let remainder = rows % parts;
    (0..parts).map(|i| base + usize::from(i < remainder)).collect()
}

/// All generated columns of the listed sub-volumes, stacked in order.
struct Table {
    columns: BTreeMap<String, (Column, String)>,
    header: BTreeMap<String, f64>,
}

impl Table {
    fn rows(&self) -> usize {
        self.columns.values().next().map_or(0, |(c, _)| c.len())
    }
}

fn load_table<S: DataStore>(store: &S, config: &ConfigRecord, subvolumes: &[u32]) -> Result<Table> {
    let mut table = Table {
        columns: BTreeMap::new(),
        header: BTreeMap::new(),
    };
    for (i, subvolume) in subvolumes.iter().enumerate() {
        let path = config.output_path(*subvolume);
        let source = store
            .open(&path)
            .wrap_err_with(|| format!("Generated file {} is not available", path.display()))?;
        let names = source.datasets(OUTPUT_GROUP)?;
        if i == 0 {
            table.header = source.attrs(OUTPUT_GROUP)?;
            for name in names {
                let column = source.read(OUTPUT_GROUP, &name)?;
                let unit = source.unit(OUTPUT_GROUP, &name)?.unwrap_or_default();
                table.columns.insert(name, (column, unit));
            }
            continue;
        }
        if names.len() != table.columns.len() || names.iter().any(|n| !table.columns.contains_key(n)) {
            return Err(eyre!(
                "{} does not share the columns of the other generated files",
                path.display()
            ));
        }
        for name in names {
            let column = source.read(OUTPUT_GROUP, &name)?;
            if let Some((stacked, _)) = table.columns.get_mut(&name) {
                *stacked = stacked.append(&column)?;
            }
        }
    }
    Ok(table)
}

/// Removes test files numbered `file_count` and up left by an earlier run
/// with more files. Test files are always numbered without gaps.
fn remove_stale_samples<S: DataStore>(
    store: &S,
    config: &ConfigRecord,
    file_count: usize,
) -> Result<()> {
    let mut index = file_count;
    loop {
        let path = config.test_file_path(index);
        if store.open(&path).is_err() {
            return Ok(());
        }
        store.remove(&path)?;
        index += 1;
    }
}

/// Draws the sample and writes it over `file_count` files. Returns the
/// written paths with their row counts.
pub fn write_samples<S: DataStore, R: Rng + ?Sized>(
    store: &S,
    config: &ConfigRecord,
    subvolumes: &[u32],
    percentage: f64,
    file_count: usize,
    rng: &mut R,
) -> Result<Vec<(PathBuf, usize)>> {
    if !(0.0..=100.0).contains(&percentage) {
        return Err(eyre!("Percentage {percentage} is outside [0, 100]"));
    }
    if file_count == 0 {
        return Err(eyre!("At least one test file is required"));
    }
    if subvolumes.is_empty() {
        return Err(eyre!("No sub-volumes to sample from"));
    }
    let table = load_table(store, config, subvolumes)?;
    let total = table.rows();
    if total == 0 {
        return Err(eyre!("Generated files hold no rows"));
    }

    let mut picked = index::sample(rng, total, sample_size(total, percentage)).into_vec();
    picked.sort_unstable();

    remove_stale_samples(store, config, file_count)?;
    let mut written = Vec::with_capacity(file_count);
    let mut start = 0;
    for (i, size) in partition_sizes(picked.len(), file_count).into_iter().enumerate() {
        let rows = &picked[start..start + size];
        start += size;
        let path = config.test_file_path(i);
        let mut sink = store.create(&path)?;
        for (name, (column, unit)) in &table.columns {
            sink.write(OUTPUT_GROUP, name, &column.select(rows), unit)?;
        }
        for (name, value) in &table.header {
            sink.write_attr(OUTPUT_GROUP, name, *value)?;
        }
        sink.close()?;
        written.push((path, size));
    }
    Ok(written)
}

/// Writes the reduced test files for `subvolumes`, reporting instead of
/// raising.
pub fn sample<S: DataStore>(
    store: &S,
    config: &ConfigRecord,
    subvolumes: &[u32],
    percentage: f64,
    file_count: usize,
    verbose: bool,
) -> bool {
    let mut rng = rand::thread_rng();
    match write_samples(store, config, subvolumes, percentage, file_count, &mut rng) {
        Ok(written) => {
            if verbose {
                for (path, rows) in &written {
                    info!(rows, "Wrote test file {}", path.display());
                }
            }
            true
        }
        Err(e) => {
            if verbose {
                warn!("Test file generation failed: {e:#}");
            }
            false
        }
    }
}
