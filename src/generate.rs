//! Extraction of the declared fields into one simplified file per sub-volume.
use crate::record::{ConfigRecord, OUTPUT_GROUP};
use crate::store::{find_group, Column, DataStore, SinkFile, SourceFile};
use color_eyre::eyre::{eyre, Result, WrapErr};
use tracing::{info, warn};

/// Unit recorded for line luminosities that carry none in the source.
const LINE_UNIT: &str = "1e40 erg/s";

struct Field {
    name: String,
    column: Column,
    unit: String,
}

fn open_group<S: DataStore>(
    store: &S,
    config: &ConfigRecord,
    subvolume: u32,
    file: &str,
    declared: &str,
) -> Result<(S::Source, String)> {
    let path = config.input_path(subvolume, file);
    let source = store
        .open(&path)
        .wrap_err_with(|| format!("Unable to open {}", path.display()))?;
    let group = find_group(&source, declared)?
        .ok_or_else(|| eyre!("Group {declared} not found in {}", path.display()))?;
    Ok((source, group))
}

fn read_fields<S: DataStore>(
    store: &S,
    config: &ConfigRecord,
    subvolume: u32,
) -> Result<Vec<Field>> {
    let mut fields: Vec<Field> = vec![];
    let lines = config.line_datasets();
    for (file, spec) in &config.file_props {
        let (source, group) = open_group(store, config, subvolume, file, &spec.group)?;
        for (dataset, unit) in spec.datasets.iter().zip(&spec.units) {
            let column = source
                .read(&group, dataset)
                .wrap_err_with(|| format!("Unable to read {group}/{dataset} from {file}"))?;
            fields.push(Field {
                name: dataset.clone(),
                column,
                unit: unit.clone(),
            });
        }
        let present = source.datasets(&group)?;
        for line in &lines {
            if !present.contains(line) || fields.iter().any(|f| &f.name == line) {
                continue;
            }
            fields.push(Field {
                name: line.clone(),
                column: source.read(&group, line)?,
                unit: source
                    .unit(&group, line)?
                    .unwrap_or_else(|| LINE_UNIT.to_string()),
            });
        }
    }
    Ok(fields)
}

fn read_redshift<S: DataStore>(
    store: &S,
    config: &ConfigRecord,
    subvolume: u32,
) -> Result<Option<f64>> {
    let Some(spec) = &config.file_redshift else {
        return Ok(None);
    };
    let (source, group) = open_group(store, config, subvolume, &spec.file, &spec.group)?;
    let values = source.read(&group, &spec.dataset)?.to_f64();
    Ok(values.first().copied())
}

/// Writes the generated file of `subvolume` and returns its row count.
///
/// An unreadable redshift only drops the `redshift` header attribute.
pub fn write_subvolume<S: DataStore>(
    store: &S,
    config: &ConfigRecord,
    subvolume: u32,
    verbose: bool,
) -> Result<usize> {
    config.check()?;
    let fields = read_fields(store, config, subvolume)?;
    let rows = fields.first().map_or(0, |f| f.column.len());
    if let Some(bad) = fields.iter().find(|f| f.column.len() != rows) {
        return Err(eyre!(
            "Dataset {} has {} rows, expected {rows}",
            bad.name,
            bad.column.len()
        ));
    }
    let redshift = match read_redshift(store, config, subvolume) {
        Ok(z) => z,
        Err(e) => {
            if verbose {
                warn!(subvolume, "Redshift not recorded: {e:#}");
            }
            None
        }
    };

    let mut sink = store.create(&config.output_path(subvolume))?;
    for field in &fields {
        sink.write(OUTPUT_GROUP, &field.name, &field.column, &field.unit)?;
    }
    let header = [
        ("h0", config.h0),
        ("omega0", config.omega0),
        ("omegab", config.omegab),
        ("lambda0", config.lambda0),
        ("boxside", config.boxside),
        ("mp", config.mp),
        ("snap", config.snap as f64),
    ];
    for (name, value) in header {
        sink.write_attr(OUTPUT_GROUP, name, value)?;
    }
    if let Some(z) = redshift {
        sink.write_attr(OUTPUT_GROUP, "redshift", z)?;
    }
    sink.close()?;
    Ok(rows)
}

/// Generates the file of one sub-volume, reporting instead of raising. A
/// failed attempt leaves no output file behind.
pub fn generate<S: DataStore>(
    store: &S,
    config: &ConfigRecord,
    subvolume: u32,
    verbose: bool,
) -> bool {
    let path = config.output_path(subvolume);
    match write_subvolume(store, config, subvolume, verbose) {
        Ok(rows) => {
            if verbose {
                info!(subvolume, rows, "Generated {}", path.display());
            }
            true
        }
        Err(e) => {
            if verbose {
                warn!(subvolume, "Generation failed: {e:#}");
            }
            if let Err(e) = store.remove(&path) {
                warn!("Unable to remove partial output {}: {e}", path.display());
            }
            false
        }
    }
}
