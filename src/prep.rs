//! Runs the enabled preparation steps over the sub-volumes of one snapshot.
use crate::generate::generate;
use crate::record::ConfigRecord;
use crate::sample::sample;
use crate::store::DataStore;
use crate::validate::validate;
use color_eyre::eyre::Result;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};

/// Which steps run and how chatty they are.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrepOptions {
    pub verbose: bool,
    pub validate: bool,
    pub generate: bool,
    pub sample: bool,
    /// Percentage of rows kept in the test files.
    pub percentage: f64,
    /// Number of test files.
    pub file_count: usize,
}

impl Default for PrepOptions {
    fn default() -> Self {
        Self {
            verbose: true,
            validate: true,
            generate: true,
            sample: false,
            percentage: 1.0,
            file_count: 2,
        }
    }
}

/// Failure counts per step; `None` when the step did not run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrepReport {
    pub processed: usize,
    pub validation_failures: Option<usize>,
    pub generation_failures: Option<usize>,
    pub sampling_succeeded: Option<bool>,
}

impl PrepReport {
    pub fn is_success(&self) -> bool {
        self.validation_failures.unwrap_or(0) == 0
            && self.generation_failures.unwrap_or(0) == 0
            && self.sampling_succeeded.unwrap_or(true)
    }
}

fn progress(len: usize, message: &'static str) -> Result<ProgressBar> {
    Ok(ProgressBar::new(len as u64)
        .with_style(ProgressStyle::with_template(
            "{msg}: {bar:40.cyan/blue} [{human_pos}/{human_len} - {percent}%] (ETA: {eta}, Duration: {elapsed})",
        )?)
        .with_message(message))
}

/// Applies `step` to every sub-volume and counts the failures.
fn count_failures(
    subvolumes: &[u32],
    message: &'static str,
    mut step: impl FnMut(u32) -> bool,
) -> Result<usize> {
    let bar = progress(subvolumes.len(), message)?;
    let mut failures = 0;
    for subvolume in subvolumes {
        if !step(*subvolume) {
            failures += 1;
        }
        bar.inc(1);
    }
    bar.finish();
    Ok(failures)
}

/// Runs the steps enabled in `options` for every sub-volume of `config`.
///
/// A failing sub-volume never stops the others; failures are only counted.
pub fn run_prep<S: DataStore>(
    store: &S,
    config: &ConfigRecord,
    options: &PrepOptions,
) -> Result<PrepReport> {
    let subvolumes = &config.subvolumes;
    let mut report = PrepReport {
        processed: subvolumes.len(),
        ..PrepReport::default()
    };

    if options.validate {
        let failures = count_failures(subvolumes, "Validating", |sv| {
            validate(store, config, config.snap, sv, options.verbose)
        })?;
        if failures == 0 {
            println!(
                "SUCCESS: All {} subvolumes have valid hdf5 files.",
                subvolumes.len()
            );
        } else {
            println!("{failures} of {} subvolumes failed validation.", subvolumes.len());
        }
        report.validation_failures = Some(failures);
    }

    if options.generate {
        let failures = count_failures(subvolumes, "Generating", |sv| {
            generate(store, config, sv, options.verbose)
        })?;
        if failures == 0 {
            println!(
                "SUCCESS: All {} hdf5 files have been generated.",
                subvolumes.len()
            );
        } else {
            println!("{failures} of {} hdf5 files failed to generate.", subvolumes.len());
        }
        report.generation_failures = Some(failures);
    }

    if options.sample {
        let ok = sample(
            store,
            config,
            subvolumes,
            options.percentage,
            options.file_count,
            options.verbose,
        );
        if ok {
            println!(
                "SUCCESS: All {} test files have been generated.",
                options.file_count
            );
        }
        report.sampling_succeeded = Some(ok);
    }

    Ok(report)
}
