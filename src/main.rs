//! # nebprep
//!
//! Semi-analytic galaxy catalogues come out of the models in whatever shape
//! the model likes. The emission line modelling downstream wants one shape.
//!
//! nebprep takes the HDF5 outputs of Galform and Shark runs, checks that they
//! look the way the configuration of the run says they should, extracts the
//! fields the emission line code needs into one simplified file per
//! sub-volume, and draws small random subsets of those files for testing. It
//! also writes and submits the SLURM jobs that do all of this across every
//! snapshot and sub-volume of a simulation.
//!
//! ## Installation
//!
//! nebprep is written in Rust and needs the HDF5 library installed on the
//! system. From within the repository run
//!
//! ```bash
//! cargo install --path .
//! ```
//!
//! ## Use
//!
//! ```txt
//! nebprep --config/-c /path/to/plan.yml <command>
//! ```
//!
//! - `new` writes a template plan.
//! - `prep` validates/generates/samples every simulation of the plan directly.
//! - `submit` writes one job script per simulation snapshot and submits it
//!   (`--dry-run` only writes the scripts).
//! - `check` reports which jobs are running, finished, failed or missing.
//! - `clean` lists the scripts and logs of jobs no longer queued; `--delete`
//!   removes them.
//! - `run` prepares a single snapshot. This is what the job scripts call:
//!
//! ```txt
//! nebprep run --sim SharkSU_2 --snap 104 --subvols 0-63 [--path DIR --output_path DIR] [--ending .h5]
//! ```
//!
//! With `--path` the sub-volume list may be left out: every sub-volume
//! directory under the path is prepared. The cosmology stored in the
//! `Parameters` group of the galaxy files then replaces the tabulated one.
//!
//! - `dump-config` resolves a simulation under explicit directories and
//!   writes its `config.json` to the output directory.
//!
//! ### Plan
//!
//! ```yaml
//! environment: cluster      # or local: only the input root changes
//! host: taurus              # or cosma: SLURM resource conventions
//! submit_jobs: true
//! options:
//!   verbose: true
//!   validate: true
//!   generate: true
//!   sample: false
//!   percentage: 1.0
//!   file_count: 2
//! scheduler:
//!   submit_command: sbatch
//!   queue_command: [squeue, --me, --noheader, --format=%j]
//!   script_dir: slurm/scripts
//!   log_dir: slurm/logs
//!   program: nebprep
//! simulations:
//!   - sim: SharkSU_1
//!     snapshots: [104, 98]
//!     subvolumes: [0, 1, 2]
//! ```
//!
//! Supported simulations are `GP20cosma`, `GP20SU_{1,2}`,
//! `GP20UNIT1Gpc_{fnl0,fnl100}`, `SharkSU_{1,2}` and
//! `SharkUNIT1Gpc_{fnl0,fnl100}`. Anything else stops the program.
//!
//! ### Output Format
//!
//! ```txt
//! <outroot><ivol>/gne_input.hdf5
//! |---- data - h0, omega0, omegab, lambda0, boxside, mp, snap, redshift
//! |    |---- <field>(dset) - units
//! ```
//!
//! Test files share the format and live in `<snapshot dir>/test_files/`.
mod config;
mod generate;
mod jobs;
mod logging;
#[cfg(test)]
mod memory;
mod prep;
mod reader;
mod record;
mod registry;
mod sample;
mod store;
mod validate;
mod writer;

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use color_eyre::eyre::{eyre, Result};
use config::Config;
use human_bytes::human_bytes;
use jobs::{Host, JobState};
use prep::{run_prep, PrepOptions};
use reader::Hdf5Store;
use record::{ConfigRecord, Environment};
use registry::{adopt_stored_cosmology, discover_subvolumes, resolve, resolve_from_path};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const RULE: &str = "-------------------------------------------------------------";

/// Parses `0,1,5-9` style sub-volume lists. Ranges are inclusive.
fn parse_subvolumes(text: &str) -> Result<Vec<u32>> {
    let mut subvolumes = vec![];
    for part in text.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((lo, hi)) => {
                let (lo, hi): (u32, u32) = (lo.trim().parse()?, hi.trim().parse()?);
                if lo > hi {
                    return Err(eyre!("Empty sub-volume range {part}"));
                }
                subvolumes.extend(lo..=hi);
            }
            None => subvolumes.push(part.parse()?),
        }
    }
    if subvolumes.is_empty() {
        return Err(eyre!("No sub-volumes given"));
    }
    Ok(subvolumes)
}

fn generated_bytes(config: &ConfigRecord) -> u64 {
    config
        .subvolumes
        .iter()
        .filter_map(|sv| config.output_path(*sv).metadata().ok())
        .map(|m| m.len())
        .sum()
}

/// Prepares one snapshot. Returns whether every step succeeded.
fn prepare(config: &ConfigRecord, options: &PrepOptions) -> Result<bool> {
    println!(
        "Preparing {} snapshot {} ({} subvolumes)...",
        config.simulation,
        config.snap,
        config.subvolumes.len()
    );
    let report = run_prep(&Hdf5Store, config, options)?;
    if options.generate {
        let dump = config.save_json(&config.snapshot_dir())?;
        println!("Configuration written to {}", dump.display());
        println!(
            "Generated data: {}",
            human_bytes(generated_bytes(config) as f64)
        );
    }
    Ok(report.is_success())
}

fn run_command(args: &ArgMatches) -> Result<bool> {
    let sim = args
        .get_one::<String>("sim")
        .ok_or_else(|| eyre!("--sim is required"))?;
    let snap = *args
        .get_one::<u32>("snap")
        .ok_or_else(|| eyre!("--snap is required"))?;
    let listed = args
        .get_one::<String>("subvols")
        .map(|list| parse_subvolumes(list))
        .transpose()?;
    let ending = args.get_one::<String>("ending").map(String::as_str);

    let config = if let Some(path) = args.get_one::<String>("path") {
        let output_path = args
            .get_one::<String>("output_path")
            .ok_or_else(|| eyre!("--output_path is required together with --path"))?;
        let subvolumes = listed.unwrap_or_default();
        let mut config = resolve_from_path(sim, snap, &subvolumes, path, output_path, ending)?;
        if config.subvolumes.is_empty() {
            config.subvolumes = discover_subvolumes(&config)?;
            info!("Found {} subvolumes under {path}", config.subvolumes.len());
        }
        match adopt_stored_cosmology(&Hdf5Store, &mut config) {
            Ok(keys) if !keys.is_empty() => info!("Cosmology read from the run: {}", keys.join(", ")),
            Ok(_) => {}
            Err(e) => warn!("Keeping tabulated cosmology: {e:#}"),
        }
        config
    } else {
        let subvolumes = listed.ok_or_else(|| eyre!("--subvols is required without --path"))?;
        let environment: Environment = args
            .get_one::<String>("env")
            .map_or(Ok(Environment::Cluster), |e| e.parse())?;
        let mut config = resolve(sim, snap, &subvolumes, None, environment)?;
        if let Some(ending) = ending {
            config.ending = Some(ending.to_string());
        }
        config
    };

    let options = PrepOptions {
        verbose: !args.get_flag("quiet"),
        validate: !args.get_flag("no-validate"),
        generate: !args.get_flag("no-generate"),
        sample: args.get_flag("sample"),
        percentage: *args.get_one::<f64>("percentage").unwrap_or(&1.0),
        file_count: *args.get_one::<usize>("files").unwrap_or(&2),
    };
    prepare(&config, &options)
}

fn dump_config_command(args: &ArgMatches) -> Result<()> {
    let sim = args
        .get_one::<String>("sim")
        .ok_or_else(|| eyre!("--sim is required"))?;
    let snap = *args
        .get_one::<u32>("snap")
        .ok_or_else(|| eyre!("--snap is required"))?;
    let path = args
        .get_one::<String>("path")
        .ok_or_else(|| eyre!("--path is required"))?;
    let output_path = args
        .get_one::<String>("output_path")
        .ok_or_else(|| eyre!("--output_path is required"))?;
    let subvolumes = match args.get_one::<String>("subvols") {
        Some(list) => parse_subvolumes(list)?,
        None => vec![],
    };
    let ending = args.get_one::<String>("ending").map(String::as_str);
    let config = resolve_from_path(sim, snap, &subvolumes, path, output_path, ending)?;
    let dump = config.save_json(Path::new(output_path))?;
    info!("{}", serde_json::to_string(&config)?);
    println!("Configuration written to {}", dump.display());
    Ok(())
}

fn prep_all(config: &Config) -> Result<bool> {
    let mut all_ok = true;
    for descriptor in &config.simulations {
        for snap in &descriptor.snapshots {
            let record = resolve(
                &descriptor.sim,
                *snap,
                &descriptor.subvolumes,
                None,
                config.environment,
            )?;
            all_ok &= prepare(&record, &config.options)?;
        }
    }
    Ok(all_ok)
}

fn submit_all(config: &Config, host: Host, dry_run: bool) -> Result<()> {
    let mut submitted = 0;
    for descriptor in &config.simulations {
        for snap in &descriptor.snapshots {
            let mut record = config.scheduler.create_script(
                host,
                &descriptor.sim,
                *snap,
                &descriptor.subvolumes,
            )?;
            println!("  Created script: {}", record.script_path.display());
            if config.submit_jobs && !dry_run {
                config.scheduler.submit_record(&mut record)?;
                submitted += 1;
            }
        }
    }
    if config.submit_jobs && !dry_run {
        println!("Total jobs submitted: {submitted}");
    }
    Ok(())
}

fn check_all(config: &Config) -> Result<()> {
    let records = config.scheduler.check_all_jobs(&config.simulations)?;
    let mut counts = [0usize; 4];
    for record in &records {
        let slot = match record.state {
            JobState::Running => 0,
            JobState::Completed => 1,
            JobState::Failed => 2,
            _ => 3,
        };
        counts[slot] += 1;
        if !matches!(record.state, JobState::Running | JobState::Completed) {
            println!("  {}: {:?}", record.job_name, record.state);
        }
    }
    println!(
        "Jobs: {} running, {} completed, {} failed, {} missing",
        counts[0], counts[1], counts[2], counts[3]
    );
    Ok(())
}

fn clean_all(config: &Config, delete: bool) -> Result<()> {
    let paths = config
        .scheduler
        .clean_all_jobs(&config.simulations, !delete)?;
    let verb = if delete { "Removed" } else { "Would remove" };
    for path in &paths {
        println!("  {verb} {}", path.display());
    }
    println!("{verb} {} files.", paths.len());
    Ok(())
}

fn cli() -> Command {
    let sim = Arg::new("sim")
        .long("sim")
        .help("Simulation tag, e.g. SharkSU_2 or GP20cosma");
    let snap = Arg::new("snap")
        .long("snap")
        .required(true)
        .value_parser(value_parser!(u32))
        .help("Snapshot number");
    let subvols = Arg::new("subvols")
        .long("subvols")
        .help("Sub-volumes, e.g. 0,1,5-9 (found on disk when --path is given)");
    let path = Arg::new("path")
        .long("path")
        .help("Base directory of the input files");
    let output_path = Arg::new("output_path")
        .long("output_path")
        .help("Base directory of the generated files");
    let ending = Arg::new("ending")
        .long("ending")
        .help("Extension of the input files, replacing .hdf5");

    Command::new("nebprep")
        .about("Prepare simulated galaxy catalogues for emission line modelling")
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .global(true)
                .default_value("nebprep.yml")
                .help("Path to a run plan (YAML)"),
        )
        .subcommand(Command::new("new").about("Create a new template plan"))
        .subcommand(Command::new("prep").about("Prepare every simulation of the plan"))
        .subcommand(
            Command::new("run")
                .about("Prepare a single snapshot")
                .arg(sim.clone().required(true))
                .arg(snap.clone())
                .arg(subvols.clone())
                .arg(path.clone())
                .arg(output_path.clone())
                .arg(ending.clone())
                .arg(
                    Arg::new("env")
                        .long("env")
                        .help("local or cluster (ignored with --path)"),
                )
                .arg(Arg::new("quiet").long("quiet").action(ArgAction::SetTrue))
                .arg(Arg::new("no-validate").long("no-validate").action(ArgAction::SetTrue))
                .arg(Arg::new("no-generate").long("no-generate").action(ArgAction::SetTrue))
                .arg(Arg::new("sample").long("sample").action(ArgAction::SetTrue))
                .arg(
                    Arg::new("percentage")
                        .long("percentage")
                        .value_parser(value_parser!(f64))
                        .default_value("1"),
                )
                .arg(
                    Arg::new("files")
                        .long("files")
                        .value_parser(value_parser!(usize))
                        .default_value("2"),
                ),
        )
        .subcommand(
            Command::new("dump-config")
                .about("Write config.json for a simulation under explicit directories")
                .arg(sim.default_value("GP20UNIT1Gpc"))
                .arg(snap)
                .arg(path.required(true))
                .arg(output_path.required(true))
                .arg(ending)
                .arg(subvols),
        )
        .subcommand(
            Command::new("submit")
                .about("Write and submit one job per simulation snapshot")
                .arg(Arg::new("dry-run").long("dry-run").action(ArgAction::SetTrue))
                .arg(
                    Arg::new("host")
                        .long("host")
                        .help("taurus or cosma, overriding the plan"),
                ),
        )
        .subcommand(Command::new("check").about("Report the state of every job"))
        .subcommand(
            Command::new("clean")
                .about("List scripts and logs of finished jobs")
                .arg(
                    Arg::new("delete")
                        .long("delete")
                        .action(ArgAction::SetTrue)
                        .help("Remove the listed files instead of only showing them"),
                ),
        )
}

/// Program entry point. Handles the CLI.
fn main() -> Result<()> {
    color_eyre::install()?;
    logging::init_tracing();

    let cli = cli().get_matches();

    println!("------------------------- nebprep --------------------------");
    let config_path = PathBuf::from(
        cli.get_one::<String>("config")
            .ok_or_else(|| eyre!("No plan path given"))?,
    );

    let ok = match cli.subcommand() {
        Some(("new", _)) => {
            println!(
                "Making a template plan at {}...",
                config_path.display()
            );
            Config::default().save(&config_path)?;
            println!("Done.");
            true
        }
        Some(("run", args)) => run_command(args)?,
        Some(("dump-config", args)) => {
            dump_config_command(args)?;
            true
        }
        Some((command, args)) => {
            let config = Config::load(&config_path)?;
            println!("Successfully loaded plan from {}", config_path.display());
            match command {
                "prep" => prep_all(&config)?,
                "submit" => {
                    let host = match args.get_one::<String>("host") {
                        Some(host) => host.parse()?,
                        None => config.host,
                    };
                    submit_all(&config, host, args.get_flag("dry-run"))?;
                    true
                }
                "check" => {
                    check_all(&config)?;
                    true
                }
                "clean" => {
                    clean_all(&config, args.get_flag("delete"))?;
                    true
                }
                other => return Err(eyre!("Unknown command {other}")),
            }
        }
        None => true,
    };

    println!("{RULE}");
    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
