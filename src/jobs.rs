//! Batch job scripts for the cluster, their submission and bookkeeping.
//!
//! The scheduler itself is external: jobs are handed to its submission
//! command and observed through its queue listing. Nothing here retries or
//! waits.
use crate::record::{ConfigRecord, Environment};
use crate::registry::{resolve, split_roots};
use color_eyre::eyre::{eyre, Result, WrapErr};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::info;

/// A simulation with the snapshots and sub-volumes to prepare.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationDescriptor {
    pub sim: String,
    pub snapshots: Vec<u32>,
    pub subvolumes: Vec<u32>,
}

/// Clusters with known resource conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Host {
    #[default]
    Taurus,
    Cosma,
}

struct Resources {
    partition: &'static str,
    account: Option<&'static str>,
    nodes: u32,
    tasks: u32,
    memory: &'static str,
    walltime: &'static str,
}

impl Host {
    fn resources(self) -> Resources {
        match self {
            Self::Taurus => Resources {
                partition: "all",
                account: None,
                nodes: 1,
                tasks: 1,
                memory: "16G",
                walltime: "02:00:00",
            },
            Self::Cosma => Resources {
                partition: "cosma7",
                account: Some("dp004"),
                nodes: 1,
                tasks: 1,
                memory: "32G",
                walltime: "06:00:00",
            },
        }
    }
}

impl std::str::FromStr for Host {
    type Err = color_eyre::eyre::Report;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "taurus" => Ok(Self::Taurus),
            "cosma" => Ok(Self::Cosma),
            other => Err(eyre!("Unknown host '{other}'. Expected 'taurus' or 'cosma'.")),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error("Unable to run {command} for job {job_name}: {source}")]
    Spawn {
        command: String,
        job_name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{command} rejected job {job_name} ({status}): {stderr}")]
    Rejected {
        command: String,
        job_name: String,
        status: String,
        stderr: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Created,
    Submitted { id: Option<String> },
    Running,
    Completed,
    Failed,
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    pub script_path: PathBuf,
    pub job_name: String,
    pub state: JobState,
}

/// How to reach the batch scheduler and where job files live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scheduler {
    pub submit_command: String,
    /// Program and arguments printing one active job name per line.
    pub queue_command: Vec<String>,
    pub script_dir: PathBuf,
    pub log_dir: PathBuf,
    /// Executable invoked by the job scripts.
    pub program: String,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self {
            submit_command: "sbatch".to_string(),
            queue_command: ["squeue", "--me", "--noheader", "--format=%j"]
                .map(String::from)
                .to_vec(),
            script_dir: PathBuf::from("slurm/scripts"),
            log_dir: PathBuf::from("slurm/logs"),
            program: "nebprep".to_string(),
        }
    }
}

pub fn job_name(sim: &str, snap: u32) -> String {
    format!("{sim}_iz{snap}")
}

/// Renders `0,1,2,5` style lists.
pub fn format_subvolumes(subvolumes: &[u32]) -> String {
    subvolumes
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Single-quotes `value` for a POSIX shell.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

impl Scheduler {
    pub fn script_path(&self, job_name: &str) -> PathBuf {
        self.script_dir.join(format!("{job_name}.sh"))
    }

    fn log_path(&self, job_name: &str, extension: &str) -> PathBuf {
        self.log_dir.join(format!("{job_name}.{extension}"))
    }

    /// Files a job leaves behind besides its outputs.
    fn artifacts(&self, job_name: &str) -> [PathBuf; 3] {
        [
            self.script_path(job_name),
            self.log_path(job_name, "out"),
            self.log_path(job_name, "err"),
        ]
    }

    pub fn render_script(
        &self,
        host: Host,
        sim: &str,
        config: &ConfigRecord,
        subvolumes: &[u32],
    ) -> Result<String> {
        let name = job_name(sim, config.snap);
        let res = host.resources();
        let (input_base, output_base) = split_roots(config)?;

        let mut script = String::from("#!/bin/bash\n");
        writeln!(script, "#SBATCH --job-name={name}")?;
        writeln!(script, "#SBATCH --partition={}", res.partition)?;
        if let Some(account) = res.account {
            writeln!(script, "#SBATCH --account={account}")?;
        }
        writeln!(script, "#SBATCH --nodes={}", res.nodes)?;
        writeln!(script, "#SBATCH --ntasks={}", res.tasks)?;
        writeln!(script, "#SBATCH --mem={}", res.memory)?;
        writeln!(script, "#SBATCH --time={}", res.walltime)?;
        writeln!(
            script,
            "#SBATCH --output={}",
            self.log_path(&name, "out").display()
        )?;
        writeln!(
            script,
            "#SBATCH --error={}",
            self.log_path(&name, "err").display()
        )?;
        writeln!(script)?;
        write!(
            script,
            "{} run --sim {sim} --snap {} --subvols {} --path {} --output_path {}",
            self.program,
            config.snap,
            format_subvolumes(subvolumes),
            shell_quote(&input_base),
            shell_quote(&output_base)
        )?;
        if let Some(ending) = &config.ending {
            write!(script, " --ending {}", shell_quote(ending))?;
        }
        writeln!(script)?;
        Ok(script)
    }

    /// Writes the job script of one snapshot. Unknown simulations fail here,
    /// before anything reaches the scheduler.
    pub fn create_script(
        &self,
        host: Host,
        sim: &str,
        snap: u32,
        subvolumes: &[u32],
    ) -> Result<JobRecord> {
        let config = resolve(sim, snap, subvolumes, None, Environment::Cluster)?;
        let job_name = job_name(sim, snap);
        let script_path = self.script_path(&job_name);
        std::fs::create_dir_all(&self.script_dir)?;
        std::fs::create_dir_all(&self.log_dir)?;
        std::fs::write(&script_path, self.render_script(host, sim, &config, subvolumes)?)
            .wrap_err_with(|| format!("Unable to write {}", script_path.display()))?;
        Ok(JobRecord {
            script_path,
            job_name,
            state: JobState::Created,
        })
    }

    /// Hands a script to the scheduler and returns the job id it reports.
    pub fn submit(&self, script_path: &Path, job_name: &str) -> Result<Option<String>, SubmissionError> {
        let output = Command::new(&self.submit_command)
            .arg(script_path)
            .output()
            .map_err(|source| SubmissionError::Spawn {
                command: self.submit_command.clone(),
                job_name: job_name.to_string(),
                source,
            })?;
        if !output.status.success() {
            let status = output.status.code().map_or_else(
                || "terminated by signal".to_string(),
                |code| format!("exit code {code}"),
            );
            return Err(SubmissionError::Rejected {
                command: self.submit_command.clone(),
                job_name: job_name.to_string(),
                status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let id = stdout
            .split_whitespace()
            .last()
            .filter(|token| token.chars().all(|c| c.is_ascii_digit()))
            .map(str::to_string);
        info!(job_name, ?id, "Submitted {}", script_path.display());
        Ok(id)
    }

    pub fn submit_record(&self, record: &mut JobRecord) -> Result<(), SubmissionError> {
        let id = self.submit(&record.script_path, &record.job_name)?;
        record.state = JobState::Submitted { id };
        Ok(())
    }

    /// Names of the jobs the scheduler currently knows about.
    pub fn active_jobs(&self) -> Result<FxHashSet<String>> {
        let (program, args) = self
            .queue_command
            .split_first()
            .ok_or_else(|| eyre!("No queue command configured"))?;
        let output = Command::new(program)
            .args(args)
            .output()
            .wrap_err_with(|| format!("Unable to run {program}"))?;
        if !output.status.success() {
            return Err(eyre!(
                "{program} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn has_errors(&self, job_name: &str) -> bool {
        self.log_path(job_name, "err")
            .metadata()
            .map(|m| m.len() > 0)
            .unwrap_or(false)
    }

    /// Reports the state of every job the descriptors call for.
    pub fn check_all_jobs(&self, descriptors: &[SimulationDescriptor]) -> Result<Vec<JobRecord>> {
        let active = self.active_jobs()?;
        let mut records = vec![];
        for descriptor in descriptors {
            for snap in &descriptor.snapshots {
                let job_name = job_name(&descriptor.sim, *snap);
                let config = resolve(
                    &descriptor.sim,
                    *snap,
                    &descriptor.subvolumes,
                    None,
                    Environment::Cluster,
                )?;
                let outputs_present = descriptor
                    .subvolumes
                    .iter()
                    .all(|sv| config.output_path(*sv).exists());
                let state = classify(
                    active.contains(&job_name),
                    outputs_present,
                    self.has_errors(&job_name),
                );
                info!(job = %job_name, ?state, "Checked job");
                records.push(JobRecord {
                    script_path: self.script_path(&job_name),
                    job_name,
                    state,
                });
            }
        }
        Ok(records)
    }

    /// Lists, or with `only_show == false` deletes, the scripts and logs of
    /// jobs that are no longer in the queue. Returns the affected paths.
    pub fn clean_all_jobs(
        &self,
        descriptors: &[SimulationDescriptor],
        only_show: bool,
    ) -> Result<Vec<PathBuf>> {
        let active = self.active_jobs()?;
        let mut stale = vec![];
        for descriptor in descriptors {
            for snap in &descriptor.snapshots {
                let job_name = job_name(&descriptor.sim, *snap);
                if active.contains(&job_name) {
                    continue;
                }
                stale.extend(self.artifacts(&job_name).into_iter().filter(|p| p.exists()));
            }
        }
        for path in &stale {
            if only_show {
                info!("Would remove {}", path.display());
            } else {
                std::fs::remove_file(path)
                    .wrap_err_with(|| format!("Unable to remove {}", path.display()))?;
                info!("Removed {}", path.display());
            }
        }
        Ok(stale)
    }
}

pub fn classify(active: bool, outputs_present: bool, errors_logged: bool) -> JobState {
    if active {
        JobState::Running
    } else if outputs_present {
        JobState::Completed
    } else if errors_logged {
        JobState::Failed
    } else {
        JobState::Missing
    }
}
