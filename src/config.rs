//! The run plan: which simulations to prepare, where, and how.
use crate::jobs::{Host, Scheduler, SimulationDescriptor};
use crate::prep::PrepOptions;
use crate::record::Environment;
use color_eyre::eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Number of sub-volumes the simulation boxes are split into.
const NVOL: u32 = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub environment: Environment,
    pub host: Host,
    /// When false, `submit` only writes the job scripts.
    pub submit_jobs: bool,
    pub options: PrepOptions,
    pub scheduler: Scheduler,
    pub simulations: Vec<SimulationDescriptor>,
}

impl Default for Config {
    fn default() -> Self {
        let all: Vec<u32> = (0..NVOL).collect();
        Self {
            environment: Environment::Cluster,
            host: Host::Taurus,
            submit_jobs: true,
            options: PrepOptions::default(),
            scheduler: Scheduler::default(),
            simulations: vec![
                SimulationDescriptor {
                    sim: "SharkSU_1".to_string(),
                    snapshots: vec![128, 109, 104, 98, 96, 90, 87, 78],
                    subvolumes: all.clone(),
                },
                SimulationDescriptor {
                    sim: "SharkUNIT1Gpc_fnl100".to_string(),
                    snapshots: vec![108, 103, 97, 89, 86],
                    subvolumes: all,
                },
                SimulationDescriptor {
                    sim: "GP20UNIT1Gpc_fnl0".to_string(),
                    snapshots: vec![98, 109, 87, 90, 104],
                    subvolumes: std::iter::once(0).chain(3..NVOL).collect(),
                },
            ],
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .map_err(|e| eyre!("Unable to open config {}: {e}", path.display()))?;
        Ok(serde_yaml::from_reader(file)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut file = std::fs::File::create(path)?;
        serde_yaml::to_writer(&mut file, self)?;
        Ok(())
    }
}
