//! The resolved configuration of a single simulation snapshot.
//!
//! A [`ConfigRecord`] is built once by the registry and then only read by the
//! validator, generator and sampler. It is also dumped to `config.json` next
//! to the generated files so a run can be traced back to its inputs.
use color_eyre::eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Default extension of the input files.
pub const DEFAULT_ENDING: &str = ".hdf5";
/// Name of the file generated for each sub-volume.
pub const GENERATED_FILE: &str = "gne_input.hdf5";
/// Group holding every column of a generated file.
pub const OUTPUT_GROUP: &str = "data";
/// Name of the provenance dump.
pub const CONFIG_DUMP: &str = "config.json";

/// Where the input files are read from. Only the root prefix depends on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Local,
    #[default]
    Cluster,
}

impl std::str::FromStr for Environment {
    type Err = color_eyre::eyre::Report;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "local" | "laptop" => Ok(Self::Local),
            "cluster" => Ok(Self::Cluster),
            other => Err(eyre!(
                "Unknown environment '{other}'. Expected 'local' or 'cluster'."
            )),
        }
    }
}

/// Datasets of one input file that must exist and stay within bounds.
///
/// The four vectors are positionally aligned: entry `i` of each describes
/// `datasets[i]`. A `None` limit leaves that side unbounded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionSpec {
    pub group: String,
    pub datasets: Vec<String>,
    pub units: Vec<String>,
    pub low_limits: Vec<Option<f64>>,
    pub high_limits: Vec<Option<f64>>,
}

impl SelectionSpec {
    pub fn is_aligned(&self) -> bool {
        let n = self.datasets.len();
        self.units.len() == n && self.low_limits.len() == n && self.high_limits.len() == n
    }

    /// Iterates `(dataset, unit, low, high)` tuples.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str, Option<f64>, Option<f64>)> {
        self.datasets
            .iter()
            .zip(&self.units)
            .zip(self.low_limits.iter().zip(&self.high_limits))
            .map(|((d, u), (lo, hi))| (d.as_str(), u.as_str(), *lo, *hi))
    }
}

/// Datasets of one input file that are copied into the generated file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub group: String,
    pub datasets: Vec<String>,
    pub units: Vec<String>,
}

/// Location of the snapshot redshift.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedshiftSpec {
    pub file: String,
    pub group: String,
    pub dataset: String,
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigRecord {
    pub simulation: String,
    pub root: String,
    pub outroot: String,
    pub ending: Option<String>,

    pub h0: f64,
    pub omega0: f64,
    pub omegab: f64,
    pub lambda0: f64,
    pub boxside: f64,
    pub mp: f64,

    pub mcold_disc: String,
    pub mcold_z_disc: String,
    pub mcold_burst: String,
    pub mcold_z_burst: String,

    pub snap: u32,
    pub subvolumes: Vec<u32>,

    pub selection: BTreeMap<String, SelectionSpec>,
    pub file_props: BTreeMap<String, FieldSpec>,
    pub file_redshift: Option<RedshiftSpec>,

    #[serde(default)]
    pub lines: Vec<String>,
    #[serde(default)]
    pub line_prefix: String,
    #[serde(default)]
    pub line_suffix_ext: Option<String>,
}

impl ConfigRecord {
    /// Checks the invariants every consumer relies on.
    pub fn check(&self) -> Result<()> {
        let scalars = [
            ("h0", self.h0),
            ("omega0", self.omega0),
            ("omegab", self.omegab),
            ("lambda0", self.lambda0),
            ("boxside", self.boxside),
            ("mp", self.mp),
        ];
        for (name, value) in scalars {
            if !value.is_finite() {
                return Err(eyre!("Configuration value '{name}' is not a finite number"));
            }
        }
        for (file, spec) in &self.selection {
            if !spec.is_aligned() {
                return Err(eyre!(
                    "Selection for {file} is misaligned: {} datasets, {} units, {} low limits, {} high limits",
                    spec.datasets.len(),
                    spec.units.len(),
                    spec.low_limits.len(),
                    spec.high_limits.len()
                ));
            }
        }
        for (file, spec) in &self.file_props {
            if spec.datasets.len() != spec.units.len() {
                return Err(eyre!(
                    "Field list for {file} has {} datasets but {} units",
                    spec.datasets.len(),
                    spec.units.len()
                ));
            }
        }
        Ok(())
    }

    /// Input file name with the configured ending applied.
    pub fn input_name(&self, file: &str) -> String {
        match &self.ending {
            Some(ending) => {
                let stem = file.strip_suffix(DEFAULT_ENDING).unwrap_or(file);
                format!("{stem}{ending}")
            }
            None => file.to_string(),
        }
    }

    pub fn input_path(&self, subvolume: u32, file: &str) -> PathBuf {
        PathBuf::from(format!(
            "{}{}/{}",
            self.root,
            subvolume,
            self.input_name(file)
        ))
    }

    pub fn output_path(&self, subvolume: u32) -> PathBuf {
        PathBuf::from(format!("{}{}/{}", self.outroot, subvolume, GENERATED_FILE))
    }

    /// Directory shared by all sub-volumes of this snapshot.
    pub fn snapshot_dir(&self) -> PathBuf {
        let outroot = Path::new(&self.outroot);
        outroot
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| outroot.to_path_buf())
    }

    pub fn test_file_path(&self, index: usize) -> PathBuf {
        self.snapshot_dir()
            .join("test_files")
            .join(format!("gne_test_{index}.hdf5"))
    }

    /// Luminosity dataset names derived from the line list.
    pub fn line_datasets(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.lines.len() * 2);
        for line in &self.lines {
            let base = format!("{}{}", self.line_prefix, line);
            if let Some(suffix) = &self.line_suffix_ext {
                names.push(format!("{base}{suffix}"));
            }
            names.push(base);
        }
        names
    }

    /// Writes the record as `config.json` inside `dir` and returns the path.
    pub fn save_json(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(CONFIG_DUMP);
        let file = std::fs::File::create(&path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(path)
    }

    pub fn load_json(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let record: Self = serde_json::from_str(&text)
            .map_err(|e| eyre!("Invalid configuration in {}: {e}", path.display()))?;
        record.check()?;
        Ok(record)
    }
}
