//! Known simulations and how each one resolves into a [`ConfigRecord`].
//!
//! Every family has its own resolver holding the paths, cosmology, box size
//! and field lists of that run. A variant (for example `SharkSU_2` or
//! `GP20UNIT1Gpc_fnl100`) picks between sibling realisations that share
//! everything but their location on disk.
use crate::record::{ConfigRecord, Environment, FieldSpec, RedshiftSpec, SelectionSpec};
use crate::store::{DataStore, SourceFile};
use color_eyre::eyre::{eyre, Result, WrapErr};
use std::collections::BTreeMap;
use std::path::Path;

/// Raised for an unknown simulation tag or an unknown variant of a known one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{what} '{name}' not supported. Available: {}", .supported.join(", "))]
pub struct UnsupportedSimulationError {
    pub what: String,
    pub name: String,
    pub supported: Vec<String>,
}

impl UnsupportedSimulationError {
    fn simulation(name: &str) -> Self {
        Self {
            what: "Simulation type".to_string(),
            name: name.to_string(),
            supported: Simulation::ALL.iter().map(|s| s.tag().to_string()).collect(),
        }
    }

    fn variant(sim: Simulation, variant: &str) -> Self {
        Self {
            what: format!("Variant of {}", sim.tag()),
            name: variant.to_string(),
            supported: sim.variants().iter().map(|v| v.to_string()).collect(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error(transparent)]
    Unsupported(#[from] UnsupportedSimulationError),
    #[error("Configuration of {simulation} is inconsistent: {reason}")]
    Invalid { simulation: String, reason: String },
}

type Resolver =
    fn(u32, &[u32], Option<&str>, Environment) -> Result<ConfigRecord, UnsupportedSimulationError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Simulation {
    Gp20Cosma,
    Gp20Su,
    Gp20Unit1Gpc,
    SharkSu,
    SharkUnit1Gpc,
}

impl Simulation {
    pub const ALL: [Simulation; 5] = [
        Simulation::Gp20Cosma,
        Simulation::Gp20Su,
        Simulation::Gp20Unit1Gpc,
        Simulation::SharkSu,
        Simulation::SharkUnit1Gpc,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            Self::Gp20Cosma => "GP20cosma",
            Self::Gp20Su => "GP20SU",
            Self::Gp20Unit1Gpc => "GP20UNIT1Gpc",
            Self::SharkSu => "SharkSU",
            Self::SharkUnit1Gpc => "SharkUNIT1Gpc",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.tag() == tag)
    }

    /// Accepted variants, the default first. Empty when the run has none.
    pub fn variants(self) -> &'static [&'static str] {
        match self {
            Self::Gp20Cosma => &[],
            Self::Gp20Su | Self::SharkSu => &["1", "2"],
            Self::Gp20Unit1Gpc | Self::SharkUnit1Gpc => &["fnl0", "fnl100"],
        }
    }

    fn resolver(self) -> Resolver {
        match self {
            Self::Gp20Cosma => gp20_cosma,
            Self::Gp20Su => gp20_su,
            Self::Gp20Unit1Gpc => gp20_unit1gpc,
            Self::SharkSu => shark_su,
            Self::SharkUnit1Gpc => shark_unit1gpc,
        }
    }

    fn is_galform(self) -> bool {
        matches!(self, Self::Gp20Cosma | Self::Gp20Su | Self::Gp20Unit1Gpc)
    }

    fn check_variant(self, variant: Option<&str>) -> Result<&'static str, UnsupportedSimulationError> {
        let variants = self.variants();
        match (variant, variants.first()) {
            (None, Some(default)) => Ok(*default),
            (None, None) => Ok(""),
            (Some(v), _) => variants
                .iter()
                .find(|known| **known == v)
                .copied()
                .ok_or_else(|| UnsupportedSimulationError::variant(self, v)),
        }
    }
}

/// Splits a descriptor tag such as `SharkSU_2` into family and variant.
pub fn parse_tag(tag: &str) -> Result<(Simulation, Option<&str>), UnsupportedSimulationError> {
    if let Some(sim) = Simulation::from_tag(tag) {
        return Ok((sim, None));
    }
    tag.rsplit_once('_')
        .and_then(|(head, tail)| Simulation::from_tag(head).map(|sim| (sim, Some(tail))))
        .ok_or_else(|| UnsupportedSimulationError::simulation(tag))
}

/// Resolves a simulation tag into its configuration record.
///
/// An explicit `variant` takes precedence over one embedded in the tag.
pub fn resolve(
    name: &str,
    snap: u32,
    subvolumes: &[u32],
    variant: Option<&str>,
    environment: Environment,
) -> Result<ConfigRecord, ResolveError> {
    let (sim, tag_variant) = parse_tag(name)?;
    let resolver = sim.resolver();
    checked(resolver(snap, subvolumes, variant.or(tag_variant), environment)?)
}

fn checked(config: ConfigRecord) -> Result<ConfigRecord, ResolveError> {
    match config.check() {
        Ok(()) => Ok(config),
        Err(e) => Err(ResolveError::Invalid {
            simulation: config.simulation,
            reason: e.to_string(),
        }),
    }
}

/// Resolves a simulation whose files live under explicit directories.
///
/// Paths keep the family layout: `path` plays the role of the input base and
/// `output_path` the one of the output label directory.
pub fn resolve_from_path(
    name: &str,
    snap: u32,
    subvolumes: &[u32],
    path: &str,
    output_path: &str,
    ending: Option<&str>,
) -> Result<ConfigRecord, ResolveError> {
    let (sim, _) = parse_tag(name)?;
    let mut config = resolve(name, snap, subvolumes, None, Environment::Cluster)?;
    config.root = input_root(sim, path.trim_end_matches('/'), snap);
    config.outroot = format!("{}/iz{snap}/ivol", output_path.trim_end_matches('/'));
    config.ending = ending.map(str::to_string);
    checked(config)
}

/// Group of the galaxy file holding the parameters of the model run.
const PARAMETERS_GROUP: &str = "Parameters";
/// File of each sub-volume that carries [`PARAMETERS_GROUP`].
const PARAMETERS_FILE: &str = "galaxies.hdf5";
const COSMOLOGY_KEYS: [&str; 4] = ["h0", "omega0", "omegab", "lambda0"];

/// Cosmological parameters stored with the run in the `Parameters` group of
/// `path`. Scalar datasets win over group attributes of the same name; keys
/// found in neither are left out.
pub fn stored_cosmology<S: DataStore>(store: &S, path: &Path) -> Result<BTreeMap<String, f64>> {
    let source = store
        .open(path)
        .wrap_err_with(|| format!("Unable to open {}", path.display()))?;
    let mut params = BTreeMap::new();
    if !source.groups()?.iter().any(|g| g == PARAMETERS_GROUP) {
        return Ok(params);
    }
    let datasets = source.datasets(PARAMETERS_GROUP)?;
    let attrs = source.attrs(PARAMETERS_GROUP)?;
    for key in COSMOLOGY_KEYS {
        let value = if datasets.iter().any(|d| d == key) {
            let column = source.read(PARAMETERS_GROUP, key)?;
            if column.is_empty() {
                return Err(eyre!("{PARAMETERS_GROUP}/{key} in {} is empty", path.display()));
            }
            column.to_f64()[0]
        } else if let Some(value) = attrs.get(key) {
            *value
        } else {
            continue;
        };
        params.insert(key.to_string(), value);
    }
    Ok(params)
}

/// Replaces the tabulated cosmology of `config` with the one stored in the
/// galaxy file of its first sub-volume. Returns the keys that were replaced.
pub fn adopt_stored_cosmology<S: DataStore>(
    store: &S,
    config: &mut ConfigRecord,
) -> Result<Vec<String>> {
    let subvolume = *config
        .subvolumes
        .first()
        .ok_or_else(|| eyre!("No sub-volumes to read the cosmology from"))?;
    let params = stored_cosmology(store, &config.input_path(subvolume, PARAMETERS_FILE))?;
    let mut updated = config.clone();
    for (key, value) in &params {
        let slot = match key.as_str() {
            "h0" => &mut updated.h0,
            "omega0" => &mut updated.omega0,
            "omegab" => &mut updated.omegab,
            "lambda0" => &mut updated.lambda0,
            _ => continue,
        };
        *slot = *value;
    }
    updated.check()?;
    *config = updated;
    Ok(params.into_keys().collect())
}

/// Sub-volumes present on disk under the input root of `config`, in
/// ascending order.
///
/// The root ends in the per sub-volume prefix (`.../iz<snap>/ivol` for
/// Galform, `.../<snap>/` for Shark), so every directory next to it whose
/// name is that prefix followed by a number is a sub-volume.
pub fn discover_subvolumes(config: &ConfigRecord) -> Result<Vec<u32>> {
    let (dir, prefix) = match config.root.rsplit_once('/') {
        Some((dir, prefix)) => (dir, prefix),
        None => (".", config.root.as_str()),
    };
    let entries = std::fs::read_dir(dir)
        .wrap_err_with(|| format!("Unable to list sub-volumes in {dir}"))?;
    let mut subvolumes = vec![];
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        if let Some(number) = name.to_str().and_then(|n| n.strip_prefix(prefix)) {
            if let Ok(subvolume) = number.parse::<u32>() {
                subvolumes.push(subvolume);
            }
        }
    }
    if subvolumes.is_empty() {
        return Err(eyre!("No sub-volume directories {prefix}<N> found in {dir}"));
    }
    subvolumes.sort_unstable();
    Ok(subvolumes)
}

/// Input and output base directories of a record: the inverse of the path
/// layout applied by [`resolve_from_path`].
pub fn split_roots(config: &ConfigRecord) -> Result<(String, String)> {
    let galform = format!("/iz{}/ivol", config.snap);
    let shark = format!("/{}/", config.snap);
    let input = config
        .root
        .strip_suffix(&galform)
        .or_else(|| config.root.strip_suffix(&shark))
        .ok_or_else(|| eyre!("Root {} does not follow a known layout", config.root))?;
    let output = config
        .outroot
        .strip_suffix(&galform)
        .ok_or_else(|| eyre!("Output root {} does not follow a known layout", config.outroot))?;
    Ok((input.to_string(), output.to_string()))
}

fn input_root(sim: Simulation, base: &str, snap: u32) -> String {
    if sim.is_galform() {
        format!("{base}/iz{snap}/ivol")
    } else {
        format!("{base}/{snap}/")
    }
}

fn output_root(label: &str, snap: u32) -> String {
    format!("{OUTPUT_BASE}/{label}/iz{snap}/ivol")
}

const OUTPUT_BASE: &str = "/data2/users/olivia/emlines_input";

struct Cosmology {
    h0: f64,
    omega0: f64,
    omegab: f64,
    lambda0: f64,
}

const WMAP7: Cosmology = Cosmology {
    h0: 0.704,
    omega0: 0.307,
    omegab: 0.0482,
    lambda0: 0.693,
};

const UNIT: Cosmology = Cosmology {
    h0: 0.6774,
    omega0: 0.3089,
    omegab: 0.0486,
    lambda0: 0.6911,
};

const LINES: [&str; 6] = ["Halpha", "Hbeta", "NII6583", "OII3727", "OIII5007", "SII6716"];

/// Input base directory for the given environment. Only this differs
/// between a laptop checkout and the cluster.
struct Bases {
    cluster: &'static str,
    local: &'static str,
}

impl Bases {
    fn pick(&self, environment: Environment) -> &'static str {
        match environment {
            Environment::Cluster => self.cluster,
            Environment::Local => self.local,
        }
    }
}

struct Run {
    sim: Simulation,
    bases: Bases,
    label: &'static str,
    cosmology: Cosmology,
    boxside: f64,
    mp: f64,
}

impl Run {
    fn build(self, snap: u32, subvolumes: &[u32], environment: Environment) -> ConfigRecord {
        let root = input_root(self.sim, self.bases.pick(environment).trim_end_matches('/'), snap);
        let (aliases, selection, file_props, file_redshift) = if self.sim.is_galform() {
            galform_fields(self.boxside, self.mp)
        } else {
            shark_fields(self.boxside, self.mp)
        };
        ConfigRecord {
            simulation: self.sim.tag().to_string(),
            root,
            outroot: output_root(self.label, snap),
            ending: None,
            h0: self.cosmology.h0,
            omega0: self.cosmology.omega0,
            omegab: self.cosmology.omegab,
            lambda0: self.cosmology.lambda0,
            boxside: self.boxside,
            mp: self.mp,
            mcold_disc: aliases[0].to_string(),
            mcold_z_disc: aliases[1].to_string(),
            mcold_burst: aliases[2].to_string(),
            mcold_z_burst: aliases[3].to_string(),
            snap,
            subvolumes: subvolumes.to_vec(),
            selection,
            file_props,
            file_redshift: Some(file_redshift),
            lines: LINES.iter().map(|l| l.to_string()).collect(),
            line_prefix: "L_tot_".to_string(),
            line_suffix_ext: Some("_ext".to_string()),
        }
    }
}

type FieldSet = (
    [&'static str; 4],
    BTreeMap<String, SelectionSpec>,
    BTreeMap<String, FieldSpec>,
    RedshiftSpec,
);

fn field_spec(group: &str, pairs: &[(&str, &str)]) -> FieldSpec {
    FieldSpec {
        group: group.to_string(),
        datasets: pairs.iter().map(|(d, _)| d.to_string()).collect(),
        units: pairs.iter().map(|(_, u)| u.to_string()).collect(),
    }
}

/// Halo mass above 20 particles and positions inside the box.
fn position_selection(group: &str, names: [&str; 4], boxside: f64, mp: f64) -> SelectionSpec {
    SelectionSpec {
        group: group.to_string(),
        datasets: names.iter().map(|n| n.to_string()).collect(),
        units: ["Msun/h", "Mpc/h", "Mpc/h", "Mpc/h"]
            .iter()
            .map(|u| u.to_string())
            .collect(),
        low_limits: vec![Some(20.0 * mp), Some(0.0), Some(0.0), Some(0.0)],
        high_limits: vec![None, Some(boxside), Some(boxside), Some(boxside)],
    }
}

const GALFORM_GROUP: &str = "Output###";

fn galform_fields(boxside: f64, mp: f64) -> FieldSet {
    let file = "galaxies.hdf5".to_string();
    let selection = BTreeMap::from([(
        file.clone(),
        position_selection(GALFORM_GROUP, ["mhhalo", "xgal", "ygal", "zgal"], boxside, mp),
    )]);
    let props = field_spec(
        GALFORM_GROUP,
        &[
            ("index", "Host halo index"),
            ("type", "Gal. type (central=0)"),
            ("vxgal", "km/s"),
            ("vygal", "km/s"),
            ("vzgal", "km/s"),
            ("rbulge", "Mpc/h"),
            ("rcomb", "Mpc/h"),
            ("rdisk", "Mpc/h"),
            ("mhot", "Msun/h"),
            ("vbulge", "km/s"),
            ("mcold", "Msun/h"),
            ("mcold_burst", "Msun/h"),
            ("cold_metal", "Msun/h"),
            ("metals_burst", "Msun/h"),
            ("mstars_bulge", "Msun/h"),
            ("mstars_burst", "Msun/h"),
            ("mstars_disk", "Msun/h"),
            ("mstardot", "Msun/h/Gyr"),
            ("mstardot_burst", "Msun/h/Gyr"),
            ("mstardot_average", "Msun/h/Gyr"),
            ("M_SMBH", "Msun/h"),
            ("SMBH_Mdot_hh", "Msun/h/Gyr"),
            ("SMBH_Mdot_stb", "Msun/h/Gyr"),
            ("SMBH_Spin", "Spin"),
        ],
    );
    let redshift = RedshiftSpec {
        file: file.clone(),
        group: GALFORM_GROUP.to_string(),
        dataset: "redshift".to_string(),
        unit: "redshift".to_string(),
    };
    (
        ["mcold", "cold_metal", "mcold_burst", "metals_burst"],
        selection,
        BTreeMap::from([(file, props)]),
        redshift,
    )
}

fn shark_fields(boxside: f64, mp: f64) -> FieldSet {
    let file = "galaxies.hdf5".to_string();
    let selection = BTreeMap::from([(
        file.clone(),
        position_selection(
            "galaxies",
            ["mvir_hosthalo", "position_x", "position_y", "position_z"],
            boxside,
            mp,
        ),
    )]);
    // Shark has no rcomb, vbulge, mstars_burst or mstardot_average.
    let props = field_spec(
        "galaxies",
        &[
            ("id_halo", "Host halo index"),
            ("type", "Gal. type (central=0)"),
            ("velocity_x", "km/s"),
            ("velocity_y", "km/s"),
            ("velocity_z", "km/s"),
            ("rgas_bulge", "Mpc/h"),
            ("rgas_disk", "Mpc/h"),
            ("mhot", "Msun/h"),
            ("mgas_disk", "Msun/h"),
            ("mgas_bulge", "Msun/h"),
            ("mgas_metals_disk", "Msun/h"),
            ("mgas_metals_bulge", "Msun/h"),
            ("mstars_bulge", "Msun/h"),
            ("mstars_disk", "Msun/h"),
            ("sfr_disk", "Msun/h/Gyr"),
            ("sfr_burst", "Msun/h/Gyr"),
            ("m_bh", "Msun/h"),
            ("bh_accretion_rate_hh", "Msun/h/Gyr"),
            ("bh_accretion_rate_sb", "Msun/h/Gyr"),
            ("bh_spin", "Spin"),
            ("bolometric_luminosity_agn", "1e40 erg/s"),
        ],
    );
    let redshift = RedshiftSpec {
        file: file.clone(),
        group: "run_info".to_string(),
        dataset: "redshift".to_string(),
        unit: "redshift".to_string(),
    };
    (
        ["mgas_disk", "mgas_metals_disk", "mgas_bulge", "mgas_metals_bulge"],
        selection,
        BTreeMap::from([(file, props)]),
        redshift,
    )
}

fn gp20_cosma(
    snap: u32,
    subvolumes: &[u32],
    variant: Option<&str>,
    environment: Environment,
) -> Result<ConfigRecord, UnsupportedSimulationError> {
    let sim = Simulation::Gp20Cosma;
    sim.check_variant(variant)?;
    let mut config = Run {
        sim,
        bases: Bases {
            cluster: "/cosma5/data/durham/dc-gonz3/Galform_Out/v2.7.0/stable/MillGas/gp19/",
            local: "/home/violeta/buds/emlines/gp20data/",
        },
        label: "GP20/cosma",
        cosmology: WMAP7,
        boxside: 125.0,
        mp: 9.35e8,
    }
    .build(snap, subvolumes, environment);
    config.outroot = format!("/cosma5/data/durham/dc-gonz3/emlines_input/GP20/cosma/iz{snap}/ivol");
    Ok(config)
}

fn gp20_su(
    snap: u32,
    subvolumes: &[u32],
    variant: Option<&str>,
    environment: Environment,
) -> Result<ConfigRecord, UnsupportedSimulationError> {
    let sim = Simulation::Gp20Su;
    let (bases, label) = match sim.check_variant(variant)? {
        "1" => (
            Bases {
                cluster: "/data2/users/olivia/galform_output/SU1_UNIT_250/",
                local: "/home/santhiperbolico/sam/emlines/galform/SU1_UNIT_250/",
            },
            "GP20/SU1",
        ),
        _ => (
            Bases {
                cluster: "/data2/users/olivia/galform_output/SU2_UNIT_250/",
                local: "/home/santhiperbolico/sam/emlines/galform/SU2_UNIT_250/",
            },
            "GP20/SU2",
        ),
    };
    Ok(Run {
        sim,
        bases,
        label,
        cosmology: UNIT,
        boxside: 250.0,
        mp: 1.56e8,
    }
    .build(snap, subvolumes, environment))
}

fn gp20_unit1gpc(
    snap: u32,
    subvolumes: &[u32],
    variant: Option<&str>,
    environment: Environment,
) -> Result<ConfigRecord, UnsupportedSimulationError> {
    let sim = Simulation::Gp20Unit1Gpc;
    let (bases, label) = match sim.check_variant(variant)? {
        "fnl0" => (
            Bases {
                cluster: "/data2/users/olivia/galform_output/UNIT_1GPC/",
                local: "/home/santhiperbolico/sam/emlines/galform/UNIT_1GPC/",
            },
            "GP20/UNIT1GPC_fnl0",
        ),
        _ => (
            Bases {
                cluster: "/data2/users/olivia/galform_output/UNIT_PNG100/",
                local: "/home/santhiperbolico/sam/emlines/galform/UNIT_PNG100/",
            },
            "GP20/UNIT1GPC_fnl100",
        ),
    };
    Ok(Run {
        sim,
        bases,
        label,
        cosmology: UNIT,
        boxside: 1000.0,
        mp: 1.2e9,
    }
    .build(snap, subvolumes, environment))
}

fn shark_su(
    snap: u32,
    subvolumes: &[u32],
    variant: Option<&str>,
    environment: Environment,
) -> Result<ConfigRecord, UnsupportedSimulationError> {
    let sim = Simulation::SharkSu;
    let (bases, label) = match sim.check_variant(variant)? {
        "1" => (
            Bases {
                cluster: "/data2/users/olivia/shark_output/SU1_UNIT_250/N2048_L250_fid_np_corrected/",
                local: "/home/santhiperbolico/sam/emlines/shark/SU1_UNIT_250/",
            },
            "Shark/SU1",
        ),
        _ => (
            Bases {
                cluster: "/data2/users/olivia/shark_output/SU2_UNIT_250/N2048_L250_high_np_corrected/",
                local: "/home/santhiperbolico/sam/emlines/shark/SU2_UNIT_250/",
            },
            "Shark/SU2",
        ),
    };
    Ok(Run {
        sim,
        bases,
        label,
        cosmology: UNIT,
        boxside: 250.0,
        mp: 0.0,
    }
    .build(snap, subvolumes, environment))
}

fn shark_unit1gpc(
    snap: u32,
    subvolumes: &[u32],
    variant: Option<&str>,
    environment: Environment,
) -> Result<ConfigRecord, UnsupportedSimulationError> {
    let sim = Simulation::SharkUnit1Gpc;
    let (bases, label) = match sim.check_variant(variant)? {
        "fnl0" => (
            Bases {
                cluster: "/data2/users/olivia/shark_output/UNIT_1GPC/N4096_L1000_fid/",
                local: "/home/santhiperbolico/sam/emlines/shark/UNIT_1GPC/",
            },
            "Shark/UNIT1GPC_fnl0",
        ),
        _ => (
            Bases {
                cluster: "/data2/users/olivia/shark_output/UNIT_PNG100/N4096_L1000_fnl100/",
                local: "/home/santhiperbolico/sam/emlines/shark/UNIT_PNG100/",
            },
            "Shark/UNIT1GPC_fnl100",
        ),
    };
    Ok(Run {
        sim,
        bases,
        label,
        cosmology: UNIT,
        boxside: 1000.0,
        mp: 0.0,
    }
    .build(snap, subvolumes, environment))
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUIRED_KEYS: [&str; 14] = [
        "root",
        "h0",
        "omega0",
        "omegab",
        "lambda0",
        "boxside",
        "mp",
        "mcold_disc",
        "mcold_z_disc",
        "mcold_burst",
        "mcold_z_burst",
        "snap",
        "selection",
        "file_props",
    ];

    fn all_records(environment: Environment) -> Vec<ConfigRecord> {
        let mut records = vec![];
        for sim in Simulation::ALL {
            let variants: Vec<Option<&str>> = if sim.variants().is_empty() {
                vec![None]
            } else {
                sim.variants().iter().map(|v| Some(*v)).collect()
            };
            for variant in variants {
                records.push(resolve(sim.tag(), 104, &[0, 1], variant, environment).unwrap());
            }
        }
        records
    }

    #[test]
    fn every_known_simulation_has_required_keys() {
        for config in all_records(Environment::Cluster) {
            config.check().unwrap();
            let value = serde_json::to_value(&config).unwrap();
            let object = value.as_object().unwrap();
            for key in REQUIRED_KEYS {
                assert!(object.contains_key(key), "{key} missing for {}", config.simulation);
            }
        }
    }

    #[test]
    fn unknown_simulation_names_the_offender() {
        for name in ["AAA", "SharkSU2", "GP20", ""] {
            let err = resolve(name, 39, &[0], None, Environment::Cluster).unwrap_err();
            let msg = err.to_string();
            assert!(msg.contains(&format!("'{name}'")), "{msg}");
            assert!(msg.contains("not supported"), "{msg}");
            for sim in Simulation::ALL {
                assert!(msg.contains(sim.tag()), "{msg}");
            }
        }
    }

    #[test]
    fn environment_changes_only_root() {
        let cluster = all_records(Environment::Cluster);
        let local = all_records(Environment::Local);
        for (mut c, l) in cluster.into_iter().zip(local) {
            assert_ne!(c.root, l.root);
            c.root = l.root.clone();
            assert_eq!(c, l);
        }
    }

    #[test]
    fn selection_specs_are_aligned() {
        for config in all_records(Environment::Local) {
            for spec in config.selection.values() {
                assert_eq!(spec.datasets.len(), spec.units.len());
                assert_eq!(spec.datasets.len(), spec.low_limits.len());
                assert_eq!(spec.datasets.len(), spec.high_limits.len());
            }
        }
    }

    #[test]
    fn gp20_cosma_roots_and_cosmology() {
        let cluster = resolve("GP20cosma", 39, &[0, 1, 2], None, Environment::Cluster).unwrap();
        assert_eq!(
            cluster.root,
            "/cosma5/data/durham/dc-gonz3/Galform_Out/v2.7.0/stable/MillGas/gp19/iz39/ivol"
        );
        let local = resolve("GP20cosma", 39, &[0, 1, 2], None, Environment::Local).unwrap();
        assert_eq!(local.root, "/home/violeta/buds/emlines/gp20data/iz39/ivol");
        assert_eq!(local.h0, 0.704);
        assert_eq!(local.omega0, 0.307);
        assert_eq!(local.omegab, 0.0482);
        assert_eq!(local.lambda0, 0.693);
        assert_eq!(local.boxside, 125.0);
        assert_eq!(local.mp, 9.35e8);
        assert_eq!(local.mcold_disc, "mcold");
        assert_eq!(local.mcold_z_disc, "cold_metal");
        assert_eq!(local.mcold_burst, "mcold_burst");
        assert_eq!(local.mcold_z_burst, "metals_burst");
        let gal = &local.selection["galaxies.hdf5"];
        assert_eq!(gal.group, "Output###");
        assert_eq!(gal.datasets.len(), 4);
    }

    #[test]
    fn gp20_cosma_rejects_variants() {
        assert!(resolve("GP20cosma", 39, &[0], Some("1"), Environment::Cluster).is_err());
    }

    #[test]
    fn shark_su_variants() {
        let config = resolve("SharkSU", 104, &[42], Some("1"), Environment::Cluster).unwrap();
        assert_eq!(config.boxside, 250.0);
        assert_eq!(config.mp, 0.0);
        assert_eq!(config.mcold_disc, "mgas_disk");
        assert_eq!(config.selection["galaxies.hdf5"].group, "galaxies");
        let datasets = &config.file_props["galaxies.hdf5"].datasets;
        assert!(datasets.contains(&"id_halo".to_string()));
        assert!(datasets.contains(&"mstars_disk".to_string()));

        let su2 = resolve("SharkSU", 104, &[42], Some("2"), Environment::Cluster).unwrap();
        assert!(su2.outroot.contains("SU2"));

        let err = resolve("SharkSU", 104, &[42], Some("999"), Environment::Cluster).unwrap_err();
        assert!(err.to_string().contains("'999' not supported"));
    }

    #[test]
    fn partial_bounds_stay_unbounded() {
        let config = resolve("SharkSU", 104, &[42], None, Environment::Cluster).unwrap();
        let gal = &config.selection["galaxies.hdf5"];
        assert_eq!(gal.low_limits[0], Some(0.0));
        assert_eq!(gal.high_limits[0], None);
        assert_eq!(gal.high_limits[1], Some(250.0));
    }

    #[test]
    fn shark_unit1gpc_variants() {
        let fnl0 = resolve("SharkUNIT1Gpc", 104, &[0], Some("fnl0"), Environment::Cluster).unwrap();
        assert_eq!(fnl0.boxside, 1000.0);
        assert_eq!(fnl0.mp, 0.0);
        assert!(fnl0.outroot.contains("UNIT1GPC_fnl0"));
        let fnl100 =
            resolve("SharkUNIT1Gpc", 104, &[0], Some("fnl100"), Environment::Cluster).unwrap();
        assert!(fnl100.outroot.contains("UNIT1GPC_fnl100"));
        assert!(resolve("SharkUNIT1Gpc", 104, &[0], Some("invalid"), Environment::Cluster).is_err());
    }

    #[test]
    fn descriptor_tags_carry_the_variant() {
        assert_eq!(parse_tag("SharkSU_2").unwrap(), (Simulation::SharkSu, Some("2")));
        assert_eq!(
            parse_tag("GP20UNIT1Gpc_fnl100").unwrap(),
            (Simulation::Gp20Unit1Gpc, Some("fnl100"))
        );
        assert_eq!(parse_tag("GP20cosma").unwrap(), (Simulation::Gp20Cosma, None));
        let tagged = resolve("SharkSU_2", 98, &[0], None, Environment::Cluster).unwrap();
        let explicit = resolve("SharkSU", 98, &[0], Some("2"), Environment::Cluster).unwrap();
        assert_eq!(tagged.root, explicit.root);
        assert!(resolve("SharkSU_7", 98, &[0], None, Environment::Cluster).is_err());
    }

    #[test]
    fn roots_split_back_into_bases() {
        for config in all_records(Environment::Cluster) {
            let (input, output) = split_roots(&config).unwrap();
            let again = resolve_from_path(
                &config.simulation,
                config.snap,
                &config.subvolumes,
                &input,
                &output,
                None,
            )
            .unwrap();
            assert_eq!(again.root, config.root);
            assert_eq!(again.outroot, config.outroot);
        }
    }

    #[test]
    fn explicit_paths_override_roots() {
        let config = resolve_from_path(
            "GP20UNIT1Gpc",
            109,
            &[0],
            "/scratch/gp20/",
            "/scratch/out",
            Some(".h5"),
        )
        .unwrap();
        assert_eq!(config.root, "/scratch/gp20/iz109/ivol");
        assert_eq!(config.outroot, "/scratch/out/iz109/ivol");
        assert_eq!(config.ending.as_deref(), Some(".h5"));
        assert_eq!(config.boxside, 1000.0);
    }

    #[test]
    fn misaligned_records_are_rejected() {
        let mut config = resolve("SharkSU", 104, &[0], None, Environment::Cluster).unwrap();
        if let Some(spec) = config.selection.get_mut("galaxies.hdf5") {
            spec.low_limits.remove(0);
        }
        let err = checked(config).unwrap_err();
        assert!(matches!(&err, ResolveError::Invalid { simulation, .. } if simulation == "SharkSU"));
        assert!(err.to_string().contains("misaligned"), "{err}");
    }

    #[test]
    fn stored_cosmology_replaces_tabulated_values() {
        use crate::memory::{shark_config, shark_galaxies, MemoryStore};
        use crate::store::Column;

        let mut config = shark_config(&[3, 4]);
        let mut file = shark_galaxies(&config, 5, 0);
        file.insert("Parameters", "h0", Column::from(vec![0.6774]), None);
        file.insert("Parameters", "omega0", Column::from(vec![0.3089]), None);
        file.set_attr("Parameters", "omegab", 0.0486);
        file.set_attr("Parameters", "h0", 0.5);
        let store = MemoryStore::default();
        store.put(config.input_path(3, "galaxies.hdf5"), file);

        let params = stored_cosmology(&store, &config.input_path(3, "galaxies.hdf5")).unwrap();
        assert_eq!(params["h0"], 0.6774);
        assert!(!params.contains_key("lambda0"));

        let lambda0 = config.lambda0;
        let replaced = adopt_stored_cosmology(&store, &mut config).unwrap();
        assert_eq!(replaced, vec!["h0", "omega0", "omegab"]);
        assert_eq!(config.h0, 0.6774);
        assert_eq!(config.omega0, 0.3089);
        assert_eq!(config.omegab, 0.0486);
        assert_eq!(config.lambda0, lambda0);
    }

    #[test]
    fn files_without_parameters_keep_the_table() {
        use crate::memory::{shark_config, shark_galaxies, MemoryStore};

        let mut config = shark_config(&[3]);
        let store = MemoryStore::default();
        store.put(config.input_path(3, "galaxies.hdf5"), shark_galaxies(&config, 5, 0));
        let before = config.clone();
        assert!(adopt_stored_cosmology(&store, &mut config).unwrap().is_empty());
        assert_eq!(config, before);

        let mut missing = shark_config(&[9]);
        assert!(adopt_stored_cosmology(&store, &mut missing).is_err());
    }

    #[test]
    fn subvolumes_are_found_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().display().to_string();
        for name in ["ivol10", "ivol2", "ivol0", "ivolx", "other"] {
            std::fs::create_dir_all(dir.path().join("iz109").join(name)).unwrap();
        }
        std::fs::write(dir.path().join("iz109/ivol7"), "not a directory").unwrap();
        let config = resolve_from_path("GP20UNIT1Gpc", 109, &[], &base, "/out", None).unwrap();
        assert_eq!(discover_subvolumes(&config).unwrap(), vec![0, 2, 10]);

        for name in ["0", "31", "run_info"] {
            std::fs::create_dir_all(dir.path().join("104").join(name)).unwrap();
        }
        let shark = resolve_from_path("SharkSU_1", 104, &[], &base, "/out", None).unwrap();
        assert_eq!(discover_subvolumes(&shark).unwrap(), vec![0, 31]);

        let empty = resolve_from_path("SharkSU_1", 98, &[], &base, "/out", None).unwrap();
        assert!(discover_subvolumes(&empty).is_err());
    }
}
