//! In-memory [`DataStore`] used by the tests.
use crate::store::{Column, DataStore, SinkFile, SourceFile};
use color_eyre::eyre::{eyre, Result};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

#[derive(Debug, Clone, Default)]
struct MemoryGroup {
    datasets: BTreeMap<String, (Column, Option<String>)>,
    attrs: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryFile {
    groups: BTreeMap<String, MemoryGroup>,
}

impl MemoryFile {
    pub fn insert(&mut self, group: &str, dataset: &str, column: Column, unit: Option<&str>) {
        self.groups
            .entry(group.to_string())
            .or_default()
            .datasets
            .insert(dataset.to_string(), (column, unit.map(str::to_string)));
    }

    pub fn set_attr(&mut self, group: &str, name: &str, value: f64) {
        self.groups
            .entry(group.to_string())
            .or_default()
            .attrs
            .insert(name.to_string(), value);
    }

    pub fn column(&self, group: &str, dataset: &str) -> Option<&Column> {
        self.groups
            .get(group)
            .and_then(|g| g.datasets.get(dataset))
            .map(|(c, _)| c)
    }

    fn group(&self, group: &str) -> Result<&MemoryGroup> {
        self.groups
            .get(group)
            .ok_or_else(|| eyre!("Group {group} does not exist"))
    }
}

impl SourceFile for MemoryFile {
    fn groups(&self) -> Result<Vec<String>> {
        Ok(self.groups.keys().cloned().collect())
    }

    fn datasets(&self, group: &str) -> Result<Vec<String>> {
        Ok(self.group(group)?.datasets.keys().cloned().collect())
    }

    fn read(&self, group: &str, dataset: &str) -> Result<Column> {
        self.group(group)?
            .datasets
            .get(dataset)
            .map(|(c, _)| c.clone())
            .ok_or_else(|| eyre!("Dataset {group}/{dataset} does not exist"))
    }

    fn unit(&self, group: &str, dataset: &str) -> Result<Option<String>> {
        Ok(self
            .group(group)?
            .datasets
            .get(dataset)
            .and_then(|(_, u)| u.clone()))
    }

    fn attrs(&self, group: &str) -> Result<BTreeMap<String, f64>> {
        Ok(self.group(group)?.attrs.clone())
    }
}

type Files = Rc<RefCell<BTreeMap<PathBuf, MemoryFile>>>;

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    files: Files,
    failing_dataset: Option<String>,
}

impl MemoryStore {
    /// A store whose sinks refuse to write the named dataset.
    pub fn failing_on(dataset: &str) -> Self {
        Self {
            failing_dataset: Some(dataset.to_string()),
            ..Self::default()
        }
    }

    pub fn put(&self, path: impl Into<PathBuf>, file: MemoryFile) {
        self.files.borrow_mut().insert(path.into(), file);
    }

    pub fn get(&self, path: &Path) -> Option<MemoryFile> {
        self.files.borrow().get(path).cloned()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.files.borrow().contains_key(path)
    }
}

pub struct MemorySink {
    path: PathBuf,
    files: Files,
    failing_dataset: Option<String>,
}

impl MemorySink {
    fn with_file<T>(&self, f: impl FnOnce(&mut MemoryFile) -> T) -> Result<T> {
        let mut files = self.files.borrow_mut();
        let file = files
            .get_mut(&self.path)
            .ok_or_else(|| eyre!("{} was removed while open", self.path.display()))?;
        Ok(f(file))
    }
}

impl SinkFile for MemorySink {
    fn write(&mut self, group: &str, dataset: &str, column: &Column, unit: &str) -> Result<()> {
        if self.failing_dataset.as_deref() == Some(dataset) {
            return Err(eyre!("Refusing to write {group}/{dataset}"));
        }
        self.with_file(|file| file.insert(group, dataset, column.clone(), Some(unit)))
    }

    fn write_attr(&mut self, group: &str, name: &str, value: f64) -> Result<()> {
        self.with_file(|file| file.set_attr(group, name, value))
    }

    fn close(self) -> Result<()> {
        Ok(())
    }
}

impl DataStore for MemoryStore {
    type Source = MemoryFile;
    type Sink = MemorySink;

    fn open(&self, path: &Path) -> Result<MemoryFile> {
        self.get(path)
            .ok_or_else(|| eyre!("Unable to open file {}", path.display()))
    }

    fn create(&self, path: &Path) -> Result<MemorySink> {
        self.put(path, MemoryFile::default());
        Ok(MemorySink {
            path: path.to_path_buf(),
            files: Rc::clone(&self.files),
            failing_dataset: self.failing_dataset.clone(),
        })
    }

    fn remove(&self, path: &Path) -> Result<()> {
        self.files.borrow_mut().remove(path);
        Ok(())
    }
}

/// A Shark record whose files live in the memory store.
pub fn shark_config(subvolumes: &[u32]) -> crate::record::ConfigRecord {
    let mut config = crate::registry::resolve(
        "SharkSU",
        104,
        subvolumes,
        Some("1"),
        crate::record::Environment::Local,
    )
    .expect("SharkSU is registered");
    config.root = "/mem/shark/104/".to_string();
    config.outroot = "/mem/out/iz104/ivol".to_string();
    config
}

/// A Shark `galaxies.hdf5` with `rows` galaxies that pass the selection.
///
/// Only the first `lines` emission lines are present.
pub fn shark_galaxies(
    config: &crate::record::ConfigRecord,
    rows: usize,
    lines: usize,
) -> MemoryFile {
    let mut file = MemoryFile::default();
    let spec = &config.file_props["galaxies.hdf5"];
    for (dataset, unit) in spec.datasets.iter().zip(&spec.units) {
        let column = match dataset.as_str() {
            "id_halo" | "type" => Column::from((0..rows as i64).collect::<Vec<_>>()),
            _ => Column::from((0..rows).map(|i| i as f64 + 0.5).collect::<Vec<_>>()),
        };
        file.insert(&spec.group, dataset, column, Some(unit));
    }
    let selection = &config.selection["galaxies.hdf5"];
    for (dataset, unit, _, _) in selection.entries() {
        let values = (0..rows)
            .map(|i| (i as f64 * 7.0) % config.boxside)
            .collect::<Vec<_>>();
        file.insert(&selection.group, dataset, Column::from(values), Some(unit));
    }
    for name in config.line_datasets().into_iter().take(lines * 2) {
        let values = (0..rows).map(|i| 1.0e40 * (i + 1) as f64).collect::<Vec<_>>();
        file.insert("galaxies", &name, Column::from(values), Some("1e40 erg/s"));
    }
    file.insert("run_info", "redshift", Column::from(vec![0.987]), Some("redshift"));
    file
}
