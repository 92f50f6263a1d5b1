use super::store::{Column, DataStore, SourceFile};
use super::writer::Hdf5Sink;
use color_eyre::eyre::Result;
use hdf5_metno::types::{TypeDescriptor, VarLenAscii, VarLenUnicode};
use hdf5_metno::{Dataset, File};
use ndarray::Array1;
use std::collections::BTreeMap;
use std::path::Path;

/// [`DataStore`] backed by HDF5 files on disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct Hdf5Store;

impl DataStore for Hdf5Store {
    type Source = Hdf5Source;
    type Sink = Hdf5Sink;

    fn open(&self, path: &Path) -> Result<Hdf5Source> {
        Ok(Hdf5Source {
            file: File::open(path)?,
        })
    }

    fn create(&self, path: &Path) -> Result<Hdf5Sink> {
        Hdf5Sink::new(path)
    }

    fn remove(&self, path: &Path) -> Result<()> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

/// Last component of an HDF5 object path.
fn leaf(name: &str) -> String {
    name.rsplit('/').next().unwrap_or(name).to_string()
}

#[derive(Debug)]
pub struct Hdf5Source {
    file: File,
}

impl Hdf5Source {
    fn dataset(&self, group: &str, dataset: &str) -> Result<Dataset> {
        Ok(self.file.group(group)?.dataset(dataset)?)
    }
}

impl SourceFile for Hdf5Source {
    fn groups(&self) -> Result<Vec<String>> {
        Ok(self.file.groups()?.iter().map(|g| leaf(&g.name())).collect())
    }

    fn datasets(&self, group: &str) -> Result<Vec<String>> {
        Ok(self
            .file
            .group(group)?
            .datasets()?
            .iter()
            .map(|d| leaf(&d.name()))
            .collect())
    }

    fn read(&self, group: &str, dataset: &str) -> Result<Column> {
        let data = self.dataset(group, dataset)?;
        // Multi-dimensional datasets are flattened in storage order.
        let column = match data.dtype()?.to_descriptor()? {
            TypeDescriptor::Integer(_) | TypeDescriptor::Unsigned(_) => {
                Column::Int(Array1::from_vec(data.read_raw::<i64>()?))
            }
            _ => Column::Float(Array1::from_vec(data.read_raw::<f64>()?)),
        };
        Ok(column)
    }

    fn unit(&self, group: &str, dataset: &str) -> Result<Option<String>> {
        let data = self.dataset(group, dataset)?;
        if !data.attr_names()?.iter().any(|n| n == "units") {
            return Ok(None);
        }
        let attr = data.attr("units")?;
        if let Ok(unit) = attr.read_scalar::<VarLenUnicode>() {
            return Ok(Some(unit.as_str().to_string()));
        }
        Ok(attr
            .read_scalar::<VarLenAscii>()
            .ok()
            .map(|unit| unit.as_str().to_string()))
    }

    fn attrs(&self, group: &str) -> Result<BTreeMap<String, f64>> {
        let group = self.file.group(group)?;
        let mut attrs = BTreeMap::new();
        for name in group.attr_names()? {
            if let Ok(value) = group.attr(&name)?.read_scalar::<f64>() {
                attrs.insert(name, value);
            }
        }
        Ok(attrs)
    }
}
