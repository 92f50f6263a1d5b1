//! Narrow access layer over the hierarchical data files.
//!
//! Validation, generation and sampling only talk to [`DataStore`], so they
//! can run against the HDF5 implementation in [`crate::reader`] /
//! [`crate::writer`] or against an in-memory fake in tests.
use color_eyre::eyre::{eyre, Result};
use ndarray::{concatenate, Array1, Axis};
use std::collections::BTreeMap;
use std::path::Path;

/// A flat numeric dataset.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Float(Array1<f64>),
    Int(Array1<i64>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Self::Float(a) => a.len(),
            Self::Int(a) => a.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Values widened to `f64`, for bound checks.
    pub fn to_f64(&self) -> Array1<f64> {
        match self {
            Self::Float(a) => a.clone(),
            Self::Int(a) => a.mapv(|v| v as f64),
        }
    }

    /// Rows at `indices`, in the given order.
    pub fn select(&self, indices: &[usize]) -> Self {
        match self {
            Self::Float(a) => Self::Float(a.select(Axis(0), indices)),
            Self::Int(a) => Self::Int(a.select(Axis(0), indices)),
        }
    }

    /// Appends `other` below `self`. Both must hold the same element type.
    pub fn append(&self, other: &Column) -> Result<Self> {
        match (self, other) {
            (Self::Float(a), Self::Float(b)) => {
                Ok(Self::Float(concatenate(Axis(0), &[a.view(), b.view()])?))
            }
            (Self::Int(a), Self::Int(b)) => {
                Ok(Self::Int(concatenate(Axis(0), &[a.view(), b.view()])?))
            }
            _ => Err(eyre!("Cannot append columns of different element types")),
        }
    }
}

impl From<Vec<f64>> for Column {
    fn from(values: Vec<f64>) -> Self {
        Self::Float(Array1::from_vec(values))
    }
}

impl From<Vec<i64>> for Column {
    fn from(values: Vec<i64>) -> Self {
        Self::Int(Array1::from_vec(values))
    }
}

pub trait SourceFile {
    /// Names of the top level groups.
    fn groups(&self) -> Result<Vec<String>>;
    /// Names of the datasets directly inside `group`.
    fn datasets(&self, group: &str) -> Result<Vec<String>>;
    fn read(&self, group: &str, dataset: &str) -> Result<Column>;
    /// The `units` attribute of a dataset, if it has one.
    fn unit(&self, group: &str, dataset: &str) -> Result<Option<String>>;
    /// Numeric scalar attributes attached to `group`.
    fn attrs(&self, group: &str) -> Result<BTreeMap<String, f64>>;
}

pub trait SinkFile {
    fn write(&mut self, group: &str, dataset: &str, column: &Column, unit: &str) -> Result<()>;
    fn write_attr(&mut self, group: &str, name: &str, value: f64) -> Result<()>;
    fn close(self) -> Result<()>;
}

pub trait DataStore {
    type Source: SourceFile;
    type Sink: SinkFile;

    fn open(&self, path: &Path) -> Result<Self::Source>;
    /// Creates (truncating) a file, making parent directories as needed.
    fn create(&self, path: &Path) -> Result<Self::Sink>;
    fn remove(&self, path: &Path) -> Result<()>;
}

/// Suffix marking a group name whose numbering depends on the file.
const GROUP_PLACEHOLDER: char = '#';

/// Maps a declared group name onto the group present in `source`.
///
/// A name ending in `#` (such as `Output###`) matches the first group, in
/// name order, that starts with the part before the placeholder.
pub fn find_group<S: SourceFile + ?Sized>(source: &S, declared: &str) -> Result<Option<String>> {
    let mut groups = source.groups()?;
    let prefix = declared.trim_end_matches(GROUP_PLACEHOLDER);
    if prefix.len() == declared.len() {
        return Ok(groups.into_iter().find(|g| g == declared));
    }
    groups.sort();
    Ok(groups.into_iter().find(|g| g.starts_with(prefix)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryFile;

    #[test]
    fn placeholder_groups_match_by_prefix() {
        let mut file = MemoryFile::default();
        file.insert("Output002", "mhhalo", vec![1.0].into(), None);
        file.insert("Output001", "mhhalo", vec![1.0].into(), None);
        file.insert("Parameters", "h0", vec![0.7].into(), None);
        assert_eq!(find_group(&file, "Output###").unwrap().as_deref(), Some("Output001"));
        assert_eq!(find_group(&file, "Parameters").unwrap().as_deref(), Some("Parameters"));
        assert_eq!(find_group(&file, "galaxies").unwrap(), None);
        assert_eq!(find_group(&file, "Snap###").unwrap(), None);
    }

    #[test]
    fn columns_select_and_append() {
        let ints = Column::from(vec![10_i64, 20, 30, 40]);
        assert_eq!(ints.select(&[3, 0]), Column::from(vec![40_i64, 10]));
        let floats = Column::from(vec![0.5, 1.5]);
        let joined = floats.append(&Column::from(vec![2.5])).unwrap();
        assert_eq!(joined, Column::from(vec![0.5, 1.5, 2.5]));
        assert!(floats.append(&ints).is_err());
        assert_eq!(ints.to_f64()[1], 20.0);
    }
}
