use super::store::{Column, SinkFile};
use color_eyre::eyre::{eyre, Result};
use hdf5_metno::types::VarLenUnicode;
use hdf5_metno::{File, Group};
use std::path::Path;
use std::str::FromStr;

#[derive(Debug)]
pub struct Hdf5Sink {
    file: File,
}

impl Hdf5Sink {
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        let sink = Self { file };
        sink.init_file()?;
        Ok(sink)
    }

    fn init_file(&self) -> Result<()> {
        let version = format!("{}:{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        self.file
            .new_attr::<VarLenUnicode>()
            .create("version")?
            .write_scalar(&to_unicode(&version)?)?;
        Ok(())
    }

    fn group(&self, name: &str) -> Result<Group> {
        match self.file.group(name) {
            Ok(group) => Ok(group),
            Err(_) => Ok(self.file.create_group(name)?),
        }
    }
}

fn to_unicode(text: &str) -> Result<VarLenUnicode> {
    VarLenUnicode::from_str(text).map_err(|e| eyre!("Cannot store '{text}' as a string attribute: {e}"))
}

impl SinkFile for Hdf5Sink {
    fn write(&mut self, group: &str, dataset: &str, column: &Column, unit: &str) -> Result<()> {
        let group = self.group(group)?;
        let data = match column {
            Column::Float(values) => group.new_dataset_builder().with_data(values).create(dataset)?,
            Column::Int(values) => group.new_dataset_builder().with_data(values).create(dataset)?,
        };
        data.new_attr::<VarLenUnicode>()
            .create("units")?
            .write_scalar(&to_unicode(unit)?)?;
        Ok(())
    }

    fn write_attr(&mut self, group: &str, name: &str, value: f64) -> Result<()> {
        self.group(group)?
            .new_attr::<f64>()
            .create(name)?
            .write_scalar(&value)?;
        Ok(())
    }

    fn close(self) -> Result<()> {
        self.file.close()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::Hdf5Store;
    use crate::store::{DataStore, SourceFile};

    #[test]
    fn written_columns_read_back_with_units() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ivol3").join("gne_input.hdf5");
        let store = Hdf5Store;
        let mut sink = store.create(&path).unwrap();
        sink.write("data", "mstars_disk", &Column::from(vec![1.0e9, 2.5e10]), "Msun/h")
            .unwrap();
        sink.write("data", "type", &Column::from(vec![0_i64, 1]), "Gal. type (central=0)")
            .unwrap();
        sink.write_attr("data", "boxside", 250.0).unwrap();
        sink.close().unwrap();

        let source = store.open(&path).unwrap();
        assert_eq!(source.groups().unwrap(), vec!["data".to_string()]);
        let mut names = source.datasets("data").unwrap();
        names.sort();
        assert_eq!(names, vec!["mstars_disk".to_string(), "type".to_string()]);
        assert_eq!(
            source.read("data", "type").unwrap(),
            Column::from(vec![0_i64, 1])
        );
        assert_eq!(
            source.unit("data", "mstars_disk").unwrap().as_deref(),
            Some("Msun/h")
        );
        assert_eq!(source.attrs("data").unwrap()["boxside"], 250.0);

        store.remove(&path).unwrap();
        assert!(!path.exists());
    }
}
