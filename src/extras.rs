//! Named auxiliary datasets that steps read from (extra sources) or publish to
//! (extra outputs), held in the [`crate::Context`] for the length of a run.

use crate::error::IoError;
use crate::io;
use crate::records::Fields;
use indexmap::IndexMap;
use serde_json::Value;
use std::path::Path;

/// Shape of an extra dataset
#[derive(Debug, Clone, PartialEq)]
pub enum ExtraData {
    /// A sequence of rows, meant to be appended to or processed over
    Records(Vec<Fields>),
    /// Values looked up by key
    Mapping(IndexMap<String, Value>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Extra {
    name: String,
    data: ExtraData,
    to_save: bool,
}

impl Extra {
    pub fn records(name: impl Into<String>, rows: Vec<Fields>) -> Self {
        Extra {
            name: name.into(),
            data: ExtraData::Records(rows),
            to_save: false,
        }
    }

    pub fn mapping(name: impl Into<String>, map: IndexMap<String, Value>) -> Self {
        Extra {
            name: name.into(),
            data: ExtraData::Mapping(map),
            to_save: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &ExtraData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut ExtraData {
        &mut self.data
    }

    pub fn as_records(&self) -> Option<&Vec<Fields>> {
        match &self.data {
            ExtraData::Records(rows) => Some(rows),
            ExtraData::Mapping(_) => None,
        }
    }

    pub fn as_records_mut(&mut self) -> Option<&mut Vec<Fields>> {
        match &mut self.data {
            ExtraData::Records(rows) => Some(rows),
            ExtraData::Mapping(_) => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&IndexMap<String, Value>> {
        match &self.data {
            ExtraData::Mapping(map) => Some(map),
            ExtraData::Records(_) => None,
        }
    }

    pub fn as_mapping_mut(&mut self) -> Option<&mut IndexMap<String, Value>> {
        match &mut self.data {
            ExtraData::Mapping(map) => Some(map),
            ExtraData::Records(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match &self.data {
            ExtraData::Records(rows) => rows.is_empty(),
            ExtraData::Mapping(map) => map.is_empty(),
        }
    }

    /// Whether this dataset is an output still waiting to be saved
    pub fn to_save(&self) -> bool {
        self.to_save
    }

    pub(crate) fn set_to_save(&mut self, to_save: bool) {
        self.to_save = to_save;
    }

    /// Replace the data with what is stored at `path`, in the layout `save` writes.
    /// Mappings are stored as rows with `key` and `value` columns.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<(), IoError> {
        let rows = io::load(path)?;
        self.data = match self.data {
            ExtraData::Records(_) => ExtraData::Records(rows),
            ExtraData::Mapping(_) => {
                let mut map = IndexMap::new();
                for row in rows {
                    let (Some(key), Some(value)) = (row.get("key"), row.get("value")) else {
                        return Err(IoError::NotAMapping {
                            name: self.name.clone(),
                        });
                    };
                    let key = match key {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    map.insert(key, value.clone());
                }
                ExtraData::Mapping(map)
            }
        };
        Ok(())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), IoError> {
        if self.is_empty() {
            return Ok(());
        }
        match &self.data {
            ExtraData::Records(rows) => io::save(path, rows),
            ExtraData::Mapping(map) => {
                let rows: Vec<Fields> = map
                    .iter()
                    .map(|(key, value)| {
                        let mut row = Fields::new();
                        row.insert("key".to_string(), Value::String(key.clone()));
                        row.insert("value".to_string(), value.clone());
                        row
                    })
                    .collect();
                io::save(path, &rows)
            }
        }
    }
}
