//! The catalog: a by-name registry of open tables (SPEC_FULL.md §4).
//!
//! Not present in spec.md's component table, but required by its §3
//! "Lifecycles" section, which creates/opens/drops tables *by name* — this
//! is the thin lookup the Table Manager needs to do that. No query planning
//! or SQL semantics live here.

use crate::error::Error;
use crate::page::FileId;
use crate::record::schema::Schema;
use crate::table::heap_page::StorageModel;
use anyhow::{bail, Result};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct TableEntry {
    pub fid: FileId,
    pub path: PathBuf,
    pub schema: Schema,
    pub model: StorageModel,
}

#[derive(Default)]
pub struct Catalog {
    tables: HashMap<String, TableEntry>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, entry: TableEntry) -> Result<()> {
        if self.tables.contains_key(name) {
            bail!(Error::TableExists(name.into()));
        }
        self.tables.insert(name.to_string(), entry);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&TableEntry> {
        self.tables
            .get(name)
            .ok_or_else(|| Error::TableMiss(name.into()).into())
    }

    pub fn remove(&mut self, name: &str) -> Result<TableEntry> {
        self.tables
            .remove(name)
            .ok_or_else(|| Error::TableMiss(name.into()).into())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::value::Type;

    fn entry() -> TableEntry {
        TableEntry {
            fid: 3,
            path: PathBuf::from("t.db"),
            schema: Schema::new(vec![("i".into(), Type::Int32, false)]),
            model: StorageModel::NAry,
        }
    }

    #[test]
    fn register_rejects_duplicate_names() {
        let mut catalog = Catalog::new();
        catalog.register("users", entry()).unwrap();
        let err = catalog.register("users", entry()).unwrap_err();
        assert!(matches!(
            err.downcast::<Error>().unwrap(),
            Error::TableExists(_)
        ));
    }

    #[test]
    fn remove_then_get_fails() {
        let mut catalog = Catalog::new();
        catalog.register("users", entry()).unwrap();
        catalog.remove("users").unwrap();
        let err = catalog.get("users").unwrap_err();
        assert!(matches!(err.downcast::<Error>().unwrap(), Error::TableMiss(_)));
    }
}
