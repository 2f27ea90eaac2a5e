//! Registry of tables: id, name, schema and backing file.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use log::{info, warn};
use parking_lot::RwLock;

use crate::error::{DbError, DbResult};
use crate::heap_file::HeapFile;
use crate::tuple::{TdItem, TupleDesc};
use crate::types::Type;
use crate::TableId;

struct TableEntry {
    name: String,
    file: Arc<HeapFile>,
}

#[derive(Default)]
struct CatalogState {
    tables: HashMap<TableId, TableEntry>,
    names: HashMap<String, TableId>,
}

#[derive(Default)]
pub struct Catalog {
    state: RwLock<CatalogState>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `file` under `name`. A later registration with the same
    /// name or the same table id replaces the earlier one.
    pub fn add_table(&self, file: Arc<HeapFile>, name: &str) -> TableId {
        let id = file.id();
        let mut state = self.state.write();
        if let Some(old_id) = state.names.remove(name) {
            state.tables.remove(&old_id);
        }
        if let Some(old) = state.tables.remove(&id) {
            state.names.remove(&old.name);
        }
        state.names.insert(name.to_string(), id);
        state.tables.insert(
            id,
            TableEntry {
                name: name.to_string(),
                file,
            },
        );
        id
    }

    pub fn table_id(&self, name: &str) -> DbResult<TableId> {
        self.state
            .read()
            .names
            .get(name)
            .copied()
            .ok_or_else(|| DbError::NoSuchElement(format!("table '{}'", name)))
    }

    pub fn tuple_desc(&self, table_id: TableId) -> DbResult<Arc<TupleDesc>> {
        Ok(self.db_file(table_id)?.tuple_desc().clone())
    }

    pub fn db_file(&self, table_id: TableId) -> DbResult<Arc<HeapFile>> {
        self.state
            .read()
            .tables
            .get(&table_id)
            .map(|entry| entry.file.clone())
            .ok_or_else(|| DbError::NoSuchElement(format!("table id {}", table_id)))
    }

    pub fn table_name(&self, table_id: TableId) -> DbResult<String> {
        self.state
            .read()
            .tables
            .get(&table_id)
            .map(|entry| entry.name.clone())
            .ok_or_else(|| DbError::NoSuchElement(format!("table id {}", table_id)))
    }

    /// All registered table ids in ascending order.
    pub fn table_ids(&self) -> Vec<TableId> {
        let mut ids: Vec<TableId> = self.state.read().tables.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn clear(&self) {
        let mut state = self.state.write();
        state.tables.clear();
        state.names.clear();
    }

    /// Loads tables from a catalog file. Each non-empty line that does not
    /// start with `#` reads
    ///
    /// ```text
    /// <table_path> <name>:<type>,<name>:<type>,...
    /// ```
    ///
    /// where `<type>` is `int` or `string`. Relative paths resolve against
    /// the catalog file's directory; the table is named after the file stem.
    pub fn load_schema<P: AsRef<Path>>(&self, catalog_path: P) -> DbResult<Vec<TableId>> {
        let catalog_path = catalog_path.as_ref();
        let base = catalog_path.parent().unwrap_or_else(|| Path::new("."));
        let contents = fs::read_to_string(catalog_path)?;

        let mut loaded = Vec::new();
        for (lineno, raw) in contents.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (path_part, columns_part) = line.split_once(char::is_whitespace).ok_or_else(|| {
                DbError::Db(format!("catalog line {}: missing column list", lineno + 1))
            })?;
            let desc = parse_columns(columns_part.trim())
                .map_err(|e| DbError::Db(format!("catalog line {}: {}", lineno + 1, e)))?;

            let table_path = base.join(path_part);
            let name = table_path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .ok_or_else(|| {
                    DbError::Db(format!("catalog line {}: bad table path", lineno + 1))
                })?;
            let file = HeapFile::open(&table_path, Arc::new(desc))?;
            if self.table_id(&name).is_ok() {
                warn!("[Catalog::load_schema] table '{}' redefined", name);
            }
            loaded.push(self.add_table(Arc::new(file), &name));
        }
        info!(
            "[Catalog::load_schema] loaded {} tables from {:?}",
            loaded.len(),
            catalog_path
        );
        Ok(loaded)
    }
}

fn parse_columns(columns: &str) -> DbResult<TupleDesc> {
    let items = columns
        .split(',')
        .map(|column| {
            let (name, ty) = column.trim().split_once(':').ok_or_else(|| {
                DbError::Db(format!("column '{}' must look like name:type", column))
            })?;
            Ok(TdItem {
                field_type: ty.trim().parse::<Type>()?,
                field_name: Some(name.trim().to_string()),
            })
        })
        .collect::<DbResult<Vec<_>>>()?;
    TupleDesc::from_items(items)
}
