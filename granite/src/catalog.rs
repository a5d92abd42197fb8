use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::buffer_pool::BufferPool;
use crate::error::{DbError, Result};
use crate::heap_file::{DbFile, HeapFile};
use crate::tuple::{TupleDesc, Type};
use crate::DEFAULT_POOL_CAPACITY;

struct CatalogEntry {
    file: Arc<dyn DbFile>,
    name: String,
    pkey: String,
}

#[derive(Default)]
struct CatalogState {
    tables: HashMap<u32, CatalogEntry>,
    names: HashMap<String, u32>,
}

/// The in-memory table registry: table id to (file, schema, primary key).
/// Populated by the host; lives for the process.
#[derive(Default)]
pub struct Catalog {
    state: Mutex<CatalogState>,
}

impl Catalog {
    pub fn new() -> Self {
        Catalog::default()
    }

    /// Registers a table. A name collision rebinds the name to the new file;
    /// the empty name is legal.
    pub fn add_table(&self, file: Arc<dyn DbFile>, name: &str, pkey: &str) {
        let mut state = self.state.lock().unwrap();
        let id = file.id();
        state.names.insert(name.to_string(), id);
        state.tables.insert(
            id,
            CatalogEntry {
                file,
                name: name.to_string(),
                pkey: pkey.to_string(),
            },
        );
    }

    pub fn table_id(&self, name: &str) -> Result<u32> {
        self.state
            .lock()
            .unwrap()
            .names
            .get(name)
            .copied()
            .ok_or_else(|| DbError::NoSuchTableName(name.to_string()))
    }

    pub fn db_file(&self, table_id: u32) -> Result<Arc<dyn DbFile>> {
        self.state
            .lock()
            .unwrap()
            .tables
            .get(&table_id)
            .map(|e| Arc::clone(&e.file))
            .ok_or(DbError::NoSuchTable(table_id))
    }

    pub fn tuple_desc(&self, table_id: u32) -> Result<TupleDesc> {
        Ok(self.db_file(table_id)?.tuple_desc().clone())
    }

    pub fn primary_key(&self, table_id: u32) -> Result<String> {
        self.state
            .lock()
            .unwrap()
            .tables
            .get(&table_id)
            .map(|e| e.pkey.clone())
            .ok_or(DbError::NoSuchTable(table_id))
    }

    pub fn table_name(&self, table_id: u32) -> Result<String> {
        self.state
            .lock()
            .unwrap()
            .tables
            .get(&table_id)
            .map(|e| e.name.clone())
            .ok_or(DbError::NoSuchTable(table_id))
    }

    /// A snapshot of the registered table ids.
    pub fn table_ids(&self) -> Vec<u32> {
        self.state.lock().unwrap().tables.keys().copied().collect()
    }

    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.tables.clear();
        state.names.clear();
    }

    /// Loads a text schema file: one `name (field type [pk], ...)` per line,
    /// `type` one of `int`/`string`. The table's data file is
    /// `<schema dir>/<name>.dat`. Any unknown type or annotation aborts the
    /// load.
    pub fn load_schema(&self, schema_path: impl AsRef<Path>) -> Result<()> {
        let schema_path = schema_path.as_ref();
        let base = schema_path.parent().unwrap_or_else(|| Path::new("."));
        let text = fs::read_to_string(schema_path)?;
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let open = line.find('(').ok_or_else(|| {
                DbError::InvalidSchema(format!("missing '(' in line {:?}", line))
            })?;
            let close = line.rfind(')').ok_or_else(|| {
                DbError::InvalidSchema(format!("missing ')' in line {:?}", line))
            })?;
            if close < open {
                return Err(DbError::InvalidSchema(format!(
                    "mismatched parentheses in line {:?}",
                    line
                )));
            }
            let name = line[..open].trim();
            let mut types = Vec::new();
            let mut names = Vec::new();
            let mut pkey = String::new();
            for decl in line[open + 1..close].split(',') {
                let tokens: Vec<&str> = decl.split_whitespace().collect();
                let (field_name, type_token) = match tokens.as_slice() {
                    [f, t] => (*f, *t),
                    [f, t, annotation] => {
                        if !annotation.eq_ignore_ascii_case("pk") {
                            return Err(DbError::InvalidSchema(format!(
                                "unknown annotation {:?} in line {:?}",
                                annotation, line
                            )));
                        }
                        pkey = (*f).to_string();
                        (*f, *t)
                    }
                    _ => {
                        return Err(DbError::InvalidSchema(format!(
                            "malformed field declaration {:?} in line {:?}",
                            decl, line
                        )));
                    }
                };
                let field_type = match type_token.to_ascii_lowercase().as_str() {
                    "int" => Type::Int,
                    "string" => Type::Str,
                    other => {
                        return Err(DbError::InvalidSchema(format!(
                            "unknown type {:?} in line {:?}",
                            other, line
                        )));
                    }
                };
                types.push(field_type);
                names.push(Some(field_name.to_string()));
            }
            if types.is_empty() {
                return Err(DbError::InvalidSchema(format!(
                    "table {:?} declares no fields",
                    name
                )));
            }
            let td = TupleDesc::new(types, names);
            let file = HeapFile::new(base.join(format!("{}.dat", name)), td)?;
            crate::granite_debug_log!(
                "[Catalog::load_schema] table {:?} -> id {}",
                name,
                file.id()
            );
            self.add_table(Arc::new(file), name, &pkey);
        }
        Ok(())
    }
}

/// One database instance: the catalog plus the buffer pool wired to it.
/// Clone the inner handles freely; both are shared and thread-safe.
pub struct Database {
    catalog: Arc<Catalog>,
    pool: Arc<BufferPool>,
}

impl Database {
    pub fn new() -> Self {
        Database::with_pool_capacity(DEFAULT_POOL_CAPACITY)
    }

    pub fn with_pool_capacity(capacity: usize) -> Self {
        let catalog = Arc::new(Catalog::new());
        let pool = Arc::new(BufferPool::new(Arc::clone(&catalog), capacity));
        Database { catalog, pool }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }
}

impl Default for Database {
    fn default() -> Self {
        Database::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn table(dir: &Path, name: &str) -> Arc<HeapFile> {
        let td = TupleDesc::with_types(vec![Type::Int]);
        Arc::new(HeapFile::new(dir.join(format!("{}.dat", name)), td).unwrap())
    }

    #[test]
    fn add_and_look_up_tables() {
        let dir = tempdir().unwrap();
        let catalog = Catalog::new();
        let file = table(dir.path(), "users");
        let id = file.id();
        catalog.add_table(file, "users", "id");

        assert_eq!(catalog.table_id("users").unwrap(), id);
        assert_eq!(catalog.table_name(id).unwrap(), "users");
        assert_eq!(catalog.primary_key(id).unwrap(), "id");
        assert_eq!(catalog.tuple_desc(id).unwrap().num_fields(), 1);
        assert!(catalog.table_id("absent").is_err());
        assert!(catalog.db_file(id.wrapping_add(1)).is_err());
    }

    #[test]
    fn later_binding_wins_name_collisions() {
        let dir = tempdir().unwrap();
        let catalog = Catalog::new();
        let first = table(dir.path(), "a");
        let second = table(dir.path(), "b");
        let second_id = second.id();
        catalog.add_table(first, "t", "");
        catalog.add_table(second, "t", "");
        assert_eq!(catalog.table_id("t").unwrap(), second_id);
        assert_eq!(catalog.table_ids().len(), 2);
    }

    #[test]
    fn clear_empties_the_registry() {
        let dir = tempdir().unwrap();
        let catalog = Catalog::new();
        catalog.add_table(table(dir.path(), "x"), "x", "");
        catalog.clear();
        assert!(catalog.table_ids().is_empty());
        assert!(catalog.table_id("x").is_err());
    }

    #[test]
    fn load_schema_parses_the_text_format() {
        let dir = tempdir().unwrap();
        let schema = dir.path().join("catalog.txt");
        let mut f = fs::File::create(&schema).unwrap();
        writeln!(f, "users (id int pk, name string)").unwrap();
        writeln!(f, "events (user_id int, kind string)").unwrap();
        drop(f);

        let catalog = Catalog::new();
        catalog.load_schema(&schema).unwrap();

        let users = catalog.table_id("users").unwrap();
        assert_eq!(catalog.primary_key(users).unwrap(), "id");
        let td = catalog.tuple_desc(users).unwrap();
        assert_eq!(td.num_fields(), 2);
        assert_eq!(td.field_name(1).unwrap(), Some("name"));
        assert_eq!(td.field_name_to_index("id").unwrap(), 0);
        assert!(dir.path().join("users.dat").exists());
        assert!(dir.path().join("events.dat").exists());
    }

    #[test]
    fn load_schema_rejects_unknown_types_and_annotations() {
        let dir = tempdir().unwrap();
        let schema = dir.path().join("catalog.txt");
        fs::write(&schema, "t (id float)\n").unwrap();
        let catalog = Catalog::new();
        assert!(matches!(
            catalog.load_schema(&schema),
            Err(DbError::InvalidSchema(_))
        ));

        fs::write(&schema, "t (id int unique)\n").unwrap();
        assert!(matches!(
            catalog.load_schema(&schema),
            Err(DbError::InvalidSchema(_))
        ));
    }
}
