use crate::config::DbConfig;
use crate::error::{Result, SchemaDbError};
use crate::ids::IdSource;
use crate::persistence::{Persistence, SaveHandle, Snapshot, SnapshotRef, TableRows};
use crate::query::{self, Predicate};
use crate::record::Record;
use crate::schema::{check_references, compile, CompiledSchemas, RawSchema, TableSchema, ID_FIELD};
use crate::validation::{self, RowLookup};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::path::PathBuf;

impl RowLookup for TableRows {
    fn has_table(&self, table: &str) -> bool {
        self.contains_key(table)
    }

    fn has_row(&self, table: &str, id: &str) -> bool {
        self.get(table).map(|rows| rows.contains_key(id)).unwrap_or(false)
    }
}

/// The main entry point: one database of schema-checked tables.
///
/// Owns the compiled schemas, the rows of every table and the identifier
/// source. Mutations take `&mut self`; wrap the handle in a `Mutex` to
/// share it between threads.
#[derive(Debug)]
pub struct Database {
    config: DbConfig,
    tables: CompiledSchemas,
    rows: TableRows,
    ids: IdSource,
    persistence: Option<Persistence>,
}

impl Database {
    /// Create a new database called `name` under `config.data_dir`.
    /// Fails if a snapshot for `name` already exists. The initial (empty)
    /// snapshot is written immediately.
    pub fn create(name: &str, schema: &RawSchema, config: DbConfig) -> Result<Self> {
        config.validate()?;
        let persistence = Persistence::new(&config.data_dir, name);
        if persistence.exists() {
            return Err(SchemaDbError::DatabaseExists {
                name: name.to_string(),
                path: persistence.snapshot_path().display().to_string(),
            });
        }

        let tables = compile(schema)?;
        let db = Self::build(config, tables, TableRows::new(), Some(persistence));
        db.flush()?;

        log::debug!("Created database '{name}' with {} table(s)", db.tables.len());
        Ok(db)
    }

    /// Build a database with no snapshot location.
    pub fn in_memory(schema: &RawSchema, config: DbConfig) -> Result<Self> {
        config.validate()?;
        let tables = compile(schema)?;
        Ok(Self::build(config, tables, TableRows::new(), None))
    }

    /// Reopen database `name` under `data_dir` with the settings stored in
    /// its snapshot.
    pub fn open(name: &str, data_dir: impl Into<PathBuf>) -> Result<Self> {
        Self::restore(name, DbConfig::new(data_dir), true)
    }

    /// Restore database `name` from its snapshot under `config.data_dir`,
    /// using `config` in place of the stored settings. Later saves record
    /// the new settings.
    pub fn load(name: &str, config: DbConfig) -> Result<Self> {
        Self::restore(name, config, false)
    }

    fn restore(name: &str, config: DbConfig, stored_settings: bool) -> Result<Self> {
        let persistence = Persistence::new(&config.data_dir, name);
        let Snapshot {
            settings,
            tables,
            rows,
            ..
        } = persistence.load()?;
        let config = if stored_settings {
            config.with_settings(settings)
        } else {
            config
        };
        config.validate()?;

        check_references(&tables)?;
        for (table, table_rows) in &rows {
            if !tables.contains_key(table) {
                return Err(SchemaDbError::Persistence(format!(
                    "snapshot holds rows for undeclared table '{table}'"
                )));
            }
            if let Some((key, record)) = table_rows.iter().find(|(key, record)| **key != record.id) {
                return Err(SchemaDbError::Persistence(format!(
                    "snapshot row '{key}' in table '{table}' carries id '{}'",
                    record.id
                )));
            }
        }

        let db = Self::build(config, tables, rows, Some(persistence));
        log::debug!("Loaded database '{name}'");
        Ok(db)
    }

    fn build(
        config: DbConfig,
        tables: CompiledSchemas,
        mut rows: TableRows,
        persistence: Option<Persistence>,
    ) -> Self {
        for name in tables.keys() {
            rows.entry(name.clone()).or_default();
        }
        let ids = IdSource::new(config.id_strategy, config.buffer_size);
        Database {
            config,
            tables,
            rows,
            ids,
            persistence,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.persistence.as_ref().map(|p| p.name())
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    pub fn schemas(&self) -> &CompiledSchemas {
        &self.tables
    }

    /// Names of all tables, sorted.
    pub fn list_tables(&self) -> Vec<&str> {
        self.tables.keys().map(String::as_str).collect()
    }

    pub fn table_schema(&self, table: &str) -> Result<&TableSchema> {
        self.tables
            .get(table)
            .ok_or_else(|| SchemaDbError::TableNotFound(table.to_string()))
    }

    fn table_rows(&self, table: &str) -> Result<&IndexMap<String, Record>> {
        self.rows
            .get(table)
            .ok_or_else(|| SchemaDbError::TableNotFound(table.to_string()))
    }

    fn table_rows_mut(&mut self, table: &str) -> Result<&mut IndexMap<String, Record>> {
        self.rows
            .get_mut(table)
            .ok_or_else(|| SchemaDbError::TableNotFound(table.to_string()))
    }

    /// Rows of a table in insertion order.
    pub fn rows(&self, table: &str) -> Result<impl Iterator<Item = &Record> + '_> {
        Ok(self.table_rows(table)?.values())
    }

    pub fn row_count(&self, table: &str) -> Result<usize> {
        Ok(self.table_rows(table)?.len())
    }

    // ── Mutations ──────────────────────────────────────────────────

    /// Validate and store a new record. Returns the stored record with its
    /// assigned id. A rejected record leaves the table untouched.
    pub fn insert(&mut self, table: &str, fields: Map<String, Value>) -> Result<Record> {
        let schema = self.table_schema(table)?;
        let prepared = validation::validate_record(table, schema, &fields, &self.rows)?;

        let id = self.ids.next();
        let record = Record::new(id.clone(), prepared);
        self.table_rows_mut(table)?.insert(id.clone(), record.clone());
        if let Some(schema) = self.tables.get_mut(table) {
            schema.row_counter += 1;
        }

        self.after_mutation(table, &id)?;
        Ok(record)
    }

    /// Insert from a JSON value, which must be an object.
    pub fn insert_dynamic(&mut self, table: &str, data: Value) -> Result<Record> {
        match data {
            Value::Object(fields) => self.insert(table, fields),
            other => Err(SchemaDbError::validation(
                table,
                "$root",
                &other,
                "record must be an object",
            )),
        }
    }

    /// Replace one field of an existing row. `null` clears an optional field.
    pub fn set_field(&mut self, table: &str, id: &str, field: &str, value: Value) -> Result<Record> {
        let schema = self.table_schema(table)?;
        if !self.table_rows(table)?.contains_key(id) {
            return Err(SchemaDbError::NotFound {
                table: table.to_string(),
                id: id.to_string(),
            });
        }
        if field == ID_FIELD {
            return Err(SchemaDbError::validation(
                table,
                field,
                &value,
                "id is assigned by the database",
            ));
        }
        if value.is_null() {
            validation::check_nullable(table, schema, field)?;
        } else {
            validation::validate_field(table, schema, field, &value, &self.rows)?;
        }

        let record = self
            .table_rows_mut(table)?
            .get_mut(id)
            .ok_or_else(|| SchemaDbError::NotFound {
                table: table.to_string(),
                id: id.to_string(),
            })?;
        if value.is_null() {
            record.fields.remove(field);
        } else {
            record.fields.insert(field.to_string(), value);
        }
        let updated = record.clone();

        self.after_mutation(table, id)?;
        Ok(updated)
    }

    /// Remove a row. Returns whether a row was removed. References held by
    /// other rows are left as they are.
    pub fn delete_by_id(&mut self, table: &str, id: &str) -> Result<bool> {
        let removed = self.table_rows_mut(table)?.shift_remove(id).is_some();
        if removed {
            self.after_mutation(table, id)?;
        }
        Ok(removed)
    }

    /// Autosave hook. The mutation stays applied in memory when the write
    /// fails; the error names the row it touched.
    fn after_mutation(&self, table: &str, id: &str) -> Result<()> {
        if self.config.autosave && self.persistence.is_some() {
            self.flush().map_err(|e| SchemaDbError::AutosaveFailed {
                table: table.to_string(),
                id: id.to_string(),
                source: Box::new(e),
            })?;
        }
        Ok(())
    }

    // ── Reads ──────────────────────────────────────────────────────

    pub fn find_by_id(&self, table: &str, id: &str) -> Result<Option<&Record>> {
        Ok(self.table_rows(table)?.get(id))
    }

    /// Rows whose fields equal every pair of `predicate`, in insertion order.
    pub fn find(&self, table: &str, predicate: &Predicate) -> Result<Vec<Record>> {
        let schema = self.table_schema(table)?;
        query::find(table, schema, self.table_rows(table)?, predicate)
    }

    pub fn count(&self, table: &str, predicate: &Predicate) -> Result<usize> {
        let schema = self.table_schema(table)?;
        query::count(table, schema, self.table_rows(table)?, predicate)
    }

    // ── Persistence ────────────────────────────────────────────────

    fn persistence(&self) -> Result<&Persistence> {
        self.persistence.as_ref().ok_or_else(|| {
            SchemaDbError::Persistence("in-memory database has no snapshot location".into())
        })
    }

    fn snapshot(&self) -> Result<SnapshotRef<'_>> {
        let persistence = self.persistence()?;
        Ok(SnapshotRef::new(
            persistence.name(),
            self.config.settings(),
            &self.tables,
            &self.rows,
        ))
    }

    /// Write the snapshot on a background thread. The document is encoded
    /// before this returns, so later mutations are not included.
    pub fn save(&self) -> Result<SaveHandle> {
        self.persistence()?.write_in_background(&self.snapshot()?)
    }

    /// Write the snapshot on the calling thread.
    pub fn flush(&self) -> Result<()> {
        self.persistence()?.write(&self.snapshot()?)
    }

    /// Write the snapshot on the calling thread, logging any failure.
    pub fn save_sync(&self) -> bool {
        match self.flush() {
            Ok(()) => true,
            Err(e) => {
                log::error!("Failed to save database: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::IdStrategy;
    use crate::schema::parse_schema_str;
    use serde_json::json;
    use tempfile::TempDir;

    const SCHEMA: &str = r#"
Person:
  name: { type: string, required: true }
  age: { type: number }
Pet:
  name: { type: string, required: true }
  owner: { type: id Person }
  vets: { type: array id Person }
"#;

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn setup_memory_db() -> Database {
        Database::in_memory(&parse_schema_str(SCHEMA).unwrap(), DbConfig::default()).unwrap()
    }

    fn setup_disk_db(autosave: bool) -> (TempDir, Database) {
        let tmp = TempDir::new().unwrap();
        let config = DbConfig::new(tmp.path()).with_autosave(autosave);
        let db = Database::create("zoo", &parse_schema_str(SCHEMA).unwrap(), config).unwrap();
        (tmp, db)
    }

    #[test]
    fn test_list_tables() {
        let db = setup_memory_db();
        assert_eq!(db.list_tables(), vec!["Person", "Pet"]);
        assert_eq!(db.name(), None);
    }

    #[test]
    fn test_insert_and_find_by_id() {
        let mut db = setup_memory_db();
        let ada = db.insert("Person", fields(json!({ "name": "Ada", "age": 36 }))).unwrap();
        assert!(!ada.id.is_empty());
        assert_eq!(ada["name"], "Ada");

        let found = db.find_by_id("Person", &ada.id).unwrap().unwrap();
        assert_eq!(found, &ada);
        assert_eq!(db.table_schema("Person").unwrap().row_counter, 1);
    }

    #[test]
    fn test_failed_insert_leaves_table_unchanged() {
        let mut db = setup_memory_db();
        db.insert("Person", fields(json!({ "name": "Ada" }))).unwrap();

        let err = db.insert("Person", fields(json!({ "name": "Bob", "age": "old" })));
        assert!(matches!(err, Err(SchemaDbError::Validation { .. })));
        assert_eq!(db.row_count("Person").unwrap(), 1);
        assert_eq!(db.table_schema("Person").unwrap().row_counter, 1);
    }

    #[test]
    fn test_insert_unknown_table() {
        let mut db = setup_memory_db();
        let err = db.insert("Robot", Map::new()).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_insert_dynamic_requires_object() {
        let mut db = setup_memory_db();
        assert!(db.insert_dynamic("Person", json!(["Ada"])).is_err());
        assert!(db.insert_dynamic("Person", json!({ "name": "Ada" })).is_ok());
    }

    #[test]
    fn test_set_field() {
        let mut db = setup_memory_db();
        let ada = db.insert("Person", fields(json!({ "name": "Ada", "age": 36 }))).unwrap();

        let updated = db.set_field("Person", &ada.id, "age", json!(37)).unwrap();
        assert_eq!(updated["age"], 37);
        assert_eq!(db.find_by_id("Person", &ada.id).unwrap().unwrap()["age"], 37);

        let cleared = db.set_field("Person", &ada.id, "age", Value::Null).unwrap();
        assert!(!cleared.fields.contains_key("age"));
    }

    #[test]
    fn test_set_field_rejections() {
        let mut db = setup_memory_db();
        let ada = db.insert("Person", fields(json!({ "name": "Ada" }))).unwrap();

        let missing = db.set_field("Person", "nope", "age", json!(1)).unwrap_err();
        assert!(matches!(missing, SchemaDbError::NotFound { .. }));

        for (field, value) in [
            ("age", json!("1")),
            ("name", Value::Null),
            ("email", json!("a@b.c")),
            ("id", json!("other")),
        ] {
            let err = db.set_field("Person", &ada.id, field, value).unwrap_err();
            assert!(matches!(err, SchemaDbError::Validation { .. }), "{field}: {err}");
        }
        assert_eq!(db.find_by_id("Person", &ada.id).unwrap().unwrap(), &ada);
    }

    #[test]
    fn test_references_checked_against_current_rows() {
        let mut db = setup_memory_db();
        let err = db.insert("Pet", fields(json!({ "name": "Rex", "owner": "ghost" })));
        assert!(matches!(err, Err(SchemaDbError::Validation { .. })));

        let ada = db.insert("Person", fields(json!({ "name": "Ada" }))).unwrap();
        let rex = db
            .insert("Pet", fields(json!({ "name": "Rex", "owner": ada.id, "vets": [ada.id] })))
            .unwrap();

        // Deleting the owner does not cascade or rewrite the pet
        assert!(db.delete_by_id("Person", &ada.id).unwrap());
        assert_eq!(db.find_by_id("Pet", &rex.id).unwrap().unwrap(), &rex);

        // But new writes are checked against the current rows
        let err = db.set_field("Pet", &rex.id, "owner", json!(ada.id));
        assert!(matches!(err, Err(SchemaDbError::Validation { .. })));
    }

    #[test]
    fn test_delete_by_id() {
        let mut db = setup_memory_db();
        let ada = db.insert("Person", fields(json!({ "name": "Ada" }))).unwrap();

        assert!(db.delete_by_id("Person", &ada.id).unwrap());
        assert!(db.find_by_id("Person", &ada.id).unwrap().is_none());
        assert!(!db.delete_by_id("Person", &ada.id).unwrap());
        assert!(db.delete_by_id("Robot", &ada.id).is_err());
    }

    #[test]
    fn test_delete_keeps_insertion_order() {
        let mut db = setup_memory_db();
        let names = ["A", "B", "C", "D"];
        let ids: Vec<String> = names
            .iter()
            .map(|n| db.insert("Person", fields(json!({ "name": n }))).unwrap().id)
            .collect();

        db.delete_by_id("Person", &ids[1]).unwrap();
        let remaining: Vec<&str> = db.rows("Person").unwrap().map(|r| r.id.as_str()).collect();
        assert_eq!(remaining, vec![ids[0].as_str(), ids[2].as_str(), ids[3].as_str()]);
    }

    #[test]
    fn test_find_delegates_to_query() {
        let mut db = setup_memory_db();
        db.insert("Person", fields(json!({ "name": "Ada", "age": 36 }))).unwrap();
        db.insert("Person", fields(json!({ "name": "Bob", "age": 36 }))).unwrap();

        let found = db.find("Person", &fields(json!({ "age": 36, "name": "Bob" }))).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(db.count("Person", &Predicate::new()).unwrap(), 2);
        assert!(db.find("Person", &fields(json!({ "email": "x" }))).is_err());
    }

    #[test]
    fn test_in_memory_save_fails_cleanly() {
        let db = setup_memory_db();
        assert!(!db.save_sync());
        assert!(matches!(db.flush(), Err(SchemaDbError::Persistence(_))));
        assert!(db.save().is_err());
    }

    #[test]
    fn test_create_writes_snapshot_and_refuses_existing() {
        let (tmp, db) = setup_disk_db(false);
        assert_eq!(db.name(), Some("zoo"));
        assert!(tmp.path().join("zoo.json").exists());

        let again = Database::create("zoo", &parse_schema_str(SCHEMA).unwrap(), DbConfig::new(tmp.path()));
        assert!(matches!(again, Err(SchemaDbError::DatabaseExists { .. })));
    }

    #[test]
    fn test_create_rejects_bad_schema_without_writing() {
        let tmp = TempDir::new().unwrap();
        let raw = parse_schema_str("Pet:\n  owner: { type: id Person }\n").unwrap();
        let result = Database::create("zoo", &raw, DbConfig::new(tmp.path()));
        assert!(matches!(result, Err(SchemaDbError::Schema { .. })));
        assert!(!tmp.path().join("zoo.json").exists());
    }

    #[test]
    fn test_autosave_writes_each_mutation() {
        let (tmp, mut db) = setup_disk_db(true);
        let ada = db.insert("Person", fields(json!({ "name": "Ada" }))).unwrap();

        let reloaded = Database::load("zoo", DbConfig::new(tmp.path())).unwrap();
        assert_eq!(reloaded.find_by_id("Person", &ada.id).unwrap(), Some(&ada));
        assert!(tmp.path().join("zoo.json.old").exists());
    }

    #[test]
    fn test_without_autosave_nothing_is_written_until_save() {
        let (tmp, mut db) = setup_disk_db(false);
        db.insert("Person", fields(json!({ "name": "Ada" }))).unwrap();

        let reloaded = Database::load("zoo", DbConfig::new(tmp.path())).unwrap();
        assert_eq!(reloaded.row_count("Person").unwrap(), 0);

        assert!(db.save_sync());
        let reloaded = Database::load("zoo", DbConfig::new(tmp.path())).unwrap();
        assert_eq!(reloaded.row_count("Person").unwrap(), 1);
    }

    #[test]
    fn test_background_save() {
        let (tmp, mut db) = setup_disk_db(false);
        db.insert("Person", fields(json!({ "name": "Ada" }))).unwrap();
        db.save().unwrap().wait().unwrap();

        let reloaded = Database::load("zoo", DbConfig::new(tmp.path())).unwrap();
        assert_eq!(reloaded.row_count("Person").unwrap(), 1);
    }

    #[test]
    fn test_load_missing_database() {
        let tmp = TempDir::new().unwrap();
        let err = Database::load("nothing", DbConfig::new(tmp.path())).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_open_restores_creation_settings() {
        let tmp = TempDir::new().unwrap();
        let config = DbConfig::new(tmp.path())
            .with_autosave(true)
            .with_buffer_size(3)
            .with_id_strategy(IdStrategy::Uuid);
        Database::create("zoo", &parse_schema_str(SCHEMA).unwrap(), config.clone()).unwrap();

        let mut db = Database::open("zoo", tmp.path()).unwrap();
        assert_eq!(db.config(), &config);
        assert_eq!(db.ids.strategy(), IdStrategy::Uuid);

        // Autosave came back with the rest, so the row reaches disk
        let ada = db.insert("Person", fields(json!({ "name": "Ada" }))).unwrap();
        assert_eq!(ada.id.len(), 36);
        let reopened = Database::open("zoo", tmp.path()).unwrap();
        assert_eq!(reopened.find_by_id("Person", &ada.id).unwrap(), Some(&ada));
    }

    #[test]
    fn test_load_with_explicit_config_replaces_stored_settings() {
        let tmp = TempDir::new().unwrap();
        let config = DbConfig::new(tmp.path()).with_id_strategy(IdStrategy::Uuid);
        Database::create("zoo", &parse_schema_str(SCHEMA).unwrap(), config).unwrap();

        let db = Database::load("zoo", DbConfig::new(tmp.path()).with_id_strategy(IdStrategy::Nanoid))
            .unwrap();
        assert_eq!(db.ids.strategy(), IdStrategy::Nanoid);
        db.flush().unwrap();

        let reopened = Database::open("zoo", tmp.path()).unwrap();
        assert_eq!(reopened.config().id_strategy, IdStrategy::Nanoid);
    }

    #[test]
    fn test_failed_autosave_reports_the_applied_row() {
        let (tmp, mut db) = setup_disk_db(true);
        let snapshot = tmp.path().join("zoo.json");
        std::fs::remove_file(&snapshot).unwrap();
        std::fs::create_dir(&snapshot).unwrap();

        let err = db.insert("Person", fields(json!({ "name": "Ada" }))).unwrap_err();
        let id = match &err {
            SchemaDbError::AutosaveFailed { table, id, source } => {
                assert_eq!(table, "Person");
                assert!(matches!(**source, SchemaDbError::Persistence(_)));
                id.clone()
            }
            other => panic!("unexpected error: {other:?}"),
        };
        assert_eq!(err.committed_id(), Some(id.as_str()));
        assert_eq!(db.row_count("Person").unwrap(), 1);
        assert_eq!(db.find_by_id("Person", &id).unwrap().unwrap()["name"], "Ada");

        let err = db.set_field("Person", &id, "age", json!(36)).unwrap_err();
        assert_eq!(err.committed_id(), Some(id.as_str()));
        assert_eq!(db.find_by_id("Person", &id).unwrap().unwrap()["age"], 36);

        let err = db.delete_by_id("Person", &id).unwrap_err();
        assert_eq!(err.committed_id(), Some(id.as_str()));
        assert_eq!(db.row_count("Person").unwrap(), 0);
    }

    #[test]
    fn test_load_rejects_row_key_that_differs_from_its_id() {
        let (tmp, mut db) = setup_disk_db(false);
        db.insert("Person", fields(json!({ "name": "Ada" }))).unwrap();
        db.flush().unwrap();

        let path = tmp.path().join("zoo.json");
        let mut doc: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        let people = doc["rows"]["Person"].as_object_mut().unwrap();
        let (_, record) = people.iter_mut().next().unwrap();
        record["id"] = json!("someone-else");
        std::fs::write(&path, serde_json::to_vec(&doc).unwrap()).unwrap();

        let result = Database::open("zoo", tmp.path());
        assert!(matches!(result, Err(SchemaDbError::Persistence(_))));
    }

    #[test]
    fn test_zero_buffer_size_rejected() {
        let raw = parse_schema_str(SCHEMA).unwrap();
        let result = Database::in_memory(&raw, DbConfig::default().with_buffer_size(0));
        assert!(matches!(result, Err(SchemaDbError::Config(_))));
    }
}
