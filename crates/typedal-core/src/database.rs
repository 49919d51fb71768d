//! Database entry point.

use std::sync::Arc;

use tracing::{debug, info};
use typedal_proto::{col, InsertStatement, Predicate, RawRow, Value};

use crate::backend::Backend;
use crate::catalog::{introspect, ModelDeclaration, Registry, TableMetadata};
use crate::config::DalConfig;
use crate::error::Error;
use crate::mapper;
use crate::materialize::{Row, TypedRows};
use crate::model::Model;
use crate::query::QueryBuilder;

/// State shared by a database handle and every builder made from it.
pub(crate) struct Context {
    pub(crate) registry: Arc<Registry>,
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) config: DalConfig,
}

/// A registry of models bound to a backend.
///
/// Cloning is cheap; clones share the registry and the backend.
///
/// ```ignore
/// let db = Database::new(MemoryBackend::new());
/// db.define::<Author>()?;
/// db.define::<Book>()?;
///
/// let book = db
///     .table::<Book>()?
///     .join::<Author>()?
///     .where_(Book::col("id").eq(10))?
///     .first()?;
/// ```
#[derive(Clone)]
pub struct Database {
    ctx: Arc<Context>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("tables", &self.ctx.registry.len())
            .field("config", &self.ctx.config)
            .finish()
    }
}

impl Database {
    /// Create a database with an empty registry.
    pub fn new(backend: impl Backend + 'static) -> Self {
        Self::with_registry(Arc::new(Registry::new()), backend)
    }

    /// Create a database over an existing registry.
    pub fn with_registry(registry: Arc<Registry>, backend: impl Backend + 'static) -> Self {
        Self {
            ctx: Arc::new(Context {
                registry,
                backend: Arc::new(backend),
                config: DalConfig::default(),
            }),
        }
    }

    /// Replace the configuration. Builders created earlier keep the old one.
    pub fn with_config(self, config: DalConfig) -> Self {
        Self {
            ctx: Arc::new(Context {
                registry: self.ctx.registry.clone(),
                backend: self.ctx.backend.clone(),
                config,
            }),
        }
    }

    /// Register the table of a model type.
    pub fn define<M: Model>(&self) -> Result<Arc<TableMetadata>, Error> {
        self.define_declaration(&M::declaration())
    }

    /// Register a table from a declaration.
    pub fn define_declaration(&self, decl: &ModelDeclaration) -> Result<Arc<TableMetadata>, Error> {
        let model = introspect(decl)?;
        let table = self.ctx.registry.register_with_relationships(
            model.table,
            model.fields,
            model.primary_key.as_deref(),
            model.relationships,
        )?;
        info!(model = %decl.name, table = table.name(), "defined model");
        Ok(table)
    }

    fn prepare_insert<K, V>(
        &self,
        table: &TableMetadata,
        values: impl IntoIterator<Item = (K, V)>,
    ) -> Result<RawRow, Error>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        mapper::prepare_write(
            &self.ctx.registry.snapshot(),
            table,
            values.into_iter().map(|(k, v)| (k, v.into())),
        )
    }

    /// Validate and insert one row; returns its primary key.
    pub fn insert<K, V>(
        &self,
        table: &str,
        values: impl IntoIterator<Item = (K, V)>,
    ) -> Result<Value, Error>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let table = self.ctx.registry.lookup(table)?;
        let row = self.prepare_insert(&table, values)?;
        let key = self.ctx.backend.insert(&InsertStatement::new(
            table.name(),
            table.primary_key(),
            row,
        ))?;
        debug!(table = table.name(), key = %key, "inserted row");
        Ok(key)
    }

    /// Insert several rows and return them as stored, defaults included.
    /// Every row is validated before the first one is written.
    pub fn bulk_insert<K, V, R>(
        &self,
        table: &str,
        rows: impl IntoIterator<Item = R>,
    ) -> Result<TypedRows<Row>, Error>
    where
        K: Into<String>,
        V: Into<Value>,
        R: IntoIterator<Item = (K, V)>,
    {
        let table = self.ctx.registry.lookup(table)?;
        let prepared = rows
            .into_iter()
            .map(|values| self.prepare_insert(&table, values))
            .collect::<Result<Vec<_>, _>>()?;

        let mut keys = Vec::with_capacity(prepared.len());
        for row in prepared {
            keys.push(self.ctx.backend.insert(&InsertStatement::new(
                table.name(),
                table.primary_key(),
                row,
            ))?);
        }
        debug!(table = table.name(), rows = keys.len(), "bulk inserted rows");

        QueryBuilder::<Row>::new(self.ctx.clone(), table.clone())
            .where_(col(table.name(), table.primary_key()).is_in(keys))?
            .collect()
    }

    /// Update the first row matching `matching`, or insert `values` when
    /// nothing matches. Returns the row as stored.
    pub fn update_or_insert<K, V>(
        &self,
        table: &str,
        matching: Predicate,
        values: impl IntoIterator<Item = (K, V)>,
    ) -> Result<Row, Error>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let values: Vec<(String, Value)> = values
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        match self.query(table)?.where_(matching)?.first()? {
            Some(row) => self.update_record(&row, values),
            None => {
                let key = self.insert(table, values)?;
                self.fetch(table, key)
            }
        }
    }

    /// Update the stored row a materialized row came from, by primary key.
    /// Returns the row as stored afterwards.
    pub fn update_record<K, V>(
        &self,
        row: &Row,
        values: impl IntoIterator<Item = (K, V)>,
    ) -> Result<Row, Error>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let table = row.table();
        let changed = self
            .query(table.name())?
            .where_eq(table.primary_key(), row.key().clone())?
            .update(values)?;
        if changed == 0 {
            return Err(Error::NotFound {
                table: table.name().to_string(),
            });
        }
        self.fetch(table.name(), row.key().clone())
    }

    /// Delete the stored row a materialized row came from, by primary key.
    /// Returns how many rows were removed.
    pub fn delete_record(&self, row: &Row) -> Result<u64, Error> {
        let table = row.table();
        self.query(table.name())?
            .where_eq(table.primary_key(), row.key().clone())?
            .delete()
    }

    fn fetch(&self, table: &str, key: Value) -> Result<Row, Error> {
        let table = self.ctx.registry.lookup(table)?;
        QueryBuilder::<Row>::new(self.ctx.clone(), table.clone())
            .where_eq(table.primary_key(), key)?
            .first_or_fail()
    }

    /// Start a query on a model's table.
    pub fn table<M: Model>(&self) -> Result<QueryBuilder<M>, Error> {
        let table = self.ctx.registry.lookup(&M::table_name())?;
        Ok(QueryBuilder::new(self.ctx.clone(), table))
    }

    /// Start an untyped query on a table.
    pub fn query(&self, table: &str) -> Result<QueryBuilder<Row>, Error> {
        let table = self.ctx.registry.lookup(table)?;
        Ok(QueryBuilder::new(self.ctx.clone(), table))
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.ctx.registry
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.ctx.backend
    }

    pub fn config(&self) -> &DalConfig {
        &self.ctx.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::catalog::{FieldSpec, Text};

    fn declaration() -> ModelDeclaration {
        ModelDeclaration::new("Note")
            .field::<i64>("id")
            .field::<Text>("body")
            .field_with::<i64>("rank", FieldSpec::integer().with_default(5))
    }

    #[test]
    fn test_define_and_insert() {
        let backend = Arc::new(MemoryBackend::new());
        let db = Database::new(backend.clone());
        let table = db.define_declaration(&declaration()).unwrap();
        assert_eq!(table.name(), "note");

        let key = db.insert("note", [("body", "hello")]).unwrap();
        assert_eq!(key, Value::Int(1));

        let rows = backend.rows("note");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("rank"), Some(&Value::Int(5)));
    }

    #[test]
    fn test_insert_rejects_bad_rows() {
        let backend = Arc::new(MemoryBackend::new());
        let db = Database::new(backend.clone());
        db.define_declaration(&declaration()).unwrap();

        assert!(matches!(
            db.insert("note", [("rank", 3)]),
            Err(Error::RequiredFieldMissing { .. })
        ));
        assert!(matches!(
            db.insert("note", [("body", Value::from("x")), ("colour", Value::from("red"))]),
            Err(Error::UnknownField { .. })
        ));
        assert!(matches!(
            db.insert("missing", [("body", "x")]),
            Err(Error::UnknownTable(_))
        ));
        assert_eq!(backend.row_count("note"), 0);
    }

    #[test]
    fn test_bulk_insert_validates_first() {
        let backend = Arc::new(MemoryBackend::new());
        let db = Database::new(backend.clone());
        db.define_declaration(&declaration()).unwrap();

        let result = db.bulk_insert(
            "note",
            vec![
                vec![("body", Value::from("one"))],
                vec![("body", Value::Int(2))],
            ],
        );
        assert!(matches!(result, Err(Error::TypeMismatch { .. })));
        assert_eq!(backend.row_count("note"), 0);

        let rows = db
            .bulk_insert(
                "note",
                vec![
                    vec![("body", Value::from("one"))],
                    vec![("body", Value::from("two"))],
                ],
            )
            .unwrap();
        let keys: Vec<Value> = rows.iter().map(|r| r.key().clone()).collect();
        assert_eq!(keys, vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(rows.column("rank").unwrap(), vec![Value::Int(5), Value::Int(5)]);
    }

    #[test]
    fn test_update_or_insert() {
        let backend = Arc::new(MemoryBackend::new());
        let db = Database::new(backend.clone());
        db.define_declaration(&declaration()).unwrap();

        let inserted = db
            .update_or_insert("note", col("note", "body").eq("todo"), [("body", "todo")])
            .unwrap();
        assert_eq!(inserted.key(), &Value::Int(1));
        assert_eq!(inserted.get("rank"), Some(&Value::Int(5)));

        let updated = db
            .update_or_insert("note", col("note", "body").eq("todo"), [("rank", 9)])
            .unwrap();
        assert_eq!(updated.key(), &Value::Int(1));
        assert_eq!(updated.get("rank"), Some(&Value::Int(9)));
        assert_eq!(backend.row_count("note"), 1);

        assert!(matches!(
            db.update_or_insert("note", col("note", "body").eq("other"), [("rank", 1)]),
            Err(Error::RequiredFieldMissing { .. })
        ));
        assert_eq!(backend.row_count("note"), 1);
    }

    #[test]
    fn test_record_writes() {
        let backend = Arc::new(MemoryBackend::new());
        let db = Database::new(backend.clone());
        db.define_declaration(&declaration()).unwrap();
        db.insert("note", [("body", "first")]).unwrap();
        db.insert("note", [("body", "second")]).unwrap();

        let second = db.query("note").unwrap().where_eq("id", 2).unwrap().first_or_fail().unwrap();
        let saved = db.update_record(&second, [("body", "edited")]).unwrap();
        assert_eq!(saved.get("body"), Some(&Value::from("edited")));
        assert_eq!(saved.get("rank"), Some(&Value::Int(5)));

        let first = db.query("note").unwrap().first_or_fail().unwrap();
        assert_eq!(first.get("body"), Some(&Value::from("first")));

        assert!(matches!(
            db.update_record(&second, [("rank", "high")]),
            Err(Error::TypeMismatch { .. })
        ));

        assert_eq!(db.delete_record(&second).unwrap(), 1);
        assert_eq!(backend.row_count("note"), 1);
        assert_eq!(db.delete_record(&second).unwrap(), 0);
        assert!(db.update_record(&second, [("body", "gone")]).unwrap_err().is_not_found());
    }

    #[test]
    fn test_with_config_keeps_registry() {
        let db = Database::new(MemoryBackend::new());
        db.define_declaration(&declaration()).unwrap();
        let strict = db.clone().with_config(DalConfig::new().with_strict_first(true));

        assert!(strict.config().strict_first);
        assert!(!db.config().strict_first);
        assert!(strict.query("note").is_ok());
    }
}
