//! The schema registry.
//!
//! Readers load an immutable [`Snapshot`] through an `ArcSwap` and never take
//! a lock. Registration is rare, so it serializes on a coarse mutex, builds a
//! new snapshot from the current one and publishes it atomically. The
//! relationship graph hangs off each snapshot and is built on first use, so a
//! new registration invalidates it by construction.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::Error;
use crate::relation::RelationGraph;

use super::field::FieldDescriptor;
use super::relationship::Relationship;
use super::table::TableMetadata;

/// Immutable view of every table registered at one point in time.
#[derive(Debug, Default)]
pub struct Snapshot {
    version: u64,
    tables: Vec<Arc<TableMetadata>>,
    by_name: HashMap<String, usize>,
    graph: OnceLock<Arc<RelationGraph>>,
}

impl Snapshot {
    /// Version, incremented by every registration and reset.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Get a table by name.
    pub fn get(&self, name: &str) -> Option<&Arc<TableMetadata>> {
        self.by_name.get(name).map(|&i| &self.tables[i])
    }

    /// Get a table by name or fail with `UnknownTable`.
    pub fn lookup(&self, name: &str) -> Result<&Arc<TableMetadata>, Error> {
        self.get(name)
            .ok_or_else(|| Error::UnknownTable(name.to_string()))
    }

    /// Check if a table is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Tables in registration order.
    pub fn tables(&self) -> &[Arc<TableMetadata>] {
        &self.tables
    }

    /// Relationship graph of this snapshot, built on first call.
    pub fn graph(&self) -> Arc<RelationGraph> {
        self.graph
            .get_or_init(|| {
                debug!(version = self.version, tables = self.tables.len(), "building relationship graph");
                Arc::new(RelationGraph::build(&self.tables))
            })
            .clone()
    }

    fn with_table(&self, table: Arc<TableMetadata>) -> Snapshot {
        let mut tables = self.tables.clone();
        let mut by_name = self.by_name.clone();
        by_name.insert(table.name().to_string(), tables.len());
        tables.push(table);
        Snapshot {
            version: self.version + 1,
            tables,
            by_name,
            graph: OnceLock::new(),
        }
    }
}

/// Store of registered tables.
///
/// A registry is an explicit value; create one per database or per test.
/// It starts empty and only grows, except through [`Registry::reset`].
#[derive(Debug)]
pub struct Registry {
    snapshot: ArcSwap<Snapshot>,
    write_lock: Mutex<()>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(Snapshot::default()),
            write_lock: Mutex::new(()),
        }
    }

    /// Register a table.
    ///
    /// References to tables that are not registered yet are accepted and
    /// checked when a query first needs them. References to registered tables
    /// must name an existing field, in both directions: earlier tables that
    /// forward-referenced this one are checked against it too.
    pub fn register(
        &self,
        name: impl Into<String>,
        fields: Vec<FieldDescriptor>,
        primary_key: Option<&str>,
    ) -> Result<Arc<TableMetadata>, Error> {
        self.register_with_relationships(name, fields, primary_key, Vec::new())
    }

    /// Register a table together with its named relationships.
    pub fn register_with_relationships(
        &self,
        name: impl Into<String>,
        fields: Vec<FieldDescriptor>,
        primary_key: Option<&str>,
        relationships: Vec<Relationship>,
    ) -> Result<Arc<TableMetadata>, Error> {
        let name = name.into();
        let _guard = self.write_lock.lock();
        let current = self.snapshot.load_full();

        if current.contains(&name) {
            return Err(Error::DuplicateTable(name));
        }

        let table =
            TableMetadata::new(name, fields, primary_key)?.with_relationships(relationships)?;

        for field in table.references() {
            if let Some((target_table, target_field)) = field.kind.reference_target() {
                let target = if target_table == table.name() {
                    Some(&table)
                } else {
                    current.get(target_table).map(|t| t.as_ref())
                };
                if let Some(target) = target {
                    check_reference_target(&table, field, target)?;
                }
            }
        }

        for earlier in current.tables() {
            for field in earlier.references() {
                if let Some((target_table, _)) = field.kind.reference_target() {
                    if target_table == table.name() {
                        check_reference_target(earlier, field, &table)?;
                    }
                }
            }
        }

        let table = Arc::new(table);
        let next = current.with_table(table.clone());
        debug!(
            table = table.name(),
            fields = table.fields().len(),
            version = next.version,
            "registered table"
        );
        self.snapshot.store(Arc::new(next));

        Ok(table)
    }

    /// Get a table by name or fail with `UnknownTable`.
    pub fn lookup(&self, name: &str) -> Result<Arc<TableMetadata>, Error> {
        self.snapshot.load().lookup(name).cloned()
    }

    /// Get a table by name.
    pub fn get(&self, name: &str) -> Option<Arc<TableMetadata>> {
        self.snapshot.load().get(name).cloned()
    }

    /// Check if a table is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.snapshot.load().contains(name)
    }

    /// Every table in registration order.
    pub fn all(&self) -> Vec<Arc<TableMetadata>> {
        self.snapshot.load().tables().to_vec()
    }

    /// Number of registered tables.
    pub fn len(&self) -> usize {
        self.snapshot.load().tables().len()
    }

    /// Check if no table is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.load_full()
    }

    /// Current version.
    pub fn version(&self) -> u64 {
        self.snapshot.load().version()
    }

    /// Relationship graph of the current snapshot.
    pub fn graph(&self) -> Arc<RelationGraph> {
        self.snapshot.load().graph()
    }

    /// Drop every registered table.
    ///
    /// Intended for test isolation; normal operation never shrinks a registry.
    pub fn reset(&self) {
        let _guard = self.write_lock.lock();
        let version = self.snapshot.load().version() + 1;
        self.snapshot.store(Arc::new(Snapshot {
            version,
            ..Snapshot::default()
        }));
        debug!(version, "registry reset");
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

fn check_reference_target(
    source: &TableMetadata,
    field: &FieldDescriptor,
    target: &TableMetadata,
) -> Result<(), Error> {
    let Some((target_table, target_field)) = field.kind.reference_target() else {
        return Ok(());
    };
    if target.has_field(target_field) {
        Ok(())
    } else {
        Err(Error::InvalidReference {
            table: source.name().to_string(),
            field: field.name.clone(),
            target_table: target_table.to_string(),
            target_field: target_field.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FieldKind;

    fn author_fields() -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor::new("id", FieldKind::Integer),
            FieldDescriptor::new("name", FieldKind::String),
        ]
    }

    fn book_fields() -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor::new("id", FieldKind::Integer),
            FieldDescriptor::new("title", FieldKind::String),
            FieldDescriptor::new("author", FieldKind::reference("author", "id")),
        ]
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = Registry::new();
        registry.register("author", author_fields(), None).unwrap();
        registry.register("book", book_fields(), None).unwrap();

        let book = registry.lookup("book").unwrap();
        assert_eq!(
            book.field_names().collect::<Vec<_>>(),
            vec!["id", "title", "author"]
        );
        assert_eq!(
            registry
                .all()
                .iter()
                .map(|t| t.name().to_string())
                .collect::<Vec<_>>(),
            vec!["author", "book"]
        );
        assert_eq!(registry.version(), 2);
        assert!(matches!(
            registry.lookup("publisher"),
            Err(Error::UnknownTable(_))
        ));
    }

    #[test]
    fn test_duplicate_table_rejected() {
        let registry = Registry::new();
        registry.register("author", author_fields(), None).unwrap();

        let err = registry.register("author", author_fields(), None).unwrap_err();
        assert!(matches!(err, Error::DuplicateTable(name) if name == "author"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_forward_reference_checked_on_target_registration() {
        let registry = Registry::new();
        registry.register("book", book_fields(), None).unwrap();

        let fields = vec![FieldDescriptor::new("code", FieldKind::String)];
        let err = registry.register("author", fields, Some("code")).unwrap_err();
        assert!(matches!(err, Error::InvalidReference { table, .. } if table == "book"));

        registry.register("author", author_fields(), None).unwrap();
    }

    #[test]
    fn test_reference_to_missing_field_rejected() {
        let registry = Registry::new();
        registry.register("author", author_fields(), None).unwrap();

        let fields = vec![
            FieldDescriptor::new("id", FieldKind::Integer),
            FieldDescriptor::new("author", FieldKind::reference("author", "uuid")),
        ];
        assert!(matches!(
            registry.register("book", fields, None),
            Err(Error::InvalidReference { .. })
        ));
    }

    #[test]
    fn test_graph_cached_per_snapshot() {
        let registry = Registry::new();
        registry.register("author", author_fields(), None).unwrap();

        let first = registry.graph();
        assert!(Arc::ptr_eq(&first, &registry.graph()));

        registry.register("book", book_fields(), None).unwrap();
        let second = registry.graph();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.edges().len(), 2);
    }

    #[test]
    fn test_reset_clears_tables() {
        let registry = Registry::new();
        registry.register("author", author_fields(), None).unwrap();
        let old = registry.snapshot();

        registry.reset();
        assert!(registry.is_empty());
        assert!(old.contains("author"));
        registry.register("author", author_fields(), None).unwrap();
    }

    #[test]
    fn test_concurrent_lookups_during_registration() {
        let registry = Arc::new(Registry::new());
        registry.register("author", author_fields(), None).unwrap();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        assert!(registry.lookup("author").is_ok());
                    }
                })
            })
            .collect();

        for i in 0..10 {
            let fields = vec![FieldDescriptor::new("id", FieldKind::Integer)];
            registry.register(format!("t{i}"), fields, None).unwrap();
        }
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(registry.len(), 11);
    }
}
