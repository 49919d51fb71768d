//! Backend collaborator contract.
//!
//! The query layer never emits backend-specific syntax. It hands a backend
//! the [`Query`] AST and receives raw rows whose values are in backend-native
//! form; see [`crate::mapper`] for the encoding.

mod memory;

pub use memory::{MemoryBackend, MemoryError};

use typedal_proto::{DeleteStatement, InsertStatement, Query, RawRow, UpdateStatement, Value};

use crate::error::Error;

/// A relational backend.
///
/// Raw row columns are named `alias.field` for table columns and by their
/// alias for aggregate expressions. Failures are reported as
/// [`Error::Backend`] and passed through to callers unchanged.
pub trait Backend: Send + Sync {
    /// Run a read query.
    fn execute(&self, query: &Query) -> Result<Vec<RawRow>, Error>;

    /// Count the rows a read query matches.
    fn execute_count(&self, query: &Query) -> Result<u64, Error>;

    /// Insert a row and return its primary key, assigning one if absent.
    fn insert(&self, statement: &InsertStatement) -> Result<Value, Error>;

    /// Update matching root rows and return how many changed.
    fn update(&self, statement: &UpdateStatement) -> Result<u64, Error>;

    /// Delete matching root rows and return how many were removed.
    fn delete(&self, statement: &DeleteStatement) -> Result<u64, Error>;
}

impl<B: Backend + ?Sized> Backend for std::sync::Arc<B> {
    fn execute(&self, query: &Query) -> Result<Vec<RawRow>, Error> {
        (**self).execute(query)
    }

    fn execute_count(&self, query: &Query) -> Result<u64, Error> {
        (**self).execute_count(query)
    }

    fn insert(&self, statement: &InsertStatement) -> Result<Value, Error> {
        (**self).insert(statement)
    }

    fn update(&self, statement: &UpdateStatement) -> Result<u64, Error> {
        (**self).update(statement)
    }

    fn delete(&self, statement: &DeleteStatement) -> Result<u64, Error> {
        (**self).delete(statement)
    }
}
