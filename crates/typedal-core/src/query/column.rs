//! Column references accepted by builder methods.

use typedal_proto::ColumnRef;

use crate::error::Error;

/// Anything a builder method accepts as a column.
///
/// A bare name refers to a field of the root table; `alias.field` refers to
/// a field of any table occurrence in scope.
pub trait IntoColumn {
    /// Resolve into a column reference, with `root_alias` for bare names.
    fn into_column(self, root_alias: &str) -> Result<ColumnRef, Error>;
}

impl IntoColumn for ColumnRef {
    fn into_column(self, _root_alias: &str) -> Result<ColumnRef, Error> {
        Ok(self)
    }
}

impl IntoColumn for &ColumnRef {
    fn into_column(self, _root_alias: &str) -> Result<ColumnRef, Error> {
        Ok(self.clone())
    }
}

impl IntoColumn for &str {
    fn into_column(self, root_alias: &str) -> Result<ColumnRef, Error> {
        if self.contains('.') {
            Ok(ColumnRef::parse(self)?)
        } else {
            Ok(ColumnRef::new(root_alias, self))
        }
    }
}

impl IntoColumn for String {
    fn into_column(self, root_alias: &str) -> Result<ColumnRef, Error> {
        self.as_str().into_column(root_alias)
    }
}

impl IntoColumn for &String {
    fn into_column(self, root_alias: &str) -> Result<ColumnRef, Error> {
        self.as_str().into_column(root_alias)
    }
}
