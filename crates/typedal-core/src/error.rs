//! Core error types.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Broad phase an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Raised while defining models; fatal.
    Definition,
    /// Raised when a builder call needs a table, field, alias or join path.
    Resolution,
    /// Raised on write attempts before the backend is reached.
    Validation,
    /// Raised when backend output does not match the registered schema; fatal.
    Materialization,
    /// Expected runtime outcomes such as an empty `first_or_fail`.
    Query,
    /// Failure reported by the backend collaborator.
    Backend,
}

/// Core errors.
#[derive(Debug, Error)]
pub enum Error {
    /// A declared type cannot be mapped to a semantic field kind.
    #[error("cannot map annotation of {model}.{attribute}: {reason}")]
    AmbiguousAnnotation {
        model: String,
        attribute: String,
        reason: String,
    },

    /// An optional annotation was combined with a descriptor that does not
    /// declare nullability itself.
    #[error(
        "{model}.{attribute} is annotated as optional but its field descriptor does not set nullable"
    )]
    UnsupportedOptional { model: String, attribute: String },

    /// The table name is already registered.
    #[error("table '{0}' is already registered")]
    DuplicateTable(String),

    /// A field name occurs twice in one table.
    #[error("field '{field}' is declared twice on table '{table}'")]
    DuplicateField { table: String, field: String },

    /// No primary key was named and the table has no `id` field.
    #[error("table '{table}' has no primary key")]
    MissingPrimaryKey { table: String },

    /// The primary key field cannot serve as a key.
    #[error("'{table}.{field}' cannot be the primary key: {reason}")]
    InvalidPrimaryKey {
        table: String,
        field: String,
        reason: String,
    },

    /// A reference names a field its registered target does not have.
    #[error("'{table}.{field}' references missing field '{target_table}.{target_field}'")]
    InvalidReference {
        table: String,
        field: String,
        target_table: String,
        target_field: String,
    },

    /// A named relationship cannot be declared as written.
    #[error("relationship '{table}.{name}' is invalid: {reason}")]
    InvalidRelationship {
        table: String,
        name: String,
        reason: String,
    },

    /// The table declares no relationship with this name.
    #[error("table '{table}' has no relationship '{name}'")]
    UnknownRelationship { table: String, name: String },

    /// A reference points at a table that is still not registered.
    #[error("'{table}.{field}' references unregistered table '{target}'")]
    UnresolvedReference {
        table: String,
        field: String,
        target: String,
    },

    /// No table with this name is registered.
    #[error("unknown table '{0}'")]
    UnknownTable(String),

    /// The table has no field with this name.
    #[error("table '{table}' has no field '{field}'")]
    UnknownField { table: String, field: String },

    /// No table occurrence in the query uses this alias.
    #[error("alias '{0}' is not part of the query")]
    UnknownAlias(String),

    /// The alias is already taken by another table occurrence.
    #[error("alias '{0}' is already used in the query")]
    DuplicateAlias(String),

    /// A table occurs twice in a join chain without an explicit alias.
    #[error("table '{table}' is already part of the query; join it with an explicit alias")]
    AliasRequired { table: String },

    /// The tables are not connected by references.
    #[error("no relationship path from '{from}' to '{to}'")]
    NoRelationshipPath { from: String, to: String },

    /// Several shortest paths connect the tables.
    #[error("ambiguous relationship from '{from}' to '{to}': {}", candidates.join(" | "))]
    AmbiguousRelationship {
        from: String,
        to: String,
        candidates: Vec<String>,
    },

    /// A join chain grew past the configured depth.
    #[error("join path of {depth} hops exceeds the maximum of {max}")]
    JoinTooDeep { depth: usize, max: usize },

    /// A value's shape does not fit the field's kind.
    #[error("type mismatch for '{table}.{field}': expected {expected}, got {value}")]
    TypeMismatch {
        table: String,
        field: String,
        expected: String,
        value: String,
    },

    /// A required field is absent and has no default.
    #[error("required field '{table}.{field}' is missing")]
    RequiredFieldMissing { table: String, field: String },

    /// A query is structurally invalid.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Raw rows cannot be attributed to the query's tables.
    #[error("cannot materialize rows of '{table}': {reason}")]
    Materialization { table: String, reason: String },

    /// A raw value cannot be decoded for its field.
    #[error("corrupt value for '{table}.{field}': {value}")]
    DataCorruption {
        table: String,
        field: String,
        value: String,
    },

    /// No row matched.
    #[error("no row found in '{table}'")]
    NotFound { table: String },

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] typedal_proto::Error),

    /// Error reported by the backend, passed through unchanged.
    #[error("backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Wrap a backend failure.
    pub fn backend(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Error::Backend(err.into())
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::AmbiguousAnnotation { .. }
            | Error::UnsupportedOptional { .. }
            | Error::DuplicateTable(_)
            | Error::DuplicateField { .. }
            | Error::MissingPrimaryKey { .. }
            | Error::InvalidPrimaryKey { .. }
            | Error::InvalidReference { .. }
            | Error::InvalidRelationship { .. } => ErrorKind::Definition,

            Error::UnresolvedReference { .. }
            | Error::UnknownTable(_)
            | Error::UnknownField { .. }
            | Error::UnknownAlias(_)
            | Error::UnknownRelationship { .. }
            | Error::DuplicateAlias(_)
            | Error::AliasRequired { .. }
            | Error::NoRelationshipPath { .. }
            | Error::AmbiguousRelationship { .. }
            | Error::JoinTooDeep { .. } => ErrorKind::Resolution,

            Error::TypeMismatch { .. } | Error::RequiredFieldMissing { .. } => {
                ErrorKind::Validation
            }

            Error::Materialization { .. } | Error::DataCorruption { .. } => {
                ErrorKind::Materialization
            }

            Error::InvalidQuery(_) | Error::NotFound { .. } | Error::Protocol(_) => {
                ErrorKind::Query
            }

            Error::Backend(_) => ErrorKind::Backend,
        }
    }

    /// Whether running the same operation again may succeed.
    ///
    /// Only backend failures qualify; every other error is reproduced by the
    /// same inputs.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Backend
    }

    /// Whether this error signals a schema problem that must not be papered over.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Definition | ErrorKind::Materialization
        )
    }

    /// Check if this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            Error::DuplicateTable("author".into()).kind(),
            ErrorKind::Definition
        );
        assert_eq!(
            Error::NoRelationshipPath {
                from: "a".into(),
                to: "b".into()
            }
            .kind(),
            ErrorKind::Resolution
        );
        assert_eq!(
            Error::NotFound {
                table: "book".into()
            }
            .kind(),
            ErrorKind::Query
        );
    }

    #[test]
    fn test_retry_classification() {
        let corrupt = Error::DataCorruption {
            table: "book".into(),
            field: "published".into(),
            value: "'yesterday'".into(),
        };
        assert!(!corrupt.is_retryable());
        assert!(corrupt.is_fatal());

        let backend = Error::backend("connection reset");
        assert!(backend.is_retryable());
        assert!(!backend.is_fatal());
    }

    #[test]
    fn test_messages_carry_context() {
        let err = Error::TypeMismatch {
            table: "book".into(),
            field: "pages".into(),
            expected: "integer".into(),
            value: "'many'".into(),
        };
        assert_eq!(
            err.to_string(),
            "type mismatch for 'book.pages': expected integer, got 'many'"
        );

        let err = Error::AmbiguousRelationship {
            from: "a".into(),
            to: "c".into(),
            candidates: vec!["a.b -> b.c".into(), "a.d -> d.c".into()],
        };
        assert!(err.to_string().ends_with("a.b -> b.c | a.d -> d.c"));
    }
}
