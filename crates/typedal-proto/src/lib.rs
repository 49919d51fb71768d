//! typedal protocol types.
//!
//! This crate defines the vocabulary shared between the typed query layer and
//! the backends that execute its queries. Nothing here knows about registered
//! tables; every type is plain data that can be inspected, compared and
//! serialized with serde.
//!
//! # Modules
//!
//! - [`value`] - Runtime values for literals, writes and raw result rows
//! - [`query`] - The Query AST (selection, joins, ordering, pagination)
//! - [`predicate`] - Boolean expression trees used by `where` and join conditions
//! - [`mutation`] - Insert, update and delete statements
//! - [`result`] - Raw rows returned by a backend
//! - [`error`] - Protocol error types

pub mod error;
pub mod mutation;
pub mod predicate;
pub mod query;
pub mod result;
pub mod value;

pub use error::Error;

// Re-export commonly used types at crate root
pub use mutation::{Assignment, DeleteStatement, InsertStatement, UpdateStatement};
pub use predicate::{col, ColumnRef, CompareOp, Operand, Predicate};
pub use query::{
    AggregateExpr, AggregateFunction, Join, JoinCardinality, JoinCondition, JoinKind,
    OrderDirection, OrderSpec, Pagination, Query, SelectItem, TableRef,
};
pub use result::RawRow;
pub use value::{Value, ValueKey};
