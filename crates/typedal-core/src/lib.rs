//! Typed data access over a relational backend.
//!
//! Rust types are declared as tables ([`Model`], [`ModelDeclaration`]) and
//! registered in a [`Registry`]. Queries are built with an immutable
//! [`QueryBuilder`] that validates every table and field as it is named,
//! resolves joins through the reference graph, and lowers literal values to
//! backend-native form. The backend receives a [`proto::Query`] AST and
//! returns raw rows, which are materialized into nested [`Row`]s and typed
//! models.
//!
//! The [`Backend`] trait is the only seam to storage; [`MemoryBackend`]
//! evaluates the AST in memory.

pub mod backend;
pub mod catalog;
pub mod config;
pub mod database;
pub mod error;
pub mod mapper;
pub mod materialize;
pub mod model;
pub mod query;
pub mod relation;

pub use backend::{Backend, MemoryBackend, MemoryError};
pub use catalog::{
    Annotate, DefaultValue, FieldDescriptor, FieldKind, FieldSpec, ModelDeclaration, Reference,
    Registry, Relationship, Snapshot, TableMetadata, Text, TypeHint,
};
pub use config::DalConfig;
pub use database::Database;
pub use error::{Error, ErrorKind, Result};
pub use materialize::{Related, Row, TypedRows};
pub use model::{FromRow, FromValue, Model};
pub use query::{IntoColumn, JoinOptions, QueryBuilder};
pub use relation::{Direction, PathHint, RelationGraph, RelationshipEdge};

pub use typedal_proto as proto;
