//! Schema catalog for typedal.
//!
//! The catalog holds field kinds, field descriptors, table metadata with its
//! named relationships, the registry that stores them, and the introspector
//! that produces descriptors from model declarations.

mod field;
mod introspect;
mod registry;
mod relationship;
mod table;
mod types;

pub use field::{DefaultValue, FieldDescriptor, FieldSpec};
pub use introspect::{
    introspect, to_snake, Annotate, Attribute, IntrospectedModel, ModelDeclaration, Reference,
    Text, TypeHint,
};
pub use registry::{Registry, Snapshot};
pub use relationship::Relationship;
pub use table::{TableMetadata, DEFAULT_PRIMARY_KEY};
pub use types::FieldKind;
