//! Model declarations and their translation into field descriptors.
//!
//! A [`ModelDeclaration`] is plain data: a model name and its attributes in
//! declaration order. Each attribute carries a type annotation ([`TypeHint`]),
//! an explicit [`FieldSpec`], or both. [`introspect`] turns a declaration into
//! the table name, descriptors and primary key the registry needs, without
//! touching any registry state.

use std::marker::PhantomData;

use chrono::{NaiveDate, NaiveDateTime};

use crate::error::Error;
use crate::model::Model;

use super::field::{FieldDescriptor, FieldSpec};
use super::relationship::Relationship;
use super::types::FieldKind;

/// Type name used for the null member of a union.
pub const NONE_TYPE: &str = "None";

/// A declared type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeHint {
    /// A scalar type by name, e.g. `String`, `i64`, `NaiveDate`.
    Named(String),
    /// A reference to another model, by table name.
    Model(String),
    /// `Option<T>`.
    Optional(Box<TypeHint>),
    /// A union of alternatives; `None` members make it optional.
    Union(Vec<TypeHint>),
}

impl TypeHint {
    /// A named scalar type.
    pub fn named(name: impl Into<String>) -> Self {
        TypeHint::Named(name.into())
    }

    /// The null type, for use in unions.
    pub fn none() -> Self {
        TypeHint::Named(NONE_TYPE.to_string())
    }

    /// Wrap in `Optional`.
    pub fn optional(self) -> Self {
        TypeHint::Optional(Box::new(self))
    }

    fn is_none(&self) -> bool {
        matches!(self, TypeHint::Named(n) if n == NONE_TYPE)
    }
}

/// Types that can annotate a model attribute.
pub trait Annotate {
    /// The type hint of this type.
    fn hint() -> TypeHint;
}

macro_rules! annotate_named {
    ($($ty:ty => $name:expr),* $(,)?) => {
        $(
            impl Annotate for $ty {
                fn hint() -> TypeHint {
                    TypeHint::named($name)
                }
            }
        )*
    };
}

annotate_named! {
    String => "String",
    i64 => "i64",
    i32 => "i32",
    bool => "bool",
    f64 => "f64",
    f32 => "f32",
    Vec<u8> => "Vec<u8>",
    NaiveDate => "NaiveDate",
    NaiveDateTime => "NaiveDateTime",
    serde_json::Value => "Json",
}

impl<T: Annotate> Annotate for Option<T> {
    fn hint() -> TypeHint {
        T::hint().optional()
    }
}

/// Marker for unbounded text columns.
#[derive(Debug, Clone, Copy)]
pub struct Text;

impl Annotate for Text {
    fn hint() -> TypeHint {
        TypeHint::named("Text")
    }
}

/// Marker for a reference to model `M`.
pub struct Reference<M>(PhantomData<fn() -> M>);

impl<M: Model> Annotate for Reference<M> {
    fn hint() -> TypeHint {
        TypeHint::Model(M::table_name())
    }
}

/// Map a scalar type name to its kind.
fn named_kind(name: &str) -> Option<FieldKind> {
    Some(match name {
        "String" | "str" | "string" => FieldKind::String,
        "Text" | "text" => FieldKind::Text,
        "i64" | "i32" | "u32" | "int" | "integer" => FieldKind::Integer,
        "f64" | "f32" | "float" | "double" => FieldKind::Float,
        "bool" | "boolean" => FieldKind::Boolean,
        "NaiveDate" | "date" => FieldKind::Date,
        "NaiveDateTime" | "datetime" => FieldKind::DateTime,
        "Vec<u8>" | "bytes" | "blob" => FieldKind::Blob,
        "Json" | "json" | "object" => FieldKind::Json,
        _ => return None,
    })
}

/// One declared attribute.
#[derive(Debug, Clone)]
pub struct Attribute {
    /// Attribute name as declared.
    pub name: String,
    /// Type annotation, if any.
    pub annotation: Option<TypeHint>,
    /// Explicit field spec, if any.
    pub descriptor: Option<FieldSpec>,
}

/// A model declaration: name, optional overrides and ordered attributes.
#[derive(Debug, Clone)]
pub struct ModelDeclaration {
    /// Model name, e.g. `BookAuthor`.
    pub name: String,
    /// Explicit table name; defaults to the snake-cased model name.
    pub table: Option<String>,
    /// Explicit primary key; defaults to `id`.
    pub primary_key: Option<String>,
    /// Attributes in declaration order.
    pub attributes: Vec<Attribute>,
    /// Named relationships.
    pub relationships: Vec<Relationship>,
}

impl ModelDeclaration {
    /// Start a declaration.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: None,
            primary_key: None,
            attributes: Vec::new(),
            relationships: Vec::new(),
        }
    }

    /// Start a declaration for a [`Model`] type, carrying its table name.
    pub fn for_model<M: Model>() -> Self {
        let mut decl = Self::new(M::NAME);
        decl.table = M::TABLE.map(str::to_string);
        decl
    }

    /// Set an explicit table name.
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Set an explicit primary key.
    pub fn with_primary_key(mut self, field: impl Into<String>) -> Self {
        self.primary_key = Some(field.into());
        self
    }

    /// Add an attribute declared by type only.
    pub fn field<T: Annotate>(self, name: impl Into<String>) -> Self {
        self.attribute(Attribute {
            name: name.into(),
            annotation: Some(T::hint()),
            descriptor: None,
        })
    }

    /// Add an attribute declared by type and explicit spec.
    pub fn field_with<T: Annotate>(self, name: impl Into<String>, spec: FieldSpec) -> Self {
        self.attribute(Attribute {
            name: name.into(),
            annotation: Some(T::hint()),
            descriptor: Some(spec),
        })
    }

    /// Add an attribute declared by explicit spec only.
    pub fn spec(self, name: impl Into<String>, spec: FieldSpec) -> Self {
        self.attribute(Attribute {
            name: name.into(),
            annotation: None,
            descriptor: Some(spec),
        })
    }

    /// Add a raw attribute.
    pub fn attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Declare a named relationship.
    pub fn relationship(mut self, relationship: Relationship) -> Self {
        self.relationships.push(relationship);
        self
    }

    /// Table name this declaration registers under.
    pub fn table_name(&self) -> String {
        self.table.clone().unwrap_or_else(|| to_snake(&self.name))
    }
}

/// Output of [`introspect`].
#[derive(Debug, Clone)]
pub struct IntrospectedModel {
    /// Table name.
    pub table: String,
    /// Field descriptors in declaration order.
    pub fields: Vec<FieldDescriptor>,
    /// Explicit primary key, if declared.
    pub primary_key: Option<String>,
    /// Named relationships as declared.
    pub relationships: Vec<Relationship>,
}

/// Convert `CamelCase` to `snake_case`; every uppercase letter after the
/// first character starts a new word.
pub fn to_snake(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Translate a declaration into field descriptors.
pub fn introspect(decl: &ModelDeclaration) -> Result<IntrospectedModel, Error> {
    let fields = decl
        .attributes
        .iter()
        .map(|attr| describe(&decl.name, attr))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(IntrospectedModel {
        table: decl.table_name(),
        fields,
        primary_key: decl.primary_key.as_deref().map(to_snake),
        relationships: decl.relationships.clone(),
    })
}

fn describe(model: &str, attr: &Attribute) -> Result<FieldDescriptor, Error> {
    let ambiguous = |reason: String| Error::AmbiguousAnnotation {
        model: model.to_string(),
        attribute: attr.name.clone(),
        reason,
    };

    let inferred = attr
        .annotation
        .as_ref()
        .map(|hint| resolve_hint(hint).map_err(&ambiguous))
        .transpose()?;

    let (kind, nullable, spec) = match (inferred, &attr.descriptor) {
        (None, None) => return Err(ambiguous("no annotation and no field descriptor".into())),
        (Some((kind, optional)), None) => (kind, optional, None),
        (None, Some(spec)) => {
            let kind = match (&spec.kind, &spec.type_override) {
                (Some(kind), _) => kind.clone(),
                (None, Some(column_type)) => FieldKind::from_column_type(column_type)
                    .ok_or_else(|| ambiguous(format!("unknown column type '{column_type}'")))?,
                (None, None) => return Err(ambiguous("field descriptor has no kind".into())),
            };
            (kind, spec.nullable.unwrap_or(false), Some(spec))
        }
        (Some((kind, optional)), Some(spec)) => {
            if let Some(declared) = &spec.kind {
                if *declared != kind {
                    return Err(ambiguous(format!(
                        "annotation is {kind} but descriptor is {declared}"
                    )));
                }
            }
            let nullable = match spec.nullable {
                Some(nullable) => nullable,
                None if optional => {
                    return Err(Error::UnsupportedOptional {
                        model: model.to_string(),
                        attribute: attr.name.clone(),
                    })
                }
                None => false,
            };
            (kind, nullable, Some(spec))
        }
    };

    let mut field = FieldDescriptor::new(to_snake(&attr.name), kind).with_nullable(nullable);

    if let Some(spec) = spec {
        if let Some(required) = spec.required {
            if required && nullable {
                return Err(ambiguous("a required field cannot be nullable".into()));
            }
            field = field.with_required(required);
        }
        field.default = spec.default.clone();
        field.length = spec.length;
        field.precision = spec.precision;
        field.type_override = spec.type_override.clone();
    }

    Ok(field)
}

/// Resolve a hint to its kind and whether it was optional.
fn resolve_hint(hint: &TypeHint) -> Result<(FieldKind, bool), String> {
    match hint {
        TypeHint::Named(name) if name == NONE_TYPE => Err("a field cannot be only None".into()),
        TypeHint::Named(name) => named_kind(name)
            .map(|kind| (kind, false))
            .ok_or_else(|| format!("unknown type '{name}'")),
        TypeHint::Model(table) => Ok((FieldKind::reference(table.clone(), "id"), false)),
        TypeHint::Optional(inner) => match resolve_hint(inner)? {
            (_, true) => Err("nested optional".into()),
            (kind, false) => Ok((kind, true)),
        },
        TypeHint::Union(members) => {
            let optional = members.iter().any(TypeHint::is_none);
            let concrete: Vec<&TypeHint> = members.iter().filter(|m| !m.is_none()).collect();
            match concrete.as_slice() {
                [single] => {
                    let (kind, inner_optional) = resolve_hint(single)?;
                    if optional && inner_optional {
                        return Err("nested optional".into());
                    }
                    Ok((kind, optional || inner_optional))
                }
                [] => Err("a field cannot be only None".into()),
                _ => Err(format!(
                    "union of {} types cannot be mapped to one column",
                    concrete.len()
                )),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(model: &IntrospectedModel) -> Vec<(String, FieldKind, bool)> {
        model
            .fields
            .iter()
            .map(|f| (f.name.clone(), f.kind.clone(), f.nullable))
            .collect()
    }

    #[test]
    fn test_bare_annotations() {
        let decl = ModelDeclaration::new("BookAuthor")
            .field::<i64>("id")
            .field::<String>("name")
            .field::<Option<NaiveDate>>("born")
            .field::<Text>("bio");

        let model = introspect(&decl).unwrap();
        assert_eq!(model.table, "book_author");
        assert_eq!(
            kinds(&model),
            vec![
                ("id".to_string(), FieldKind::Integer, false),
                ("name".to_string(), FieldKind::String, false),
                ("born".to_string(), FieldKind::Date, true),
                ("bio".to_string(), FieldKind::Text, false),
            ]
        );
        assert!(model.fields[1].required);
        assert!(!model.fields[2].required);
    }

    #[test]
    fn test_descriptor_overrides_nullability() {
        let decl = ModelDeclaration::new("Post")
            .field_with::<Option<String>>("summary", FieldSpec::new().with_nullable(false))
            .field_with::<String>("slug", FieldSpec::new().with_length(32).with_nullable(true))
            .spec("body", FieldSpec::new().with_type_override("text"));

        let model = introspect(&decl).unwrap();
        assert!(!model.fields[0].nullable);
        assert!(model.fields[1].nullable);
        assert_eq!(model.fields[1].length, Some(32));
        assert_eq!(model.fields[2].kind, FieldKind::Text);
        assert_eq!(model.fields[2].column_type(), "text");
    }

    #[test]
    fn test_optional_with_silent_descriptor_rejected() {
        let decl = ModelDeclaration::new("Post")
            .field_with::<Option<String>>("summary", FieldSpec::new().with_length(10));

        assert!(matches!(
            introspect(&decl),
            Err(Error::UnsupportedOptional { attribute, .. }) if attribute == "summary"
        ));
    }

    #[test]
    fn test_unmappable_annotations() {
        let cases = vec![
            TypeHint::named("Decimal128"),
            TypeHint::Union(vec![TypeHint::named("String"), TypeHint::named("i64")]),
            TypeHint::named("i64").optional().optional(),
            TypeHint::none(),
        ];

        for hint in cases {
            let decl = ModelDeclaration::new("Thing").attribute(Attribute {
                name: "value".into(),
                annotation: Some(hint),
                descriptor: None,
            });
            assert!(matches!(
                introspect(&decl),
                Err(Error::AmbiguousAnnotation { .. })
            ));
        }

        let decl = ModelDeclaration::new("Thing").attribute(Attribute {
            name: "value".into(),
            annotation: None,
            descriptor: None,
        });
        assert!(matches!(
            introspect(&decl),
            Err(Error::AmbiguousAnnotation { .. })
        ));
    }

    #[test]
    fn test_union_with_none_is_optional() {
        let decl = ModelDeclaration::new("Thing").attribute(Attribute {
            name: "value".into(),
            annotation: Some(TypeHint::Union(vec![
                TypeHint::named("f64"),
                TypeHint::none(),
            ])),
            descriptor: None,
        });

        let model = introspect(&decl).unwrap();
        assert_eq!(model.fields[0].kind, FieldKind::Float);
        assert!(model.fields[0].nullable);
    }

    #[test]
    fn test_conflicting_kinds_rejected() {
        let decl = ModelDeclaration::new("Thing").field_with::<i64>("value", FieldSpec::string());
        assert!(matches!(
            introspect(&decl),
            Err(Error::AmbiguousAnnotation { .. })
        ));

        let decl = ModelDeclaration::new("Thing").field_with::<Option<i64>>(
            "value",
            FieldSpec::new().with_nullable(true).with_required(true),
        );
        assert!(matches!(
            introspect(&decl),
            Err(Error::AmbiguousAnnotation { .. })
        ));
    }

    #[test]
    fn test_names_are_snake_cased() {
        assert_eq!(to_snake("Author"), "author");
        assert_eq!(to_snake("BookAuthor"), "book_author");
        assert_eq!(to_snake("authorName"), "author_name");
        assert_eq!(to_snake("already_snake"), "already_snake");

        let decl = ModelDeclaration::new("Tag")
            .with_table("tags")
            .with_primary_key("tagId")
            .field::<i64>("tagId");
        let model = introspect(&decl).unwrap();
        assert_eq!(model.table, "tags");
        assert_eq!(model.primary_key.as_deref(), Some("tag_id"));
        assert_eq!(model.fields[0].name, "tag_id");
    }
}
