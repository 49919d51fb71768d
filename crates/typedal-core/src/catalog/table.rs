//! Registered table shape.

use std::collections::HashMap;

use crate::error::Error;

use super::field::FieldDescriptor;
use super::relationship::{check_relationships, Relationship};

/// Default primary key field name.
pub const DEFAULT_PRIMARY_KEY: &str = "id";

/// Immutable metadata of one registered table.
#[derive(Debug, Clone)]
pub struct TableMetadata {
    name: String,
    fields: Vec<FieldDescriptor>,
    index: HashMap<String, usize>,
    primary_key: usize,
    relationships: Vec<Relationship>,
}

impl TableMetadata {
    /// Build table metadata, checking field names and the primary key.
    ///
    /// Without an explicit primary key the table must have an `id` field.
    pub fn new(
        name: impl Into<String>,
        fields: Vec<FieldDescriptor>,
        primary_key: Option<&str>,
    ) -> Result<Self, Error> {
        let name = name.into();

        let mut index = HashMap::with_capacity(fields.len());
        for (i, field) in fields.iter().enumerate() {
            if index.insert(field.name.clone(), i).is_some() {
                return Err(Error::DuplicateField {
                    table: name,
                    field: field.name.clone(),
                });
            }
        }

        let key_name = primary_key.unwrap_or(DEFAULT_PRIMARY_KEY);
        let primary_key = match index.get(key_name) {
            Some(&i) => i,
            None if primary_key.is_none() => return Err(Error::MissingPrimaryKey { table: name }),
            None => {
                return Err(Error::InvalidPrimaryKey {
                    table: name,
                    field: key_name.to_string(),
                    reason: "no such field".into(),
                })
            }
        };

        let key = &fields[primary_key];
        let problem = if key.nullable {
            Some("field is nullable")
        } else if key.is_reference() {
            Some("field is a reference")
        } else if !key.kind.is_key_kind() {
            Some("only integer and string fields can be keys")
        } else {
            None
        };
        if let Some(reason) = problem {
            return Err(Error::InvalidPrimaryKey {
                table: name,
                field: key.name.clone(),
                reason: reason.into(),
            });
        }

        Ok(Self {
            name,
            fields,
            index,
            primary_key,
            relationships: Vec::new(),
        })
    }

    /// Attach named relationships, checking their names and conditions.
    pub fn with_relationships(mut self, relationships: Vec<Relationship>) -> Result<Self, Error> {
        check_relationships(&self.name, &self.fields, &relationships)?;
        self.relationships = relationships;
        Ok(self)
    }

    /// Table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Field names in declaration order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Get a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.index.get(name).map(|&i| &self.fields[i])
    }

    /// Get a field by name or fail with `UnknownField`.
    pub fn require_field(&self, name: &str) -> Result<&FieldDescriptor, Error> {
        self.field(name).ok_or_else(|| Error::UnknownField {
            table: self.name.clone(),
            field: name.to_string(),
        })
    }

    /// Check if a field exists.
    pub fn has_field(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Position of a field in declaration order.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Primary key field name.
    pub fn primary_key(&self) -> &str {
        &self.fields[self.primary_key].name
    }

    /// Primary key field.
    pub fn primary_key_field(&self) -> &FieldDescriptor {
        &self.fields[self.primary_key]
    }

    /// Named relationships in declaration order.
    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    /// Get a named relationship.
    pub fn relationship(&self, name: &str) -> Option<&Relationship> {
        self.relationships.iter().find(|r| r.name == name)
    }

    /// Outgoing reference fields in declaration order.
    pub fn references(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.is_reference())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FieldKind;

    fn book_fields() -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor::new("id", FieldKind::Integer),
            FieldDescriptor::new("title", FieldKind::String),
            FieldDescriptor::new("author", FieldKind::reference("author", "id")),
        ]
    }

    #[test]
    fn test_table_metadata_lookup() {
        let table = TableMetadata::new("book", book_fields(), None).unwrap();

        assert_eq!(table.name(), "book");
        assert_eq!(table.primary_key(), "id");
        assert_eq!(
            table.field_names().collect::<Vec<_>>(),
            vec!["id", "title", "author"]
        );
        assert_eq!(table.position("author"), Some(2));
        assert_eq!(table.references().count(), 1);
        assert!(matches!(
            table.require_field("isbn"),
            Err(Error::UnknownField { .. })
        ));
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let mut fields = book_fields();
        fields.push(FieldDescriptor::new("title", FieldKind::Text));

        let err = TableMetadata::new("book", fields, None).unwrap_err();
        assert!(matches!(err, Error::DuplicateField { field, .. } if field == "title"));
    }

    #[test]
    fn test_primary_key_rules() {
        let fields = vec![FieldDescriptor::new("code", FieldKind::String)];
        assert!(matches!(
            TableMetadata::new("country", fields.clone(), None),
            Err(Error::MissingPrimaryKey { .. })
        ));
        let table = TableMetadata::new("country", fields, Some("code")).unwrap();
        assert_eq!(table.primary_key(), "code");

        let fields = vec![FieldDescriptor::nullable("id", FieldKind::Integer)];
        assert!(matches!(
            TableMetadata::new("thing", fields, None),
            Err(Error::InvalidPrimaryKey { .. })
        ));

        assert!(matches!(
            TableMetadata::new("book", book_fields(), Some("author")),
            Err(Error::InvalidPrimaryKey { .. })
        ));
    }
}
