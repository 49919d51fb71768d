//! Semantic field kinds.

use std::fmt;

/// The semantic type of a field.
///
/// The kind decides how values are validated and encoded on write and how
/// raw backend values are decoded on read. It never changes after a table is
/// registered.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// Short string, optionally bounded by a length.
    String,
    /// Unbounded text.
    Text,
    /// 64-bit signed integer.
    Integer,
    /// Floating point number, optionally with precision and scale.
    Float,
    /// Boolean, stored as 0/1.
    Boolean,
    /// Calendar date.
    Date,
    /// Date and time without timezone.
    DateTime,
    /// Binary data.
    Blob,
    /// Arbitrary json document.
    Json,
    /// Reference to a field (usually the primary key) of another table.
    Reference {
        /// Target table name.
        table: String,
        /// Target field name.
        field: String,
    },
}

impl FieldKind {
    /// Create a reference to `table.field`.
    pub fn reference(table: impl Into<String>, field: impl Into<String>) -> Self {
        FieldKind::Reference {
            table: table.into(),
            field: field.into(),
        }
    }

    /// Short kind name used in messages.
    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Text => "text",
            FieldKind::Integer => "integer",
            FieldKind::Float => "float",
            FieldKind::Boolean => "boolean",
            FieldKind::Date => "date",
            FieldKind::DateTime => "datetime",
            FieldKind::Blob => "blob",
            FieldKind::Json => "json",
            FieldKind::Reference { .. } => "reference",
        }
    }

    /// Check if this kind is a reference.
    pub fn is_reference(&self) -> bool {
        matches!(self, FieldKind::Reference { .. })
    }

    /// Target of a reference kind.
    pub fn reference_target(&self) -> Option<(&str, &str)> {
        match self {
            FieldKind::Reference { table, field } => Some((table, field)),
            _ => None,
        }
    }

    /// Check if this kind holds numbers.
    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldKind::Integer | FieldKind::Float)
    }

    /// Check if this kind holds text.
    pub fn is_textual(&self) -> bool {
        matches!(self, FieldKind::String | FieldKind::Text)
    }

    /// Whether values of this kind can serve as a primary key.
    pub fn is_key_kind(&self) -> bool {
        matches!(self, FieldKind::Integer | FieldKind::String)
    }

    /// Backend column type for this kind.
    ///
    /// `length` applies to strings, `precision` turns a float into a decimal.
    pub fn column_type(&self, length: Option<u32>, precision: Option<(u8, u8)>) -> String {
        match self {
            FieldKind::String => match length {
                Some(len) => format!("string({len})"),
                None => "string".to_string(),
            },
            FieldKind::Float => match precision {
                Some((p, s)) => format!("decimal({p},{s})"),
                None => "double".to_string(),
            },
            FieldKind::Reference { table, field } if field == "id" => {
                format!("reference {table}")
            }
            FieldKind::Reference { table, field } => format!("reference {table}.{field}"),
            other => other.name().to_string(),
        }
    }

    /// Parse a backend column type back into a kind.
    ///
    /// Accepts everything [`FieldKind::column_type`] produces plus the common
    /// aliases `bigint`, `id`, `float`, `bool`, `timestamp`, `varchar(n)`.
    pub fn from_column_type(column_type: &str) -> Option<FieldKind> {
        let normalized = column_type.trim().to_ascii_lowercase();

        if let Some(target) = normalized.strip_prefix("reference ") {
            let target = target.trim();
            return match target.split_once('.') {
                Some((table, field)) if !table.is_empty() && !field.is_empty() => {
                    Some(FieldKind::reference(table, field))
                }
                Some(_) => None,
                None if !target.is_empty() => Some(FieldKind::reference(target, "id")),
                None => None,
            };
        }

        let base = normalized
            .split_once('(')
            .map(|(base, _)| base)
            .unwrap_or(&normalized);

        Some(match base {
            "string" | "varchar" => FieldKind::String,
            "text" => FieldKind::Text,
            "integer" | "bigint" | "id" => FieldKind::Integer,
            "double" | "float" | "decimal" => FieldKind::Float,
            "boolean" | "bool" => FieldKind::Boolean,
            "date" => FieldKind::Date,
            "datetime" | "timestamp" => FieldKind::DateTime,
            "blob" => FieldKind::Blob,
            "json" => FieldKind::Json,
            _ => return None,
        })
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Reference { table, field } => write!(f, "reference({table}.{field})"),
            other => f.write_str(other.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_types() {
        assert_eq!(FieldKind::String.column_type(None, None), "string");
        assert_eq!(FieldKind::String.column_type(Some(64), None), "string(64)");
        assert_eq!(FieldKind::Float.column_type(None, None), "double");
        assert_eq!(
            FieldKind::Float.column_type(None, Some((10, 2))),
            "decimal(10,2)"
        );
        assert_eq!(FieldKind::Boolean.column_type(None, None), "boolean");
        assert_eq!(
            FieldKind::reference("author", "id").column_type(None, None),
            "reference author"
        );
        assert_eq!(
            FieldKind::reference("author", "code").column_type(None, None),
            "reference author.code"
        );
    }

    #[test]
    fn test_column_type_roundtrip() {
        let kinds = [
            FieldKind::String,
            FieldKind::Text,
            FieldKind::Integer,
            FieldKind::Float,
            FieldKind::Boolean,
            FieldKind::Date,
            FieldKind::DateTime,
            FieldKind::Blob,
            FieldKind::Json,
            FieldKind::reference("author", "id"),
            FieldKind::reference("author", "code"),
        ];

        for kind in kinds {
            let column = kind.column_type(None, None);
            assert_eq!(FieldKind::from_column_type(&column), Some(kind));
        }
    }

    #[test]
    fn test_column_type_aliases() {
        assert_eq!(
            FieldKind::from_column_type("VARCHAR(255)"),
            Some(FieldKind::String)
        );
        assert_eq!(
            FieldKind::from_column_type("timestamp"),
            Some(FieldKind::DateTime)
        );
        assert_eq!(FieldKind::from_column_type("geometry"), None);
        assert_eq!(FieldKind::from_column_type("reference "), None);
    }
}
