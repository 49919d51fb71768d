//! Traits that bind Rust types to registered tables.

use chrono::{NaiveDate, NaiveDateTime};
use typedal_proto::{ColumnRef, Value};

use crate::catalog::{to_snake, ModelDeclaration};
use crate::error::Error;
use crate::materialize::Row;

/// Types that can be built from a materialized row.
pub trait FromRow: Sized {
    /// Build `Self` from a row.
    fn from_row(row: &Row) -> Result<Self, Error>;
}

impl FromRow for Row {
    fn from_row(row: &Row) -> Result<Self, Error> {
        Ok(row.clone())
    }
}

/// A model: a Rust type declared as a table.
///
/// ```ignore
/// struct Author { id: i64, name: String }
///
/// impl Model for Author {
///     const NAME: &'static str = "Author";
///
///     fn declaration() -> ModelDeclaration {
///         ModelDeclaration::for_model::<Self>()
///             .field::<i64>("id")
///             .field::<String>("name")
///     }
/// }
/// ```
pub trait Model: FromRow + Send + Sync + 'static {
    /// Model name.
    const NAME: &'static str;

    /// Explicit table name. Defaults to the snake-cased model name.
    const TABLE: Option<&'static str> = None;

    /// Attributes of the model in declaration order.
    fn declaration() -> ModelDeclaration;

    /// Table name the model registers under.
    fn table_name() -> String {
        match Self::TABLE {
            Some(table) => table.to_string(),
            None => to_snake(Self::NAME),
        }
    }

    /// Reference a field of this model's table for predicates and ordering.
    fn col(field: &str) -> ColumnRef {
        ColumnRef::new(Self::table_name(), field)
    }
}

/// Types that can be read from a decoded field value.
pub trait FromValue: Sized {
    /// Name of the expected shape, for error messages.
    const EXPECTED: &'static str;

    /// Convert a value, or `None` if the shape does not fit.
    fn from_value(value: &Value) -> Option<Self>;
}

impl FromValue for Value {
    const EXPECTED: &'static str = "any value";

    fn from_value(value: &Value) -> Option<Self> {
        Some(value.clone())
    }
}

impl FromValue for bool {
    const EXPECTED: &'static str = "bool";

    fn from_value(value: &Value) -> Option<Self> {
        value.as_bool()
    }
}

impl FromValue for i64 {
    const EXPECTED: &'static str = "int";

    fn from_value(value: &Value) -> Option<Self> {
        value.as_i64()
    }
}

impl FromValue for i32 {
    const EXPECTED: &'static str = "int";

    fn from_value(value: &Value) -> Option<Self> {
        value.as_i64().and_then(|i| i32::try_from(i).ok())
    }
}

impl FromValue for f64 {
    const EXPECTED: &'static str = "float";

    fn from_value(value: &Value) -> Option<Self> {
        value.as_f64()
    }
}

impl FromValue for String {
    const EXPECTED: &'static str = "text";

    fn from_value(value: &Value) -> Option<Self> {
        value.as_str().map(str::to_string)
    }
}

impl FromValue for Vec<u8> {
    const EXPECTED: &'static str = "bytes";

    fn from_value(value: &Value) -> Option<Self> {
        value.as_bytes().map(<[u8]>::to_vec)
    }
}

impl FromValue for NaiveDate {
    const EXPECTED: &'static str = "date";

    fn from_value(value: &Value) -> Option<Self> {
        value.as_date()
    }
}

impl FromValue for NaiveDateTime {
    const EXPECTED: &'static str = "datetime";

    fn from_value(value: &Value) -> Option<Self> {
        value.as_datetime()
    }
}

impl FromValue for serde_json::Value {
    const EXPECTED: &'static str = "json";

    fn from_value(value: &Value) -> Option<Self> {
        value.as_json().cloned()
    }
}

impl<T: FromValue> FromValue for Option<T> {
    const EXPECTED: &'static str = T::EXPECTED;

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(None),
            other => T::from_value(other).map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BookAuthor;

    impl FromRow for BookAuthor {
        fn from_row(_row: &Row) -> Result<Self, Error> {
            Ok(BookAuthor)
        }
    }

    impl Model for BookAuthor {
        const NAME: &'static str = "BookAuthor";

        fn declaration() -> ModelDeclaration {
            ModelDeclaration::for_model::<Self>().field::<i64>("id")
        }
    }

    struct Tag;

    impl FromRow for Tag {
        fn from_row(_row: &Row) -> Result<Self, Error> {
            Ok(Tag)
        }
    }

    impl Model for Tag {
        const NAME: &'static str = "Tag";
        const TABLE: Option<&'static str> = Some("tags");

        fn declaration() -> ModelDeclaration {
            ModelDeclaration::for_model::<Self>().field::<i64>("id")
        }
    }

    #[test]
    fn test_model_table_names() {
        assert_eq!(BookAuthor::table_name(), "book_author");
        assert_eq!(BookAuthor::col("id").qualified(), "book_author.id");
        assert_eq!(Tag::table_name(), "tags");
        assert_eq!(Tag::declaration().table_name(), "tags");
    }

    #[test]
    fn test_from_value() {
        assert_eq!(i64::from_value(&Value::Int(3)), Some(3));
        assert_eq!(i32::from_value(&Value::Int(i64::MAX)), None);
        assert_eq!(Option::<String>::from_value(&Value::Null), Some(None));
        assert_eq!(
            Option::<String>::from_value(&Value::Text("a".into())),
            Some(Some("a".to_string()))
        );
        assert_eq!(String::from_value(&Value::Int(1)), None);
        assert_eq!(f64::from_value(&Value::Int(2)), Some(2.0));
    }
}
