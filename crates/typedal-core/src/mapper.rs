//! Field type mapping between application values and backend values.
//!
//! The backend only stores `Null`, `Int`, `Float`, `Text` and `Bytes`. Values
//! of other kinds are encoded on the way in and decoded on the way out:
//!
//! | kind      | backend form                          |
//! |-----------|---------------------------------------|
//! | boolean   | `Int(0)` / `Int(1)`                   |
//! | date      | `Text("YYYY-MM-DD")`                  |
//! | datetime  | `Text("YYYY-MM-DDTHH:MM:SS[.fff]")`   |
//! | json      | `Text(serialized document)`           |
//! | reference | the encoding of the target field      |
//!
//! A reference whose target table is not registered yet accepts any `Int` or
//! `Text` key. Writes never widen: an integer for a float field or for a
//! boolean field is a `TypeMismatch`. Predicate literals may use an integer
//! for a float field, since they are only compared.

use std::borrow::Cow;
use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime};
use typedal_proto::{Assignment, RawRow, Value};

use crate::catalog::{FieldDescriptor, FieldKind, Snapshot, TableMetadata};
use crate::error::Error;

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";
const DATETIME_FORMAT_SPACED: &str = "%Y-%m-%d %H:%M:%S%.f";

/// The descriptor a field's values are encoded with: a reference to a
/// registered table takes the kind of its target field.
pub fn storage_field<'a>(
    field: &'a FieldDescriptor,
    snapshot: &Snapshot,
) -> Cow<'a, FieldDescriptor> {
    let Some((table, target)) = field.kind.reference_target() else {
        return Cow::Borrowed(field);
    };
    match snapshot.get(table).and_then(|t| t.field(target)) {
        Some(target) if !target.is_reference() => {
            let mut resolved = field.clone();
            resolved.kind = target.kind.clone();
            Cow::Owned(resolved)
        }
        _ => Cow::Borrowed(field),
    }
}

/// Encode a value for a write.
///
/// Fails with `TypeMismatch` when the value's shape does not fit the field
/// and with `RequiredFieldMissing` when null is given for a required field.
pub fn to_backend(value: &Value, field: &FieldDescriptor, table: &str) -> Result<Value, Error> {
    encode(value, field, table, true)
}

/// Encode a literal used in a predicate.
///
/// Like [`to_backend`] but null is always allowed and string lengths are not
/// checked, since a literal only has to be comparable.
pub fn to_backend_literal(
    value: &Value,
    field: &FieldDescriptor,
    table: &str,
) -> Result<Value, Error> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    encode(value, field, table, false)
}

fn encode(value: &Value, field: &FieldDescriptor, table: &str, strict: bool) -> Result<Value, Error> {
    let mismatch = || Error::TypeMismatch {
        table: table.to_string(),
        field: field.name.clone(),
        expected: field.kind.to_string(),
        value: value.to_string(),
    };

    if value.is_null() {
        return if field.nullable {
            Ok(Value::Null)
        } else if field.required {
            Err(Error::RequiredFieldMissing {
                table: table.to_string(),
                field: field.name.clone(),
            })
        } else {
            Err(mismatch())
        };
    }

    match (&field.kind, value) {
        (FieldKind::String | FieldKind::Text, Value::Text(s)) => {
            if let (true, Some(max)) = (strict, field.length) {
                if s.chars().count() > max as usize {
                    return Err(Error::TypeMismatch {
                        table: table.to_string(),
                        field: field.name.clone(),
                        expected: format!("string of at most {max} characters"),
                        value: value.to_string(),
                    });
                }
            }
            Ok(value.clone())
        }
        (FieldKind::Integer, Value::Int(_)) => Ok(value.clone()),
        (FieldKind::Float, Value::Float(_)) => Ok(value.clone()),
        (FieldKind::Float, Value::Int(i)) if !strict => Ok(Value::Float(*i as f64)),
        (FieldKind::Boolean, Value::Bool(b)) => Ok(Value::Int(*b as i64)),
        (FieldKind::Date, Value::Date(d)) => Ok(Value::Text(d.format(DATE_FORMAT).to_string())),
        (FieldKind::Date, Value::Text(s)) => parse_date(s).map(|_| value.clone()).ok_or_else(mismatch),
        (FieldKind::DateTime, Value::DateTime(dt)) => {
            Ok(Value::Text(dt.format(DATETIME_FORMAT).to_string()))
        }
        (FieldKind::DateTime, Value::Text(s)) => parse_datetime(s)
            .map(|dt| Value::Text(dt.format(DATETIME_FORMAT).to_string()))
            .ok_or_else(mismatch),
        (FieldKind::Blob, Value::Bytes(_)) => Ok(value.clone()),
        (FieldKind::Json, Value::Json(j)) => Ok(Value::Text(j.to_string())),
        (FieldKind::Reference { .. }, Value::Int(_) | Value::Text(_)) => Ok(value.clone()),
        _ => Err(mismatch()),
    }
}

/// Decode a raw backend value for a read.
///
/// Accepts the backend forms produced by [`to_backend`] and values that are
/// already decoded. Anything else is `DataCorruption`.
pub fn from_backend(raw: &Value, field: &FieldDescriptor, table: &str) -> Result<Value, Error> {
    let corrupt = || Error::DataCorruption {
        table: table.to_string(),
        field: field.name.clone(),
        value: raw.to_string(),
    };

    if raw.is_null() {
        return Ok(Value::Null);
    }

    match (&field.kind, raw) {
        (FieldKind::String | FieldKind::Text, Value::Text(_)) => Ok(raw.clone()),
        (FieldKind::Integer, Value::Int(_)) => Ok(raw.clone()),
        (FieldKind::Float, Value::Float(_)) => Ok(raw.clone()),
        (FieldKind::Float, Value::Int(i)) => Ok(Value::Float(*i as f64)),
        (FieldKind::Boolean, Value::Int(0)) => Ok(Value::Bool(false)),
        (FieldKind::Boolean, Value::Int(1)) => Ok(Value::Bool(true)),
        (FieldKind::Boolean, Value::Bool(_)) => Ok(raw.clone()),
        (FieldKind::Date, Value::Text(s)) => parse_date(s).map(Value::Date).ok_or_else(corrupt),
        (FieldKind::Date, Value::Date(_)) => Ok(raw.clone()),
        (FieldKind::DateTime, Value::Text(s)) => {
            parse_datetime(s).map(Value::DateTime).ok_or_else(corrupt)
        }
        (FieldKind::DateTime, Value::DateTime(_)) => Ok(raw.clone()),
        (FieldKind::Blob, Value::Bytes(_)) => Ok(raw.clone()),
        (FieldKind::Json, Value::Text(s)) => serde_json::from_str(s)
            .map(Value::Json)
            .map_err(|_| corrupt()),
        (FieldKind::Json, Value::Json(_)) => Ok(raw.clone()),
        (FieldKind::Reference { .. }, Value::Int(_) | Value::Text(_)) => Ok(raw.clone()),
        _ => Err(corrupt()),
    }
}

/// Validate and encode a full row for insert.
///
/// Fields are emitted in declaration order. Absent fields take their default
/// (the factory runs once per call); absent fields without a default are
/// omitted when they are the primary key or not required, so the backend can
/// assign them.
pub fn prepare_write<K: Into<String>>(
    snapshot: &Snapshot,
    table: &TableMetadata,
    values: impl IntoIterator<Item = (K, Value)>,
) -> Result<RawRow, Error> {
    let mut provided: HashMap<String, Value> = HashMap::new();
    for (name, value) in values {
        let name = name.into();
        table.require_field(&name)?;
        provided.insert(name, value);
    }

    let mut row = RawRow::new();
    for field in table.fields() {
        let value = match provided.remove(&field.name) {
            Some(value) if !value.is_null() => value,
            given => match (&field.default, given) {
                (Some(default), _) => default.resolve(),
                (None, Some(null)) => null,
                (None, None) => {
                    if field.required && field.name != table.primary_key() {
                        return Err(Error::RequiredFieldMissing {
                            table: table.name().to_string(),
                            field: field.name.clone(),
                        });
                    }
                    continue;
                }
            },
        };
        let field = storage_field(field, snapshot);
        row.push(field.name.clone(), to_backend(&value, &field, table.name())?);
    }

    Ok(row)
}

/// Validate and encode assignments for an update of the root table.
pub fn prepare_update<K: Into<String>>(
    snapshot: &Snapshot,
    table: &TableMetadata,
    assignments: impl IntoIterator<Item = (K, Value)>,
) -> Result<Vec<Assignment>, Error> {
    assignments
        .into_iter()
        .map(|(name, value)| {
            let name = name.into();
            let field = storage_field(table.require_field(&name)?, snapshot);
            let encoded = to_backend(&value, &field, table.name())?;
            Ok(Assignment::new(name, encoded))
        })
        .collect()
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FORMAT).ok()
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, DATETIME_FORMAT_SPACED))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FieldSpec, Registry};
    use chrono::NaiveTime;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    fn field(kind: FieldKind) -> FieldDescriptor {
        FieldDescriptor::new("f", kind)
    }

    #[test]
    fn test_round_trip_all_kinds() {
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        let datetime = date.and_time(NaiveTime::from_hms_micro_opt(13, 5, 9, 250).unwrap());
        let cases = vec![
            (FieldKind::String, Value::Text("Ada".into())),
            (FieldKind::Text, Value::Text("long form".into())),
            (FieldKind::Integer, Value::Int(-42)),
            (FieldKind::Float, Value::Float(2.5)),
            (FieldKind::Boolean, Value::Bool(true)),
            (FieldKind::Boolean, Value::Bool(false)),
            (FieldKind::Date, Value::Date(date)),
            (FieldKind::DateTime, Value::DateTime(datetime)),
            (FieldKind::DateTime, Value::DateTime(date.and_hms_opt(0, 0, 0).unwrap())),
            (FieldKind::Blob, Value::Bytes(vec![0, 159, 255])),
            (
                FieldKind::Json,
                Value::Json(serde_json::json!({"tags": ["a", "b"], "n": 1})),
            ),
            (FieldKind::reference("author", "id"), Value::Int(7)),
        ];

        for (kind, value) in cases {
            let f = field(kind);
            let raw = to_backend(&value, &f, "t").unwrap();
            assert!(raw.is_backend_native(), "{raw:?} is not backend-native");
            assert_eq!(from_backend(&raw, &f, "t").unwrap(), value);
        }
    }

    #[test]
    fn test_encodings() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        assert_eq!(
            to_backend(&Value::Date(date), &field(FieldKind::Date), "t").unwrap(),
            Value::Text("2024-01-05".into())
        );
        assert_eq!(
            to_backend(
                &Value::DateTime(date.and_hms_opt(8, 30, 0).unwrap()),
                &field(FieldKind::DateTime),
                "t"
            )
            .unwrap(),
            Value::Text("2024-01-05T08:30:00".into())
        );
        assert_eq!(
            to_backend(&Value::Bool(true), &field(FieldKind::Boolean), "t").unwrap(),
            Value::Int(1)
        );
        assert_eq!(
            to_backend_literal(&Value::Int(3), &field(FieldKind::Float), "t").unwrap(),
            Value::Float(3.0)
        );
    }

    #[test]
    fn test_writes_never_widen() {
        assert!(matches!(
            to_backend(&Value::Int(3), &field(FieldKind::Float), "t"),
            Err(Error::TypeMismatch { .. })
        ));
        assert!(matches!(
            to_backend(&Value::Int(1), &field(FieldKind::Boolean), "t"),
            Err(Error::TypeMismatch { .. })
        ));
        assert!(to_backend_literal(&Value::Int(1), &field(FieldKind::Boolean), "t").is_err());
    }

    #[test]
    fn test_references_use_target_kind() {
        let registry = Registry::new();
        registry
            .register(
                "author",
                vec![FieldDescriptor::new("id", FieldKind::Integer)],
                None,
            )
            .unwrap();
        registry
            .register(
                "tag",
                vec![FieldDescriptor::new("code", FieldKind::String)],
                Some("code"),
            )
            .unwrap();
        let snapshot = registry.snapshot();

        let author = FieldDescriptor::new("author", FieldKind::reference("author", "id"));
        let resolved = storage_field(&author, &snapshot);
        assert_eq!(resolved.kind, FieldKind::Integer);
        assert_eq!(resolved.name, "author");
        assert!(matches!(
            to_backend(&Value::Text("not-a-number".into()), &resolved, "book"),
            Err(Error::TypeMismatch { .. })
        ));
        assert!(matches!(
            from_backend(&Value::Text("7".into()), &resolved, "book"),
            Err(Error::DataCorruption { .. })
        ));

        let tag = FieldDescriptor::new("tag", FieldKind::reference("tag", "code"));
        let resolved = storage_field(&tag, &snapshot);
        assert!(to_backend(&Value::Int(7), &resolved, "book").is_err());
        assert_eq!(
            to_backend(&Value::Text("rust".into()), &resolved, "book").unwrap(),
            Value::Text("rust".into())
        );

        let forward = FieldDescriptor::new("shelf", FieldKind::reference("shelf", "id"));
        let kept = storage_field(&forward, &snapshot);
        assert!(kept.is_reference());
        assert!(to_backend(&Value::Text("a1".into()), &kept, "book").is_ok());
    }

    #[test]
    fn test_type_mismatch() {
        let err = to_backend(&Value::Text("many".into()), &field(FieldKind::Integer), "book")
            .unwrap_err();
        assert!(matches!(
            err,
            Error::TypeMismatch { ref table, ref field, .. } if table == "book" && field == "f"
        ));

        assert!(to_backend(&Value::Int(2), &field(FieldKind::Boolean), "t").is_err());
        assert!(to_backend(&Value::Float(1.5), &field(FieldKind::Integer), "t").is_err());
        assert!(to_backend(&Value::Text("soon".into()), &field(FieldKind::Date), "t").is_err());

        let short = field(FieldKind::String).with_length(3);
        assert!(to_backend(&Value::Text("abcd".into()), &short, "t").is_err());
        assert!(to_backend_literal(&Value::Text("abcd".into()), &short, "t").is_ok());
    }

    #[test]
    fn test_null_handling() {
        let required = field(FieldKind::String);
        assert!(matches!(
            to_backend(&Value::Null, &required, "t"),
            Err(Error::RequiredFieldMissing { .. })
        ));

        let optional = FieldDescriptor::nullable("f", FieldKind::String);
        assert_eq!(to_backend(&Value::Null, &optional, "t").unwrap(), Value::Null);

        let relaxed = field(FieldKind::String).with_required(false);
        assert!(matches!(
            to_backend(&Value::Null, &relaxed, "t"),
            Err(Error::TypeMismatch { .. })
        ));

        assert_eq!(
            to_backend_literal(&Value::Null, &required, "t").unwrap(),
            Value::Null
        );
        assert_eq!(from_backend(&Value::Null, &required, "t").unwrap(), Value::Null);
    }

    #[test]
    fn test_unexpected_raw_shape_is_corruption() {
        let err = from_backend(&Value::Text("x".into()), &field(FieldKind::Integer), "book")
            .unwrap_err();
        assert!(matches!(err, Error::DataCorruption { .. }));
        assert!(err.is_fatal());

        assert!(from_backend(&Value::Int(5), &field(FieldKind::Boolean), "t").is_err());
        assert!(from_backend(&Value::Text("{".into()), &field(FieldKind::Json), "t").is_err());
    }

    fn post_table(counter: Arc<AtomicI64>) -> TableMetadata {
        let stamp = FieldSpec::integer()
            .with_default_factory(move || Value::Int(counter.fetch_add(1, Ordering::SeqCst)));
        TableMetadata::new(
            "post",
            vec![
                FieldDescriptor::new("id", FieldKind::Integer),
                FieldDescriptor::new("title", FieldKind::String),
                FieldDescriptor::nullable("summary", FieldKind::Text),
                FieldDescriptor::new("stamp", FieldKind::Integer)
                    .with_default(stamp.default.unwrap()),
                FieldDescriptor::new("published", FieldKind::Boolean)
                    .with_default(crate::catalog::DefaultValue::Constant(Value::Bool(false))),
            ],
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_prepare_write_applies_defaults_once_per_row() {
        let counter = Arc::new(AtomicI64::new(100));
        let table = post_table(counter.clone());

        let first = prepare_write(&Snapshot::default(), &table, vec![("title", Value::Text("a".into()))]).unwrap();
        let second = prepare_write(&Snapshot::default(), &table, vec![("title", Value::Text("b".into()))]).unwrap();

        assert_eq!(first.get("stamp"), Some(&Value::Int(100)));
        assert_eq!(second.get("stamp"), Some(&Value::Int(101)));
        assert_eq!(first.get("published"), Some(&Value::Int(0)));
        assert!(!first.contains("id"));
        assert!(!first.contains("summary"));
        assert_eq!(
            first.iter().map(|(n, _)| n).collect::<Vec<_>>(),
            vec!["title", "stamp", "published"]
        );
        assert_eq!(counter.load(Ordering::SeqCst), 102);
    }

    #[test]
    fn test_prepare_write_rejects_bad_rows() {
        let table = post_table(Arc::new(AtomicI64::new(0)));

        assert!(matches!(
            prepare_write(&Snapshot::default(), &table, Vec::<(&str, Value)>::new()),
            Err(Error::RequiredFieldMissing { field, .. }) if field == "title"
        ));
        assert!(matches!(
            prepare_write(
                &Snapshot::default(),
                &table,
                vec![("title", Value::Text("a".into())), ("isbn", Value::Int(1))]
            ),
            Err(Error::UnknownField { .. })
        ));
        assert!(matches!(
            prepare_write(&Snapshot::default(), &table, vec![("title", Value::Int(1))]),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_prepare_update() {
        let table = post_table(Arc::new(AtomicI64::new(0)));
        let assignments =
            prepare_update(&Snapshot::default(), &table, vec![("published", Value::Bool(true))]).unwrap();
        assert_eq!(assignments, vec![Assignment::new("published", 1)]);

        assert!(prepare_update(&Snapshot::default(), &table, vec![("title", Value::Null)]).is_err());
    }
}
