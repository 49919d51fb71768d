//! Field descriptors and declaration-time field specs.

use std::fmt;
use std::sync::Arc;

use typedal_proto::Value;

use super::types::FieldKind;

/// Default for a field that is absent on insert.
#[derive(Clone)]
pub enum DefaultValue {
    /// A fixed value.
    Constant(Value),
    /// A factory, invoked once per missing value.
    Factory(Arc<dyn Fn() -> Value + Send + Sync>),
}

impl DefaultValue {
    /// Produce the default for one write.
    pub fn resolve(&self) -> Value {
        match self {
            DefaultValue::Constant(v) => v.clone(),
            DefaultValue::Factory(f) => f(),
        }
    }
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Constant(v) => f.debug_tuple("Constant").field(v).finish(),
            DefaultValue::Factory(_) => f.write_str("Factory(..)"),
        }
    }
}

/// Registered shape of one column.
///
/// Nullability is the single source of truth for whether a field may hold
/// null; `required` only says whether a write must supply the field (or a
/// default for it). See [`FieldDescriptor::new`] for how they relate.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    /// Field name.
    pub name: String,
    /// Semantic kind.
    pub kind: FieldKind,
    /// Whether null is a valid value.
    pub nullable: bool,
    /// Whether inserts must provide a value when no default exists.
    pub required: bool,
    /// Default used when the field is absent on insert.
    pub default: Option<DefaultValue>,
    /// Maximum string length.
    pub length: Option<u32>,
    /// Decimal precision and scale for floats.
    pub precision: Option<(u8, u8)>,
    /// Backend column type that replaces the one derived from the kind.
    pub type_override: Option<String>,
}

impl FieldDescriptor {
    /// Create a non-nullable field. Non-nullable fields are required unless
    /// changed with [`FieldDescriptor::with_required`].
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: false,
            required: true,
            default: None,
            length: None,
            precision: None,
            type_override: None,
        }
    }

    /// Create a nullable, non-required field.
    pub fn nullable(name: impl Into<String>, kind: FieldKind) -> Self {
        Self::new(name, kind).with_nullable(true)
    }

    /// Set nullability. Also resets `required` to `!nullable`.
    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self.required = !nullable;
        self
    }

    /// Set whether writes must supply this field.
    pub fn with_required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    /// Set the default value.
    pub fn with_default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    /// Set the maximum string length.
    pub fn with_length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    /// Set decimal precision and scale.
    pub fn with_precision(mut self, precision: u8, scale: u8) -> Self {
        self.precision = Some((precision, scale));
        self
    }

    /// Set the backend column type override.
    pub fn with_type_override(mut self, column_type: impl Into<String>) -> Self {
        self.type_override = Some(column_type.into());
        self
    }

    /// Check if this field has a default value.
    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    /// Check if this field references another table.
    pub fn is_reference(&self) -> bool {
        self.kind.is_reference()
    }

    /// Backend column type, honouring `type_override`.
    pub fn column_type(&self) -> String {
        match &self.type_override {
            Some(column_type) => column_type.clone(),
            None => self.kind.column_type(self.length, self.precision),
        }
    }
}

/// Explicit field declaration, the counterpart of a bare type annotation.
///
/// Every setting is optional: unset settings are taken from the annotation
/// the spec is paired with, or from defaults.
#[derive(Debug, Clone, Default)]
pub struct FieldSpec {
    /// Semantic kind, if declared explicitly.
    pub kind: Option<FieldKind>,
    /// Nullability, if declared explicitly.
    pub nullable: Option<bool>,
    /// Required flag, if declared explicitly.
    pub required: Option<bool>,
    /// Default value.
    pub default: Option<DefaultValue>,
    /// Maximum string length.
    pub length: Option<u32>,
    /// Decimal precision and scale.
    pub precision: Option<(u8, u8)>,
    /// Backend column type override.
    pub type_override: Option<String>,
}

impl FieldSpec {
    /// Create an empty spec whose kind comes from the annotation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a spec with an explicit kind.
    pub fn of(kind: FieldKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    /// Spec for a string field.
    pub fn string() -> Self {
        Self::of(FieldKind::String)
    }

    /// Spec for a text field.
    pub fn text() -> Self {
        Self::of(FieldKind::Text)
    }

    /// Spec for an integer field.
    pub fn integer() -> Self {
        Self::of(FieldKind::Integer)
    }

    /// Spec for a reference to `table.id`.
    pub fn reference(table: impl Into<String>) -> Self {
        Self::of(FieldKind::reference(table, "id"))
    }

    /// Declare nullability.
    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = Some(nullable);
        self
    }

    /// Declare whether writes must supply the field.
    pub fn with_required(mut self, required: bool) -> Self {
        self.required = Some(required);
        self
    }

    /// Use a constant default.
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(DefaultValue::Constant(value.into()));
        self
    }

    /// Use a default factory, called once for every write that omits the field.
    pub fn with_default_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.default = Some(DefaultValue::Factory(Arc::new(factory)));
        self
    }

    /// Set the maximum string length.
    pub fn with_length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    /// Set decimal precision and scale.
    pub fn with_precision(mut self, precision: u8, scale: u8) -> Self {
        self.precision = Some((precision, scale));
        self
    }

    /// Override the backend column type.
    pub fn with_type_override(mut self, column_type: impl Into<String>) -> Self {
        self.type_override = Some(column_type.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    #[test]
    fn test_nullability_drives_required() {
        let field = FieldDescriptor::new("title", FieldKind::String);
        assert!(!field.nullable);
        assert!(field.required);

        let field = FieldDescriptor::nullable("subtitle", FieldKind::String);
        assert!(field.nullable);
        assert!(!field.required);

        let field = FieldDescriptor::new("created", FieldKind::DateTime).with_required(false);
        assert!(!field.nullable);
        assert!(!field.required);
    }

    #[test]
    fn test_column_type_override() {
        let field = FieldDescriptor::new("body", FieldKind::String).with_length(40);
        assert_eq!(field.column_type(), "string(40)");

        let field = field.with_type_override("citext");
        assert_eq!(field.column_type(), "citext");
    }

    #[test]
    fn test_default_factory_runs_per_resolve() {
        let counter = Arc::new(AtomicI64::new(0));
        let seen = counter.clone();
        let spec = FieldSpec::integer()
            .with_default_factory(move || Value::Int(seen.fetch_add(1, Ordering::SeqCst)));

        let default = spec.default.unwrap();
        assert_eq!(default.resolve(), Value::Int(0));
        assert_eq!(default.resolve(), Value::Int(1));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
