//! Filter schema and filter state for list views.
//!
//! # Design
//! - A schema declares every field a view understands, its type and default.
//! - [`FilterState`] always holds a value for every declared field, so two
//!   states compare equal exactly when every field value matches.
//! - Schema violations on user input are reported as validation errors;
//!   URL decoding (see [`crate::codec`]) never fails and falls back instead.

use std::collections::BTreeMap;
use std::fmt;

use catalog_config::EngineConfig;

use crate::error::{EngineError, EngineResult};

/// Value held by a single filter field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// Free text or an enumerated option.
    Text(String),
    /// Signed integer.
    Integer(i64),
    /// Flag.
    Boolean(bool),
    /// Ordered multi-valued selection.
    List(Vec<String>),
}

impl FieldValue {
    /// Text payload, if this is a text value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }

    /// Integer payload, if this is an integer value.
    #[must_use]
    pub const fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    /// Boolean payload, if this is a boolean value.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(value) => Some(*value),
            _ => None,
        }
    }

    /// List payload, if this is a list value.
    #[must_use]
    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::List(values) => Some(values),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(values: Vec<String>) -> Self {
        Self::List(values)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(value) => f.write_str(value),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Boolean(value) => write!(f, "{value}"),
            Self::List(values) => write!(f, "[{}]", values.join(", ")),
        }
    }
}

/// Declared type of a filter field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    /// Any string.
    Text,
    /// Integer with optional inclusive bounds.
    Integer {
        /// Smallest accepted value.
        min: Option<i64>,
        /// Largest accepted value.
        max: Option<i64>,
    },
    /// `true` or `false`.
    Boolean,
    /// Delimited list of non-empty strings.
    List,
    /// One of a fixed set of options.
    Enum(Vec<String>),
}

/// Declaration of one filter field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    name: String,
    kind: FieldKind,
    default: FieldValue,
}

impl FieldSpec {
    /// Free-text field.
    #[must_use]
    pub fn text(name: impl Into<String>, default: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Text,
            default: FieldValue::Text(default.into()),
        }
    }

    /// Integer field with optional inclusive bounds.
    #[must_use]
    pub fn integer(
        name: impl Into<String>,
        default: i64,
        min: Option<i64>,
        max: Option<i64>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Integer { min, max },
            default: FieldValue::Integer(default),
        }
    }

    /// Boolean flag.
    #[must_use]
    pub fn boolean(name: impl Into<String>, default: bool) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Boolean,
            default: FieldValue::Boolean(default),
        }
    }

    /// Multi-valued field defaulting to the empty list.
    #[must_use]
    pub fn list(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::List,
            default: FieldValue::List(Vec::new()),
        }
    }

    /// Enumerated field.
    #[must_use]
    pub fn enumeration<I, S>(name: impl Into<String>, options: I, default: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            kind: FieldKind::Enum(options.into_iter().map(Into::into).collect()),
            default: FieldValue::Text(default.into()),
        }
    }

    /// One-based page number field.
    #[must_use]
    pub fn page(name: impl Into<String>) -> Self {
        Self::integer(name, 1, Some(1), None)
    }

    /// Page size field bounded to `1..=max`.
    #[must_use]
    pub fn page_size(name: impl Into<String>, default: u32, max: u32) -> Self {
        Self::integer(name, i64::from(default), Some(1), Some(i64::from(max)))
    }

    /// Field name as it appears in the query string.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared type.
    #[must_use]
    pub const fn kind(&self) -> &FieldKind {
        &self.kind
    }

    /// Default value.
    #[must_use]
    pub const fn default_value(&self) -> &FieldValue {
        &self.default
    }

    /// Check `value` against the declared type.
    ///
    /// # Errors
    ///
    /// Returns a validation error naming the field when the value has the
    /// wrong shape, falls outside the bounds, or is not an enum option.
    pub fn check(&self, value: &FieldValue) -> EngineResult<()> {
        match (&self.kind, value) {
            (FieldKind::Text, FieldValue::Text(_)) | (FieldKind::Boolean, FieldValue::Boolean(_)) => {
                Ok(())
            }
            (FieldKind::Integer { min, max }, FieldValue::Integer(number)) => {
                if min.is_some_and(|min| *number < min) {
                    return Err(EngineError::validation(&self.name, "below minimum"));
                }
                if max.is_some_and(|max| *number > max) {
                    return Err(EngineError::validation(&self.name, "above maximum"));
                }
                Ok(())
            }
            (FieldKind::List, FieldValue::List(items)) => {
                if items.iter().any(String::is_empty) {
                    return Err(EngineError::validation(&self.name, "list items must not be empty"));
                }
                Ok(())
            }
            (FieldKind::Enum(options), FieldValue::Text(option)) => {
                if options.iter().any(|candidate| candidate == option) {
                    Ok(())
                } else {
                    Err(EngineError::validation(&self.name, "not an allowed option"))
                }
            }
            _ => Err(EngineError::validation(&self.name, "wrong value type")),
        }
    }
}

/// Declared fields of a list view, in query-string order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSchema {
    fields: Vec<FieldSpec>,
    page_field: Option<String>,
    page_size_field: Option<String>,
    delimiter: String,
}

impl FilterSchema {
    /// Schema over `fields` with the default `,` list delimiter.
    ///
    /// # Errors
    ///
    /// Returns a validation error when two fields share a name or a default
    /// value does not satisfy its own field declaration.
    pub fn new(fields: Vec<FieldSpec>) -> EngineResult<Self> {
        for (index, spec) in fields.iter().enumerate() {
            if fields[..index].iter().any(|other| other.name == spec.name) {
                return Err(EngineError::validation(&spec.name, "declared twice"));
            }
            if spec.name.is_empty() {
                return Err(EngineError::validation("schema", "field names must not be empty"));
            }
            spec.check(&spec.default)?;
        }
        Ok(Self {
            fields,
            page_field: None,
            page_size_field: None,
            delimiter: catalog_config::defaults::LIST_DELIMITER.to_string(),
        })
    }

    /// Designate the page and page size fields.
    ///
    /// # Errors
    ///
    /// Returns a validation error when either field is missing or is not an
    /// integer field.
    pub fn with_pagination(mut self, page: &str, page_size: &str) -> EngineResult<Self> {
        for name in [page, page_size] {
            match self.field(name).map(FieldSpec::kind) {
                Some(FieldKind::Integer { .. }) => {}
                Some(_) => return Err(EngineError::validation(name, "pagination fields must be integers")),
                None => return Err(EngineError::validation(name, "unknown field")),
            }
        }
        self.page_field = Some(page.to_string());
        self.page_size_field = Some(page_size.to_string());
        Ok(self)
    }

    /// Override the delimiter joining list values.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty delimiter or one that could
    /// survive percent-encoding inside an item, such as `-` or `.`.
    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> EngineResult<Self> {
        let delimiter = delimiter.into();
        if !catalog_config::is_usable_delimiter(&delimiter) {
            return Err(EngineError::validation("list_delimiter", "unusable delimiter"));
        }
        self.delimiter = delimiter;
        Ok(self)
    }

    /// Apply the list delimiter and page size bounds from `config`.
    ///
    /// The page size field, when designated, takes `default_page_size` as its
    /// default and `max_page_size` as its ceiling.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the delimiter is unusable or the
    /// configured default exceeds the ceiling.
    pub fn with_config(self, config: &EngineConfig) -> EngineResult<Self> {
        let mut schema = self.with_delimiter(config.list_delimiter.clone())?;
        let page_size = schema.page_size_field.clone();
        if let Some(spec) = page_size
            .as_deref()
            .and_then(|name| schema.fields.iter_mut().find(|spec| spec.name == name))
        {
            let bounded = FieldSpec::page_size(
                spec.name.clone(),
                config.default_page_size,
                config.max_page_size,
            );
            bounded.check(&bounded.default)?;
            *spec = bounded;
        }
        Ok(schema)
    }

    /// Declared fields in order.
    #[must_use]
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Field declaration by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|spec| spec.name == name)
    }

    /// Name of the page field, when the view paginates.
    #[must_use]
    pub fn page_field(&self) -> Option<&str> {
        self.page_field.as_deref()
    }

    /// Name of the page size field, when the view paginates.
    #[must_use]
    pub fn page_size_field(&self) -> Option<&str> {
        self.page_size_field.as_deref()
    }

    /// Delimiter used for list fields.
    #[must_use]
    pub fn delimiter(&self) -> &str {
        &self.delimiter
    }

    /// State holding every field's default.
    #[must_use]
    pub fn defaults(&self) -> FilterState {
        FilterState {
            values: self
                .fields
                .iter()
                .map(|spec| (spec.name.clone(), spec.default.clone()))
                .collect(),
        }
    }
}

/// Current value of every field declared by a [`FilterSchema`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FilterState {
    values: BTreeMap<String, FieldValue>,
}

impl FilterState {
    /// Value of `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.values.get(name)
    }

    /// Text value of `name`.
    #[must_use]
    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(FieldValue::as_text)
    }

    /// Integer value of `name`.
    #[must_use]
    pub fn integer(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(FieldValue::as_integer)
    }

    /// Current page, or 1 when the schema does not paginate.
    #[must_use]
    pub fn page(&self, schema: &FilterSchema) -> u32 {
        schema
            .page_field()
            .and_then(|field| self.integer(field))
            .and_then(|page| u32::try_from(page).ok())
            .unwrap_or(1)
    }

    /// Current page size, or 0 when the schema does not paginate.
    #[must_use]
    pub fn page_size(&self, schema: &FilterSchema) -> u32 {
        schema
            .page_size_field()
            .and_then(|field| self.integer(field))
            .and_then(|size| u32::try_from(size).ok())
            .unwrap_or(0)
    }

    /// Iterate field values by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Copy of this state with `name` set to `value`.
    ///
    /// Changing any field other than the page field resets the page to its
    /// default, so a new search always starts on the first page.
    ///
    /// # Errors
    ///
    /// Returns a validation error for unknown fields and values that fail the
    /// field declaration.
    pub fn with_field(
        &self,
        schema: &FilterSchema,
        name: &str,
        value: FieldValue,
    ) -> EngineResult<Self> {
        let spec = schema
            .field(name)
            .ok_or_else(|| EngineError::validation(name, "unknown field"))?;
        spec.check(&value)?;

        let mut next = self.clone();
        if next.values.get(name) == Some(&value) {
            return Ok(next);
        }
        next.values.insert(name.to_string(), value);
        if let Some(page_field) = schema.page_field()
            && page_field != name
            && let Some(page_spec) = schema.field(page_field)
        {
            next.values
                .insert(page_field.to_string(), page_spec.default.clone());
        }
        Ok(next)
    }

    pub(crate) fn insert(&mut self, name: &str, value: FieldValue) {
        self.values.insert(name.to_string(), value);
    }
}
