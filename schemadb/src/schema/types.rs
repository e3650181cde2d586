use crate::error::{Result, SchemaDbError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Raw declarations as written by the user: table name -> field name -> field.
pub type RawSchema = BTreeMap<String, BTreeMap<String, RawField>>;

/// Compiled schemas keyed by table name.
pub type CompiledSchemas = BTreeMap<String, TableSchema>;

/// Definition of a single field before compilation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawField {
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub required: bool,
}

impl RawField {
    pub fn new(field_type: &str, required: bool) -> Self {
        RawField {
            field_type: field_type.to_string(),
            required,
        }
    }
}

/// Scalar kinds a field (or array element) may hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarKind {
    Number,
    String,
    Date,
}

impl ScalarKind {
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "number" => Some(ScalarKind::Number),
            "string" => Some(ScalarKind::String),
            "date" => Some(ScalarKind::Date),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScalarKind::Number => "number",
            ScalarKind::String => "string",
            ScalarKind::Date => "date",
        }
    }
}

/// Compiled field type. Serialized as its canonical token, e.g. `"array id Person"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum FieldType {
    Scalar(ScalarKind),
    ArrayOf(ScalarKind),
    Reference(String),
    ArrayReference(String),
}

impl FieldType {
    /// Parse a type token and check that any referenced table is declared.
    pub fn parse(token: &str, declared: &BTreeSet<&str>) -> Result<Self> {
        let field_type = Self::parse_token(token)?;
        if let Some(table) = field_type.referenced_table() {
            if !declared.contains(table) {
                return Err(SchemaDbError::schema(
                    token,
                    format!("table '{table}' is not declared"),
                ));
            }
        }
        Ok(field_type)
    }

    /// Parse the token shape only; referenced tables are not checked.
    pub fn parse_token(token: &str) -> Result<Self> {
        let segments: Vec<&str> = token.split(' ').collect();
        let invalid = |reason: &str| SchemaDbError::schema(token, reason);

        match segments.as_slice() {
            [kind] => ScalarKind::from_token(kind)
                .map(FieldType::Scalar)
                .ok_or_else(|| invalid("expected number, string or date")),
            ["id", table] if !table.is_empty() => Ok(FieldType::Reference(table.to_string())),
            ["array", kind] => ScalarKind::from_token(kind)
                .map(FieldType::ArrayOf)
                .ok_or_else(|| invalid("array elements must be number, string or date")),
            ["array", "id", table] if !table.is_empty() => {
                Ok(FieldType::ArrayReference(table.to_string()))
            }
            [_, _] => Err(invalid("expected 'id <table>' or 'array <kind>'")),
            [_, _, _] => Err(invalid("expected 'array id <table>'")),
            _ => Err(invalid("too many segments")),
        }
    }

    /// The table a reference field points at, if any.
    pub fn referenced_table(&self) -> Option<&str> {
        match self {
            FieldType::Reference(table) | FieldType::ArrayReference(table) => Some(table),
            FieldType::Scalar(_) | FieldType::ArrayOf(_) => None,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Scalar(kind) => write!(f, "{}", kind.as_str()),
            FieldType::ArrayOf(kind) => write!(f, "array {}", kind.as_str()),
            FieldType::Reference(table) => write!(f, "id {table}"),
            FieldType::ArrayReference(table) => write!(f, "array id {table}"),
        }
    }
}

impl From<FieldType> for String {
    fn from(field_type: FieldType) -> Self {
        field_type.to_string()
    }
}

impl TryFrom<String> for FieldType {
    type Error = SchemaDbError;

    fn try_from(token: String) -> Result<Self> {
        FieldType::parse_token(&token)
    }
}

/// A compiled field: its type and whether inserts must supply it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
}

/// Compiled schema of one table
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TableSchema {
    pub fields: BTreeMap<String, FieldSpec>,
    /// Number of successful inserts over the table's lifetime
    #[serde(default)]
    pub row_counter: u64,
}

impl TableSchema {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.get(name)
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|(_, spec)| spec.required)
            .map(|(name, _)| name.as_str())
    }
}
