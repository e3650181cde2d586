use crate::error::{Result, SchemaDbError};
use crate::schema::{FieldType, ScalarKind, TableSchema, ID_FIELD};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::{Map, Value};

/// Read access to the row identifiers currently held by the store.
/// Reference checks consult it; validation never mutates through it.
pub trait RowLookup {
    fn has_table(&self, table: &str) -> bool;
    fn has_row(&self, table: &str, id: &str) -> bool;
}

/// Decide whether `value` conforms to `field_type`.
///
/// Returns `Ok(false)` for a non-conforming value. A reference to a table
/// that does not exist is an inconsistent database, not a bad value, and
/// is reported as `ReferentialIntegrity`.
pub fn validate(field_type: &FieldType, value: &Value, rows: &impl RowLookup) -> Result<bool> {
    match field_type {
        FieldType::Scalar(kind) => Ok(scalar_matches(*kind, value)),
        FieldType::ArrayOf(kind) => Ok(value
            .as_array()
            .map(|items| items.iter().all(|item| scalar_matches(*kind, item)))
            .unwrap_or(false)),
        FieldType::Reference(table) => {
            ensure_table(rows, table)?;
            Ok(value
                .as_str()
                .map(|id| rows.has_row(table, id))
                .unwrap_or(false))
        }
        FieldType::ArrayReference(table) => {
            ensure_table(rows, table)?;
            Ok(value
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .all(|item| item.as_str().map(|id| rows.has_row(table, id)).unwrap_or(false))
                })
                .unwrap_or(false))
        }
    }
}

fn ensure_table(rows: &impl RowLookup, table: &str) -> Result<()> {
    if rows.has_table(table) {
        Ok(())
    } else {
        Err(SchemaDbError::ReferentialIntegrity(format!(
            "referenced table '{table}' does not exist"
        )))
    }
}

fn scalar_matches(kind: ScalarKind, value: &Value) -> bool {
    match kind {
        ScalarKind::Number => value.is_number(),
        ScalarKind::String => value.is_string(),
        ScalarKind::Date => value.as_str().map(is_date).unwrap_or(false),
    }
}

/// Accepts RFC 3339 date-times, naive `YYYY-MM-DDTHH:MM:SS[.fff]` and
/// plain `YYYY-MM-DD` calendar dates.
pub fn is_date(text: &str) -> bool {
    DateTime::parse_from_rfc3339(text).is_ok()
        || NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
        || NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok()
}

/// Validate the fields of a record about to be inserted.
///
/// Rejects undeclared fields (the system `id` included), `null` or missing
/// required fields, and any value failing its type check. `null` on an
/// optional field means absent and is dropped from the returned fields.
/// The first failing field is reported.
pub fn validate_record(
    table_name: &str,
    table: &TableSchema,
    fields: &Map<String, Value>,
    rows: &impl RowLookup,
) -> Result<Map<String, Value>> {
    let mut prepared = Map::new();

    for (field_name, value) in fields {
        if field_name == ID_FIELD {
            return Err(SchemaDbError::validation(
                table_name,
                field_name,
                value,
                "id is assigned by the database",
            ));
        }
        if value.is_null() {
            check_nullable(table_name, table, field_name)?;
            continue;
        }
        validate_field(table_name, table, field_name, value, rows)?;
        prepared.insert(field_name.clone(), value.clone());
    }

    for required in table.required_fields() {
        if !prepared.contains_key(required) {
            return Err(SchemaDbError::validation(
                table_name,
                required,
                &Value::Null,
                "required field is missing",
            ));
        }
    }

    Ok(prepared)
}

/// Validate a single non-null value against a declared field.
pub fn validate_field(
    table_name: &str,
    table: &TableSchema,
    field_name: &str,
    value: &Value,
    rows: &impl RowLookup,
) -> Result<()> {
    let spec = table.field(field_name).ok_or_else(|| {
        SchemaDbError::validation(table_name, field_name, value, "field is not declared")
    })?;

    if !validate(&spec.field_type, value, rows)? {
        return Err(SchemaDbError::validation(
            table_name,
            field_name,
            value,
            format!("expected {}, got {}", spec.field_type, type_name(value)),
        ));
    }
    Ok(())
}

/// Check that `field_name` is declared and may be left empty.
pub fn check_nullable(table_name: &str, table: &TableSchema, field_name: &str) -> Result<()> {
    match table.field(field_name) {
        None => Err(SchemaDbError::validation(
            table_name,
            field_name,
            &Value::Null,
            "field is not declared",
        )),
        Some(spec) if spec.required => Err(SchemaDbError::validation(
            table_name,
            field_name,
            &Value::Null,
            "required field cannot be null",
        )),
        Some(_) => Ok(()),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
