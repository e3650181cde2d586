use crate::error::{Result, SchemaDbError};
use crate::record::Record;
use crate::schema::{TableSchema, ID_FIELD};
use indexmap::IndexMap;
use serde_json::{Map, Value};

/// Field name -> exact value to match
pub type Predicate = Map<String, Value>;

/// Check every predicate key against the table schema.
/// `id` is always accepted.
pub fn check_predicate(table_name: &str, schema: &TableSchema, predicate: &Predicate) -> Result<()> {
    for field in predicate.keys() {
        if field != ID_FIELD && schema.field(field).is_none() {
            return Err(SchemaDbError::Query {
                table: table_name.to_string(),
                field: field.clone(),
            });
        }
    }
    Ok(())
}

/// Whether a record satisfies every pair of the predicate.
///
/// Comparison is structural JSON equality; no type-aware coercion, so a
/// date only matches the exact string it was stored as.
pub fn matches(record: &Record, predicate: &Predicate) -> bool {
    predicate.iter().all(|(field, expected)| {
        if field == ID_FIELD {
            return expected.as_str() == Some(record.id.as_str());
        }
        match record.fields.get(field) {
            Some(actual) => actual == expected,
            // An absent optional field only matches an explicit null
            None => expected.is_null(),
        }
    })
}

/// Scan all rows and return those matching the predicate, in insertion order.
/// Multiple pairs are AND-combined; an empty predicate returns every row.
pub fn find(
    table_name: &str,
    schema: &TableSchema,
    rows: &IndexMap<String, Record>,
    predicate: &Predicate,
) -> Result<Vec<Record>> {
    check_predicate(table_name, schema, predicate)?;
    Ok(rows
        .values()
        .filter(|record| matches(record, predicate))
        .cloned()
        .collect())
}

/// Number of rows matching the predicate
pub fn count(
    table_name: &str,
    schema: &TableSchema,
    rows: &IndexMap<String, Record>,
    predicate: &Predicate,
) -> Result<usize> {
    check_predicate(table_name, schema, predicate)?;
    Ok(rows.values().filter(|record| matches(record, predicate)).count())
}
