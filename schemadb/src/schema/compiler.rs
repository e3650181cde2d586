use super::types::{CompiledSchemas, FieldSpec, FieldType, RawSchema, TableSchema};
use crate::error::{Result, SchemaDbError};
use std::collections::{BTreeMap, BTreeSet};

/// Field name reserved for the system-assigned row identifier.
pub const ID_FIELD: &str = "id";

/// Compile raw table declarations into validated schemas.
///
/// Table names are collected first so forward and self references resolve.
/// Fails on the first unsupported type token; nothing is partially compiled.
pub fn compile(raw: &RawSchema) -> Result<CompiledSchemas> {
    let declared: BTreeSet<&str> = raw.keys().map(String::as_str).collect();

    let mut compiled = BTreeMap::new();
    for (table_name, fields) in raw {
        let mut table = TableSchema::default();
        for (field_name, raw_field) in fields {
            if field_name == ID_FIELD {
                return Err(SchemaDbError::schema(
                    &raw_field.field_type,
                    format!("field name '{ID_FIELD}' in table '{table_name}' is reserved"),
                ));
            }
            let field_type = FieldType::parse(&raw_field.field_type, &declared)?;
            table.fields.insert(
                field_name.clone(),
                FieldSpec {
                    field_type,
                    required: raw_field.required,
                },
            );
        }
        compiled.insert(table_name.clone(), table);
    }

    log::debug!("Compiled schema with {} table(s)", compiled.len());
    Ok(compiled)
}

/// Re-check that every reference in already-compiled schemas names a
/// table of the same set. Used when schemas are restored from a snapshot.
pub fn check_references(schemas: &CompiledSchemas) -> Result<()> {
    for (table_name, table) in schemas {
        for (field_name, spec) in &table.fields {
            if let Some(target) = spec.field_type.referenced_table() {
                if !schemas.contains_key(target) {
                    return Err(SchemaDbError::ReferentialIntegrity(format!(
                        "{table_name}.{field_name} references missing table '{target}'"
                    )));
                }
            }
        }
    }
    Ok(())
}
