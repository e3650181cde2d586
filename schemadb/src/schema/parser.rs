use super::types::RawSchema;
use crate::error::Result;
use std::path::Path;

/// Parse a schema file (YAML or JSON) into raw table declarations
pub fn parse_schema(path: &Path) -> Result<RawSchema> {
    let content = std::fs::read_to_string(path)?;
    parse_schema_str(&content)
}

/// Parse a schema YAML string into raw table declarations
pub fn parse_schema_str(content: &str) -> Result<RawSchema> {
    let schema: Option<RawSchema> = serde_yaml::from_str(content)?;
    Ok(schema.unwrap_or_default())
}
