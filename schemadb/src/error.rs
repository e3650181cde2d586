use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchemaDbError {
    #[error("Schema error: unsupported type '{token}' ({reason})")]
    Schema { token: String, reason: String },

    #[error("Validation error: {table}.{field} rejected value {value}: {reason}")]
    Validation {
        table: String,
        field: String,
        value: String,
        reason: String,
    },

    #[error("Row not found: {table}/{id}")]
    NotFound { table: String, id: String },

    #[error("Database '{name}' not found at {path}")]
    DatabaseNotFound { name: String, path: String },

    #[error("Database '{name}' already exists at {path}")]
    DatabaseExists { name: String, path: String },

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Referential integrity violation: {0}")]
    ReferentialIntegrity(String),

    #[error("Query error: table '{table}' has no field '{field}'")]
    Query { table: String, field: String },

    #[error("Persistence error: {0}")]
    Persistence(String),

    /// The mutation of `table`/`id` was applied in memory, but the autosave
    /// that followed it failed.
    #[error("Autosave failed after changing {table}/{id}: {source}")]
    AutosaveFailed {
        table: String,
        id: String,
        source: Box<SchemaDbError>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SchemaDbError {
    pub(crate) fn schema(token: impl Into<String>, reason: impl Into<String>) -> Self {
        SchemaDbError::Schema {
            token: token.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn validation(
        table: &str,
        field: &str,
        value: &serde_json::Value,
        reason: impl Into<String>,
    ) -> Self {
        SchemaDbError::Validation {
            table: table.to_string(),
            field: field.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    /// Id of the row a mutation already changed when the error was raised.
    pub fn committed_id(&self) -> Option<&str> {
        match self {
            SchemaDbError::AutosaveFailed { id, .. } => Some(id),
            _ => None,
        }
    }

    /// True when the addressed table or row does not exist, as opposed to
    /// the request being malformed.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SchemaDbError::NotFound { .. }
                | SchemaDbError::TableNotFound(_)
                | SchemaDbError::DatabaseNotFound { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SchemaDbError>;
