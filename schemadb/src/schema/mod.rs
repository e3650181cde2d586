mod compiler;
mod parser;
mod types;

pub use compiler::{check_references, compile, ID_FIELD};
pub use parser::{parse_schema, parse_schema_str};
pub use types::{
    CompiledSchemas, FieldSpec, FieldType, RawField, RawSchema, ScalarKind, TableSchema,
};
