// Stored rows: a system-assigned id plus the field values

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One stored row. Serializes flat: `{"id": "...", "name": "Ada", ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    pub fn new(id: impl Into<String>, fields: Map<String, Value>) -> Self {
        Record {
            id: id.into(),
            fields,
        }
    }

    /// Look up a field; `"id"` resolves to the row identifier.
    pub fn get(&self, field: &str) -> Option<Value> {
        if field == crate::schema::ID_FIELD {
            return Some(Value::String(self.id.clone()));
        }
        self.fields.get(field).cloned()
    }

    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("id".into(), Value::String(self.id.clone()));
        for (k, v) in &self.fields {
            obj.insert(k.clone(), v.clone());
        }
        Value::Object(obj)
    }
}

impl std::ops::Index<&str> for Record {
    type Output = Value;

    fn index(&self, field: &str) -> &Value {
        self.fields.get(field).unwrap_or(&Value::Null)
    }
}
