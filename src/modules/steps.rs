use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Ordered checklist attached to an assignment or project.
///
/// Items are free-form JSON and kept verbatim; only the list shape is enforced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Steps(pub Vec<Value>);

impl Steps {
    /// Steps for a new record: missing or unusable input becomes an empty list.
    pub fn from_input(value: Option<Value>) -> Self {
        value.map(Self::coerce).unwrap_or_default()
    }

    /// Steps for an update: `None` (absent or `null`) keeps the stored list.
    pub fn patch(value: Option<Value>) -> Option<Self> {
        value.map(Self::coerce)
    }

    /// Accepts a JSON array or a string holding one; anything else is an empty list.
    fn coerce(value: Value) -> Self {
        match value {
            Value::Array(items) => Steps(items),
            Value::String(raw) => match serde_json::from_str::<Value>(&raw) {
                Ok(Value::Array(items)) => Steps(items),
                _ => Steps::default(),
            },
            _ => Steps::default(),
        }
    }
}
