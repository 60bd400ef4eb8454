use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::Display;

use super::object::ObjectData;
use super::primary_key::ObjectRef;

/// An action type that can be applied through the wire layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionDefinition {
    pub api_name: String,
}

impl ActionDefinition {
    pub fn new(api_name: impl Into<String>) -> Self {
        Self {
            api_name: api_name.into(),
        }
    }
}

/// One object edit reported by the server for an applied action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ObjectEdit {
    AddObject(ObjectRef),
    ModifyObject(ObjectRef),
    DeleteObject(ObjectRef),
}

impl ObjectEdit {
    pub fn object_ref(&self) -> &ObjectRef {
        match self {
            Self::AddObject(r) | Self::ModifyObject(r) | Self::DeleteObject(r) => r,
        }
    }
}

/// Server response to an applied action.
///
/// `objects` carries fresh data for edited objects when the server returns
/// it; edits without matching data are refetched by the cache if observed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    #[serde(default)]
    pub edits: Vec<ObjectEdit>,
    #[serde(default)]
    pub objects: Vec<ObjectData>,
}

impl ActionResult {
    pub fn with_edit(mut self, edit: ObjectEdit) -> Self {
        self.edits.push(edit);
        self
    }

    pub fn with_object(mut self, object: ObjectData) -> Self {
        self.objects.push(object);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationResult {
    Valid,
    Invalid,
}

/// Server-side validation of action arguments without applying them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionValidation {
    pub result: ValidationResult,
    #[serde(default)]
    pub submission_criteria: Vec<Value>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}
