//! Batch request shape submitted to the sandbox.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key under which the batch position of an operation is sent.
const OPERATION_ID_KEY: &str = "operationId";

/// A sandbox-generated description of one device command.
///
/// The contents are opaque to the orchestrator; they are produced by a
/// `--generate` call and sent back unchanged inside a [`BatchRequest`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationDescriptor(Map<String, Value>);

impl OperationDescriptor {
    /// Wrap an already-decoded JSON object.
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Access the descriptor fields.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl TryFrom<Value> for OperationDescriptor {
    type Error = ProtocolError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(fields) => Ok(Self(fields)),
            Value::Null => Err(ProtocolError::NotAnObject("null")),
            Value::Bool(_) => Err(ProtocolError::NotAnObject("a boolean")),
            Value::Number(_) => Err(ProtocolError::NotAnObject("a number")),
            Value::String(_) => Err(ProtocolError::NotAnObject("a string")),
            Value::Array(_) => Err(ProtocolError::NotAnObject("an array")),
        }
    }
}

/// One entry of a batch: the descriptor tagged with its position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOperation {
    /// Zero-based position in the batch, as a decimal string.
    pub operation_id: String,
    /// Descriptor fields, flattened next to the id.
    #[serde(flatten)]
    pub descriptor: OperationDescriptor,
}

/// The request executed by the sandbox in one go.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    /// Operations in execution order.
    pub operations: Vec<BatchOperation>,
}

impl BatchRequest {
    /// Assemble a request, assigning each descriptor its index as operation id.
    ///
    /// An `operationId` field inside a descriptor is dropped so the index
    /// stays authoritative.
    pub fn from_descriptors(descriptors: impl IntoIterator<Item = OperationDescriptor>) -> Self {
        let operations = descriptors
            .into_iter()
            .enumerate()
            .map(|(index, mut descriptor)| {
                descriptor.0.remove(OPERATION_ID_KEY);
                BatchOperation {
                    operation_id: index.to_string(),
                    descriptor,
                }
            })
            .collect();
        Self { operations }
    }

    /// Number of operations in the request.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Check if the request has no operations.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Encode as the single JSON string argument the sandbox expects.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}
