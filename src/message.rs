use bon::Builder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Result;
use crate::error::Error;

/// One decoded command frame.
///
/// The wire format is a single JSON object per text frame. The `cmd` field
/// names the command and doubles as the dispatch key; every other field is
/// command-specific payload that this crate does not interpret.
///
/// Deserialization fails when `cmd` is absent or not a string, so such frames
/// are dropped by the same policy as malformed JSON.
#[non_exhaustive]
#[derive(Debug, Clone, Deserialize, Serialize, Builder)]
pub struct Message {
    /// Command name, e.g. `heartbeat` or `sysmsg`
    pub cmd: String,
    /// Remaining fields of the frame, keyed as sent
    #[serde(flatten)]
    #[builder(default)]
    pub body: Map<String, Value>,
}

impl Message {
    /// Look up a single payload field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }

    /// Deserialize the payload fields into a typed value.
    ///
    /// The `cmd` field is not part of the payload; a target type only needs
    /// the command-specific fields.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.body.clone())).map_err(Error::Decode)
    }
}
