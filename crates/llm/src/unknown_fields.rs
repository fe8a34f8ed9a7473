use std::collections::HashMap;

/// Arbitrary additional JSON fields captured during permissive decoding.
#[derive(Default, Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct UnknownFields(HashMap<String, serde_json::Value>);
