//! Typed view of a nodes info response
//!
//! Only the parts discovery needs are decoded. Unknown fields are ignored and
//! a node whose attributes do not have the expected shape yields an entry
//! without an address instead of failing the whole response.

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// One cluster member from a nodes info response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEntry {
    /// Node id (key of the `nodes` object)
    pub id: String,
    /// Display name, falls back to the node id
    pub name: String,
    /// Raw advertised HTTP address, `None` when missing or not a string
    pub http_address: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct NodeAttributes {
    #[serde(default, deserialize_with = "lenient_string")]
    name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    http_address: Option<String>,
}

/// Accepts any JSON value, keeping it only if it is a string
fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        _ => None,
    })
}

/// Decoded nodes info response
#[derive(Debug, Default, Deserialize)]
pub struct NodesInfo {
    #[serde(default)]
    nodes: Option<Map<String, Value>>,
}

impl NodesInfo {
    /// Decode a response body.
    ///
    /// A body without `nodes` (or with `"nodes": null`) decodes to no
    /// entries. A body that is not an object, or whose `nodes` is not an
    /// object, is an error.
    pub fn decode(json: &Value) -> Result<Self> {
        Self::deserialize(json).map_err(|e| Error::Decode(format!("invalid nodes info: {e}")))
    }

    /// Node entries in response order
    #[must_use]
    pub fn into_entries(self) -> Vec<NodeEntry> {
        self.nodes
            .unwrap_or_default()
            .into_iter()
            .map(|(id, attributes)| {
                let attributes = NodeAttributes::deserialize(&attributes).unwrap_or_default();
                NodeEntry {
                    name: attributes.name.unwrap_or_else(|| id.clone()),
                    id,
                    http_address: attributes.http_address,
                }
            })
            .collect()
    }
}
