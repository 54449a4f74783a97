use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Keys consumed by the composition engine and never forwarded to a widget.
pub const LAYOUT_KEYS: [&str; 4] = ["type", "tab_title", "tab_id", "size"];

/// Key holding the child nodes of structural layouts.
pub const CHILDREN_KEY: &str = "widgets";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NodeError {
    #[error("widget node must be a mapping, got {0}")]
    NotAMapping(&'static str),
    #[error("widget node is missing the 'type' key")]
    MissingType,
    #[error("'type' must be a non-empty string")]
    InvalidType,
    #[error("'{key}' must be {expected}")]
    InvalidKey {
        key: &'static str,
        expected: &'static str,
    },
    #[error("'widgets' must be a list of widget nodes")]
    InvalidChildren,
}

/// Fixed size applied to a widget slot after the widget was constructed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SizeHint {
    pub width: Option<f32>,
    pub height: Option<f32>,
}

impl SizeHint {
    fn from_value(value: &Value) -> Result<Self, NodeError> {
        let invalid = NodeError::InvalidKey {
            key: "size",
            expected: "a [width, height] list",
        };
        let Value::Array(items) = value else {
            return Err(invalid);
        };
        if items.len() != 2 {
            return Err(invalid);
        }
        let dim = |v: &Value| -> Result<Option<f32>, NodeError> {
            match v {
                Value::Null => Ok(None),
                Value::Number(n) => n.as_f64().map(|f| Some(f as f32)).ok_or(invalid.clone()),
                _ => Err(invalid.clone()),
            }
        };
        Ok(Self {
            width: dim(&items[0])?,
            height: dim(&items[1])?,
        })
    }
}

/// One node of the declarative widget tree.
///
/// Composition-only keys are split off at parse time so `options` holds exactly
/// what the target implementation gets to see.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "Value")]
pub struct ConfigNode {
    pub type_name: String,
    pub options: Map<String, Value>,
    pub tab_title: Option<String>,
    pub tab_id: Option<String>,
    pub size: Option<SizeHint>,
}

impl ConfigNode {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            options: Map::new(),
            tab_title: None,
            tab_id: None,
            size: None,
        }
    }

    pub fn with_option(mut self, key: &str, value: Value) -> Self {
        self.options.insert(key.to_string(), value);
        self
    }

    pub fn with_children(mut self, children: Vec<Value>) -> Self {
        self.options
            .insert(CHILDREN_KEY.to_string(), Value::Array(children));
        self
    }

    /// Child nodes declared under `widgets`, parsed on demand.
    pub fn children(&self) -> Result<Vec<ConfigNode>, NodeError> {
        match self.options.get(CHILDREN_KEY) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => items.iter().cloned().map(ConfigNode::try_from).collect(),
            Some(_) => Err(NodeError::InvalidChildren),
        }
    }

    /// Options as a JSON object, ready for typed deserialization.
    pub fn options_value(&self) -> Value {
        Value::Object(self.options.clone())
    }

    /// Label shown on the tab hosting this node.
    pub fn tab_label(&self) -> &str {
        self.tab_title.as_deref().unwrap_or(&self.type_name)
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}

fn optional_string(map: &mut Map<String, Value>, key: &'static str) -> Result<Option<String>, NodeError> {
    match map.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        // Numeric ids are common in hand-written YAML.
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(_) => Err(NodeError::InvalidKey {
            key,
            expected: "a string",
        }),
    }
}

impl TryFrom<Value> for ConfigNode {
    type Error = NodeError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let Value::Object(mut map) = value else {
            return Err(NodeError::NotAMapping(kind(&value)));
        };
        let type_name = match map.remove("type") {
            None => return Err(NodeError::MissingType),
            Some(Value::String(s)) if !s.trim().is_empty() => s,
            Some(_) => return Err(NodeError::InvalidType),
        };
        let tab_title = optional_string(&mut map, "tab_title")?;
        let tab_id = optional_string(&mut map, "tab_id")?;
        let size = match map.remove("size") {
            None | Some(Value::Null) => None,
            Some(v) => Some(SizeHint::from_value(&v)?),
        };
        Ok(Self {
            type_name,
            options: map,
            tab_title,
            tab_id,
            size,
        })
    }
}

/// Location of a node inside the configuration, used in diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePath(String);

impl NodePath {
    pub fn root(name: &str) -> Self {
        Self(name.to_string())
    }

    pub fn child(&self, index: usize, type_name: &str) -> Self {
        Self(format!("{}.widgets[{index}]({type_name})", self.0))
    }

    pub fn indexed(&self, index: usize) -> Self {
        Self(format!("{}[{index}]", self.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn layout_keys_are_split_from_options() {
        let node = ConfigNode::try_from(json!({
            "type": "news",
            "tab_title": "News",
            "tab_id": "news",
            "size": [300, null],
            "update_interval": 600
        }))
        .unwrap();
        assert_eq!(node.type_name, "news");
        assert_eq!(node.tab_title.as_deref(), Some("News"));
        assert_eq!(node.tab_id.as_deref(), Some("news"));
        assert_eq!(
            node.size,
            Some(SizeHint {
                width: Some(300.0),
                height: None
            })
        );
        for key in LAYOUT_KEYS {
            assert!(!node.options.contains_key(key));
        }
        assert_eq!(node.options["update_interval"], json!(600));
    }

    #[test]
    fn children_are_parsed_on_demand() {
        let node = ConfigNode::try_from(json!({
            "type": "tabs",
            "widgets": [{"type": "clock"}, {"type": "news", "tab_id": 7}]
        }))
        .unwrap();
        let children = node.children().unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[1].tab_id.as_deref(), Some("7"));
        assert_eq!(children[0].tab_label(), "clock");
    }

    #[test]
    fn rejects_malformed_nodes() {
        assert_eq!(
            ConfigNode::try_from(json!({"interval": 3})),
            Err(NodeError::MissingType)
        );
        assert_eq!(
            ConfigNode::try_from(json!("clock")),
            Err(NodeError::NotAMapping("a string"))
        );
        assert!(ConfigNode::try_from(json!({"type": "clock", "size": [1]})).is_err());
        let bad_children = ConfigNode::try_from(json!({"type": "tabs", "widgets": 3})).unwrap();
        assert_eq!(bad_children.children(), Err(NodeError::InvalidChildren));
    }
}
