//! Node in the property graph.

use serde::{Deserialize, Serialize};
use super::{PropertyMap, Value};

/// Property keys tried, in order, when a node needs a human-readable name.
const NAME_KEYS: &[&str] = &["name", "title", "model", "label", "id"];

/// Opaque node identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A node in the property graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub labels: Vec<String>,
    pub properties: PropertyMap,
}

impl Node {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            labels: Vec::new(),
            properties: PropertyMap::new(),
        }
    }

    pub fn with_labels(mut self, labels: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.labels = labels.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// First label, used where one label has to stand for the node.
    pub fn primary_label(&self) -> Option<&str> {
        self.labels.first().map(String::as_str)
    }

    /// Best-effort readable name: a well-known key, else the first string
    /// property, else `Label#id`.
    pub fn display_name(&self) -> String {
        NAME_KEYS
            .iter()
            .filter_map(|k| self.properties.get(*k))
            .chain(self.properties.values().filter(|v| v.is_string()))
            .find(|v| !v.is_null())
            .map(Value::render)
            .unwrap_or_else(|| format!("{}#{}", self.primary_label().unwrap_or("Node"), self.id))
    }

    /// Flat `Label key: value, ...` text used for embedding and prompts.
    pub fn text_summary(&self) -> String {
        let mut text = self.labels.join(":");
        for (key, value) in &self.properties {
            if value.is_null() {
                continue;
            }
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(key);
            text.push_str(": ");
            text.push_str(&value.render());
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_prefers_name_key() {
        let node = Node::new(NodeId(7))
            .with_labels(["Product"])
            .with_property("category", "Anakart")
            .with_property("name", "MAG B650 TOMAHAWK");
        assert_eq!(node.display_name(), "MAG B650 TOMAHAWK");
    }

    #[test]
    fn test_display_name_falls_back_to_label_and_id() {
        let node = Node::new(NodeId(3)).with_labels(["Brand"]).with_property("founded", 1986);
        assert_eq!(node.display_name(), "Brand#3");
    }

    #[test]
    fn test_text_summary_is_ordered() {
        let node = Node::new(NodeId(1))
            .with_labels(["Brand"])
            .with_property("name", "MSI")
            .with_property("country", "Taiwan");
        assert_eq!(node.text_summary(), "Brand country: Taiwan name: MSI");
    }
}
