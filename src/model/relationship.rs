//! Relationships as drivers return them.

use serde::{Deserialize, Serialize};

use super::{NodeId, PropertyMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RelId(pub u64);

impl std::fmt::Display for RelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A directed, typed edge `src -> dst`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: RelId,
    pub src: NodeId,
    pub dst: NodeId,
    pub rel_type: String,
    #[serde(default)]
    pub properties: PropertyMap,
}

impl Relationship {
    pub fn new(id: RelId, src: NodeId, dst: NodeId, rel_type: impl Into<String>) -> Self {
        Self { id, src, dst, rel_type: rel_type.into(), properties: PropertyMap::new() }
    }

    /// The endpoint opposite `from`, or `None` if `from` is not an endpoint.
    pub fn other_node(&self, from: NodeId) -> Option<NodeId> {
        match from {
            n if n == self.src => Some(self.dst),
            n if n == self.dst => Some(self.src),
            _ => None,
        }
    }

    /// `(from)-[:TYPE {k: v}]->(to)` with caller-supplied endpoint names.
    pub fn pattern(&self, from: &str, to: &str) -> String {
        let props: Vec<String> = self
            .properties
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| format!("{k}: {}", v.render()))
            .collect();
        if props.is_empty() {
            format!("({from})-[:{}]->({to})", self.rel_type)
        } else {
            format!("({from})-[:{} {{{}}}]->({to})", self.rel_type, props.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Value;

    #[test]
    fn test_other_node() {
        let r = Relationship::new(RelId(1), NodeId(1), NodeId(2), "BRAND");
        assert_eq!(r.other_node(NodeId(1)), Some(NodeId(2)));
        assert_eq!(r.other_node(NodeId(2)), Some(NodeId(1)));
        assert_eq!(r.other_node(NodeId(3)), None);
    }

    #[test]
    fn test_pattern() {
        let mut r = Relationship::new(RelId(1), NodeId(1), NodeId(2), "SELLS");
        assert_eq!(r.pattern("Kadıköy", "B650"), "(Kadıköy)-[:SELLS]->(B650)");
        r.properties.insert("price".into(), Value::Int(7999));
        assert_eq!(r.pattern("Kadıköy", "B650"), "(Kadıköy)-[:SELLS {price: 7999}]->(B650)");
    }
}
