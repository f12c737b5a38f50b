//! ContextFragment: one piece of retrieved evidence.

use serde::{Deserialize, Serialize};

use super::{Node, NodeId, RelId, Relationship};

/// Where a fragment was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FragmentSource {
    /// Reached by bounded traversal from a seed entity.
    Structural,
    /// Ranked by embedding similarity to the question.
    Semantic,
    /// Found by both retrievers.
    Both,
}

impl FragmentSource {
    pub fn merge(self, other: FragmentSource) -> FragmentSource {
        if self == other { self } else { FragmentSource::Both }
    }
}

/// The graph element a fragment carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Evidence {
    Node(Node),
    Relationship {
        relationship: Relationship,
        /// Display names of the endpoints, for prompts.
        from: String,
        to: String,
    },
}

/// Identity used to merge the two retrieval lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FragmentKey {
    Node(NodeId),
    Relationship(RelId),
}

/// Retrieved evidence with its scores.
///
/// `structural_score` and `semantic_score` are kept separate through
/// retrieval; `score` is the fused value the ranking uses. All three lie in
/// `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextFragment {
    pub evidence: Evidence,
    /// Hops from the nearest seed; `None` when only found semantically.
    pub hops: Option<usize>,
    pub structural_score: f64,
    pub semantic_score: f64,
    pub score: f64,
    pub source: FragmentSource,
    /// Position in discovery order, the last tie-breaker.
    pub discovery: usize,
}

impl ContextFragment {
    pub fn structural(evidence: Evidence, hops: usize, score: f64, discovery: usize) -> Self {
        let score = clamp_unit(score);
        Self {
            evidence,
            hops: Some(hops),
            structural_score: score,
            semantic_score: 0.0,
            score,
            source: FragmentSource::Structural,
            discovery,
        }
    }

    pub fn semantic(node: Node, similarity: f64, discovery: usize) -> Self {
        let score = clamp_unit(similarity);
        Self {
            evidence: Evidence::Node(node),
            hops: None,
            structural_score: 0.0,
            semantic_score: score,
            score,
            source: FragmentSource::Semantic,
            discovery,
        }
    }

    pub fn key(&self) -> FragmentKey {
        match &self.evidence {
            Evidence::Node(n) => FragmentKey::Node(n.id),
            Evidence::Relationship { relationship, .. } => FragmentKey::Relationship(relationship.id),
        }
    }

    /// Ranking order: score descending, then fewer hops (semantic-only last),
    /// then earlier discovery.
    pub fn rank_cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| self.hops.unwrap_or(usize::MAX).cmp(&other.hops.unwrap_or(usize::MAX)))
            .then_with(|| self.discovery.cmp(&other.discovery))
    }

    /// One prompt line describing the evidence.
    pub fn describe(&self) -> String {
        match &self.evidence {
            Evidence::Node(n) => {
                let labels: String = n.labels.iter().map(|l| format!(":{l}")).collect();
                let props: Vec<String> = n
                    .properties
                    .iter()
                    .filter(|(_, v)| !v.is_null())
                    .map(|(k, v)| format!("{k}: {}", v.render()))
                    .collect();
                format!("({labels} {{{}}}) score={:.2}", props.join(", "), self.score)
            }
            Evidence::Relationship { relationship, from, to } => {
                format!("{} score={:.2}", relationship.pattern(from, to), self.score)
            }
        }
    }
}

pub(crate) fn clamp_unit(v: f64) -> f64 {
    if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: u64) -> Node {
        Node::new(NodeId(id)).with_labels(["Product"])
    }

    #[test]
    fn test_rank_prefers_score_then_hops_then_discovery() {
        let a = ContextFragment::structural(Evidence::Node(node(1)), 2, 0.5, 0);
        let b = ContextFragment::structural(Evidence::Node(node(2)), 1, 0.5, 5);
        let c = ContextFragment::semantic(node(3), 0.5, 1);
        let d = ContextFragment::structural(Evidence::Node(node(4)), 1, 0.5, 3);
        let mut v = vec![a, b, c, d];
        v.sort_by(ContextFragment::rank_cmp);
        let order: Vec<_> = v.iter().map(|f| f.key()).collect();
        assert_eq!(order, vec![
            FragmentKey::Node(NodeId(4)),
            FragmentKey::Node(NodeId(2)),
            FragmentKey::Node(NodeId(1)),
            FragmentKey::Node(NodeId(3)),
        ]);
    }

    #[test]
    fn test_scores_are_clamped() {
        let f = ContextFragment::semantic(node(1), -0.4, 0);
        assert_eq!(f.score, 0.0);
        let f = ContextFragment::structural(Evidence::Node(node(1)), 0, 1.7, 0);
        assert_eq!(f.score, 1.0);
    }
}
