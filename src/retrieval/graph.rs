//! Bounded breadth-first expansion from seed nodes.
//!
//! Seeds sit at hop 0. Expanding a node at hop `h` yields each unseen
//! relationship and each unseen neighbour at hop `h + 1`; nodes at
//! `max_hops` are not expanded. Scores come from `HopDecay`, so discovery
//! order is already rank order and the walk can stop as soon as the
//! fragment budget is met.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::config::HopDecay;
use crate::limits::OutboundLimiter;
use crate::model::*;
use crate::storage::GraphDriver;
use crate::{Error, Result};
use super::Seed;

pub struct GraphContextRetriever<D: GraphDriver> {
    driver: Arc<D>,
    limiter: OutboundLimiter,
    call_timeout: Duration,
    decay: HopDecay,
}

impl<D: GraphDriver> GraphContextRetriever<D> {
    pub fn new(driver: Arc<D>, limiter: OutboundLimiter, call_timeout: Duration, decay: HopDecay) -> Self {
        Self { driver, limiter, call_timeout, decay }
    }

    async fn call<T>(&self, fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
        let ms = self.call_timeout.as_millis() as u64;
        self.limiter.call(self.call_timeout, || Error::RequestTimeout(ms), fut).await
    }

    /// Nodes standing for `seeds`, at most `limit`, without duplicates.
    ///
    /// Value seeds are matched against property text in one lookup; label
    /// seeds contribute a sample of their nodes. Seeds that match nothing
    /// are simply absent from the result.
    pub async fn resolve_seeds(&self, seeds: &[Seed], limit: usize) -> Result<Vec<Node>> {
        let mut out: Vec<Node> = Vec::new();
        let mut seen: HashSet<NodeId> = HashSet::new();
        if limit == 0 {
            return Ok(out);
        }

        let terms: Vec<String> = seeds
            .iter()
            .filter_map(|s| match s {
                Seed::Value(v) => Some(v.clone()),
                Seed::Label(_) => None,
            })
            .collect();
        if !terms.is_empty() {
            for node in self.call(self.driver.find_nodes_matching(&terms, limit)).await? {
                if out.len() < limit && seen.insert(node.id) {
                    out.push(node);
                }
            }
        }

        for seed in seeds {
            let Seed::Label(label) = seed else { continue };
            if out.len() >= limit {
                break;
            }
            for node in self.call(self.driver.sample_node_properties(label, limit - out.len())).await? {
                if out.len() < limit && seen.insert(node.id) {
                    out.push(node);
                }
            }
        }
        Ok(out)
    }

    /// Structural context for seed entities. Seeds absent from the graph
    /// contribute nothing; if none resolve the result is empty.
    pub async fn traverse(&self, seeds: &[Seed], max_hops: usize, max_fragments: usize) -> Result<Vec<ContextFragment>> {
        let nodes = self.resolve_seeds(seeds, max_fragments).await?;
        self.expand(&nodes, max_hops, max_fragments).await
    }

    /// Breadth-first context around `seeds`, best first, at most
    /// `max_fragments` long, no fragment further than `max_hops`.
    pub async fn expand(&self, seeds: &[Node], max_hops: usize, max_fragments: usize) -> Result<Vec<ContextFragment>> {
        let mut fragments: Vec<ContextFragment> = Vec::new();
        if max_fragments == 0 {
            return Ok(fragments);
        }
        let mut seen_nodes: HashSet<NodeId> = HashSet::new();
        let mut seen_rels: BTreeSet<RelId> = BTreeSet::new();
        let mut frontier: Vec<Node> = Vec::new();

        let score0 = self.decay.score(0, max_hops);
        for seed in seeds {
            if seen_nodes.insert(seed.id) {
                frontier.push(seed.clone());
                let discovery = fragments.len();
                fragments.push(ContextFragment::structural(Evidence::Node(seed.clone()), 0, score0, discovery));
                if fragments.len() >= max_fragments {
                    return Ok(fragments);
                }
            }
        }

        'walk: for hop in 1..=max_hops {
            let score = self.decay.score(hop, max_hops);
            let mut next = Vec::new();
            for node in &frontier {
                for (rel, other) in self.call(self.driver.neighbours(node.id)).await? {
                    if seen_rels.insert(rel.id) {
                        let (from, to) = if rel.src == node.id {
                            (node.display_name(), other.display_name())
                        } else {
                            (other.display_name(), node.display_name())
                        };
                        let evidence = Evidence::Relationship { relationship: rel, from, to };
                        let discovery = fragments.len();
                        fragments.push(ContextFragment::structural(evidence, hop, score, discovery));
                        if fragments.len() >= max_fragments {
                            break 'walk;
                        }
                    }
                    if seen_nodes.insert(other.id) {
                        let discovery = fragments.len();
                        fragments.push(ContextFragment::structural(Evidence::Node(other.clone()), hop, score, discovery));
                        next.push(other);
                        if fragments.len() >= max_fragments {
                            break 'walk;
                        }
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }

        fragments.sort_by(ContextFragment::rank_cmp);
        fragments.truncate(max_fragments);
        debug!(stage = "traverse", seeds = seeds.len(), fragments = fragments.len(), max_hops, "structural context collected");
        Ok(fragments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryGraph;
    use pretty_assertions::assert_eq;

    /// brand <- p1, brand <- p2, p2 -> shop -> city
    fn chain() -> (MemoryGraph, Vec<NodeId>) {
        let g = MemoryGraph::new();
        let brand = g.add_node(["Brand"], props([("name", "MSI")]));
        let p1 = g.add_node(["Product"], props([("name", "B650 Tomahawk"), ("category", "Anakart")]));
        let p2 = g.add_node(["Product"], props([("name", "Z790 Edge"), ("category", "Anakart")]));
        let shop = g.add_node(["Store"], props([("name", "Kadıköy")]));
        let city = g.add_node(["City"], props([("name", "İstanbul")]));
        g.add_relationship(p1, brand, "BRAND", PropertyMap::new()).unwrap();
        g.add_relationship(p2, brand, "BRAND", PropertyMap::new()).unwrap();
        g.add_relationship(p2, shop, "SOLD_AT", PropertyMap::new()).unwrap();
        g.add_relationship(shop, city, "IN", PropertyMap::new()).unwrap();
        (g, vec![brand, p1, p2, shop, city])
    }

    fn retriever(g: &MemoryGraph) -> GraphContextRetriever<MemoryGraph> {
        GraphContextRetriever::new(
            Arc::new(g.clone()),
            OutboundLimiter::new(4),
            Duration::from_secs(1),
            HopDecay::default(),
        )
    }

    #[tokio::test]
    async fn test_resolve_value_and_label_seeds() {
        let (g, ids) = chain();
        let r = retriever(&g);
        let nodes = r
            .resolve_seeds(&[Seed::Value("msi".into()), Seed::Label("City".into()), Seed::Value("Nokia".into())], 10)
            .await
            .unwrap();
        let got: Vec<NodeId> = nodes.iter().map(|n| n.id).collect();
        assert_eq!(got, vec![ids[0], ids[4]]);
    }

    #[tokio::test]
    async fn test_traverse_respects_hops_and_decays() {
        let (g, ids) = chain();
        let r = retriever(&g);
        let brand = g.node(ids[0]).await.unwrap().unwrap();
        let frags = r.expand(&[brand], 2, 100).await.unwrap();

        assert!(frags.iter().all(|f| f.hops.is_some_and(|h| h <= 2)));
        assert_eq!(frags[0].key(), FragmentKey::Node(ids[0]));
        assert_eq!(frags[0].score, 1.0);
        // brand, 2 BRAND rels, p1, p2 at hop 1; SOLD_AT and shop at hop 2
        assert_eq!(frags.len(), 7);
        assert!(!frags.iter().any(|f| f.key() == FragmentKey::Node(ids[4])));
        for pair in frags.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        let shop = frags.iter().find(|f| f.key() == FragmentKey::Node(ids[3])).unwrap();
        assert_eq!(shop.hops, Some(2));
        assert_eq!(shop.score, 0.25);
    }

    #[tokio::test]
    async fn test_relationship_fragment_names_endpoints_in_direction() {
        let (g, ids) = chain();
        let r = retriever(&g);
        let brand = g.node(ids[0]).await.unwrap().unwrap();
        let frags = r.expand(&[brand], 1, 100).await.unwrap();
        let rel = frags
            .iter()
            .find_map(|f| match &f.evidence {
                Evidence::Relationship { from, to, .. } => Some((from.clone(), to.clone())),
                _ => None,
            })
            .unwrap();
        assert_eq!(rel, ("B650 Tomahawk".to_string(), "MSI".to_string()));
    }

    #[tokio::test]
    async fn test_fragment_budget_truncates() {
        let (g, ids) = chain();
        let r = retriever(&g);
        let brand = g.node(ids[0]).await.unwrap().unwrap();
        let frags = r.expand(&[brand], 3, 3).await.unwrap();
        assert_eq!(frags.len(), 3);
        assert_eq!(frags[0].hops, Some(0));
    }

    #[tokio::test]
    async fn test_missing_seed_yields_empty() {
        let (g, _) = chain();
        let r = retriever(&g);
        assert!(r.traverse(&[], 2, 10).await.unwrap().is_empty());
        let frags = r.traverse(&[Seed::Value("Nokia".into()), Seed::Label("Phone".into())], 2, 10).await.unwrap();
        assert!(frags.is_empty());
    }

    #[tokio::test]
    async fn test_traverse_from_seed_entities() {
        let (g, ids) = chain();
        let r = retriever(&g);
        let frags = r.traverse(&[Seed::Value("İstanbul".into())], 1, 10).await.unwrap();
        let keys: Vec<FragmentKey> = frags.iter().map(ContextFragment::key).collect();
        assert_eq!(keys[0], FragmentKey::Node(ids[4]));
        assert!(keys.contains(&FragmentKey::Node(ids[3])));
        assert_eq!(frags.len(), 3);
    }

    #[tokio::test]
    async fn test_offline_graph_is_an_error() {
        let (g, ids) = chain();
        let r = retriever(&g);
        let brand = g.node(ids[0]).await.unwrap().unwrap();
        g.set_offline(true);
        assert!(r.expand(&[brand], 2, 10).await.is_err());
    }
}
