//! Hybrid retrieval: structural and semantic lists fused into one ranking.
//!
//! ```text
//! score = (structural_weight * structural + semantic_weight * semantic)
//!         / (structural_weight + semantic_weight)
//! ```
//!
//! Both inputs lie in `[0, 1]`, so the fused score does too. A fragment
//! present in only one list contributes 0 for the other.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::RetrievalConfig;
use crate::embedding::{EmbeddingService, EmbeddingVector};
use crate::limits::OutboundLimiter;
use crate::model::*;
use crate::model::fragment::clamp_unit;
use crate::storage::GraphDriver;
use crate::{Error, Result};
use super::{GraphContextRetriever, Seed, extract_seeds};

/// Outcome of one retrieval.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Retrieval {
    pub seeds: Vec<Seed>,
    /// Best first.
    pub fragments: Vec<ContextFragment>,
    /// Stages that failed and were skipped, as reason codes.
    pub degraded: Vec<&'static str>,
}

pub struct HybridRetriever<D: GraphDriver> {
    driver: Arc<D>,
    graph: GraphContextRetriever<D>,
    embeddings: Option<EmbeddingService>,
    limiter: OutboundLimiter,
    call_timeout: Duration,
    config: RetrievalConfig,
    /// Node vectors keyed by node text, so unchanged nodes are embedded once.
    memo: RwLock<HashMap<String, EmbeddingVector>>,
}

impl<D: GraphDriver> HybridRetriever<D> {
    pub fn new(
        driver: Arc<D>,
        embeddings: Option<EmbeddingService>,
        limiter: OutboundLimiter,
        call_timeout: Duration,
        config: RetrievalConfig,
    ) -> Self {
        let graph = GraphContextRetriever::new(driver.clone(), limiter.clone(), call_timeout, config.hop_decay);
        Self { driver, graph, embeddings, limiter, call_timeout, config, memo: RwLock::new(HashMap::new()) }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Ranked context for `question` against `schema`.
    ///
    /// Never fails: a stage whose backend is down is logged, recorded in
    /// `degraded` and skipped.
    pub async fn retrieve(&self, question: &str, schema: &SchemaSnapshot) -> Retrieval {
        let cfg = &self.config;
        let seeds = extract_seeds(question, schema, cfg.max_seed_entities);
        let mut degraded = Vec::new();

        let structural = match self.graph.traverse(&seeds, cfg.max_hops, cfg.max_fragments).await {
            Ok(fragments) => fragments,
            Err(err) => {
                warn!(stage = "retrieve", code = err.code(), error = %err, "structural retrieval skipped");
                degraded.push(err.code());
                Vec::new()
            }
        };

        let semantic = match self.semantic(question).await {
            Ok(fragments) => fragments,
            Err(err) => {
                warn!(stage = "retrieve", code = err.code(), error = %err, "semantic retrieval skipped");
                degraded.push(err.code());
                Vec::new()
            }
        };

        debug!(
            stage = "retrieve",
            seeds = seeds.len(),
            structural = structural.len(),
            semantic = semantic.len(),
            "retrieval lists ready"
        );
        let fragments = fuse(structural, semantic, cfg);
        Retrieval { seeds, fragments, degraded }
    }

    /// Nodes most similar to `question`, at most `semantic_top_k`, none
    /// below `min_semantic_score`.
    pub async fn semantic(&self, question: &str) -> Result<Vec<ContextFragment>> {
        let Some(service) = &self.embeddings else {
            return Ok(Vec::new());
        };
        let cfg = &self.config;
        if cfg.semantic_top_k == 0 {
            return Ok(Vec::new());
        }
        let query = service.embed("question", question).await?;

        let ms = self.call_timeout.as_millis() as u64;
        let candidates = self
            .limiter
            .call(self.call_timeout, || Error::RequestTimeout(ms), self.driver.searchable_nodes(cfg.semantic_candidates))
            .await?;

        let mut scored: Vec<(Node, f64)> = Vec::new();
        for node in candidates {
            let text = node.text_summary();
            if text.is_empty() {
                continue;
            }
            let vector = self.node_vector(service, &node, text).await?;
            let similarity = clamp_unit(service.similarity(&query, &vector)?);
            if similarity >= cfg.min_semantic_score {
                scored.push((node, similarity));
            }
        }
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.id.cmp(&b.0.id)));
        scored.truncate(cfg.semantic_top_k);
        Ok(scored
            .into_iter()
            .enumerate()
            .map(|(i, (node, similarity))| ContextFragment::semantic(node, similarity, i))
            .collect())
    }

    async fn node_vector(&self, service: &EmbeddingService, node: &Node, text: String) -> Result<EmbeddingVector> {
        if let Some(v) = self.memo.read().get(&text) {
            return Ok(v.clone());
        }
        let vector = service.embed(format!("node:{}", node.id), &text).await?;
        let mut memo = self.memo.write();
        if memo.len() >= self.config.semantic_candidates.saturating_mul(4).max(64) {
            memo.clear();
        }
        memo.insert(text, vector.clone());
        Ok(vector)
    }
}

/// Merge the two ranked lists and apply the weighted score.
///
/// Discovery order is structural list first, then semantic-only entries.
/// A fragment in both lists keeps its structural evidence and hops and takes
/// the semantic score from the semantic list.
pub fn fuse(structural: Vec<ContextFragment>, semantic: Vec<ContextFragment>, cfg: &RetrievalConfig) -> Vec<ContextFragment> {
    let mut merged: Vec<ContextFragment> = Vec::with_capacity(structural.len() + semantic.len());
    let mut index: BTreeMap<FragmentKey, usize> = BTreeMap::new();

    for fragment in structural.into_iter().chain(semantic) {
        let key = fragment.key();
        match index.get(&key) {
            Some(&at) => {
                let existing = &mut merged[at];
                existing.structural_score = existing.structural_score.max(fragment.structural_score);
                existing.semantic_score = existing.semantic_score.max(fragment.semantic_score);
                if existing.hops.is_none() {
                    existing.hops = fragment.hops;
                }
                existing.source = existing.source.merge(fragment.source);
            }
            None => {
                index.insert(key, merged.len());
                merged.push(fragment);
            }
        }
    }

    let total = cfg.structural_weight + cfg.semantic_weight;
    for (discovery, fragment) in merged.iter_mut().enumerate() {
        fragment.discovery = discovery;
        fragment.score = if total > 0.0 {
            clamp_unit((cfg.structural_weight * fragment.structural_score + cfg.semantic_weight * fragment.semantic_score) / total)
        } else {
            0.0
        };
    }
    merged.sort_by(ContextFragment::rank_cmp);
    merged.truncate(cfg.max_fragments);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{Embedder, HashingEmbedder};
    use crate::storage::MemoryGraph;
    use async_trait::async_trait;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn node(id: u64) -> Node {
        Node::new(NodeId(id)).with_labels(["Product"])
    }

    fn cfg() -> RetrievalConfig {
        RetrievalConfig { structural_weight: 0.6, semantic_weight: 0.4, max_fragments: 10, ..Default::default() }
    }

    #[test]
    fn test_fuse_weights_and_merges() {
        let s = vec![
            ContextFragment::structural(Evidence::Node(node(1)), 0, 1.0, 0),
            ContextFragment::structural(Evidence::Node(node(2)), 1, 0.5, 1),
        ];
        let e = vec![ContextFragment::semantic(node(2), 0.9, 0), ContextFragment::semantic(node(3), 0.8, 1)];
        let out = fuse(s, e, &cfg());

        let keys: Vec<_> = out.iter().map(ContextFragment::key).collect();
        assert_eq!(keys, vec![FragmentKey::Node(NodeId(2)), FragmentKey::Node(NodeId(1)), FragmentKey::Node(NodeId(3))]);
        let both = &out[0];
        assert_eq!(both.source, FragmentSource::Both);
        assert_eq!(both.hops, Some(1));
        assert!((both.score - (0.6 * 0.5 + 0.4 * 0.9)).abs() < 1e-9);
        assert!((out[1].score - 0.6).abs() < 1e-9);
        assert!((out[2].score - 0.32).abs() < 1e-9);
        assert_eq!(out[2].hops, None);
    }

    #[test]
    fn test_fuse_ties_prefer_fewer_hops_then_discovery() {
        let s = vec![
            ContextFragment::structural(Evidence::Node(node(1)), 2, 0.5, 0),
            ContextFragment::structural(Evidence::Node(node(2)), 1, 0.5, 1),
            ContextFragment::structural(Evidence::Node(node(3)), 1, 0.5, 2),
        ];
        let out = fuse(s, Vec::new(), &cfg());
        let keys: Vec<_> = out.iter().map(ContextFragment::key).collect();
        assert_eq!(keys, vec![FragmentKey::Node(NodeId(2)), FragmentKey::Node(NodeId(3)), FragmentKey::Node(NodeId(1))]);
    }

    #[test]
    fn test_fuse_truncates_and_handles_zero_weights() {
        let s: Vec<_> = (0..20).map(|i| ContextFragment::structural(Evidence::Node(node(i)), 1, 0.5, i as usize)).collect();
        assert_eq!(fuse(s.clone(), Vec::new(), &cfg()).len(), 10);
        let zero = RetrievalConfig { structural_weight: 0.0, semantic_weight: 0.0, ..cfg() };
        assert!(fuse(s, Vec::new(), &zero).iter().all(|f| f.score == 0.0));
    }

    struct Down;

    #[async_trait]
    impl Embedder for Down {
        fn name(&self) -> &str {
            "down"
        }
        fn dimension(&self) -> usize {
            8
        }
        async fn embed_text(&self, _text: &str) -> Result<Vec<f32>> {
            Err(Error::Unavailable("connection refused".into()))
        }
    }

    fn catalog() -> (MemoryGraph, SchemaSnapshot) {
        let g = MemoryGraph::new();
        let msi = g.add_node(["Brand"], props([("name", "MSI")]));
        let p = g.add_node(["Product"], props([("name", "B650 Tomahawk"), ("category", "Anakart")]));
        g.add_node(["Product"], props([("name", "G502"), ("category", "Mouse")]));
        g.add_relationship(p, msi, "BRAND", PropertyMap::new()).unwrap();
        let mut b = SchemaSnapshot::builder(1);
        b.label("Brand", 1).label("Product", 2).label_property("Brand", "name", Some("MSI".into()));
        (g, b.build(Utc::now()))
    }

    fn hybrid(g: &MemoryGraph, embedder: Option<Arc<dyn Embedder>>, config: RetrievalConfig) -> HybridRetriever<MemoryGraph> {
        let limiter = OutboundLimiter::new(4);
        let embeddings = embedder.map(|e| EmbeddingService::new(e, limiter.clone(), Duration::from_secs(1)));
        HybridRetriever::new(Arc::new(g.clone()), embeddings, limiter, Duration::from_secs(1), config)
    }

    #[tokio::test]
    async fn test_retrieve_is_deterministic_and_fused() {
        let (g, schema) = catalog();
        let config = RetrievalConfig { min_semantic_score: 0.1, ..Default::default() };
        let r = hybrid(&g, Some(Arc::new(HashingEmbedder::new(768))), config);
        let first = r.retrieve("MSI anakart ürünleri", &schema).await;
        let second = r.retrieve("MSI anakart ürünleri", &schema).await;
        assert_eq!(first, second);
        assert_eq!(first.seeds[0], Seed::Value("MSI".into()));
        assert!(first.degraded.is_empty());
        assert!(first.fragments.iter().any(|f| f.source == FragmentSource::Both));
        for pair in first.fragments.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn test_embedding_outage_degrades_to_structural() {
        let (g, schema) = catalog();
        let r = hybrid(&g, Some(Arc::new(Down)), RetrievalConfig::default());
        let out = r.retrieve("MSI anakart", &schema).await;
        assert_eq!(out.degraded, vec!["embedding_unavailable"]);
        assert!(!out.fragments.is_empty());
        assert!(out.fragments.iter().all(|f| f.source == FragmentSource::Structural));
    }

    #[tokio::test]
    async fn test_semantic_threshold_and_top_k() {
        let (g, _) = catalog();
        let config = RetrievalConfig { min_semantic_score: 0.0, semantic_top_k: 2, ..Default::default() };
        let r = hybrid(&g, Some(Arc::new(HashingEmbedder::new(768))), config);
        let out = r.semantic("Mouse G502").await.unwrap();
        assert_eq!(out.len(), 2);
        assert!(out[0].semantic_score >= out[1].semantic_score);
        assert_eq!(out[0].evidence, Evidence::Node(g.node(NodeId(3)).await.unwrap().unwrap()));

        let strict = hybrid(&g, Some(Arc::new(HashingEmbedder::new(768))), RetrievalConfig { min_semantic_score: 1.0, ..Default::default() });
        assert!(strict.semantic("nothing alike").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_embedder_means_structural_only() {
        let (g, schema) = catalog();
        let r = hybrid(&g, None, RetrievalConfig::default());
        let out = r.retrieve("MSI", &schema).await;
        assert!(out.degraded.is_empty());
        assert!(out.fragments.iter().all(|f| f.hops.is_some()));
    }
}
