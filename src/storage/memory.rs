//! In-memory graph driver.
//!
//! The reference implementation of `GraphDriver`: a property graph held in
//! ordered maps behind one `RwLock`, queried through the read-only Cypher
//! dialect in `memory::eval`.
//!
//! ## Limitations
//!
//! - **Read-only queries**: `run` parses the read dialect only, whatever the
//!   `TxMode`. The graph is seeded through `add_node` / `add_relationship`.
//! - **No indexes beyond labels**: property lookups do a full scan.
//!
//! Use this driver for:
//! - Testing the pipeline end to end without a database
//! - Simulating an unreachable or slow database (`set_offline`, `set_latency`)

mod eval;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::trace;

use crate::execution::QueryResult;
use crate::model::*;
use crate::tx::TxMode;
use crate::{Error, Result};
use super::{GraphDriver, RelationshipSample, match_relevance};

// ============================================================================
// MemoryGraph
// ============================================================================

/// In-memory property graph. Cloning shares the same graph.
#[derive(Clone, Default)]
pub struct MemoryGraph {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    store: RwLock<GraphStore>,
    offline: AtomicBool,
    latency_ms: AtomicU64,
    runs: AtomicUsize,
    label_scans: AtomicUsize,
}

/// Graph contents. Ordered maps keep every scan deterministic.
#[derive(Debug, Default)]
pub(crate) struct GraphStore {
    nodes: BTreeMap<NodeId, Node>,
    relationships: BTreeMap<RelId, Relationship>,
    /// node_id → relationship ids touching it, ascending
    adjacency: BTreeMap<NodeId, Vec<RelId>>,
    /// label → node ids (poor man's label index)
    label_index: BTreeMap<String, BTreeSet<NodeId>>,
    next_node_id: u64,
    next_rel_id: u64,
}

impl GraphStore {
    pub(crate) fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub(crate) fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub(crate) fn nodes_with_label<'s>(&'s self, label: &str) -> impl Iterator<Item = &'s Node> + use<'s> {
        self.label_index
            .get(label)
            .into_iter()
            .flatten()
            .filter_map(move |id| self.nodes.get(id))
    }

    /// Relationships touching `id`, in id order.
    pub(crate) fn relationships_of<'s>(&'s self, id: NodeId) -> impl Iterator<Item = &'s Relationship> + use<'s> {
        self.adjacency
            .get(&id)
            .into_iter()
            .flatten()
            .filter_map(move |rid| self.relationships.get(rid))
    }
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Seeding
    // ========================================================================

    /// Add a node and return its id. Ids start at 1 and increase.
    pub fn add_node<L, S>(&self, labels: L, properties: PropertyMap) -> NodeId
    where
        L: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut store = self.inner.store.write();
        store.next_node_id += 1;
        let id = NodeId(store.next_node_id);
        let node = Node::new(id).with_labels(labels);
        let node = Node { properties, ..node };
        for label in &node.labels {
            store.label_index.entry(label.clone()).or_default().insert(id);
        }
        store.adjacency.insert(id, Vec::new());
        store.nodes.insert(id, node);
        id
    }

    /// Add a directed relationship between two existing nodes.
    pub fn add_relationship(
        &self,
        src: NodeId,
        dst: NodeId,
        rel_type: &str,
        properties: PropertyMap,
    ) -> Result<RelId> {
        let mut store = self.inner.store.write();
        for endpoint in [src, dst] {
            if !store.nodes.contains_key(&endpoint) {
                return Err(Error::NotFound(format!("Node {endpoint}")));
            }
        }
        store.next_rel_id += 1;
        let id = RelId(store.next_rel_id);
        let mut rel = Relationship::new(id, src, dst, rel_type);
        rel.properties = properties;
        store.relationships.insert(id, rel);
        store.adjacency.entry(src).or_default().push(id);
        if dst != src {
            store.adjacency.entry(dst).or_default().push(id);
        }
        Ok(id)
    }

    pub fn node_count(&self) -> usize {
        self.inner.store.read().nodes.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.inner.store.read().relationships.len()
    }

    // ========================================================================
    // Fault injection and observation
    // ========================================================================

    /// While offline every call fails as if the database were unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Artificial delay applied to every call.
    pub fn set_latency(&self, latency: Duration) {
        self.inner.latency_ms.store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of `run` calls served (including failed ones).
    pub fn run_count(&self) -> usize {
        self.inner.runs.load(Ordering::SeqCst)
    }

    /// Number of `labels()` calls, i.e. schema discovery passes started.
    pub fn label_scans(&self) -> usize {
        self.inner.label_scans.load(Ordering::SeqCst)
    }

    async fn gate(&self) -> Result<()> {
        let latency = self.inner.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(Error::Unavailable("memory graph is offline".into()));
        }
        Ok(())
    }
}

// ============================================================================
// GraphDriver impl
// ============================================================================

#[async_trait]
impl GraphDriver for MemoryGraph {
    async fn run(&self, query: &str, params: PropertyMap, mode: TxMode) -> Result<QueryResult> {
        self.inner.runs.fetch_add(1, Ordering::SeqCst);
        self.gate().await?;
        trace!(?mode, query, "memory graph run");
        let ast = crate::cypher::parse(query)?;
        let store = self.inner.store.read();
        eval::evaluate(&store, &ast, &params)
    }

    async fn ping(&self) -> Result<()> {
        self.gate().await
    }

    async fn labels(&self) -> Result<Vec<String>> {
        self.inner.label_scans.fetch_add(1, Ordering::SeqCst);
        self.gate().await?;
        let store = self.inner.store.read();
        Ok(store
            .label_index
            .iter()
            .filter(|(_, ids)| !ids.is_empty())
            .map(|(label, _)| label.clone())
            .collect())
    }

    async fn relationship_types(&self) -> Result<Vec<String>> {
        self.gate().await?;
        let store = self.inner.store.read();
        let types: BTreeSet<&String> = store.relationships.values().map(|r| &r.rel_type).collect();
        Ok(types.into_iter().cloned().collect())
    }

    async fn count_nodes(&self, label: &str) -> Result<u64> {
        self.gate().await?;
        Ok(self.inner.store.read().label_index.get(label).map_or(0, |ids| ids.len() as u64))
    }

    async fn count_relationships(&self, rel_type: &str) -> Result<u64> {
        self.gate().await?;
        let store = self.inner.store.read();
        Ok(store.relationships.values().filter(|r| r.rel_type == rel_type).count() as u64)
    }

    async fn sample_node_properties(&self, label: &str, limit: usize) -> Result<Vec<Node>> {
        self.gate().await?;
        let store = self.inner.store.read();
        Ok(store.nodes_with_label(label).take(limit).cloned().collect())
    }

    async fn sample_relationship_properties(&self, rel_type: &str, limit: usize) -> Result<Vec<RelationshipSample>> {
        self.gate().await?;
        let store = self.inner.store.read();
        let label_of = |id: NodeId| store.node(id).and_then(Node::primary_label).map(str::to_string);
        Ok(store
            .relationships
            .values()
            .filter(|r| r.rel_type == rel_type)
            .take(limit)
            .map(|r| RelationshipSample {
                from_label: label_of(r.src),
                relationship: r.clone(),
                to_label: label_of(r.dst),
            })
            .collect())
    }

    async fn find_nodes_matching(&self, terms: &[String], limit: usize) -> Result<Vec<Node>> {
        self.gate().await?;
        let needles: Vec<String> = terms.iter().map(|t| t.to_lowercase()).filter(|t| !t.is_empty()).collect();
        if needles.is_empty() {
            return Ok(Vec::new());
        }
        let store = self.inner.store.read();
        let mut ranked: Vec<(i64, &Node)> = store
            .nodes()
            .filter_map(|node| {
                let relevance = node.properties.values().map(|v| match_relevance(&v.render(), &needles)).max()?;
                (relevance > 0).then_some((relevance, node))
            })
            .collect();
        ranked.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.id.cmp(&b.1.id)));
        Ok(ranked.into_iter().take(limit).map(|(_, node)| node.clone()).collect())
    }

    async fn node(&self, id: NodeId) -> Result<Option<Node>> {
        self.gate().await?;
        Ok(self.inner.store.read().node(id).cloned())
    }

    async fn neighbours(&self, id: NodeId) -> Result<Vec<(Relationship, Node)>> {
        self.gate().await?;
        let store = self.inner.store.read();
        Ok(store
            .relationships_of(id)
            .filter_map(|rel| {
                let other = rel.other_node(id)?;
                Some((rel.clone(), store.node(other)?.clone()))
            })
            .collect())
    }

    async fn searchable_nodes(&self, limit: usize) -> Result<Vec<Node>> {
        self.gate().await?;
        Ok(self.inner.store.read().nodes().take(limit).cloned().collect())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> (MemoryGraph, NodeId, NodeId) {
        let g = MemoryGraph::new();
        let msi = g.add_node(["Brand"], props([("name", "MSI")]));
        let board = g.add_node(["Product"], props([("name", "B650 Tomahawk"), ("category", "Anakart")]));
        g.add_relationship(board, msi, "BRAND", PropertyMap::new()).unwrap();
        (g, msi, board)
    }

    #[tokio::test]
    async fn test_seed_and_lookup() {
        let (g, msi, _) = catalog();
        let node = g.node(msi).await.unwrap().unwrap();
        assert_eq!(node.display_name(), "MSI");
        assert_eq!(g.node_count(), 2);
        assert_eq!(g.relationship_count(), 1);
    }

    #[tokio::test]
    async fn test_relationship_requires_endpoints() {
        let g = MemoryGraph::new();
        let a = g.add_node(["A"], PropertyMap::new());
        assert!(matches!(
            g.add_relationship(a, NodeId(99), "X", PropertyMap::new()),
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_neighbours_both_directions() {
        let (g, msi, board) = catalog();
        let from_brand = g.neighbours(msi).await.unwrap();
        assert_eq!(from_brand.len(), 1);
        assert_eq!(from_brand[0].1.id, board);
        let from_board = g.neighbours(board).await.unwrap();
        assert_eq!(from_board[0].1.id, msi);
    }

    #[tokio::test]
    async fn test_introspection() {
        let (g, _, _) = catalog();
        assert_eq!(g.labels().await.unwrap(), vec!["Brand", "Product"]);
        assert_eq!(g.relationship_types().await.unwrap(), vec!["BRAND"]);
        assert_eq!(g.count_nodes("Product").await.unwrap(), 1);
        assert_eq!(g.count_relationships("BRAND").await.unwrap(), 1);
        let samples = g.sample_relationship_properties("BRAND", 5).await.unwrap();
        assert_eq!(samples[0].from_label.as_deref(), Some("Product"));
        assert_eq!(samples[0].to_label.as_deref(), Some("Brand"));
        assert_eq!(g.label_scans(), 1);
    }

    #[tokio::test]
    async fn test_find_nodes_matching_is_case_insensitive() {
        let (g, msi, board) = catalog();
        let found = g.find_nodes_matching(&["msi".into(), "ANAKART".into()], 10).await.unwrap();
        let ids: Vec<_> = found.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![msi, board]);
    }

    #[tokio::test]
    async fn test_find_nodes_matching_suffixed_terms_rank_below_direct_hits() {
        let (g, _, board) = catalog();
        let tomahawk = g.add_node(["Product"], props([("name", "Anakartlar Tomahawk")]));

        let found = g.find_nodes_matching(&["Anakartlar".into()], 10).await.unwrap();
        let ids: Vec<_> = found.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![tomahawk, board]);

        let top = g.find_nodes_matching(&["Anakartlar".into()], 1).await.unwrap();
        assert_eq!(top[0].id, tomahawk);
        assert!(g.find_nodes_matching(&["xmsix".into()], 10).await.unwrap().iter().any(|n| n.display_name() == "MSI"));
        // Too short to be matched by containment in a term.
        let short = g.add_node(["Brand"], props([("name", "ab")]));
        assert!(g.find_nodes_matching(&["abcde".into()], 10).await.unwrap().iter().all(|n| n.id != short));
    }

    #[tokio::test]
    async fn test_offline_fails_every_call() {
        let (g, msi, _) = catalog();
        g.set_offline(true);
        assert!(matches!(g.ping().await, Err(Error::Unavailable(_))));
        assert!(g.node(msi).await.is_err());
        assert!(g.run("MATCH (n) RETURN n", PropertyMap::new(), TxMode::ReadOnly).await.is_err());
        g.set_offline(false);
        assert!(g.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_run_parses_read_dialect_only() {
        let (g, _, _) = catalog();
        let err = g
            .run("MATCH (n) DETACH DELETE n", PropertyMap::new(), TxMode::ReadWrite)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SyntaxError { .. }));
        assert_eq!(g.node_count(), 2);
    }
}
