//! # Graph Driver Trait
//!
//! This is THE contract between the pipeline and a graph database.
//! Every read the pipeline needs is defined here; nothing in it writes.
//!
//! ## Implementations
//!
//! | Driver | Module | Description |
//! |--------|--------|-------------|
//! | `MemoryGraph` | `memory` | In-process graph for tests and embedding |
//! | `HttpGraphDriver` | `http` | External Neo4j via the HTTP transactional API |
//! | `RetryingDriver` | `retry` | Bounded retry wrapper around any driver |
//!
//! Only `run` and `ping` are required. The discovery and traversal helpers
//! default to Cypher issued through `run` in read-only mode; in-process
//! drivers override them with direct lookups.

pub mod memory;
pub mod retry;
#[cfg(feature = "http")]
pub mod http;

use async_trait::async_trait;

use crate::execution::{QueryResult, ResultRow};
use crate::model::*;
use crate::tx::TxMode;
use crate::{Error, Result};

pub use memory::MemoryGraph;
pub use retry::{RetryPolicy, RetryingDriver};
#[cfg(feature = "http")]
pub use http::HttpGraphDriver;

// ============================================================================
// Discovery DTOs
// ============================================================================

/// One sampled relationship with the primary labels of its endpoints.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipSample {
    pub from_label: Option<String>,
    pub relationship: Relationship,
    pub to_label: Option<String>,
}

// ============================================================================
// GraphDriver Trait
// ============================================================================

/// The graph database contract.
#[async_trait]
pub trait GraphDriver: Send + Sync + 'static {
    /// Execute a Cypher statement.
    async fn run(&self, query: &str, params: PropertyMap, mode: TxMode) -> Result<QueryResult>;

    /// Cheap reachability check.
    async fn ping(&self) -> Result<()>;

    // ========================================================================
    // Schema introspection
    // ========================================================================

    /// All distinct labels in the graph.
    async fn labels(&self) -> Result<Vec<String>> {
        let result = self.read("CALL db.labels() YIELD label RETURN label ORDER BY label", PropertyMap::new()).await?;
        string_column(&result, "label")
    }

    /// All distinct relationship types in the graph.
    async fn relationship_types(&self) -> Result<Vec<String>> {
        let result = self
            .read(
                "CALL db.relationshipTypes() YIELD relationshipType RETURN relationshipType ORDER BY relationshipType",
                PropertyMap::new(),
            )
            .await?;
        string_column(&result, "relationshipType")
    }

    /// Number of nodes carrying `label`.
    async fn count_nodes(&self, label: &str) -> Result<u64> {
        let query = format!("MATCH (n:{}) RETURN count(n) AS count", quote_name(label));
        count_of(&self.read(&query, PropertyMap::new()).await?)
    }

    /// Number of relationships of `rel_type`.
    async fn count_relationships(&self, rel_type: &str) -> Result<u64> {
        let query = format!("MATCH ()-[r:{}]->() RETURN count(r) AS count", quote_name(rel_type));
        count_of(&self.read(&query, PropertyMap::new()).await?)
    }

    /// Up to `limit` nodes of `label`, used to observe property keys and
    /// sample values.
    async fn sample_node_properties(&self, label: &str, limit: usize) -> Result<Vec<Node>> {
        let query = format!(
            "MATCH (n:{}) RETURN {NODE_COLUMNS} ORDER BY id LIMIT $limit",
            quote_name(label)
        );
        let result = self.read(&query, props([("limit", limit)])).await?;
        result.rows.iter().map(node_from_row).collect()
    }

    /// Up to `limit` relationships of `rel_type` with their endpoint labels.
    async fn sample_relationship_properties(&self, rel_type: &str, limit: usize) -> Result<Vec<RelationshipSample>> {
        let query = format!(
            "MATCH (a)-[r:{}]->(b) \
             RETURN id(r) AS rid, id(a) AS src, id(b) AS dst, type(r) AS type, properties(r) AS rprops, \
             head(labels(a)) AS from_label, head(labels(b)) AS to_label \
             ORDER BY rid LIMIT $limit",
            quote_name(rel_type)
        );
        let result = self.read(&query, props([("limit", limit)])).await?;
        result
            .rows
            .iter()
            .map(|row| {
                Ok(RelationshipSample {
                    from_label: row.values.get("from_label").and_then(Value::as_str).map(str::to_string),
                    relationship: relationship_from_row(row)?,
                    to_label: row.values.get("to_label").and_then(Value::as_str).map(str::to_string),
                })
            })
            .collect()
    }

    // ========================================================================
    // Retrieval helpers
    // ========================================================================

    /// Nodes whose property text matches one of `terms`, case-insensitively,
    /// most relevant first. Terms travel as parameters, never as query text.
    ///
    /// | Match | Relevance |
    /// |-------|-----------|
    /// | property contains the term | [`MATCH_CONTAINS`] |
    /// | term contains the property (`Anakartlar` vs `Anakart`) | [`MATCH_CONTAINED`] |
    async fn find_nodes_matching(&self, terms: &[String], limit: usize) -> Result<Vec<Node>> {
        if terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let query = format!(
            "MATCH (n) \
             WITH n, [k IN keys(n) | toLower(toString(n[k]))] AS texts, [t IN $terms | toLower(t)] AS needles \
             WITH n, CASE \
               WHEN any(x IN texts WHERE any(t IN needles WHERE x CONTAINS t)) THEN {MATCH_CONTAINS} \
               WHEN any(x IN texts WHERE size(x) >= $min_len AND any(t IN needles WHERE t CONTAINS x)) THEN {MATCH_CONTAINED} \
               ELSE 0 END AS relevance \
             WHERE relevance > 0 \
             RETURN {NODE_COLUMNS}, relevance ORDER BY relevance DESC, id LIMIT $limit"
        );
        let terms = Value::List(terms.iter().map(|t| Value::from(t.as_str())).collect());
        let params = props([
            ("terms", terms),
            ("min_len", Value::from(MIN_CONTAINED_LEN)),
            ("limit", Value::from(limit)),
        ]);
        let result = self.read(&query, params).await?;
        result.rows.iter().map(node_from_row).collect()
    }

    /// Fetch a node by id.
    async fn node(&self, id: NodeId) -> Result<Option<Node>> {
        let query = format!("MATCH (n) WHERE id(n) = $id RETURN {NODE_COLUMNS}");
        let result = self.read(&query, props([("id", id.0 as i64)])).await?;
        result.rows.first().map(node_from_row).transpose()
    }

    /// Relationships touching `id` (either direction) with the node at the
    /// other end, in relationship-id order.
    async fn neighbours(&self, id: NodeId) -> Result<Vec<(Relationship, Node)>> {
        let query = format!(
            "MATCH (a)-[r]-(n) WHERE id(a) = $id \
             RETURN id(r) AS rid, id(startNode(r)) AS src, id(endNode(r)) AS dst, type(r) AS type, \
             properties(r) AS rprops, {NODE_COLUMNS} ORDER BY rid"
        );
        let result = self.read(&query, props([("id", id.0 as i64)])).await?;
        result
            .rows
            .iter()
            .map(|row| Ok((relationship_from_row(row)?, node_from_row(row)?)))
            .collect()
    }

    /// Candidate nodes for semantic ranking, in id order.
    async fn searchable_nodes(&self, limit: usize) -> Result<Vec<Node>> {
        let query = format!("MATCH (n) RETURN {NODE_COLUMNS} ORDER BY id LIMIT $limit");
        let result = self.read(&query, props([("limit", limit)])).await?;
        result.rows.iter().map(node_from_row).collect()
    }

    /// Shorthand for a read-only `run`.
    async fn read(&self, query: &str, params: PropertyMap) -> Result<QueryResult> {
        self.run(query, params, TxMode::ReadOnly).await
    }
}

#[async_trait]
impl<D: GraphDriver + ?Sized> GraphDriver for std::sync::Arc<D> {
    async fn run(&self, query: &str, params: PropertyMap, mode: TxMode) -> Result<QueryResult> {
        (**self).run(query, params, mode).await
    }
    async fn ping(&self) -> Result<()> {
        (**self).ping().await
    }
    async fn labels(&self) -> Result<Vec<String>> {
        (**self).labels().await
    }
    async fn relationship_types(&self) -> Result<Vec<String>> {
        (**self).relationship_types().await
    }
    async fn count_nodes(&self, label: &str) -> Result<u64> {
        (**self).count_nodes(label).await
    }
    async fn count_relationships(&self, rel_type: &str) -> Result<u64> {
        (**self).count_relationships(rel_type).await
    }
    async fn sample_node_properties(&self, label: &str, limit: usize) -> Result<Vec<Node>> {
        (**self).sample_node_properties(label, limit).await
    }
    async fn sample_relationship_properties(&self, rel_type: &str, limit: usize) -> Result<Vec<RelationshipSample>> {
        (**self).sample_relationship_properties(rel_type, limit).await
    }
    async fn find_nodes_matching(&self, terms: &[String], limit: usize) -> Result<Vec<Node>> {
        (**self).find_nodes_matching(terms, limit).await
    }
    async fn node(&self, id: NodeId) -> Result<Option<Node>> {
        (**self).node(id).await
    }
    async fn neighbours(&self, id: NodeId) -> Result<Vec<(Relationship, Node)>> {
        (**self).neighbours(id).await
    }
    async fn searchable_nodes(&self, limit: usize) -> Result<Vec<Node>> {
        (**self).searchable_nodes(limit).await
    }
}

// ============================================================================
// Row decoding
// ============================================================================

/// Node columns shared by the default queries.
const NODE_COLUMNS: &str = "id(n) AS id, labels(n) AS labels, properties(n) AS props";

/// Relevance of a node whose property text contains a search term.
pub const MATCH_CONTAINS: i64 = 10;
/// Relevance of a node whose property text is contained in a search term.
pub const MATCH_CONTAINED: i64 = 5;
/// Shortest property text that may match by being contained in a term.
pub const MIN_CONTAINED_LEN: usize = 3;

/// Relevance of `text` against lowercased `needles`, 0 when nothing matches.
pub fn match_relevance(text: &str, needles: &[String]) -> i64 {
    let text = text.to_lowercase();
    if needles.iter().any(|n| text.contains(n.as_str())) {
        MATCH_CONTAINS
    } else if text.chars().count() >= MIN_CONTAINED_LEN && needles.iter().any(|n| n.contains(text.as_str())) {
        MATCH_CONTAINED
    } else {
        0
    }
}

/// Backtick-quote a label or type name read from the database.
fn quote_name(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn required<'r>(row: &'r ResultRow, key: &str) -> Result<&'r Value> {
    row.values.get(key).ok_or_else(|| Error::NotFound(format!("Column '{key}'")))
}

fn id_of(row: &ResultRow, key: &str) -> Result<u64> {
    let v = required(row, key)?;
    v.as_int()
        .and_then(|i| u64::try_from(i).ok())
        .ok_or_else(|| Error::TypeError { expected: "Integer id".into(), got: v.type_name().into() })
}

fn map_of(row: &ResultRow, key: &str) -> PropertyMap {
    match row.values.get(key) {
        Some(Value::Map(m)) => m.clone(),
        _ => PropertyMap::new(),
    }
}

/// Decode the `NODE_COLUMNS` projection.
pub(crate) fn node_from_row(row: &ResultRow) -> Result<Node> {
    let labels = match row.values.get("labels") {
        Some(Value::List(items)) => items.iter().filter_map(Value::as_str).map(str::to_string).collect(),
        _ => Vec::new(),
    };
    Ok(Node { id: NodeId(id_of(row, "id")?), labels, properties: map_of(row, "props") })
}

fn relationship_from_row(row: &ResultRow) -> Result<Relationship> {
    let rel_type = required(row, "type")?
        .as_str()
        .ok_or_else(|| Error::TypeError { expected: "String".into(), got: "non-string type".into() })?;
    let mut rel = Relationship::new(
        RelId(id_of(row, "rid")?),
        NodeId(id_of(row, "src")?),
        NodeId(id_of(row, "dst")?),
        rel_type,
    );
    rel.properties = map_of(row, "rprops");
    Ok(rel)
}

fn string_column(result: &QueryResult, column: &str) -> Result<Vec<String>> {
    result
        .rows
        .iter()
        .map(|row| {
            let v = required(row, column)?;
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| Error::TypeError { expected: "String".into(), got: v.type_name().into() })
        })
        .collect()
}

fn count_of(result: &QueryResult) -> Result<u64> {
    match result.rows.first() {
        Some(row) => id_of(row, "count"),
        None => Ok(0),
    }
}
