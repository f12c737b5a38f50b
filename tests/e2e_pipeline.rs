//! End-to-end tests for the question -> answer pipeline.
//!
//! Each test runs the whole chain against `MemoryGraph` with scripted
//! generators: cache -> retrieval -> synthesis -> validation -> execution
//! -> composition -> cache write.

use std::sync::Arc;
use std::time::Duration;

use neo4j_rag::cache::MemoryCacheStore;
use neo4j_rag::embedding::HashingEmbedder;
use neo4j_rag::generation::ScriptedGenerator;
use neo4j_rag::storage::MemoryGraph;
use neo4j_rag::{Error, GraphRag, RagConfig, props};
use pretty_assertions::assert_eq;

const MSI_BOARDS: &str = "MATCH (p:Product)-[:BRAND]->(b:Brand {name: 'MSI'}) WHERE p.category = 'Anakart' RETURN p.name AS name ORDER BY name";

/// Brands, products and a shop, the way a small hardware catalogue looks.
fn catalogue() -> MemoryGraph {
    let g = MemoryGraph::new();
    let msi = g.add_node(["Brand"], props([("name", "MSI")]));
    let asus = g.add_node(["Brand"], props([("name", "ASUS")]));
    let shop = g.add_node(["Store"], props([("name", "Karaköy Bilgisayar")]));
    for (name, category, brand) in [
        ("B650 Tomahawk", "Anakart", msi),
        ("Z790 Edge", "Anakart", msi),
        ("RTX 4070 Ventus", "Ekran Kartı", msi),
        ("ROG Strix B650", "Anakart", asus),
    ] {
        let p = g.add_node(["Product"], props([("name", name), ("category", category)]));
        g.add_relationship(p, brand, "BRAND", props::<&str, i64>([])).unwrap();
        g.add_relationship(shop, p, "SELLS", props([("price", 7999)])).unwrap();
    }
    g
}

fn envelope(query: &str, description: &str) -> String {
    serde_json::json!({ "cypher": query, "description": description }).to_string()
}

/// Stage logs show up with `cargo test -- --nocapture`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().with_max_level(tracing::Level::DEBUG).try_init();
}

async fn pipeline(llm: &ScriptedGenerator) -> GraphRag<MemoryGraph> {
    init_tracing();
    let rag = GraphRag::builder(catalogue(), RagConfig::default())
        .generator(Arc::new(llm.clone()))
        .embedder(Arc::new(HashingEmbedder::new(256)))
        .build()
        .unwrap();
    rag.refresh_schema().await.unwrap();
    rag
}

// ============================================================================
// 1. A catalogue question answered from the graph
// ============================================================================

#[tokio::test]
async fn test_brand_and_category_question() {
    let llm = ScriptedGenerator::new("primary")
        .when("RULES:", envelope(&format!("```cypher\n{MSI_BOARDS};\n```"), "MSI marka anakartlar"))
        .when("TASK:", "MSI anakartları:\n1. B650 Tomahawk\n2. Z790 Edge");
    let rag = pipeline(&llm).await;

    let answer = rag.ask("MSI markasına ait anakart ürünlerini listele").await.unwrap();
    assert_eq!(answer.query, MSI_BOARDS);
    assert_eq!(answer.description, "MSI marka anakartlar");
    assert_eq!(answer.answer, "MSI anakartları:\n1. B650 Tomahawk\n2. Z790 Edge");
    assert!(!answer.cached);

    let prompts = llm.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[0].contains("- Product (4) {category, name}"));
    assert!(prompts[0].contains("(:Brand {name: MSI})"));
    assert!(prompts[0].contains("DETECTED ENTITIES:") && prompts[0].contains("MSI"));
    assert!(prompts[1].contains("RESULTS (2 rows):\n1. B650 Tomahawk\n2. Z790 Edge"));
    assert!(!prompts[1].contains("ROG Strix"));
}

// ============================================================================
// 2. A destructive query never reaches the driver
// ============================================================================

#[tokio::test]
async fn test_write_query_is_rejected_before_execution() {
    let llm = ScriptedGenerator::new("primary").reply("MATCH (n) DETACH DELETE n RETURN count(n)");
    let rag = pipeline(&llm).await;
    let runs = rag.driver().run_count();

    let err = rag.ask("Delete everything").await.unwrap_err();
    assert!(matches!(err, Error::ValidationRejected(_)), "got {err:?}");
    assert_eq!(err.code(), "validation_rejected");
    assert_eq!(rag.driver().run_count(), runs);
    assert_eq!(rag.driver().node_count(), 7);
    assert_eq!(rag.health().await.cache_size, Some(0));

    // Nothing was cached, so the generator is asked again.
    assert!(rag.ask("Delete everything").await.is_err());
    assert_eq!(llm.calls(), 2);
}

// ============================================================================
// 3. A failed refresh keeps the previous snapshot
// ============================================================================

#[tokio::test]
async fn test_offline_refresh_keeps_previous_schema() {
    let llm = ScriptedGenerator::new("primary").when("RULES:", "MATCH (b:Brand) RETURN b.name AS name").reply("MSI, ASUS");
    let rag = pipeline(&llm).await;
    assert!(rag.health().await.schema_fresh);

    rag.driver().set_offline(true);
    assert!(matches!(rag.refresh_schema().await, Err(Error::SchemaUnavailable(_))));
    assert_eq!(rag.schema().generation, 1);
    assert!(rag.schema().has_label("Brand"));

    let health = rag.health().await;
    assert!(!health.schema_fresh);
    assert!(health.last_refresh_error.is_some());
    assert_eq!(health.backends_reachable.get("graph"), Some(&false));
    assert_eq!(health.total_nodes, 7);

    rag.driver().set_offline(false);
    let answer = rag.ask("Hangi markalar var?").await.unwrap();
    assert_eq!(answer.answer, "MSI, ASUS");
    assert!(llm.prompts()[0].contains("- Brand (2) {name}"));
}

// ============================================================================
// 4. Repeated questions are served from the cache
// ============================================================================

#[tokio::test]
async fn test_second_ask_hits_cache() {
    let llm = ScriptedGenerator::new("primary")
        .when("RULES:", envelope("MATCH (p:Product) RETURN count(p) AS total", "Ürün sayısı"))
        .when("TASK:", "Toplam 4 ürün var.");
    let rag = pipeline(&llm).await;

    let first = rag.ask("Kaç ürün var?").await.unwrap();
    let calls = llm.calls();
    let runs = rag.driver().run_count();

    // Case and spacing differences map to the same entry.
    let second = rag.ask("  kaç ÜRÜN   var? ").await.unwrap();
    assert!(second.cached);
    assert_eq!(second.answer, first.answer);
    assert_eq!(second.query, first.query);
    assert_eq!(llm.calls(), calls);
    assert_eq!(rag.driver().run_count(), runs);

    assert_eq!(rag.clear_cache().await.unwrap().cleared, 1);
    assert!(!rag.ask("Kaç ürün var?").await.unwrap().cached);
}

// ============================================================================
// 5. Degraded dependencies
// ============================================================================

#[tokio::test]
async fn test_secondary_backend_takes_over() {
    let primary = ScriptedGenerator::new("primary").fail("quota exhausted");
    let secondary = ScriptedGenerator::new("secondary")
        .when("RULES:", "MATCH (s:Store) RETURN s.name AS name")
        .reply("Karaköy Bilgisayar");
    let rag = GraphRag::builder(catalogue(), RagConfig::default())
        .generator(Arc::new(primary.clone()))
        .generator(Arc::new(secondary.clone()))
        .build()
        .unwrap();

    let answer = rag.ask("Which stores are there?").await.unwrap();
    assert_eq!(answer.answer, "Karaköy Bilgisayar");
    assert_eq!(primary.calls(), 2);
    assert_eq!(secondary.calls(), 2);

    let health = rag.health().await;
    assert_eq!(health.backends_reachable.get("primary"), Some(&false));
    assert_eq!(health.backends_reachable.get("secondary"), Some(&true));
}

#[tokio::test]
async fn test_unavailable_cache_does_not_block_answers() {
    let store = Arc::new(MemoryCacheStore::new(0));
    store.set_unavailable(true);
    let llm = ScriptedGenerator::new("primary").when("RULES:", "MATCH (b:Brand) RETURN count(b)").reply("2");
    let rag = GraphRag::builder(catalogue(), RagConfig::default())
        .generator(Arc::new(llm.clone()))
        .cache_store(store)
        .build()
        .unwrap();

    assert_eq!(rag.ask("How many brands?").await.unwrap().answer, "2");
    assert!(!rag.ask("How many brands?").await.unwrap().cached);
    assert_eq!(rag.health().await.cache_size, None);
}

#[tokio::test]
async fn test_composer_falls_back_to_rows() {
    let llm = ScriptedGenerator::new("primary")
        .when("RULES:", "MATCH (p:Product {category: 'Anakart'}) RETURN p.name AS name ORDER BY name")
        .fail_when("TASK:", "overloaded");
    let rag = pipeline(&llm).await;

    let answer = rag.ask("Anakartlar?").await.unwrap();
    assert_eq!(answer.answer, "Total 3 results:\n1. B650 Tomahawk\n2. ROG Strix B650\n3. Z790 Edge");
    assert_eq!(answer.description, "Cypher query answering: Anakartlar?");
}

#[tokio::test]
async fn test_request_timeout() {
    let llm = ScriptedGenerator::new("primary").reply("MATCH (n) RETURN n");
    let mut config = RagConfig::default();
    config.limits.request_timeout = Duration::from_millis(200);
    let rag = GraphRag::builder(catalogue(), config).generator(Arc::new(llm)).build().unwrap();
    rag.refresh_schema().await.unwrap();

    rag.driver().set_latency(Duration::from_secs(2));
    let err = rag.ask("Everything?").await.unwrap_err();
    assert!(matches!(err, Error::RequestTimeout(200)), "got {err:?}");
    assert!(err.is_transient());
}
