//! # neo4j-rag: GraphRAG text-to-Cypher pipeline
//!
//! Turns natural-language questions into read-only Cypher, runs it against
//! a graph database and answers in prose, grounded in the live schema and
//! in context retrieved from the graph itself.
//!
//! ## Pipeline
//!
//! ```text
//! question ─► cache ─► hybrid retrieval ─► synthesis ─► validation ─► execution ─► composition ─► cache write
//!                          ▲                   ▲
//!                   schema snapshot ◄── background refresher
//! ```
//!
//! ## Design Principles
//!
//! 1. **Trait-first**: `GraphDriver`, `TextGenerator`, `Embedder` and `CacheStore` are the seams
//! 2. **One snapshot per request**: the schema is an `Arc` swapped whole, never edited in place
//! 3. **Validator is the wall**: nothing reaches the driver without passing `QueryValidator`
//! 4. **Degrade, don't fail**: schema, embedding and cache outages reduce quality, not availability
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use neo4j_rag::{GraphRag, RagConfig, props};
//! use neo4j_rag::generation::ScriptedGenerator;
//! use neo4j_rag::storage::MemoryGraph;
//!
//! # async fn example() -> neo4j_rag::Result<()> {
//! let graph = MemoryGraph::new();
//! let msi = graph.add_node(["Brand"], props([("name", "MSI")]));
//! let board = graph.add_node(["Product"], props([("name", "B650 Tomahawk"), ("category", "Anakart")]));
//! graph.add_relationship(board, msi, "BRAND", props::<&str, i64>([]))?;
//!
//! let llm = ScriptedGenerator::new("demo")
//!     .reply(r#"{"cypher": "MATCH (p:Product)-[:BRAND]->(b:Brand {name: 'MSI'}) RETURN p.name", "description": "MSI products"}"#);
//! let rag = GraphRag::builder(graph, RagConfig::default())
//!     .generator(Arc::new(llm))
//!     .build()?;
//! rag.refresh_schema().await?;
//!
//! let answer = rag.ask("MSI markasına ait ürünler").await?;
//! println!("{}\n{}", answer.query, answer.answer);
//! # Ok(())
//! # }
//! ```
//!
//! ## Backends
//!
//! | Concern | Local | Feature `http` |
//! |---------|-------|----------------|
//! | Graph | `MemoryGraph` | `HttpGraphDriver` (+ `RetryingDriver`) |
//! | Generation | `ScriptedGenerator` | `GeminiGenerator`, `OpenAiCompatible` |
//! | Embedding | `HashingEmbedder` | `GeminiEmbedder` |

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod cypher;
pub mod execution;
pub mod storage;
pub mod tx;
pub mod limits;
pub mod config;
pub mod schema;
pub mod embedding;
pub mod retrieval;
pub mod generation;
pub mod validate;
pub mod cache;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

// ============================================================================
// Re-exports
// ============================================================================

pub use model::{
    Node, Relationship, Value, PropertyMap, props,
    NodeId, RelId,
    SchemaSnapshot, ContextFragment, CandidateQuery, RejectReason, ValidationStatus,
};
pub use config::RagConfig;
pub use execution::{QueryResult, ResultRow, QueryExecutor};
pub use storage::GraphDriver;
pub use tx::TxMode;
pub use schema::{SchemaStore, SchemaRefresher, RefresherHandle};
pub use embedding::{Embedder, EmbeddingService, EmbeddingVector};
pub use retrieval::{HybridRetriever, Retrieval};
pub use generation::{TextGenerator, GeneratorChain, QuerySynthesizer, AnswerComposer};
pub use validate::QueryValidator;
pub use cache::{CacheEntry, CacheKey, CacheStore, ResultCache};

use cache::ResultSummary;
use limits::OutboundLimiter;

// ============================================================================
// GraphRag
// ============================================================================

/// What `ask` returns to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Answer {
    pub query: String,
    pub answer: String,
    pub description: String,
    /// Served from the result cache.
    pub cached: bool,
}

/// Pipeline health for the calling layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    pub schema_fresh: bool,
    pub schema_generation: u64,
    pub last_refresh: Option<DateTime<Utc>>,
    pub last_refresh_error: Option<String>,
    pub total_nodes: u64,
    pub total_relationships: u64,
    /// `None` when the cache store could not be reached.
    pub cache_size: Option<usize>,
    /// `graph`, `embedding:<name>` and one entry per generator.
    pub backends_reachable: BTreeMap<String, bool>,
}

/// Result of `clear_cache`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Cleared {
    pub cleared: usize,
}

/// The orchestrator. Cheap to share behind an `Arc`; every method takes
/// `&self`.
pub struct GraphRag<D: GraphDriver> {
    driver: Arc<D>,
    schema: Arc<SchemaStore<D>>,
    retriever: HybridRetriever<D>,
    synthesizer: QuerySynthesizer,
    validator: QueryValidator,
    executor: QueryExecutor<D>,
    composer: AnswerComposer,
    cache: ResultCache,
    embeddings: Option<EmbeddingService>,
    limiter: OutboundLimiter,
    config: RagConfig,
}

impl<D: GraphDriver> GraphRag<D> {
    pub fn builder(driver: D, config: RagConfig) -> GraphRagBuilder<D> {
        GraphRagBuilder { driver, config, generators: Vec::new(), embedder: None, cache_store: None }
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn driver(&self) -> &Arc<D> {
        &self.driver
    }

    /// Answer `question`, end to end, within the configured request timeout.
    pub async fn ask(&self, question: &str) -> Result<Answer> {
        let key = CacheKey::for_question(question);
        let timeout = self.config.limits.request_timeout;
        let started = Instant::now();
        let outcome = match tokio::time::timeout(timeout, self.run(question, &key)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::RequestTimeout(timeout.as_millis() as u64)),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            Ok(answer) => info!(question_key = key.short(), cached = answer.cached, elapsed_ms, "question answered"),
            Err(err) => warn!(question_key = key.short(), code = err.code(), elapsed_ms, "question failed"),
        }
        outcome
    }

    async fn run(&self, question: &str, key: &CacheKey) -> Result<Answer> {
        let question_key = key.short();

        match self.cache.get(question).await {
            Ok(Some(entry)) => {
                debug!(question_key, stage = "cache", "served from cache");
                return Ok(Answer {
                    query: entry.query.clone(),
                    answer: entry.answer.clone(),
                    description: entry.description.clone(),
                    cached: true,
                });
            }
            Ok(None) => {}
            Err(err) => warn!(question_key, stage = "cache", code = err.code(), error = %err, "cache read failed, continuing"),
        }

        let mut schema = self.schema.current();
        if self.schema.inline_refresh_due(Utc::now()) {
            // No usable snapshot yet and no recent attempt to find one.
            match self.schema.refresh().await {
                Ok(fresh) => schema = fresh,
                Err(err) => warn!(question_key, stage = "schema", code = err.code(), "no schema available, continuing without"),
            }
        }

        let retrieval = self.retriever.retrieve(question, &schema).await;
        debug!(question_key, stage = "retrieve", fragments = retrieval.fragments.len(), degraded = ?retrieval.degraded);

        let candidate = self.synthesizer.synthesize(question, &retrieval, &schema).await?;
        let candidate = self.validator.validate(candidate);
        if let Some(reason) = candidate.rejection() {
            return Err(Error::ValidationRejected(reason.clone()));
        }

        let result = self.executor.execute(&candidate).await?;
        let answer = self.composer.compose(question, candidate.text(), &retrieval.fragments, &result).await;
        let description = candidate.description().unwrap_or_default().to_string();

        let entry = CacheEntry {
            query: candidate.text().to_string(),
            description: description.clone(),
            answer: answer.clone(),
            result: ResultSummary::of(&result),
            created_at: Utc::now(),
        };
        if let Err(err) = self.cache.put(question, entry).await {
            warn!(question_key, stage = "cache", code = err.code(), error = %err, "cache write failed");
        }

        Ok(Answer { query: candidate.text().to_string(), answer, description, cached: false })
    }

    /// The published schema snapshot.
    pub fn schema(&self) -> Arc<SchemaSnapshot> {
        self.schema.current()
    }

    /// Run a discovery pass now (or join the running one).
    pub async fn refresh_schema(&self) -> Result<Arc<SchemaSnapshot>> {
        self.schema.refresh().await
    }

    /// Start the periodic refresher at the configured interval.
    pub fn spawn_refresher(&self) -> RefresherHandle {
        SchemaRefresher::spawn(self.schema.clone(), self.config.schema.refresh_interval)
    }

    pub async fn clear_cache(&self) -> Result<Cleared> {
        let cleared = self.cache.clear().await?;
        info!(cleared, "cache cleared");
        Ok(Cleared { cleared })
    }

    pub async fn health(&self) -> Health {
        let snapshot = self.schema.current();
        let status = self.schema.status();

        let mut backends = BTreeMap::new();
        let timeout = self.config.graph.query_timeout;
        let ms = timeout.as_millis() as u64;
        let graph_ok = self.limiter.call(timeout, || Error::RequestTimeout(ms), self.driver.ping()).await.is_ok();
        backends.insert("graph".to_string(), graph_ok);
        if let Some(embeddings) = &self.embeddings {
            backends.insert(format!("embedding:{}", embeddings.backend_name()), embeddings.ping().await.is_ok());
        }
        backends.extend(self.synthesizer.chain().ping_all().await);

        Health {
            schema_fresh: self.schema.is_fresh(Utc::now()),
            schema_generation: snapshot.generation,
            last_refresh: status.last_success,
            last_refresh_error: status.last_error,
            total_nodes: snapshot.total_nodes(),
            total_relationships: snapshot.total_relationships(),
            cache_size: self.cache.len().await.ok(),
            backends_reachable: backends,
        }
    }
}

#[cfg(feature = "http")]
impl GraphRag<storage::RetryingDriver<storage::HttpGraphDriver>> {
    /// Pipeline against a Neo4j server, with backends built from `config`.
    pub fn connect(config: RagConfig) -> Result<Self> {
        config.validate()?;
        let driver = storage::HttpGraphDriver::new(&config.graph)?;
        let driver = storage::RetryingDriver::new(driver, config.graph.retry.clone());
        GraphRag::builder(driver, config).build()
    }
}

/// Assembles a `GraphRag`. Generators and the embedder default to those
/// described by the config when none are supplied.
pub struct GraphRagBuilder<D: GraphDriver> {
    driver: D,
    config: RagConfig,
    generators: Vec<Arc<dyn TextGenerator>>,
    embedder: Option<Arc<dyn Embedder>>,
    cache_store: Option<Arc<dyn CacheStore>>,
}

impl<D: GraphDriver> GraphRagBuilder<D> {
    /// Append a text generator; the first added is the primary.
    pub fn generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generators.push(generator);
        self
    }

    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.cache_store = Some(store);
        self
    }

    pub fn build(self) -> Result<GraphRag<D>> {
        let config = self.config;
        config.validate()?;
        let limiter = OutboundLimiter::new(config.limits.max_inflight_external);
        let driver = Arc::new(self.driver);

        let generators = if self.generators.is_empty() { configured_generators(&config) } else { self.generators };
        let mut chain = GeneratorChain::new(limiter.clone());
        for (i, generator) in generators.into_iter().enumerate() {
            let timeout = config
                .generation
                .backends
                .iter()
                .find(|b| b.name == generator.name())
                .or_else(|| config.generation.backends.get(i))
                .map(|b| b.timeout)
                .unwrap_or(config.limits.request_timeout);
            chain = chain.with(generator, timeout);
        }
        if chain.is_empty() {
            return Err(Error::Config("no usable generation backend".into()));
        }

        let embedder = self.embedder.or_else(|| configured_embedder(&config));
        let embeddings = embedder.map(|e| EmbeddingService::new(e, limiter.clone(), config.embedding.timeout));

        let query_timeout = config.graph.query_timeout;
        let schema = Arc::new(SchemaStore::new(driver.clone(), limiter.clone(), config.schema.clone(), query_timeout));
        let retriever = HybridRetriever::new(
            driver.clone(),
            embeddings.clone(),
            limiter.clone(),
            query_timeout,
            config.retrieval.clone(),
        );
        let cache = match self.cache_store {
            Some(store) => ResultCache::new(store, config.cache.ttl),
            None => ResultCache::in_memory(config.cache.ttl, config.cache.max_entries),
        };

        info!(generators = ?chain.names(), semantic = embeddings.is_some(), "pipeline assembled");
        Ok(GraphRag {
            executor: QueryExecutor::new(driver.clone(), limiter.clone(), query_timeout),
            composer: AnswerComposer::new(Some(chain.clone()), config.generation.max_prompt_rows),
            synthesizer: QuerySynthesizer::new(chain),
            validator: QueryValidator::default(),
            driver,
            schema,
            retriever,
            cache,
            embeddings,
            limiter,
            config,
        })
    }
}

#[cfg(feature = "http")]
fn configured_generators(config: &RagConfig) -> Vec<Arc<dyn TextGenerator>> {
    config
        .generation
        .backends
        .iter()
        .filter_map(|b| match generation::http::from_config(b) {
            Ok(g) => Some(g),
            Err(err) => {
                warn!(backend = %b.name, error = %err, "generation backend skipped");
                None
            }
        })
        .collect()
}

#[cfg(not(feature = "http"))]
fn configured_generators(_config: &RagConfig) -> Vec<Arc<dyn TextGenerator>> {
    Vec::new()
}

fn configured_embedder(config: &RagConfig) -> Option<Arc<dyn Embedder>> {
    match config.embedding.kind {
        config::EmbeddingKind::Hashing => Some(Arc::new(embedding::HashingEmbedder::new(config.embedding.dimension))),
        #[cfg(feature = "http")]
        config::EmbeddingKind::Gemini => match embedding::GeminiEmbedder::new(&config.embedding) {
            Ok(e) => Some(Arc::new(e)),
            Err(err) => {
                warn!(error = %err, "semantic retrieval disabled");
                None
            }
        },
        #[cfg(not(feature = "http"))]
        config::EmbeddingKind::Gemini => {
            warn!("semantic retrieval disabled: built without the http feature");
            None
        }
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Schema unavailable: {0}")]
    SchemaUnavailable(String),

    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    #[error("Query rejected: {0}")]
    ValidationRejected(RejectReason),

    #[error("Query timed out after {0} ms")]
    ExecutionTimeout(u64),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Cypher syntax error at position {position}: {message}")]
    SyntaxError { position: usize, message: String },

    #[error("Type error: expected {expected}, got {got}")]
    TypeError { expected: String, got: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Request timed out after {0} ms")]
    RequestTimeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Stable reason code for logs and structured failures.
    pub fn code(&self) -> &'static str {
        match self {
            Error::SchemaUnavailable(_) => "schema_unavailable",
            Error::EmbeddingUnavailable(_) => "embedding_unavailable",
            Error::DimensionMismatch { .. } => "dimension_mismatch",
            Error::GenerationFailed(_) => "generation_failed",
            Error::ValidationRejected(_) => "validation_rejected",
            Error::ExecutionTimeout(_) => "execution_timeout",
            Error::ExecutionError(_) => "execution_error",
            Error::CacheUnavailable(_) => "cache_unavailable",
            Error::Unavailable(_) => "unavailable",
            Error::SyntaxError { .. } => "syntax_error",
            Error::TypeError { .. } => "type_error",
            Error::NotFound(_) => "not_found",
            Error::Config(_) => "config",
            Error::RequestTimeout(_) => "request_timeout",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
        }
    }

    /// Text safe to show a caller. Driver and backend detail stays in the
    /// logs.
    pub fn public_message(&self) -> String {
        match self {
            Error::SchemaUnavailable(_) => "The graph schema could not be read; using the last known schema.".into(),
            Error::EmbeddingUnavailable(_) | Error::DimensionMismatch { .. } => {
                "Semantic search is temporarily unavailable.".into()
            }
            Error::GenerationFailed(_) => "No language model could produce a query for this question.".into(),
            Error::ValidationRejected(reason) => format!("The generated query was refused: {reason}."),
            Error::ExecutionTimeout(_) => "The query took too long and was cancelled.".into(),
            Error::ExecutionError(_) | Error::SyntaxError { .. } | Error::TypeError { .. } => {
                "The query could not be executed.".into()
            }
            Error::CacheUnavailable(_) => "The result cache is unavailable.".into(),
            Error::Unavailable(_) | Error::Io(_) => "A backing service is unavailable.".into(),
            Error::NotFound(_) => "The requested item was not found.".into(),
            Error::Config(_) | Error::Json(_) => "The service is misconfigured.".into(),
            Error::RequestTimeout(_) => "The request timed out.".into(),
        }
    }

    /// Worth retrying against the same backend.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Unavailable(_) | Error::RequestTimeout(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use generation::ScriptedGenerator;
    use storage::MemoryGraph;

    #[test]
    fn test_public_message_never_carries_detail() {
        let err = Error::ExecutionError("Neo.ClientError: label SecretLabel missing".into());
        assert!(!err.public_message().contains("SecretLabel"));
        assert_eq!(err.code(), "execution_error");
        let err = Error::ValidationRejected(RejectReason::DeniedKeyword("DELETE".into()));
        assert!(err.public_message().contains("DELETE"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::Unavailable("x".into()).is_transient());
        assert!(Error::RequestTimeout(5).is_transient());
        assert!(!Error::ValidationRejected(RejectReason::Empty).is_transient());
        assert!(!Error::ExecutionError("x".into()).is_transient());
    }

    #[test]
    fn test_builder_requires_a_generator() {
        let config = RagConfig {
            generation: config::GenerationConfig { backends: Vec::new(), ..Default::default() },
            ..Default::default()
        };
        // validate() refuses an empty backend list before anything is built.
        assert!(matches!(GraphRag::builder(MemoryGraph::new(), config).build(), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_first_ask_discovers_schema() {
        let g = MemoryGraph::new();
        g.add_node(["Brand"], props([("name", "MSI")]));
        let llm = ScriptedGenerator::new("s").when("RULES:", "MATCH (b:Brand) RETURN b.name").reply("MSI");
        let rag = GraphRag::builder(g, RagConfig::default()).generator(Arc::new(llm.clone())).build().unwrap();
        assert!(rag.schema().is_empty());
        let answer = rag.ask("Which brands?").await.unwrap();
        assert_eq!(answer.query, "MATCH (b:Brand) RETURN b.name");
        assert!(!answer.cached);
        assert_eq!(rag.schema().generation, 1);
        assert!(llm.prompts()[0].contains("- Brand (1) {name}"));
    }

    #[tokio::test]
    async fn test_empty_graph_is_not_rescanned_per_request() {
        let g = MemoryGraph::new();
        let llm = ScriptedGenerator::new("s").when("RULES:", "MATCH (n) RETURN n").reply("Veri yok.");
        let rag = GraphRag::builder(g.clone(), RagConfig::default()).generator(Arc::new(llm)).build().unwrap();

        rag.ask("Ne var?").await.unwrap();
        assert_eq!(g.label_scans(), 1);
        rag.ask("Başka ne var?").await.unwrap();
        rag.ask("Hiç ürün var mı?").await.unwrap();
        assert_eq!(g.label_scans(), 1);
        assert_eq!(rag.schema().generation, 1);
    }
}
