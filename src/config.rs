//! Pipeline configuration.
//!
//! `RagConfig` deserializes from TOML with every field defaulted, so an
//! empty file is a working local setup. Secrets are normally read from the
//! environment by `apply_env` rather than written into the file.
//!
//! ```toml
//! [graph]
//! uri = "http://localhost:7474"
//! query_timeout_ms = 30000
//!
//! [retrieval]
//! max_hops = 2
//! structural_weight = 0.6
//! semantic_weight = 0.4
//!
//! [[generation.backends]]
//! name = "openrouter"
//! kind = "open_ai_compatible"
//! url = "https://openrouter.ai/api/v1/chat/completions"
//! model = "google/gemma-2-9b-it:free"
//! api_key_env = "OPENROUTER_API_KEY"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::storage::RetryPolicy;
use crate::{Error, Result};

// ============================================================================
// RagConfig
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    pub graph: GraphConfig,
    pub schema: SchemaConfig,
    pub retrieval: RetrievalConfig,
    pub generation: GenerationConfig,
    pub embedding: EmbeddingConfig,
    pub cache: CacheConfig,
    pub limits: LimitsConfig,
}

impl RagConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Read a TOML file, then apply environment overrides and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&text)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Overrides from an arbitrary lookup, so tests need not touch the
    /// process environment.
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(uri) = lookup("NEO4J_URI") {
            self.graph.uri = uri;
        }
        if let Some(user) = lookup("NEO4J_USER") {
            self.graph.user = user;
        }
        if let Some(password) = lookup("NEO4J_PASSWORD") {
            self.graph.password = Some(password);
        }
        if let Some(ttl) = lookup("RAG_CACHE_TTL_SECS").and_then(|v| v.trim().parse::<u64>().ok()) {
            self.cache.ttl = Duration::from_secs(ttl);
        }
        for backend in &mut self.generation.backends {
            if backend.api_key.is_none() {
                backend.api_key = backend.api_key_env.as_deref().and_then(&lookup);
            }
        }
        if self.embedding.api_key.is_none() {
            self.embedding.api_key = self.embedding.api_key_env.as_deref().and_then(&lookup);
        }
    }

    /// Reject settings no pipeline can run with.
    pub fn validate(&self) -> Result<()> {
        let r = &self.retrieval;
        let bad = |msg: &str| Err(Error::Config(msg.to_string()));
        if !(r.structural_weight >= 0.0 && r.semantic_weight >= 0.0) {
            return bad("retrieval weights must be non-negative");
        }
        if r.structural_weight + r.semantic_weight <= 0.0 {
            return bad("at least one retrieval weight must be positive");
        }
        if r.max_fragments == 0 {
            return bad("retrieval.max_fragments must be at least 1");
        }
        if let HopDecay::Exponential { base } = r.hop_decay {
            if !(base > 0.0 && base < 1.0) {
                return bad("hop_decay base must lie in (0, 1)");
            }
        }
        if !(0.0..=1.0).contains(&r.min_semantic_score) {
            return bad("retrieval.min_semantic_score must lie in [0, 1]");
        }
        if self.embedding.dimension == 0 {
            return bad("embedding.dimension must be positive");
        }
        if self.generation.backends.is_empty() {
            return bad("at least one generation backend is required");
        }
        if self.limits.max_inflight_external == 0 {
            return bad("limits.max_inflight_external must be at least 1");
        }
        if self.schema.refresh_interval.is_zero() {
            return bad("schema.refresh_interval_secs must be positive");
        }
        Ok(())
    }
}

// ============================================================================
// Sections
// ============================================================================

/// Graph database connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// HTTP endpoint of the Neo4j server.
    pub uri: String,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub database: String,
    #[serde(rename = "query_timeout_ms", with = "duration_ms")]
    pub query_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            uri: "http://localhost:7474".into(),
            user: "neo4j".into(),
            password: None,
            database: "neo4j".into(),
            query_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

/// Schema discovery and refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    #[serde(rename = "refresh_interval_secs", with = "duration_secs")]
    pub refresh_interval: Duration,
    /// A snapshot older than this is reported as not fresh.
    #[serde(rename = "stale_after_secs", with = "duration_secs")]
    pub stale_after: Duration,
    /// Nodes (or relationships) sampled per label (or type).
    pub sample_size: usize,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(300),
            stale_after: Duration::from_secs(300),
            sample_size: 25,
        }
    }
}

/// How structural scores fall off with hop distance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HopDecay {
    /// `base ^ hops`
    Exponential { base: f64 },
    /// `1 - hops / (max_hops + 1)`
    Linear,
}

impl Default for HopDecay {
    fn default() -> Self {
        HopDecay::Exponential { base: 0.5 }
    }
}

impl HopDecay {
    /// Score in `[0, 1]` for a fragment `hops` away; strictly decreasing in
    /// `hops` up to `max_hops`.
    pub fn score(self, hops: usize, max_hops: usize) -> f64 {
        let raw = match self {
            HopDecay::Exponential { base } => base.powi(hops.min(i32::MAX as usize) as i32),
            HopDecay::Linear => 1.0 - hops as f64 / (max_hops as f64 + 1.0),
        };
        raw.clamp(0.0, 1.0)
    }
}

/// Hybrid retrieval tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub max_hops: usize,
    pub max_fragments: usize,
    /// Semantic candidates kept after ranking.
    pub semantic_top_k: usize,
    /// Nodes embedded per semantic search.
    pub semantic_candidates: usize,
    pub min_semantic_score: f64,
    pub structural_weight: f64,
    pub semantic_weight: f64,
    pub hop_decay: HopDecay,
    pub max_seed_entities: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_hops: 2,
            max_fragments: 40,
            semantic_top_k: 10,
            semantic_candidates: 1000,
            min_semantic_score: 0.7,
            structural_weight: 0.6,
            semantic_weight: 0.4,
            hop_decay: HopDecay::default(),
            max_seed_entities: 10,
        }
    }
}

/// Wire protocol of a text-generation backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// `POST /chat/completions` (OpenRouter, OpenAI, Ollama's compat layer).
    OpenAiCompatible,
    /// Gemini `models/{model}:generateContent`.
    Gemini,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub name: String,
    pub kind: BackendKind,
    pub url: String,
    pub model: String,
    /// Environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_backend_timeout", rename = "timeout_ms", with = "duration_ms")]
    pub timeout: Duration,
}

fn default_temperature() -> f32 {
    0.1
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_backend_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Text generation: backends are tried in list order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub backends: Vec<BackendConfig>,
    /// Result rows included in the answer prompt.
    pub max_prompt_rows: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            backends: vec![
                BackendConfig {
                    name: "gemini".into(),
                    kind: BackendKind::Gemini,
                    url: "https://generativelanguage.googleapis.com/v1beta".into(),
                    model: "gemini-2.0-flash-exp".into(),
                    api_key_env: Some("GEMINI_API_KEY".into()),
                    api_key: None,
                    temperature: 0.3,
                    max_tokens: 8192,
                    timeout: default_backend_timeout(),
                },
                BackendConfig {
                    name: "openrouter".into(),
                    kind: BackendKind::OpenAiCompatible,
                    url: "https://openrouter.ai/api/v1/chat/completions".into(),
                    model: "google/gemma-2-9b-it:free".into(),
                    api_key_env: Some("OPENROUTER_API_KEY".into()),
                    api_key: None,
                    temperature: default_temperature(),
                    max_tokens: default_max_tokens(),
                    timeout: default_backend_timeout(),
                },
            ],
            max_prompt_rows: 200,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingKind {
    /// Gemini `embedContent`.
    Gemini,
    /// Local feature hashing; no network.
    Hashing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub kind: EmbeddingKind,
    pub url: String,
    pub model: String,
    pub api_key_env: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub dimension: usize,
    #[serde(rename = "timeout_ms", with = "duration_ms")]
    pub timeout: Duration,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            kind: EmbeddingKind::Gemini,
            url: "https://generativelanguage.googleapis.com/v1beta".into(),
            model: "models/embedding-001".into(),
            api_key_env: Some("GEMINI_API_KEY".into()),
            api_key: None,
            dimension: 768,
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    #[serde(rename = "ttl_secs", with = "duration_secs")]
    pub ttl: Duration,
    /// `0` means unbounded.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl: Duration::from_secs(24 * 60 * 60), max_entries: 10_000 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Simultaneous outbound calls across graph, generation and embedding.
    pub max_inflight_external: usize,
    /// Budget for one whole `ask`.
    #[serde(rename = "request_timeout_ms", with = "duration_ms")]
    pub request_timeout: Duration,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self { max_inflight_external: 8, request_timeout: Duration::from_secs(90) }
    }
}

// ============================================================================
// Duration encodings
// ============================================================================

pub(crate) mod duration_ms {
    use std::time::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

pub(crate) mod duration_secs {
    use std::time::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
