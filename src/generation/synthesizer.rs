//! Question + context + schema -> `CandidateQuery`.
//!
//! Completions are untrusted. Cleanup only removes packaging: markdown
//! fences, the `{"cypher": .., "description": ..}` envelope, runs of
//! whitespace outside literals and one trailing semicolon. It never edits
//! the query itself; whatever remains goes to the validator as-is.

use serde::Deserialize;
use tracing::{debug, info};

use crate::model::{CandidateQuery, SchemaSnapshot};
use crate::retrieval::Retrieval;
use crate::{Error, Result};
use super::GeneratorChain;
use super::prompt::{CYPHER_SYSTEM, cypher_prompt};

#[derive(Deserialize)]
struct Envelope {
    cypher: Option<String>,
    description: Option<String>,
}

pub struct QuerySynthesizer {
    chain: GeneratorChain,
}

impl QuerySynthesizer {
    pub fn new(chain: GeneratorChain) -> Self {
        Self { chain }
    }

    pub fn chain(&self) -> &GeneratorChain {
        &self.chain
    }

    /// Ask the generator chain for a query. The returned candidate is
    /// unvalidated.
    pub async fn synthesize(&self, question: &str, retrieval: &Retrieval, schema: &SchemaSnapshot) -> Result<CandidateQuery> {
        let prompt = cypher_prompt(question, schema, &retrieval.seeds, &retrieval.fragments);
        let completion = self.chain.complete("synthesize", CYPHER_SYSTEM, &prompt).await?;
        let (query, description) = clean_completion(&completion.text)?;
        info!(stage = "synthesize", backend = %completion.backend, query_len = query.len(), "candidate query generated");
        debug!(stage = "synthesize", %query);
        let description = description
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| format!("Cypher query answering: {}", question.trim()));
        Ok(CandidateQuery::new(query).with_description(description))
    }
}

/// Unwrap a completion into `(query, description)`.
///
/// A completion that looks like a JSON envelope but cannot be read as one,
/// or carries no `cypher`, is a generation failure.
pub fn clean_completion(text: &str) -> Result<(String, Option<String>)> {
    // The envelope is located on the raw text: a fenced query inside the
    // `cypher` string would otherwise be mistaken for the outer fence.
    let text = text.trim();
    let (raw, description) = match envelope_span(text) {
        Some(json) => {
            let envelope: Envelope = serde_json::from_str(json)
                .map_err(|e| Error::GenerationFailed(format!("completion is not a valid JSON envelope: {e}")))?;
            let cypher = envelope
                .cypher
                .filter(|c| !c.trim().is_empty())
                .ok_or_else(|| Error::GenerationFailed("completion has no cypher field".into()))?;
            (cypher, envelope.description.map(|d| d.trim().to_string()))
        }
        None => (strip_fences(text).to_string(), None),
    };
    let query = collapse_whitespace(strip_fences(raw.trim()));
    let query = match query.strip_suffix(';') {
        Some(rest) => rest.trim_end().to_string(),
        None => query,
    };
    Ok((query, description))
}

/// Contents of the first fenced block, or the input when there is none.
fn strip_fences(text: &str) -> &str {
    let Some(open) = text.find("```") else {
        return text;
    };
    let after = &text[open + 3..];
    // Skip the info string (json, cypher, ...).
    let body = match after.find('\n') {
        Some(nl) if after[..nl].trim().chars().all(char::is_alphanumeric) => &after[nl + 1..],
        _ => after,
    };
    match body.find("```") {
        Some(close) => body[..close].trim(),
        None => body.trim(),
    }
}

/// The `{...}` span holding a JSON envelope, if the text carries one.
fn envelope_span(text: &str) -> Option<&str> {
    if text.starts_with('{') {
        let end = text.rfind('}').map_or(text.len(), |e| e + 1);
        return Some(&text[..end]);
    }
    let key = text.find("\"cypher\"")?;
    let start = text[..key].rfind('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Squeeze whitespace runs to one space outside string literals and
/// comments. Line comments keep their terminating newline.
fn collapse_whitespace(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    let mut chars = query.chars().peekable();
    let mut quote: Option<char> = None;
    let mut line_comment = false;
    let mut pending_space = false;

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            out.push(c);
            if c == '\\' {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            } else if c == q {
                quote = None;
            }
            continue;
        }
        if line_comment {
            if c == '\n' {
                out.push('\n');
                line_comment = false;
            } else {
                out.push(c);
            }
            continue;
        }
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space && !out.is_empty() && !out.ends_with('\n') {
            out.push(' ');
        }
        pending_space = false;
        match c {
            '\'' | '"' | '`' => quote = Some(c),
            '/' if chars.peek() == Some(&'/') => line_comment = true,
            _ => {}
        }
        out.push(c);
    }
    out.trim().to_string()
}
