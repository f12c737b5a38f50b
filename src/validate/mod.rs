//! # Query Validator
//!
//! The only gate between generated text and the database. A candidate is
//! checked in a fixed order and the first failure wins:
//!
//! 1. **Shape**: non-empty, bounded length, lexes cleanly, starts with a
//!    read pattern (`MATCH` / `OPTIONAL MATCH`) and contains `RETURN`.
//! 2. **Denylist**: no mutation or administrative keyword token anywhere.
//!    Keywords are matched as tokens, so case and spacing do not matter and
//!    words inside string literals do not count.
//! 3. **Smuggling**: no `;` and no comments. A comment can split a keyword
//!    (`DE/**/LETE`) or hide the rest of a line, so any comment rejects.
//! 4. **Grammar**: the whole text parses as the read-only dialect.
//!
//! The validator never edits a query. Anything ambiguous is rejected.

use tracing::{debug, warn};

use crate::cypher::lexer::{self, Token, TokenKind};
use crate::cypher::parser;
use crate::model::{CandidateQuery, RejectReason};

/// Default ceiling on candidate length, in characters.
pub const DEFAULT_MAX_LEN: usize = 4000;

#[derive(Debug, Clone)]
pub struct QueryValidator {
    max_len: usize,
}

impl Default for QueryValidator {
    fn default() -> Self {
        Self { max_len: DEFAULT_MAX_LEN }
    }
}

impl QueryValidator {
    pub fn new(max_len: usize) -> Self {
        Self { max_len }
    }

    /// Consume a candidate and return it as `Valid` or `Rejected`.
    pub fn validate(&self, candidate: CandidateQuery) -> CandidateQuery {
        match self.check(candidate.text()) {
            Ok(()) => {
                debug!(stage = "validate", "candidate accepted");
                candidate.accept()
            }
            Err(reason) => {
                warn!(stage = "validate", code = reason.code(), %reason, "candidate rejected");
                candidate.reject(reason)
            }
        }
    }

    /// The checks themselves, without the status bookkeeping.
    pub fn check(&self, text: &str) -> Result<(), RejectReason> {
        let text = text.trim();
        if text.is_empty() {
            return Err(RejectReason::Empty);
        }
        if text.chars().count() > self.max_len {
            return Err(RejectReason::TooLong(self.max_len));
        }
        let tokens = lexer::tokenize(text).map_err(|e| RejectReason::Malformed(e.to_string()))?;

        check_shape(&tokens)?;

        if let Some(denied) = tokens.iter().find(|t| t.kind.is_denied()) {
            return Err(RejectReason::DeniedKeyword(denied.text.to_ascii_uppercase()));
        }
        if tokens.iter().any(|t| t.kind == TokenKind::Semicolon) {
            return Err(RejectReason::MultipleStatements);
        }
        if tokens.iter().any(|t| t.kind == TokenKind::Comment) {
            return Err(RejectReason::Comment);
        }

        parser::parse_query(&tokens).map_err(|e| RejectReason::Grammar(e.to_string()))?;
        Ok(())
    }
}

fn check_shape(tokens: &[Token]) -> Result<(), RejectReason> {
    let mut significant = tokens.iter().filter(|t| t.kind != TokenKind::Comment);
    match significant.next().map(|t| t.kind) {
        Some(TokenKind::Match | TokenKind::Optional) => {}
        Some(TokenKind::Eof) | None => return Err(RejectReason::Empty),
        Some(_) => return Err(RejectReason::MissingReadPattern),
    }
    if !tokens.iter().any(|t| t.kind == TokenKind::Return) {
        return Err(RejectReason::MissingReturn);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn reason(q: &str) -> Option<RejectReason> {
        QueryValidator::default().validate(CandidateQuery::new(q)).rejection().cloned()
    }

    #[test]
    fn test_accepts_read_queries() {
        for q in [
            "MATCH (p:Product)-[:BRAND]->(b:Brand {name:'MSI'}) WHERE p.category = 'Anakart' RETURN p.name",
            "MATCH (n) RETURN labels(n), count(n) ORDER BY count(n) DESC",
            "OPTIONAL MATCH (b:Brand) RETURN b",
            "match (p) where p.name contains 'delete' return p",
            "MATCH (p:Product) WITH p.category AS c, count(*) AS n RETURN c, n ORDER BY n DESC LIMIT 5",
        ] {
            assert_eq!(reason(q), None, "{q}");
        }
    }

    #[test]
    fn test_shape() {
        assert_eq!(reason("   "), Some(RejectReason::Empty));
        assert_eq!(reason("RETURN 1"), Some(RejectReason::MissingReadPattern));
        assert_eq!(reason("MATCH (n)"), Some(RejectReason::MissingReturn));
        assert_eq!(reason("CREATE (n) RETURN n"), Some(RejectReason::MissingReadPattern));
        assert!(matches!(reason("MATCH (n) RETURN 'open"), Some(RejectReason::Malformed(_))));
    }

    #[test]
    fn test_length_limit() {
        let q = format!("MATCH (n) WHERE n.name = '{}' RETURN n", "x".repeat(50));
        assert_eq!(QueryValidator::new(20).check(&q), Err(RejectReason::TooLong(20)));
    }

    #[test]
    fn test_denylist_is_case_insensitive() {
        for (q, kw) in [
            ("MATCH (n) DELETE n RETURN n", "DELETE"),
            ("MATCH (n) detach delete n RETURN n", "DETACH"),
            ("MATCH (n) SeT n.x = 1 RETURN n", "SET"),
            ("MATCH (n) MERGE (m) RETURN n", "MERGE"),
            ("MATCH (n) CALL db.labels() YIELD label RETURN label", "CALL"),
            ("MATCH (n) REMOVE n.name RETURN n", "REMOVE"),
            ("MATCH (n) FOREACH (x IN [1] | CREATE ()) RETURN n", "FOREACH"),
            ("MATCH (n) RETURN n UNION MATCH (m) DROP INDEX x RETURN m", "DROP"),
        ] {
            assert_eq!(reason(q), Some(RejectReason::DeniedKeyword(kw.into())), "{q}");
        }
    }

    #[test]
    fn test_statement_chaining() {
        assert_eq!(reason("MATCH (n) RETURN n; MATCH (m) RETURN m"), Some(RejectReason::MultipleStatements));
        assert_eq!(reason("MATCH (n) RETURN n;"), Some(RejectReason::MultipleStatements));
    }

    #[test]
    fn test_comment_obfuscation() {
        assert_eq!(reason("MATCH (n) DE/**/LETE n RETURN n"), Some(RejectReason::Comment));
        assert_eq!(reason("MATCH (n) RETURN n // harmless"), Some(RejectReason::Comment));
        assert_eq!(reason("/* x */ MATCH (n) RETURN n"), Some(RejectReason::Comment));
        assert_eq!(
            reason("MATCH (n) /* */ DELETE n RETURN n"),
            Some(RejectReason::DeniedKeyword("DELETE".into()))
        );
    }

    #[test]
    fn test_outside_grammar() {
        assert!(matches!(reason("MATCH (n) RETURN n UNION MATCH (m) RETURN m"), Some(RejectReason::Grammar(_))));
        assert!(matches!(reason("MATCH (n) RETURN apoc.do.it(n)"), Some(RejectReason::Grammar(_))));
        assert!(matches!(reason("MATCH (n) RETURN n MATCH (m)"), Some(RejectReason::Grammar(_))));
    }

    #[test]
    fn test_validator_never_edits_text() {
        let q = "  MATCH (n)   RETURN n  ";
        let out = QueryValidator::default().validate(CandidateQuery::new(q));
        assert!(out.is_valid());
        assert_eq!(out.text(), q);
    }
}
