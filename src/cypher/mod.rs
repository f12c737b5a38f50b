//! # Cypher Language
//!
//! Lexer and parser for the read-only Cypher dialect the pipeline accepts.
//! Pure functions without I/O or storage access.

pub mod ast;
pub mod lexer;
pub mod parser;

use crate::Result;
use ast::Query;
use lexer::TokenKind;

/// Parse a Cypher query string into an AST.
///
/// Comments are dropped before parsing; callers that must refuse them
/// (the validator) inspect the token stream first.
pub fn parse(query: &str) -> Result<Query> {
    let mut tokens = lexer::tokenize(query)?;
    tokens.retain(|t| t.kind != TokenKind::Comment);
    parser::parse_query(&tokens)
}
