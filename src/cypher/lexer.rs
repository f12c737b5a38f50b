//! Cypher lexer. Tokenizes a query string.
//!
//! Comments are emitted as `Comment` tokens rather than skipped: generated
//! queries are untrusted, and the validator needs to see every place text
//! could hide.

use crate::{Error, Result};

/// A token from the lexer.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    pub text: String,
}

/// Source span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// Token kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    // Read keywords
    Match, Optional, Where, Return, With, Unwind,
    Order, By, Skip, Limit, Asc, Desc, Distinct,
    And, Or, Not, Xor, Is, Null, True, False, In,
    As, Starts, Ends, Contains, Count,
    Case, When, Then, Else, End, Union, Exists,

    // Mutation / administrative keywords
    Create, Merge, Delete, Detach, Set, Remove, Drop, Foreach,
    Load, Csv, Call, Yield, Index, Constraint, Database,
    Grant, Revoke, Deny, Alter, Rename, Terminate,
    Periodic, Commit, Use,

    // Literals
    Integer, Float, StringLiteral,

    // Identifiers and parameters
    Identifier, Parameter,

    // Punctuation
    LParen, RParen, LBracket, RBracket, LBrace, RBrace,
    Dot, Comma, Colon, Semicolon, Pipe, Star,
    Arrow,      // ->
    LeftArrow,  // <-
    Dash,       // -
    DotDot,     // ..

    // Operators
    Eq, Neq, Lt, Lte, Gt, Gte,
    Plus, Slash, Percent, Caret,

    // `// ...` or `/* ... */`
    Comment,

    Eof,
}

impl TokenKind {
    /// Keywords that change data or schema, or reach outside the graph.
    pub fn is_denied(self) -> bool {
        matches!(self,
            TokenKind::Create | TokenKind::Merge | TokenKind::Delete | TokenKind::Detach |
            TokenKind::Set | TokenKind::Remove | TokenKind::Drop | TokenKind::Foreach |
            TokenKind::Load | TokenKind::Csv | TokenKind::Call | TokenKind::Yield |
            TokenKind::Index | TokenKind::Constraint | TokenKind::Database |
            TokenKind::Grant | TokenKind::Revoke | TokenKind::Deny | TokenKind::Alter |
            TokenKind::Rename | TokenKind::Terminate | TokenKind::Periodic |
            TokenKind::Commit | TokenKind::Use
        )
    }
}

/// Tokenize a Cypher query string. The last token is always `Eof`.
pub fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut lexer = Lexer { src: input, pos: 0, out: Vec::new() };
    while let Some(c) = lexer.peek() {
        lexer.step(c)?;
    }
    lexer.out.push(Token { kind: TokenKind::Eof, span: Span { start: input.len(), end: input.len() }, text: String::new() });
    Ok(lexer.out)
}

/// Byte cursor over the query. `pos` always sits on a char boundary.
struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    out: Vec<Token>,
}

impl Lexer<'_> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.src[self.pos..].chars().nth(n)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    /// Advance while `keep` holds and return the consumed slice.
    fn take_while(&mut self, keep: impl Fn(char) -> bool) -> &str {
        let start = self.pos;
        while self.peek().is_some_and(&keep) {
            self.bump();
        }
        &self.src[start..self.pos]
    }

    fn emit(&mut self, kind: TokenKind, start: usize, text: impl Into<String>) {
        self.out.push(Token { kind, span: Span { start, end: self.pos }, text: text.into() });
    }

    fn error(position: usize, message: &str) -> Error {
        Error::SyntaxError { position, message: message.into() }
    }

    fn step(&mut self, c: char) -> Result<()> {
        let start = self.pos;
        match (c, self.peek_at(1)) {
            (c, _) if c.is_whitespace() => {
                self.bump();
            }
            ('/', Some('*')) => self.block_comment(start)?,
            ('/', Some('/')) => {
                self.pos += 2;
                let body = self.take_while(|c| c != '\n').to_string();
                self.emit(TokenKind::Comment, start, body);
            }
            ('\'' | '"', _) => self.string(start, c)?,
            (c, _) if c.is_ascii_digit() => self.number(start),
            ('$', _) => {
                self.bump();
                let name = self.take_while(|c| c.is_alphanumeric() || c == '_').to_string();
                if name.is_empty() {
                    return Err(Self::error(start, "Empty parameter name"));
                }
                self.emit(TokenKind::Parameter, start, name);
            }
            (c, _) if c.is_alphabetic() || c == '_' => {
                let word = self.take_while(|c| c.is_alphanumeric() || c == '_').to_string();
                self.emit(keyword_or_ident(&word), start, word);
            }
            _ => self.symbol(start, c)?,
        }
        Ok(())
    }

    fn block_comment(&mut self, start: usize) -> Result<()> {
        let body_start = start + 2;
        match self.src[body_start..].find("*/") {
            Some(len) => {
                self.pos = body_start + len + 2;
                let body = self.src[body_start..body_start + len].to_string();
                self.emit(TokenKind::Comment, start, body);
                Ok(())
            }
            None => Err(Self::error(start, "Unterminated block comment")),
        }
    }

    fn string(&mut self, start: usize, quote: char) -> Result<()> {
        self.bump();
        let mut value = String::new();
        loop {
            match self.bump() {
                Some('\\') => match self.bump() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some('\\') => value.push('\\'),
                    Some(c) if c == quote => value.push(c),
                    Some(c) => {
                        value.push('\\');
                        value.push(c);
                    }
                    None => return Err(Self::error(start, "Unterminated string literal")),
                },
                Some(c) if c == quote => break,
                Some(c) => value.push(c),
                None => return Err(Self::error(start, "Unterminated string literal")),
            }
        }
        self.emit(TokenKind::StringLiteral, start, value);
        Ok(())
    }

    /// `1..3` is a range, so a dot only starts a fraction when a digit
    /// follows it.
    fn number(&mut self, start: usize) {
        self.take_while(|c| c.is_ascii_digit());
        let mut kind = TokenKind::Integer;
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
            self.take_while(|c| c.is_ascii_digit());
            kind = TokenKind::Float;
        }
        let text = self.src[start..self.pos].to_string();
        self.emit(kind, start, text);
    }

    fn symbol(&mut self, start: usize, c: char) -> Result<()> {
        let two = (c, self.peek_at(1));
        let (kind, len) = match two {
            ('.', Some('.')) => (TokenKind::DotDot, 2),
            ('<', Some('=')) => (TokenKind::Lte, 2),
            ('<', Some('-')) => (TokenKind::LeftArrow, 2),
            ('<', Some('>')) => (TokenKind::Neq, 2),
            ('>', Some('=')) => (TokenKind::Gte, 2),
            ('-', Some('>')) => (TokenKind::Arrow, 2),
            _ => match SYMBOLS.iter().find(|(sym, _)| *sym == c) {
                Some(&(_, kind)) => (kind, 1),
                // Backtick-quoted names can spell anything; not part of the dialect.
                None => {
                    return Err(Error::SyntaxError { position: start, message: format!("Unexpected character: '{c}'") });
                }
            },
        };
        self.pos += len;
        let text = self.src[start..self.pos].to_string();
        self.emit(kind, start, text);
        Ok(())
    }
}

const SYMBOLS: &[(char, TokenKind)] = &[
    ('(', TokenKind::LParen), (')', TokenKind::RParen),
    ('[', TokenKind::LBracket), (']', TokenKind::RBracket),
    ('{', TokenKind::LBrace), ('}', TokenKind::RBrace),
    (',', TokenKind::Comma), (':', TokenKind::Colon), (';', TokenKind::Semicolon),
    ('|', TokenKind::Pipe), ('*', TokenKind::Star), ('.', TokenKind::Dot),
    ('+', TokenKind::Plus), ('-', TokenKind::Dash), ('/', TokenKind::Slash),
    ('%', TokenKind::Percent), ('^', TokenKind::Caret),
    ('=', TokenKind::Eq), ('<', TokenKind::Lt), ('>', TokenKind::Gt),
];

const KEYWORDS: &[(&str, TokenKind)] = &[
    ("MATCH", TokenKind::Match), ("OPTIONAL", TokenKind::Optional), ("WHERE", TokenKind::Where),
    ("RETURN", TokenKind::Return), ("WITH", TokenKind::With), ("UNWIND", TokenKind::Unwind),
    ("ORDER", TokenKind::Order), ("BY", TokenKind::By), ("SKIP", TokenKind::Skip),
    ("LIMIT", TokenKind::Limit), ("ASC", TokenKind::Asc), ("ASCENDING", TokenKind::Asc),
    ("DESC", TokenKind::Desc), ("DESCENDING", TokenKind::Desc), ("DISTINCT", TokenKind::Distinct),
    ("AND", TokenKind::And), ("OR", TokenKind::Or), ("NOT", TokenKind::Not), ("XOR", TokenKind::Xor),
    ("IS", TokenKind::Is), ("NULL", TokenKind::Null), ("TRUE", TokenKind::True),
    ("FALSE", TokenKind::False), ("IN", TokenKind::In), ("AS", TokenKind::As),
    ("STARTS", TokenKind::Starts), ("ENDS", TokenKind::Ends), ("CONTAINS", TokenKind::Contains),
    ("COUNT", TokenKind::Count), ("CASE", TokenKind::Case), ("WHEN", TokenKind::When),
    ("THEN", TokenKind::Then), ("ELSE", TokenKind::Else), ("END", TokenKind::End),
    ("UNION", TokenKind::Union), ("EXISTS", TokenKind::Exists),
    // denied
    ("CREATE", TokenKind::Create), ("MERGE", TokenKind::Merge), ("DELETE", TokenKind::Delete),
    ("DETACH", TokenKind::Detach), ("SET", TokenKind::Set), ("REMOVE", TokenKind::Remove),
    ("DROP", TokenKind::Drop), ("FOREACH", TokenKind::Foreach), ("LOAD", TokenKind::Load),
    ("CSV", TokenKind::Csv), ("CALL", TokenKind::Call), ("YIELD", TokenKind::Yield),
    ("INDEX", TokenKind::Index), ("CONSTRAINT", TokenKind::Constraint), ("DATABASE", TokenKind::Database),
    ("GRANT", TokenKind::Grant), ("REVOKE", TokenKind::Revoke), ("DENY", TokenKind::Deny),
    ("ALTER", TokenKind::Alter), ("RENAME", TokenKind::Rename), ("TERMINATE", TokenKind::Terminate),
    ("PERIODIC", TokenKind::Periodic), ("COMMIT", TokenKind::Commit), ("USE", TokenKind::Use),
];

fn keyword_or_ident(word: &str) -> TokenKind {
    KEYWORDS
        .iter()
        .find(|(kw, _)| kw.eq_ignore_ascii_case(word))
        .map_or(TokenKind::Identifier, |&(_, kind)| kind)
}
