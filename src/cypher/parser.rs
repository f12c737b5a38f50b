//! Cypher recursive descent parser.
//!
//! Parses token streams into the read-only AST. Supports:
//! - MATCH / OPTIONAL MATCH with patterns and WHERE
//! - WITH, UNWIND
//! - RETURN with DISTINCT, ORDER BY, SKIP, LIMIT
//! - Full expression parsing with precedence
//!
//! Anything else is a syntax error: there is no write grammar to fall into.

use crate::{Error, Result};
use super::ast::*;
use super::lexer::{Token, TokenKind};

/// Upper bound for `*` and `*n..` relationship ranges.
pub const MAX_VAR_LENGTH: usize = 10;

/// Parser state: wraps a token slice with cursor.
struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
}

impl<'t> Parser<'t> {
    fn new(tokens: &'t [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> &'t Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    fn advance(&mut self) -> &'t Token {
        let tok = &self.tokens[self.pos.min(self.tokens.len() - 1)];
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, kind: TokenKind) -> Result<&'t Token> {
        let tok = self.peek();
        if tok.kind == kind {
            Ok(self.advance())
        } else {
            Err(self.error(format!("Expected {:?}, got {:?} '{}'", kind, tok.kind, tok.text)))
        }
    }

    /// A label, type, key or alias. Keywords are allowed as names here.
    fn expect_name(&mut self) -> Result<String> {
        let tok = self.peek();
        let wordlike = tok.text.chars().next().is_some_and(|c| c.is_alphabetic() || c == '_');
        if wordlike && !matches!(tok.kind, TokenKind::StringLiteral | TokenKind::Parameter | TokenKind::Comment) {
            Ok(self.advance().text.clone())
        } else {
            Err(self.error(format!("Expected a name, got {:?} '{}'", tok.kind, tok.text)))
        }
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&self, msg: String) -> Error {
        Error::SyntaxError {
            position: self.peek().span.start,
            message: msg,
        }
    }
}

/// Parse a complete read query from tokens.
///
/// The grammar has no place for comments: a `Comment` token is a syntax
/// error. `cypher::parse` drops them first, while `QueryValidator` refuses
/// any query that carries one before calling this.
pub fn parse_query(tokens: &[Token]) -> Result<Query> {
    if tokens.is_empty() {
        return Err(Error::SyntaxError { position: 0, message: "Empty token stream".into() });
    }
    let mut p = Parser::new(tokens);
    let mut clauses = Vec::new();

    let ret = loop {
        match p.peek_kind() {
            TokenKind::Match | TokenKind::Optional => clauses.push(Clause::Match(parse_match_clause(&mut p)?)),
            TokenKind::With => {
                p.advance();
                let projection = parse_projection(&mut p)?;
                let where_clause = if p.eat(TokenKind::Where) { Some(parse_expr(&mut p)?) } else { None };
                clauses.push(Clause::With(WithClause { projection, where_clause }));
            }
            TokenKind::Unwind => {
                p.advance();
                let expr = parse_expr(&mut p)?;
                p.expect(TokenKind::As)?;
                let alias = p.expect(TokenKind::Identifier)?.text.clone();
                clauses.push(Clause::Unwind { expr, alias });
            }
            TokenKind::Return => {
                p.advance();
                break parse_projection(&mut p)?;
            }
            kind => return Err(p.error(format!("Unexpected {:?} '{}' in read query", kind, p.peek().text))),
        }
    };

    // Allow optional semicolon + EOF
    p.eat(TokenKind::Semicolon);
    if !p.at(TokenKind::Eof) {
        return Err(p.error(format!("Unexpected token after RETURN: {:?} '{}'", p.peek_kind(), p.peek().text)));
    }

    Ok(Query { clauses, ret })
}

// ============================================================================
// Clause parsers
// ============================================================================

fn parse_match_clause(p: &mut Parser) -> Result<MatchClause> {
    let optional = p.eat(TokenKind::Optional);
    p.expect(TokenKind::Match)?;
    let patterns = parse_pattern_list(p)?;
    let where_clause = if p.eat(TokenKind::Where) { Some(parse_expr(p)?) } else { None };
    Ok(MatchClause { optional, patterns, where_clause })
}

fn parse_projection(p: &mut Parser) -> Result<Projection> {
    let distinct = p.eat(TokenKind::Distinct);
    let mut star = false;
    let mut items = Vec::new();

    if p.eat(TokenKind::Star) {
        star = true;
        if p.eat(TokenKind::Comma) {
            items = parse_return_items(p)?;
        }
    } else {
        items = parse_return_items(p)?;
    }

    let order_by = if p.eat(TokenKind::Order) {
        p.expect(TokenKind::By)?;
        parse_order_by(p)?
    } else {
        Vec::new()
    };
    let skip = if p.eat(TokenKind::Skip) { Some(parse_expr(p)?) } else { None };
    let limit = if p.eat(TokenKind::Limit) { Some(parse_expr(p)?) } else { None };

    Ok(Projection { distinct, star, items, order_by, skip, limit })
}

fn parse_return_items(p: &mut Parser) -> Result<Vec<ReturnItem>> {
    let mut items = vec![parse_return_item(p)?];
    while p.eat(TokenKind::Comma) {
        items.push(parse_return_item(p)?);
    }
    Ok(items)
}

fn parse_return_item(p: &mut Parser) -> Result<ReturnItem> {
    let expr = parse_expr(p)?;
    let alias = if p.eat(TokenKind::As) { Some(p.expect_name()?) } else { None };
    Ok(ReturnItem { expr, alias })
}

fn parse_order_by(p: &mut Parser) -> Result<Vec<OrderExpr>> {
    let mut exprs = vec![parse_order_expr(p)?];
    while p.eat(TokenKind::Comma) {
        exprs.push(parse_order_expr(p)?);
    }
    Ok(exprs)
}

fn parse_order_expr(p: &mut Parser) -> Result<OrderExpr> {
    let expr = parse_expr(p)?;
    let ascending = if p.eat(TokenKind::Desc) {
        false
    } else {
        p.eat(TokenKind::Asc);
        true
    };
    Ok(OrderExpr { expr, ascending })
}

// ============================================================================
// Patterns
// ============================================================================

fn parse_pattern_list(p: &mut Parser) -> Result<Vec<Pattern>> {
    let mut patterns = vec![parse_pattern(p)?];
    while p.eat(TokenKind::Comma) {
        patterns.push(parse_pattern(p)?);
    }
    Ok(patterns)
}

fn parse_pattern(p: &mut Parser) -> Result<Pattern> {
    let start = parse_node_pattern(p)?;
    let mut steps = Vec::new();

    // Then alternating: relationship, node, relationship, node, ...
    while p.at(TokenKind::Dash) || p.at(TokenKind::LeftArrow) {
        let rel = parse_rel_pattern(p)?;
        steps.push((rel, parse_node_pattern(p)?));
    }

    Ok(Pattern { start, steps })
}

fn parse_node_pattern(p: &mut Parser) -> Result<NodePattern> {
    p.expect(TokenKind::LParen)?;

    let alias = if p.at(TokenKind::Identifier) { Some(p.advance().text.clone()) } else { None };

    // Labels: :Label1:Label2
    let mut labels = Vec::new();
    while p.eat(TokenKind::Colon) {
        labels.push(p.expect_name()?);
    }

    let properties = if p.at(TokenKind::LBrace) { parse_map_literal_inner(p)? } else { Vec::new() };

    p.expect(TokenKind::RParen)?;
    Ok(NodePattern { alias, labels, properties })
}

fn parse_rel_pattern(p: &mut Parser) -> Result<RelPattern> {
    // <-[...]- or -[...]-> or -[...]-
    let left_arrow = p.eat(TokenKind::LeftArrow);
    if !left_arrow {
        p.expect(TokenKind::Dash)?;
    }

    let mut alias = None;
    let mut rel_types = Vec::new();
    let mut properties = Vec::new();
    let mut var_length = None;

    if p.eat(TokenKind::LBracket) {
        if p.at(TokenKind::Identifier) {
            alias = Some(p.advance().text.clone());
        }

        // Rel types: :TYPE1|TYPE2
        if p.eat(TokenKind::Colon) {
            rel_types.push(p.expect_name()?);
            while p.eat(TokenKind::Pipe) {
                p.eat(TokenKind::Colon);
                rel_types.push(p.expect_name()?);
            }
        }

        // Variable length: *min..max
        if p.eat(TokenKind::Star) {
            var_length = Some(parse_var_length(p)?);
        }

        if p.at(TokenKind::LBrace) {
            properties = parse_map_literal_inner(p)?;
        }

        p.expect(TokenKind::RBracket)?;
    }

    let direction = if left_arrow {
        p.expect(TokenKind::Dash)?;
        if p.at(TokenKind::Gt) {
            return Err(p.error("Relationship cannot point both ways".into()));
        }
        PatternDirection::Left
    } else if p.eat(TokenKind::Arrow) {
        PatternDirection::Right
    } else {
        p.expect(TokenKind::Dash)?;
        PatternDirection::Both
    };

    Ok(RelPattern { alias, rel_types, direction, properties, var_length })
}

fn parse_range_bound(p: &mut Parser) -> Result<Option<usize>> {
    if !p.at(TokenKind::Integer) {
        return Ok(None);
    }
    let tok = p.advance();
    tok.text
        .parse::<usize>()
        .map(Some)
        .map_err(|_| Error::SyntaxError { position: tok.span.start, message: "Invalid range bound".into() })
}

fn parse_var_length(p: &mut Parser) -> Result<VarLength> {
    let min = parse_range_bound(p)?;
    let range = if p.eat(TokenKind::DotDot) {
        let max = parse_range_bound(p)?;
        VarLength { min: min.unwrap_or(1), max: max.unwrap_or(MAX_VAR_LENGTH) }
    } else {
        match min {
            Some(n) => VarLength { min: n, max: n },
            None => VarLength { min: 1, max: MAX_VAR_LENGTH },
        }
    };

    if range.min > range.max || range.max > MAX_VAR_LENGTH {
        return Err(p.error(format!("Relationship range must lie within 0..{MAX_VAR_LENGTH}")));
    }
    Ok(range)
}

// ============================================================================
// Expression parsing (precedence climbing)
// ============================================================================

fn parse_expr(p: &mut Parser) -> Result<Expr> {
    parse_or_expr(p)
}

fn binary(left: Expr, op: BinaryOp, right: Expr) -> Expr {
    Expr::BinaryOp { left: Box::new(left), op, right: Box::new(right) }
}

fn parse_or_expr(p: &mut Parser) -> Result<Expr> {
    let mut left = parse_xor_expr(p)?;
    while p.eat(TokenKind::Or) {
        left = binary(left, BinaryOp::Or, parse_xor_expr(p)?);
    }
    Ok(left)
}

fn parse_xor_expr(p: &mut Parser) -> Result<Expr> {
    let mut left = parse_and_expr(p)?;
    while p.eat(TokenKind::Xor) {
        left = binary(left, BinaryOp::Xor, parse_and_expr(p)?);
    }
    Ok(left)
}

fn parse_and_expr(p: &mut Parser) -> Result<Expr> {
    let mut left = parse_not_expr(p)?;
    while p.eat(TokenKind::And) {
        left = binary(left, BinaryOp::And, parse_not_expr(p)?);
    }
    Ok(left)
}

fn parse_not_expr(p: &mut Parser) -> Result<Expr> {
    if p.eat(TokenKind::Not) {
        let expr = parse_not_expr(p)?;
        Ok(Expr::UnaryOp { op: UnaryOp::Not, expr: Box::new(expr) })
    } else {
        parse_comparison(p)
    }
}

fn parse_comparison(p: &mut Parser) -> Result<Expr> {
    let mut left = parse_string_op(p)?;

    // IS NULL / IS NOT NULL
    if p.eat(TokenKind::Is) {
        let negated = p.eat(TokenKind::Not);
        p.expect(TokenKind::Null)?;
        return Ok(Expr::IsNull { expr: Box::new(left), negated });
    }

    if p.eat(TokenKind::In) {
        let list = parse_addition(p)?;
        return Ok(Expr::In { expr: Box::new(left), list: Box::new(list) });
    }

    let op = match p.peek_kind() {
        TokenKind::Eq => Some(BinaryOp::Eq),
        TokenKind::Neq => Some(BinaryOp::Neq),
        TokenKind::Lt => Some(BinaryOp::Lt),
        TokenKind::Lte => Some(BinaryOp::Lte),
        TokenKind::Gt => Some(BinaryOp::Gt),
        TokenKind::Gte => Some(BinaryOp::Gte),
        _ => None,
    };

    if let Some(op) = op {
        p.advance();
        left = binary(left, op, parse_string_op(p)?);
    }

    Ok(left)
}

fn parse_string_op(p: &mut Parser) -> Result<Expr> {
    let left = parse_addition(p)?;

    let op = match p.peek_kind() {
        TokenKind::Starts => {
            p.advance();
            p.expect(TokenKind::With)?;
            StringOp::StartsWith
        }
        TokenKind::Ends => {
            p.advance();
            p.expect(TokenKind::With)?;
            StringOp::EndsWith
        }
        TokenKind::Contains => {
            p.advance();
            StringOp::Contains
        }
        _ => return Ok(left),
    };
    let right = parse_addition(p)?;
    Ok(Expr::StringOp { left: Box::new(left), op, right: Box::new(right) })
}

fn parse_addition(p: &mut Parser) -> Result<Expr> {
    let mut left = parse_multiplication(p)?;
    loop {
        let op = match p.peek_kind() {
            TokenKind::Plus => BinaryOp::Add,
            TokenKind::Dash => BinaryOp::Sub,
            _ => break,
        };
        p.advance();
        left = binary(left, op, parse_multiplication(p)?);
    }
    Ok(left)
}

fn parse_multiplication(p: &mut Parser) -> Result<Expr> {
    let mut left = parse_power(p)?;
    loop {
        let op = match p.peek_kind() {
            TokenKind::Star => BinaryOp::Mul,
            TokenKind::Slash => BinaryOp::Div,
            TokenKind::Percent => BinaryOp::Mod,
            _ => break,
        };
        p.advance();
        left = binary(left, op, parse_power(p)?);
    }
    Ok(left)
}

fn parse_power(p: &mut Parser) -> Result<Expr> {
    let left = parse_unary(p)?;
    if p.eat(TokenKind::Caret) {
        let right = parse_power(p)?; // right-associative
        Ok(binary(left, BinaryOp::Pow, right))
    } else {
        Ok(left)
    }
}

fn parse_unary(p: &mut Parser) -> Result<Expr> {
    if p.eat(TokenKind::Dash) {
        let expr = parse_property_access(p)?;
        Ok(Expr::UnaryOp { op: UnaryOp::Negate, expr: Box::new(expr) })
    } else {
        parse_property_access(p)
    }
}

fn parse_property_access(p: &mut Parser) -> Result<Expr> {
    let mut expr = parse_primary(p)?;

    // Property access chain: n.name, n.address.city
    while p.eat(TokenKind::Dot) {
        let key = p.expect_name()?;
        expr = Expr::Property { expr: Box::new(expr), key };
    }

    // Label check: n:Product
    if p.at(TokenKind::Colon) && matches!(expr, Expr::Variable(_)) {
        p.advance();
        let label = p.expect_name()?;
        expr = Expr::HasLabel { expr: Box::new(expr), label };
    }

    Ok(expr)
}

fn parse_primary(p: &mut Parser) -> Result<Expr> {
    match p.peek_kind() {
        TokenKind::Integer => {
            let tok = p.advance();
            let val = tok.text.parse::<i64>().map_err(|_| {
                Error::SyntaxError { position: tok.span.start, message: "Invalid integer".into() }
            })?;
            Ok(Expr::Literal(Literal::Int(val)))
        }
        TokenKind::Float => {
            let tok = p.advance();
            let val = tok.text.parse::<f64>().map_err(|_| {
                Error::SyntaxError { position: tok.span.start, message: "Invalid float".into() }
            })?;
            Ok(Expr::Literal(Literal::Float(val)))
        }
        TokenKind::StringLiteral => Ok(Expr::Literal(Literal::String(p.advance().text.clone()))),
        TokenKind::True => {
            p.advance();
            Ok(Expr::Literal(Literal::Bool(true)))
        }
        TokenKind::False => {
            p.advance();
            Ok(Expr::Literal(Literal::Bool(false)))
        }
        TokenKind::Null => {
            p.advance();
            Ok(Expr::Literal(Literal::Null))
        }
        TokenKind::Parameter => Ok(Expr::Parameter(p.advance().text.clone())),

        TokenKind::LParen => {
            p.advance();
            let expr = parse_expr(p)?;
            p.expect(TokenKind::RParen)?;
            Ok(expr)
        }

        TokenKind::LBracket => {
            p.advance();
            let mut items = Vec::new();
            if !p.at(TokenKind::RBracket) {
                items.push(parse_expr(p)?);
                while p.eat(TokenKind::Comma) {
                    items.push(parse_expr(p)?);
                }
            }
            p.expect(TokenKind::RBracket)?;
            Ok(Expr::List(items))
        }

        TokenKind::LBrace => Ok(Expr::MapLiteral(parse_map_literal_inner(p)?)),

        TokenKind::Case => {
            p.advance();
            let operand = if !p.at(TokenKind::When) { Some(Box::new(parse_expr(p)?)) } else { None };
            let mut whens = Vec::new();
            while p.eat(TokenKind::When) {
                let when_expr = parse_expr(p)?;
                p.expect(TokenKind::Then)?;
                whens.push((when_expr, parse_expr(p)?));
            }
            if whens.is_empty() {
                return Err(p.error("CASE requires at least one WHEN".into()));
            }
            let else_expr = if p.eat(TokenKind::Else) { Some(Box::new(parse_expr(p)?)) } else { None };
            p.expect(TokenKind::End)?;
            Ok(Expr::Case { operand, whens, else_expr })
        }

        // Variable or function call
        TokenKind::Identifier | TokenKind::Count => {
            let tok = p.advance();
            if !p.eat(TokenKind::LParen) {
                if tok.kind == TokenKind::Count {
                    return Err(p.error("Expected '(' after count".into()));
                }
                return Ok(Expr::Variable(tok.text.clone()));
            }

            let distinct = p.eat(TokenKind::Distinct);
            if tok.kind == TokenKind::Count && !distinct && p.eat(TokenKind::Star) {
                p.expect(TokenKind::RParen)?;
                return Ok(Expr::CountStar);
            }

            let mut args = Vec::new();
            if !p.at(TokenKind::RParen) {
                args.push(parse_expr(p)?);
                while p.eat(TokenKind::Comma) {
                    args.push(parse_expr(p)?);
                }
            }
            p.expect(TokenKind::RParen)?;
            Ok(Expr::FunctionCall { name: tok.text.clone(), args, distinct })
        }

        _ => Err(p.error(format!("Unexpected token in expression: {:?} '{}'", p.peek_kind(), p.peek().text))),
    }
}

fn parse_map_literal_inner(p: &mut Parser) -> Result<Vec<(String, Expr)>> {
    p.expect(TokenKind::LBrace)?;
    let mut entries = Vec::new();
    if !p.at(TokenKind::RBrace) {
        loop {
            let key = p.expect_name()?;
            p.expect(TokenKind::Colon)?;
            entries.push((key, parse_expr(p)?));
            if !p.eat(TokenKind::Comma) {
                break;
            }
        }
    }
    p.expect(TokenKind::RBrace)?;
    Ok(entries)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use crate::cypher::ast::*;
    use crate::cypher::parse;

    fn only_match(q: &Query) -> &MatchClause {
        match &q.clauses[..] {
            [Clause::Match(m)] => m,
            other => panic!("expected one MATCH, got {other:?}"),
        }
    }

    #[test]
    fn test_comment_tokens_are_not_grammar() {
        let tokens = crate::cypher::lexer::tokenize("MATCH (n) /* note */ RETURN n").unwrap();
        assert!(super::parse_query(&tokens).is_err());
        assert!(parse("MATCH (n) /* note */ RETURN n").is_ok());
    }

    #[test]
    fn test_simple_match_return() {
        let q = parse("MATCH (n:Product) RETURN n").unwrap();
        let m = only_match(&q);
        assert_eq!(m.patterns.len(), 1);
        assert_eq!(m.patterns[0].start.labels, vec!["Product"]);
        assert_eq!(q.ret.items.len(), 1);
    }

    #[test]
    fn test_brand_pattern_with_inline_properties() {
        let q = parse(
            "MATCH (p:Product)-[:BRAND]->(b:Brand {name: 'MSI'}) \
             WHERE p.category = 'Anakart' RETURN p.name ORDER BY p.name LIMIT 20",
        )
        .unwrap();
        let m = only_match(&q);
        let (rel, brand) = &m.patterns[0].steps[0];
        assert_eq!(rel.rel_types, vec!["BRAND"]);
        assert_eq!(rel.direction, PatternDirection::Right);
        assert_eq!(brand.properties[0].0, "name");
        assert!(m.where_clause.is_some());
        assert_eq!(q.ret.items[0].column_name(), "p.name");
        assert_eq!(q.ret.order_by.len(), 1);
        assert_eq!(q.ret.limit, Some(Expr::Literal(Literal::Int(20))));
    }

    #[test]
    fn test_optional_match_and_with() {
        let q = parse(
            "MATCH (b:Brand) OPTIONAL MATCH (b)<-[:BRAND]-(p) WITH b, count(p) AS products \
             WHERE products > 1 RETURN b.name, products",
        )
        .unwrap();
        assert_eq!(q.clauses.len(), 3);
        assert!(matches!(&q.clauses[1], Clause::Match(m) if m.optional));
        match &q.clauses[2] {
            Clause::With(w) => {
                assert!(w.projection.items[1].expr.is_aggregate());
                assert!(w.where_clause.is_some());
            }
            other => panic!("expected WITH, got {other:?}"),
        }
    }

    #[test]
    fn test_count_star_and_alias_keyword() {
        let q = parse("MATCH (p:Product) RETURN count(*) AS count").unwrap();
        assert_eq!(q.ret.items[0].expr, Expr::CountStar);
        assert_eq!(q.ret.items[0].column_name(), "count");
    }

    #[test]
    fn test_variable_length() {
        let q = parse("MATCH (a)-[:LINK*1..3]-(b) RETURN b").unwrap();
        let rel = &only_match(&q).patterns[0].steps[0].0;
        assert_eq!(rel.var_length, Some(VarLength { min: 1, max: 3 }));
        assert_eq!(rel.direction, PatternDirection::Both);
    }

    #[test]
    fn test_string_ops() {
        let q = parse("MATCH (p) WHERE toLower(p.name) STARTS WITH 'b6' OR p.name CONTAINS 'X' RETURN p").unwrap();
        let w = only_match(&q).where_clause.as_ref().unwrap();
        assert_eq!(w.to_string(), "toLower(p.name) STARTS WITH 'b6' OR p.name CONTAINS 'X'");
    }

    #[test]
    fn test_write_clauses_are_syntax_errors() {
        for q in [
            "MATCH (n) DELETE n",
            "MATCH (n) SET n.x = 1 RETURN n",
            "CREATE (n:Product) RETURN n",
            "MATCH (n) DETACH DELETE n RETURN 1",
            "CALL db.labels() YIELD label RETURN label",
            "MATCH (n) RETURN n UNION MATCH (m) RETURN m",
            "MATCH (n) RETURN apoc.text.join(n.name)",
        ] {
            assert!(parse(q).is_err(), "should not parse: {q}");
        }
    }

    #[test]
    fn test_trailing_garbage_rejected() {
        assert!(parse("MATCH (n) RETURN n; MATCH (m) RETURN m").is_err());
        assert!(parse("MATCH (n) RETURN n;").is_ok());
    }

    #[test]
    fn test_comments_are_skipped_by_parse() {
        assert!(parse("MATCH (n) /* note */ RETURN n").is_ok());
    }

    #[test]
    fn test_range_bound_enforced() {
        assert!(parse("MATCH (a)-[*1..50]->(b) RETURN b").is_err());
        assert!(parse("MATCH (a)-[*3..1]->(b) RETURN b").is_err());
    }
}
