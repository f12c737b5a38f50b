//! Cypher AST for the read-only dialect.
//!
//! These types represent parsed queries. They are pure data;
//! no behavior beyond rendering, no storage references.

use std::fmt;

/// A read query: reading clauses followed by a RETURN projection.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub clauses: Vec<Clause>,
    pub ret: Projection,
}

/// Reading clauses, in source order.
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    Match(MatchClause),
    With(WithClause),
    Unwind { expr: Expr, alias: String },
}

/// MATCH clause with pattern and optional WHERE.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchClause {
    pub optional: bool,
    pub patterns: Vec<Pattern>,
    pub where_clause: Option<Expr>,
}

/// A pattern: (a:Product)-[:BRAND]->(b:Brand)
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    pub start: NodePattern,
    pub steps: Vec<(RelPattern, NodePattern)>,
}

/// Node pattern: (alias:Label1:Label2 {prop: value})
#[derive(Debug, Clone, PartialEq)]
pub struct NodePattern {
    pub alias: Option<String>,
    pub labels: Vec<String>,
    pub properties: Vec<(String, Expr)>,
}

/// Relationship pattern: -[alias:TYPE *min..max {props}]->
#[derive(Debug, Clone, PartialEq)]
pub struct RelPattern {
    pub alias: Option<String>,
    pub rel_types: Vec<String>,
    pub direction: PatternDirection,
    pub properties: Vec<(String, Expr)>,
    pub var_length: Option<VarLength>,
}

/// Pattern direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternDirection {
    /// ->
    Right,
    /// <-
    Left,
    /// - (undirected)
    Both,
}

/// Variable-length path specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarLength {
    pub min: usize,
    pub max: usize,
}

/// Shared shape of WITH and RETURN.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub distinct: bool,
    /// `RETURN *` / `WITH *`
    pub star: bool,
    pub items: Vec<ReturnItem>,
    pub order_by: Vec<OrderExpr>,
    pub skip: Option<Expr>,
    pub limit: Option<Expr>,
}

/// WITH clause (pipeline boundary).
#[derive(Debug, Clone, PartialEq)]
pub struct WithClause {
    pub projection: Projection,
    pub where_clause: Option<Expr>,
}

/// Single item in RETURN or WITH.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnItem {
    pub expr: Expr,
    pub alias: Option<String>,
}

impl ReturnItem {
    /// Column name: the alias, or the expression as written.
    pub fn column_name(&self) -> String {
        self.alias.clone().unwrap_or_else(|| self.expr.to_string())
    }
}

/// ORDER BY expression.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderExpr {
    pub expr: Expr,
    pub ascending: bool,
}

// ============================================================================
// Expressions
// ============================================================================

/// Expression in Cypher.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Literal value
    Literal(Literal),
    /// Variable reference: `n`, `r`
    Variable(String),
    /// Property access: `n.name`
    Property { expr: Box<Expr>, key: String },
    /// Parameter: `$name`
    Parameter(String),
    /// Function call: `count(n)`, `toLower(b.name)`
    FunctionCall { name: String, args: Vec<Expr>, distinct: bool },
    /// `count(*)`
    CountStar,
    /// Binary operation: `a + b`, `a = b`, `a AND b`
    BinaryOp { left: Box<Expr>, op: BinaryOp, right: Box<Expr> },
    /// Unary operation: `NOT a`, `-a`
    UnaryOp { op: UnaryOp, expr: Box<Expr> },
    /// List: `[1, 2, 3]`
    List(Vec<Expr>),
    /// Map: `{name: 'MSI'}`
    MapLiteral(Vec<(String, Expr)>),
    /// CASE expression
    Case { operand: Option<Box<Expr>>, whens: Vec<(Expr, Expr)>, else_expr: Option<Box<Expr>> },
    /// IN predicate: `x IN [1, 2, 3]`
    In { expr: Box<Expr>, list: Box<Expr> },
    /// IS NULL / IS NOT NULL
    IsNull { expr: Box<Expr>, negated: bool },
    /// Label check: `n:Product`
    HasLabel { expr: Box<Expr>, label: String },
    /// STARTS WITH, ENDS WITH, CONTAINS
    StringOp { left: Box<Expr>, op: StringOp, right: Box<Expr> },
}

impl Expr {
    /// True when the expression contains an aggregate call.
    pub fn is_aggregate(&self) -> bool {
        match self {
            Expr::CountStar => true,
            Expr::FunctionCall { name, args, .. } => {
                AGGREGATES.contains(&name.to_ascii_lowercase().as_str())
                    || args.iter().any(Expr::is_aggregate)
            }
            Expr::Property { expr, .. } | Expr::UnaryOp { expr, .. } | Expr::IsNull { expr, .. }
            | Expr::HasLabel { expr, .. } => expr.is_aggregate(),
            Expr::BinaryOp { left, right, .. } | Expr::StringOp { left, right, .. } => {
                left.is_aggregate() || right.is_aggregate()
            }
            Expr::In { expr, list } => expr.is_aggregate() || list.is_aggregate(),
            Expr::List(items) => items.iter().any(Expr::is_aggregate),
            Expr::MapLiteral(entries) => entries.iter().any(|(_, e)| e.is_aggregate()),
            Expr::Case { operand, whens, else_expr } => {
                operand.as_deref().is_some_and(Expr::is_aggregate)
                    || whens.iter().any(|(w, t)| w.is_aggregate() || t.is_aggregate())
                    || else_expr.as_deref().is_some_and(Expr::is_aggregate)
            }
            Expr::Literal(_) | Expr::Variable(_) | Expr::Parameter(_) => false,
        }
    }
}

/// Aggregate function names (lower-case).
pub const AGGREGATES: &[&str] = &["count", "collect", "sum", "avg", "min", "max"];

/// Literal values.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    // Arithmetic
    Add, Sub, Mul, Div, Mod, Pow,
    // Comparison
    Eq, Neq, Lt, Lte, Gt, Gte,
    // Logical
    And, Or, Xor,
}

impl BinaryOp {
    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "^",
            BinaryOp::Eq => "=",
            BinaryOp::Neq => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Lte => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Gte => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Xor => "XOR",
        }
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negate,
}

/// String-specific operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringOp {
    StartsWith,
    EndsWith,
    Contains,
}

// ============================================================================
// Rendering (column names)
// ============================================================================

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => f.write_str("null"),
            Literal::Bool(b) => write!(f, "{b}"),
            Literal::Int(i) => write!(f, "{i}"),
            Literal::Float(x) => write!(f, "{x}"),
            Literal::String(s) => write!(f, "'{}'", s.replace('\'', "\\'")),
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Expr]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(l) => write!(f, "{l}"),
            Expr::Variable(v) => f.write_str(v),
            Expr::Property { expr, key } => write!(f, "{expr}.{key}"),
            Expr::Parameter(p) => write!(f, "${p}"),
            Expr::FunctionCall { name, args, distinct } => {
                write!(f, "{name}(")?;
                if *distinct {
                    f.write_str("DISTINCT ")?;
                }
                write_list(f, args)?;
                f.write_str(")")
            }
            Expr::CountStar => f.write_str("count(*)"),
            Expr::BinaryOp { left, op, right } => write!(f, "{left} {} {right}", op.symbol()),
            Expr::UnaryOp { op: UnaryOp::Not, expr } => write!(f, "NOT {expr}"),
            Expr::UnaryOp { op: UnaryOp::Negate, expr } => write!(f, "-{expr}"),
            Expr::List(items) => {
                f.write_str("[")?;
                write_list(f, items)?;
                f.write_str("]")
            }
            Expr::MapLiteral(entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str("}")
            }
            Expr::Case { operand, whens, else_expr } => {
                f.write_str("CASE")?;
                if let Some(op) = operand {
                    write!(f, " {op}")?;
                }
                for (w, t) in whens {
                    write!(f, " WHEN {w} THEN {t}")?;
                }
                if let Some(e) = else_expr {
                    write!(f, " ELSE {e}")?;
                }
                f.write_str(" END")
            }
            Expr::In { expr, list } => write!(f, "{expr} IN {list}"),
            Expr::IsNull { expr, negated: false } => write!(f, "{expr} IS NULL"),
            Expr::IsNull { expr, negated: true } => write!(f, "{expr} IS NOT NULL"),
            Expr::HasLabel { expr, label } => write!(f, "{expr}:{label}"),
            Expr::StringOp { left, op, right } => {
                let op = match op {
                    StringOp::StartsWith => "STARTS WITH",
                    StringOp::EndsWith => "ENDS WITH",
                    StringOp::Contains => "CONTAINS",
                };
                write!(f, "{left} {op} {right}")
            }
        }
    }
}
