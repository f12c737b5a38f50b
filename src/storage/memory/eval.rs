//! Read-dialect evaluator for `MemoryGraph`.
//!
//! Rows are variable bindings; each clause maps a row set to a new one.
//! Scans follow node and relationship id order, so equal inputs give equal
//! outputs.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use crate::cypher::ast::*;
use crate::execution::{QueryResult, ResultRow};
use crate::model::*;
use crate::{Error, Result};
use super::GraphStore;

type Row = BTreeMap<String, Value>;

/// Evaluate a parsed query against a store snapshot.
pub(super) fn evaluate(store: &GraphStore, query: &Query, params: &PropertyMap) -> Result<QueryResult> {
    let ctx = Ctx { store, params };
    let mut rows = vec![Row::new()];
    for clause in &query.clauses {
        rows = match clause {
            Clause::Match(m) => ctx.match_clause(rows, m)?,
            Clause::With(w) => {
                let (_, projected) = ctx.project(rows, &w.projection)?;
                ctx.filter(projected, w.where_clause.as_ref())?
            }
            Clause::Unwind { expr, alias } => ctx.unwind(rows, expr, alias)?,
        };
    }
    let (columns, rows) = ctx.project(rows, &query.ret)?;
    Ok(QueryResult {
        columns,
        rows: rows.into_iter().map(|values| ResultRow { values }).collect(),
        stats: Default::default(),
    })
}

fn failure(msg: impl Into<String>) -> Error {
    Error::ExecutionError(msg.into())
}

fn type_error(expected: &str, got: &Value) -> Error {
    Error::TypeError { expected: expected.into(), got: got.type_name().into() }
}

struct Ctx<'a> {
    store: &'a GraphStore,
    params: &'a PropertyMap,
}

// ============================================================================
// Clauses
// ============================================================================

impl<'a> Ctx<'a> {
    fn match_clause(&self, rows: Vec<Row>, m: &MatchClause) -> Result<Vec<Row>> {
        let mut out = Vec::new();
        for row in rows {
            let mut candidates = vec![row.clone()];
            for pattern in &m.patterns {
                let mut next = Vec::new();
                for r in candidates {
                    self.match_pattern(r, pattern, &mut next)?;
                }
                candidates = next;
            }
            let matched = self.filter(candidates, m.where_clause.as_ref())?;
            if matched.is_empty() && m.optional {
                let mut row = row;
                for var in pattern_variables(&m.patterns) {
                    row.entry(var).or_insert(Value::Null);
                }
                out.push(row);
            } else {
                out.extend(matched);
            }
        }
        Ok(out)
    }

    fn filter(&self, rows: Vec<Row>, predicate: Option<&Expr>) -> Result<Vec<Row>> {
        let Some(predicate) = predicate else { return Ok(rows) };
        let mut kept = Vec::with_capacity(rows.len());
        for row in rows {
            if matches!(self.eval(predicate, &row)?, Value::Bool(true)) {
                kept.push(row);
            }
        }
        Ok(kept)
    }

    fn unwind(&self, rows: Vec<Row>, expr: &Expr, alias: &str) -> Result<Vec<Row>> {
        let mut out = Vec::new();
        for row in rows {
            let items = match self.eval(expr, &row)? {
                Value::List(items) => items,
                Value::Null => Vec::new(),
                other => vec![other],
            };
            for item in items {
                let mut r = row.clone();
                r.insert(alias.to_string(), item);
                out.push(r);
            }
        }
        Ok(out)
    }

    // ========================================================================
    // Pattern matching
    // ========================================================================

    fn match_pattern(&self, row: Row, pattern: &Pattern, out: &mut Vec<Row>) -> Result<()> {
        for node in self.start_candidates(&row, &pattern.start)? {
            if let Some(bound) = self.bind_node(&row, &pattern.start, node)? {
                let mut used = Vec::new();
                self.walk(bound, node, &pattern.steps, &mut used, out)?;
            }
        }
        Ok(())
    }

    fn start_candidates(&self, row: &Row, np: &NodePattern) -> Result<Vec<&'a Node>> {
        if let Some(bound) = np.alias.as_ref().and_then(|a| row.get(a)) {
            return match bound {
                Value::Node(n) => Ok(self.store.node(n.id).into_iter().collect()),
                Value::Null => Ok(Vec::new()),
                other => Err(type_error("Node", other)),
            };
        }
        Ok(match np.labels.first() {
            Some(label) => self.store.nodes_with_label(label).collect(),
            None => self.store.nodes().collect(),
        })
    }

    fn properties_match(&self, row: &Row, wanted: &[(String, Expr)], actual: &PropertyMap) -> Result<bool> {
        for (key, expr) in wanted {
            let expected = self.eval(expr, row)?;
            let found = actual.get(key).unwrap_or(&Value::Null);
            if found.neo4j_eq(&expected) != Some(true) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn bind_node(&self, row: &Row, np: &NodePattern, node: &Node) -> Result<Option<Row>> {
        if !np.labels.iter().all(|l| node.has_label(l)) {
            return Ok(None);
        }
        if !self.properties_match(row, &np.properties, &node.properties)? {
            return Ok(None);
        }
        let Some(alias) = &np.alias else { return Ok(Some(row.clone())) };
        match row.get(alias) {
            Some(Value::Node(existing)) if existing.id == node.id => Ok(Some(row.clone())),
            Some(_) => Ok(None),
            None => {
                let mut r = row.clone();
                r.insert(alias.clone(), Value::Node(Box::new(node.clone())));
                Ok(Some(r))
            }
        }
    }

    fn bind_rel(&self, row: &Row, rp: &RelPattern, value: Value) -> Option<Row> {
        let Some(alias) = &rp.alias else { return Some(row.clone()) };
        match row.get(alias) {
            Some(existing) if existing.neo4j_eq(&value) == Some(true) => Some(row.clone()),
            Some(_) => None,
            None => {
                let mut r = row.clone();
                r.insert(alias.clone(), value);
                Some(r)
            }
        }
    }

    /// The node reached by following `rel` from `from`, if the pattern allows it.
    fn follows(&self, row: &Row, rel: &Relationship, from: NodeId, rp: &RelPattern) -> Result<Option<NodeId>> {
        if !rp.rel_types.is_empty() && !rp.rel_types.iter().any(|t| *t == rel.rel_type) {
            return Ok(None);
        }
        let next = match rp.direction {
            PatternDirection::Right => (rel.src == from).then_some(rel.dst),
            PatternDirection::Left => (rel.dst == from).then_some(rel.src),
            PatternDirection::Both => rel.other_node(from),
        };
        if next.is_none() || !self.properties_match(row, &rp.properties, &rel.properties)? {
            return Ok(None);
        }
        Ok(next)
    }

    fn walk(
        &self,
        row: Row,
        current: &'a Node,
        steps: &[(RelPattern, NodePattern)],
        used: &mut Vec<RelId>,
        out: &mut Vec<Row>,
    ) -> Result<()> {
        let Some(((rp, np), rest)) = steps.split_first() else {
            out.push(row);
            return Ok(());
        };

        if let Some(range) = rp.var_length {
            let mut path = Vec::new();
            return self.expand(&row, current, (rp, np), rest, range, &mut path, used, out);
        }

        for rel in self.store.relationships_of(current.id) {
            if used.contains(&rel.id) {
                continue;
            }
            let Some(next_id) = self.follows(&row, rel, current.id, rp)? else { continue };
            let Some(next) = self.store.node(next_id) else { continue };
            let Some(r) = self.bind_rel(&row, rp, Value::Relationship(Box::new(rel.clone()))) else { continue };
            let Some(r) = self.bind_node(&r, np, next)? else { continue };
            used.push(rel.id);
            self.walk(r, next, rest, used, out)?;
            used.pop();
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn expand(
        &self,
        row: &Row,
        current: &'a Node,
        step: (&RelPattern, &NodePattern),
        rest: &[(RelPattern, NodePattern)],
        range: VarLength,
        path: &mut Vec<&'a Relationship>,
        used: &mut Vec<RelId>,
        out: &mut Vec<Row>,
    ) -> Result<()> {
        let (rp, np) = step;
        if path.len() >= range.min {
            let rels = Value::List(path.iter().map(|r| Value::Relationship(Box::new((*r).clone()))).collect());
            if let Some(r) = self.bind_rel(row, rp, rels) {
                if let Some(r) = self.bind_node(&r, np, current)? {
                    self.walk(r, current, rest, used, out)?;
                }
            }
        }
        if path.len() == range.max {
            return Ok(());
        }
        for rel in self.store.relationships_of(current.id) {
            if used.contains(&rel.id) {
                continue;
            }
            let Some(next_id) = self.follows(row, rel, current.id, rp)? else { continue };
            let Some(next) = self.store.node(next_id) else { continue };
            used.push(rel.id);
            path.push(rel);
            self.expand(row, next, step, rest, range, path, used, out)?;
            path.pop();
            used.pop();
        }
        Ok(())
    }

    // ========================================================================
    // Projection (WITH / RETURN)
    // ========================================================================

    fn project(&self, rows: Vec<Row>, proj: &Projection) -> Result<(Vec<String>, Vec<Row>)> {
        let mut items: Vec<ReturnItem> = Vec::new();
        if proj.star {
            let vars: BTreeSet<&String> = rows.iter().flat_map(|r| r.keys()).collect();
            items.extend(vars.into_iter().map(|v| ReturnItem { expr: Expr::Variable(v.clone()), alias: None }));
        }
        items.extend(proj.items.iter().cloned());
        if items.is_empty() {
            return Err(failure("projection has no columns"));
        }

        let columns: Vec<String> = items.iter().map(ReturnItem::column_name).collect();
        let distinct_columns: BTreeSet<&String> = columns.iter().collect();
        if distinct_columns.len() != columns.len() {
            return Err(failure("duplicate column names in projection"));
        }

        // (scope visible to ORDER BY, projected row)
        let mut entries: Vec<(Row, Row)> = if items.iter().any(|i| i.expr.is_aggregate()) {
            self.aggregate(rows, &items, &columns)?
        } else {
            let mut entries = Vec::with_capacity(rows.len());
            for row in rows {
                let mut projected = Row::new();
                for (item, col) in items.iter().zip(&columns) {
                    projected.insert(col.clone(), self.eval(&item.expr, &row)?);
                }
                let mut scope = row;
                scope.extend(projected.clone());
                entries.push((scope, projected));
            }
            entries
        };

        if proj.distinct {
            let mut seen: Vec<Row> = Vec::new();
            entries.retain(|(_, projected)| {
                if seen.contains(projected) {
                    false
                } else {
                    seen.push(projected.clone());
                    true
                }
            });
        }

        if !proj.order_by.is_empty() {
            let mut keyed = Vec::with_capacity(entries.len());
            for (scope, projected) in entries {
                let mut keys = Vec::with_capacity(proj.order_by.len());
                for order in &proj.order_by {
                    keys.push(self.order_key(&order.expr, &scope, &projected)?);
                }
                keyed.push((keys, scope, projected));
            }
            keyed.sort_by(|(a, _, _), (b, _, _)| {
                for ((x, y), order) in a.iter().zip(b).zip(&proj.order_by) {
                    let ord = order_cmp(x, y);
                    let ord = if order.ascending { ord } else { ord.reverse() };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
            entries = keyed.into_iter().map(|(_, scope, projected)| (scope, projected)).collect();
        }

        let skip = self.count_expr(proj.skip.as_ref())?.unwrap_or(0);
        let limit = self.count_expr(proj.limit.as_ref())?.unwrap_or(usize::MAX);
        let rows = entries.into_iter().skip(skip).take(limit).map(|(_, projected)| projected).collect();
        Ok((columns, rows))
    }

    fn aggregate(&self, rows: Vec<Row>, items: &[ReturnItem], columns: &[String]) -> Result<Vec<(Row, Row)>> {
        let key_items: Vec<&ReturnItem> = items.iter().filter(|i| !i.expr.is_aggregate()).collect();
        let mut groups: Vec<(Vec<Value>, Vec<Row>)> = Vec::new();
        for row in rows {
            let mut key = Vec::with_capacity(key_items.len());
            for item in &key_items {
                key.push(self.eval(&item.expr, &row)?);
            }
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, members)) => members.push(row),
                None => groups.push((key, vec![row])),
            }
        }
        // Pure aggregation over nothing still yields one row: count(*) = 0.
        if groups.is_empty() && key_items.is_empty() {
            groups.push((Vec::new(), Vec::new()));
        }

        let mut entries = Vec::with_capacity(groups.len());
        for (key, members) in groups {
            let mut key_values = key.into_iter();
            let mut projected = Row::new();
            for (item, col) in items.iter().zip(columns) {
                let value = if item.expr.is_aggregate() {
                    self.eval_group(&item.expr, &members)?
                } else {
                    key_values.next().unwrap_or(Value::Null)
                };
                projected.insert(col.clone(), value);
            }
            entries.push((projected.clone(), projected));
        }
        Ok(entries)
    }

    fn order_key(&self, expr: &Expr, scope: &Row, projected: &Row) -> Result<Value> {
        if let Some(v) = projected.get(&expr.to_string()) {
            return Ok(v.clone());
        }
        self.eval(expr, scope)
    }

    fn count_expr(&self, expr: Option<&Expr>) -> Result<Option<usize>> {
        let Some(expr) = expr else { return Ok(None) };
        let value = self.eval(expr, &Row::new())?;
        value
            .as_int()
            .and_then(|i| usize::try_from(i).ok())
            .map(Some)
            .ok_or_else(|| type_error("non-negative Integer", &value))
    }

    // ========================================================================
    // Aggregation
    // ========================================================================

    fn eval_group(&self, expr: &Expr, members: &[Row]) -> Result<Value> {
        match expr {
            Expr::CountStar => Ok(Value::from(members.len())),
            Expr::FunctionCall { name, args, distinct } if AGGREGATES.contains(&name.to_ascii_lowercase().as_str()) => {
                let [arg] = &args[..] else {
                    return Err(failure(format!("{name}() takes exactly one argument")));
                };
                let mut values = Vec::with_capacity(members.len());
                for row in members {
                    let v = self.eval(arg, row)?;
                    if !v.is_null() && !(*distinct && values.contains(&v)) {
                        values.push(v);
                    }
                }
                aggregate_values(&name.to_ascii_lowercase(), values)
            }
            Expr::BinaryOp { left, op, right } => {
                let l = self.eval_group(left, members)?;
                let r = self.eval_group(right, members)?;
                self.binary(*op, l, r)
            }
            Expr::UnaryOp { op, expr } => unary(*op, self.eval_group(expr, members)?),
            Expr::FunctionCall { name, args, .. } => {
                let args = args.iter().map(|a| self.eval_group(a, members)).collect::<Result<Vec<_>>>()?;
                self.scalar_fn(name, args)
            }
            e if !e.is_aggregate() => match members.first() {
                Some(row) => self.eval(e, row),
                None => self.eval(e, &Row::new()),
            },
            other => Err(failure(format!("unsupported aggregate expression: {other}"))),
        }
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn eval(&self, expr: &Expr, row: &Row) -> Result<Value> {
        match expr {
            Expr::Literal(l) => Ok(literal(l)),
            Expr::Variable(v) => row.get(v).cloned().ok_or_else(|| failure(format!("Variable `{v}` not defined"))),
            Expr::Property { expr, key } => Ok(match self.eval(expr, row)? {
                Value::Node(n) => n.properties.get(key).cloned().unwrap_or(Value::Null),
                Value::Relationship(r) => r.properties.get(key).cloned().unwrap_or(Value::Null),
                Value::Map(m) => m.get(key).cloned().unwrap_or(Value::Null),
                Value::Null => Value::Null,
                other => return Err(type_error("Map, Node or Relationship", &other)),
            }),
            Expr::Parameter(p) => self.params.get(p).cloned().ok_or_else(|| failure(format!("Expected parameter ${p}"))),
            Expr::FunctionCall { name, args, .. } => {
                if AGGREGATES.contains(&name.to_ascii_lowercase().as_str()) {
                    return Err(failure(format!("{name}() is only valid in WITH or RETURN")));
                }
                let args = args.iter().map(|a| self.eval(a, row)).collect::<Result<Vec<_>>>()?;
                self.scalar_fn(name, args)
            }
            Expr::CountStar => Err(failure("count(*) is only valid in WITH or RETURN")),
            Expr::BinaryOp { left, op, right } => {
                let l = self.eval(left, row)?;
                let r = self.eval(right, row)?;
                self.binary(*op, l, r)
            }
            Expr::UnaryOp { op, expr } => unary(*op, self.eval(expr, row)?),
            Expr::List(items) => Ok(Value::List(items.iter().map(|e| self.eval(e, row)).collect::<Result<_>>()?)),
            Expr::MapLiteral(entries) => {
                let mut map = PropertyMap::new();
                for (k, e) in entries {
                    map.insert(k.clone(), self.eval(e, row)?);
                }
                Ok(Value::Map(map))
            }
            Expr::Case { operand, whens, else_expr } => {
                let subject = operand.as_deref().map(|o| self.eval(o, row)).transpose()?;
                for (when, then) in whens {
                    let w = self.eval(when, row)?;
                    let hit = match &subject {
                        Some(s) => s.neo4j_eq(&w) == Some(true),
                        None => matches!(w, Value::Bool(true)),
                    };
                    if hit {
                        return self.eval(then, row);
                    }
                }
                else_expr.as_deref().map_or(Ok(Value::Null), |e| self.eval(e, row))
            }
            Expr::In { expr, list } => {
                let needle = self.eval(expr, row)?;
                match self.eval(list, row)? {
                    Value::List(items) => {
                        let mut saw_null = needle.is_null() && !items.is_empty();
                        for item in &items {
                            match needle.neo4j_eq(item) {
                                Some(true) => return Ok(Value::Bool(true)),
                                None => saw_null = true,
                                Some(false) => {}
                            }
                        }
                        Ok(if saw_null { Value::Null } else { Value::Bool(false) })
                    }
                    Value::Null => Ok(Value::Null),
                    other => Err(type_error("List", &other)),
                }
            }
            Expr::IsNull { expr, negated } => Ok(Value::Bool(self.eval(expr, row)?.is_null() != *negated)),
            Expr::HasLabel { expr, label } => match self.eval(expr, row)? {
                Value::Node(n) => Ok(Value::Bool(n.has_label(label))),
                Value::Null => Ok(Value::Null),
                other => Err(type_error("Node", &other)),
            },
            Expr::StringOp { left, op, right } => {
                let (l, r) = (self.eval(left, row)?, self.eval(right, row)?);
                Ok(match (l.as_str(), r.as_str()) {
                    (Some(a), Some(b)) => Value::Bool(match op {
                        StringOp::StartsWith => a.starts_with(b),
                        StringOp::EndsWith => a.ends_with(b),
                        StringOp::Contains => a.contains(b),
                    }),
                    _ => Value::Null,
                })
            }
        }
    }

    fn binary(&self, op: BinaryOp, l: Value, r: Value) -> Result<Value> {
        match op {
            BinaryOp::And | BinaryOp::Or | BinaryOp::Xor => {
                let (a, b) = (truth(&l)?, truth(&r)?);
                Ok(match op {
                    BinaryOp::And => match (a, b) {
                        (Some(false), _) | (_, Some(false)) => Value::Bool(false),
                        (Some(true), Some(true)) => Value::Bool(true),
                        _ => Value::Null,
                    },
                    BinaryOp::Or => match (a, b) {
                        (Some(true), _) | (_, Some(true)) => Value::Bool(true),
                        (Some(false), Some(false)) => Value::Bool(false),
                        _ => Value::Null,
                    },
                    _ => match (a, b) {
                        (Some(x), Some(y)) => Value::Bool(x != y),
                        _ => Value::Null,
                    },
                })
            }
            BinaryOp::Eq => Ok(l.neo4j_eq(&r).map_or(Value::Null, Value::Bool)),
            BinaryOp::Neq => Ok(l.neo4j_eq(&r).map_or(Value::Null, |eq| Value::Bool(!eq))),
            BinaryOp::Lt | BinaryOp::Lte | BinaryOp::Gt | BinaryOp::Gte => {
                Ok(l.neo4j_cmp(&r).map_or(Value::Null, |ord| {
                    Value::Bool(match op {
                        BinaryOp::Lt => ord == Ordering::Less,
                        BinaryOp::Lte => ord != Ordering::Greater,
                        BinaryOp::Gt => ord == Ordering::Greater,
                        _ => ord != Ordering::Less,
                    })
                }))
            }
            _ => arithmetic(op, l, r),
        }
    }

    fn scalar_fn(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        let lname = name.to_ascii_lowercase();
        if lname == "coalesce" {
            return Ok(args.into_iter().find(|v| !v.is_null()).unwrap_or(Value::Null));
        }
        let [arg] = <[Value; 1]>::try_from(args)
            .map_err(|args| failure(format!("{name}() takes exactly one argument, got {}", args.len())))?;
        if arg.is_null() {
            return Ok(Value::Null);
        }
        let value = match (lname.as_str(), arg) {
            ("tolower", Value::String(s)) => Value::String(s.to_lowercase()),
            ("toupper", Value::String(s)) => Value::String(s.to_uppercase()),
            ("trim", Value::String(s)) => Value::String(s.trim().to_string()),
            ("tostring", v @ Value::String(_)) => v,
            ("tostring", v @ (Value::Int(_) | Value::Float(_) | Value::Bool(_))) => Value::String(v.to_string()),
            ("tointeger", Value::Int(i)) => Value::Int(i),
            ("tointeger", Value::Float(f)) => Value::Int(f.trunc() as i64),
            ("tointeger", Value::String(s)) => s.trim().parse::<i64>().map_or(Value::Null, Value::Int),
            ("tofloat", Value::Int(i)) => Value::Float(i as f64),
            ("tofloat", Value::Float(f)) => Value::Float(f),
            ("tofloat", Value::String(s)) => s.trim().parse::<f64>().map_or(Value::Null, Value::Float),
            ("abs", Value::Int(i)) => Value::Int(i.checked_abs().ok_or_else(|| failure("integer overflow"))?),
            ("abs", Value::Float(f)) => Value::Float(f.abs()),
            ("round", Value::Int(i)) => Value::Float(i as f64),
            ("round", Value::Float(f)) => Value::Float(f.round()),
            ("size" | "length", Value::String(s)) => Value::from(s.chars().count()),
            ("size" | "length", Value::List(items)) => Value::from(items.len()),
            ("head", Value::List(items)) => items.into_iter().next().unwrap_or(Value::Null),
            ("last", Value::List(items)) => items.into_iter().last().unwrap_or(Value::Null),
            ("labels", Value::Node(n)) => Value::List(n.labels.into_iter().map(Value::String).collect()),
            ("type", Value::Relationship(r)) => Value::String(r.rel_type),
            ("id", Value::Node(n)) => Value::Int(n.id.0 as i64),
            ("id", Value::Relationship(r)) => Value::Int(r.id.0 as i64),
            ("keys", Value::Node(n)) => Value::List(n.properties.into_keys().map(Value::String).collect()),
            ("keys", Value::Relationship(r)) => Value::List(r.properties.into_keys().map(Value::String).collect()),
            ("keys", Value::Map(m)) => Value::List(m.into_keys().map(Value::String).collect()),
            ("properties", Value::Node(n)) => Value::Map(n.properties),
            ("properties", Value::Relationship(r)) => Value::Map(r.properties),
            ("properties", m @ Value::Map(_)) => m,
            ("startnode", Value::Relationship(r)) => self.node_value(r.src),
            ("endnode", Value::Relationship(r)) => self.node_value(r.dst),
            (
                "tolower" | "toupper" | "trim" | "tostring" | "tointeger" | "tofloat" | "abs" | "round" | "size"
                | "length" | "head" | "last" | "labels" | "type" | "id" | "keys" | "properties" | "startnode"
                | "endnode",
                other,
            ) => return Err(type_error(&format!("valid argument for {name}()"), &other)),
            _ => return Err(failure(format!("Unknown function '{name}'"))),
        };
        Ok(value)
    }

    fn node_value(&self, id: NodeId) -> Value {
        self.store.node(id).cloned().map_or(Value::Null, Value::from)
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn literal(l: &Literal) -> Value {
    match l {
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Int(i) => Value::Int(*i),
        Literal::Float(f) => Value::Float(*f),
        Literal::String(s) => Value::String(s.clone()),
    }
}

fn truth(v: &Value) -> Result<Option<bool>> {
    match v {
        Value::Bool(b) => Ok(Some(*b)),
        Value::Null => Ok(None),
        other => Err(type_error("Boolean", other)),
    }
}

fn unary(op: UnaryOp, v: Value) -> Result<Value> {
    match (op, v) {
        (_, Value::Null) => Ok(Value::Null),
        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (UnaryOp::Negate, Value::Int(i)) => i.checked_neg().map(Value::Int).ok_or_else(|| failure("integer overflow")),
        (UnaryOp::Negate, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Not, other) => Err(type_error("Boolean", &other)),
        (UnaryOp::Negate, other) => Err(type_error("Number", &other)),
    }
}

fn arithmetic(op: BinaryOp, l: Value, r: Value) -> Result<Value> {
    if l.is_null() || r.is_null() {
        return Ok(Value::Null);
    }
    if op == BinaryOp::Add {
        match (l, r) {
            (Value::String(a), b) => return Ok(Value::String(a + &b.render())),
            (a, Value::String(b)) => return Ok(Value::String(a.render() + &b)),
            (Value::List(mut a), Value::List(b)) => {
                a.extend(b);
                return Ok(Value::List(a));
            }
            (Value::List(mut a), b) => {
                a.push(b);
                return Ok(Value::List(a));
            }
            (a, b) => return numeric(op, a, b),
        }
    }
    numeric(op, l, r)
}

fn numeric(op: BinaryOp, l: Value, r: Value) -> Result<Value> {
    let overflow = || failure("integer overflow");
    match (&l, &r) {
        (Value::Int(a), Value::Int(b)) => {
            let (a, b) = (*a, *b);
            match op {
                BinaryOp::Add => a.checked_add(b).map(Value::Int).ok_or_else(overflow),
                BinaryOp::Sub => a.checked_sub(b).map(Value::Int).ok_or_else(overflow),
                BinaryOp::Mul => a.checked_mul(b).map(Value::Int).ok_or_else(overflow),
                BinaryOp::Div if b == 0 => Err(failure("/ by zero")),
                BinaryOp::Div => a.checked_div(b).map(Value::Int).ok_or_else(overflow),
                BinaryOp::Mod if b == 0 => Err(failure("/ by zero")),
                BinaryOp::Mod => a.checked_rem(b).map(Value::Int).ok_or_else(overflow),
                _ => Ok(Value::Float((a as f64).powf(b as f64))),
            }
        }
        _ => match (l.as_float(), r.as_float()) {
            (Some(a), Some(b)) => Ok(Value::Float(match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                BinaryOp::Mod => a % b,
                _ => a.powf(b),
            })),
            _ => Err(type_error("Number", if l.is_numeric() { &r } else { &l })),
        },
    }
}

fn aggregate_values(name: &str, values: Vec<Value>) -> Result<Value> {
    match name {
        "count" => Ok(Value::from(values.len())),
        "collect" => Ok(Value::List(values)),
        "sum" | "avg" => {
            if let Some(bad) = values.iter().find(|v| !v.is_numeric()) {
                return Err(type_error("Number", bad));
            }
            let all_ints = values.iter().all(|v| matches!(v, Value::Int(_)));
            if name == "sum" && all_ints {
                let total = values
                    .iter()
                    .filter_map(Value::as_int)
                    .try_fold(0i64, i64::checked_add)
                    .ok_or_else(|| failure("integer overflow"))?;
                return Ok(Value::Int(total));
            }
            let total: f64 = values.iter().filter_map(Value::as_float).sum();
            Ok(match name {
                "sum" => Value::Float(total),
                _ if values.is_empty() => Value::Null,
                _ => Value::Float(total / values.len() as f64),
            })
        }
        // min / max
        _ => {
            let want = if name == "min" { Ordering::Less } else { Ordering::Greater };
            let mut best: Option<Value> = None;
            for v in values {
                best = match best {
                    Some(b) if order_cmp(&v, &b) != want => Some(b),
                    _ => Some(v),
                };
            }
            Ok(best.unwrap_or(Value::Null))
        }
    }
}

/// Total order used by ORDER BY: maps, nodes, relationships, lists,
/// strings, booleans, numbers, then null.
fn order_cmp(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Map(_) => 0,
            Value::Node(_) => 1,
            Value::Relationship(_) => 2,
            Value::List(_) => 3,
            Value::String(_) => 4,
            Value::Bool(_) => 5,
            Value::Int(_) | Value::Float(_) => 6,
            Value::Null => 7,
        }
    }
    match (a, b) {
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Node(x), Value::Node(y)) => x.id.cmp(&y.id),
        (Value::Relationship(x), Value::Relationship(y)) => x.id.cmp(&y.id),
        (Value::List(x), Value::List(y)) => x
            .iter()
            .zip(y)
            .map(|(p, q)| order_cmp(p, q))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        (x, y) if x.is_numeric() && y.is_numeric() => {
            let (p, q) = (x.as_float().unwrap_or(0.0), y.as_float().unwrap_or(0.0));
            p.total_cmp(&q)
        }
        _ => rank(a).cmp(&rank(b)),
    }
}

fn pattern_variables(patterns: &[Pattern]) -> Vec<String> {
    let mut vars = Vec::new();
    for p in patterns {
        vars.extend(p.start.alias.clone());
        for (rel, node) in &p.steps {
            vars.extend(rel.alias.clone());
            vars.extend(node.alias.clone());
        }
    }
    vars
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryGraph;
    use pretty_assertions::assert_eq;

    fn catalog() -> MemoryGraph {
        let g = MemoryGraph::new();
        let msi = g.add_node(["Brand"], props([("name", "MSI")]));
        let asus = g.add_node(["Brand"], props([("name", "ASUS")]));
        let b650 = g.add_node(["Product"], props([("name", "B650 Tomahawk"), ("category", "Anakart")]));
        let z790 = g.add_node(["Product"], props([("name", "Z790 Edge"), ("category", "Anakart")]));
        let gpu = g.add_node(["Product"], props([("name", "RTX 4070 Ventus"), ("category", "Ekran Kartı")]));
        let rog = g.add_node(["Product"], props([("name", "ROG Strix B650"), ("category", "Anakart")]));
        for (p, b) in [(b650, msi), (z790, msi), (gpu, msi), (rog, asus)] {
            g.add_relationship(p, b, "BRAND", PropertyMap::new()).unwrap();
        }
        g
    }

    fn run(g: &MemoryGraph, q: &str) -> Result<QueryResult> {
        run_with(g, q, PropertyMap::new())
    }

    fn run_with(g: &MemoryGraph, q: &str, params: PropertyMap) -> Result<QueryResult> {
        let ast = crate::cypher::parse(q)?;
        let store = g.inner.store.read();
        evaluate(&store, &ast, &params)
    }

    fn column(result: &QueryResult, col: &str) -> Vec<Value> {
        result.rows.iter().map(|r| r.values.get(col).cloned().unwrap_or(Value::Null)).collect()
    }

    #[test]
    fn test_brand_category_lookup() {
        let g = catalog();
        let result = run(
            &g,
            "MATCH (p:Product)-[:BRAND]->(b:Brand {name: 'MSI'}) WHERE p.category = 'Anakart' \
             RETURN p.name ORDER BY p.name",
        )
        .unwrap();
        assert_eq!(result.columns, vec!["p.name"]);
        assert_eq!(column(&result, "p.name"), vec![Value::from("B650 Tomahawk"), Value::from("Z790 Edge")]);
    }

    #[test]
    fn test_incoming_direction_and_parameters() {
        let g = catalog();
        let result = run_with(
            &g,
            "MATCH (b:Brand)<-[:BRAND]-(p) WHERE b.name = $brand RETURN count(p) AS products",
            props([("brand", "ASUS")]),
        )
        .unwrap();
        assert_eq!(result.single_value(), Some(&Value::Int(1)));
    }

    #[test]
    fn test_grouped_count_with_order() {
        let g = catalog();
        let result = run(&g, "MATCH (p:Product)-[:BRAND]->(b:Brand) RETURN b.name, count(p) ORDER BY count(p) DESC").unwrap();
        assert_eq!(result.columns, vec!["b.name", "count(p)"]);
        assert_eq!(column(&result, "b.name"), vec![Value::from("MSI"), Value::from("ASUS")]);
        assert_eq!(column(&result, "count(p)"), vec![Value::Int(3), Value::Int(1)]);
    }

    #[test]
    fn test_count_star_on_empty_match() {
        let g = catalog();
        let result = run(&g, "MATCH (n:Missing) RETURN count(*) AS n").unwrap();
        assert_eq!(result.single_value(), Some(&Value::Int(0)));
    }

    #[test]
    fn test_collect_distinct_and_functions() {
        let g = catalog();
        let result = run(
            &g,
            "MATCH (p:Product) RETURN collect(DISTINCT toLower(p.category)) AS cats",
        )
        .unwrap();
        assert_eq!(
            result.single_value(),
            Some(&Value::List(vec![Value::from("anakart"), Value::from("ekran kartı")]))
        );
    }

    #[test]
    fn test_optional_match_binds_null() {
        let g = catalog();
        g.add_node(["Brand"], props([("name", "Gigabyte")]));
        let result = run(
            &g,
            "MATCH (b:Brand) OPTIONAL MATCH (b)<-[:BRAND]-(p:Product) \
             WITH b, count(p) AS n WHERE n = 0 RETURN b.name",
        )
        .unwrap();
        assert_eq!(column(&result, "b.name"), vec![Value::from("Gigabyte")]);
    }

    #[test]
    fn test_variable_length_hops() {
        let g = catalog();
        let result = run(
            &g,
            "MATCH (a:Product {name: 'B650 Tomahawk'})-[*2]-(other:Product) RETURN other.name ORDER BY other.name",
        )
        .unwrap();
        assert_eq!(column(&result, "other.name"), vec![Value::from("RTX 4070 Ventus"), Value::from("Z790 Edge")]);
    }

    #[test]
    fn test_distinct_skip_limit() {
        let g = catalog();
        let result = run(&g, "MATCH (p:Product) RETURN DISTINCT p.category AS c ORDER BY c SKIP 1 LIMIT 5").unwrap();
        assert_eq!(column(&result, "c"), vec![Value::from("Ekran Kartı")]);
    }

    #[test]
    fn test_string_predicates_and_null_logic() {
        let g = catalog();
        let result = run(
            &g,
            "MATCH (p:Product) WHERE p.name STARTS WITH 'B6' OR p.missing CONTAINS 'x' RETURN p.name",
        )
        .unwrap();
        assert_eq!(column(&result, "p.name"), vec![Value::from("B650 Tomahawk")]);
    }

    #[test]
    fn test_in_list_and_case() {
        let g = catalog();
        let result = run(
            &g,
            "MATCH (b:Brand) WHERE b.name IN ['MSI', 'Intel'] \
             RETURN CASE WHEN b.name = 'MSI' THEN 'yes' ELSE 'no' END AS hit",
        )
        .unwrap();
        assert_eq!(column(&result, "hit"), vec![Value::from("yes")]);
    }

    #[test]
    fn test_unwind_and_arithmetic() {
        let g = MemoryGraph::new();
        let result = run(&g, "UNWIND [1, 2, 3] AS x RETURN sum(x * 2) AS total, avg(x) AS mean").unwrap();
        assert_eq!(column(&result, "total"), vec![Value::Int(12)]);
        assert_eq!(column(&result, "mean"), vec![Value::Float(2.0)]);
    }

    #[test]
    fn test_labels_type_and_id() {
        let g = catalog();
        let result = run(&g, "MATCH (p:Product)-[r]->(b) WHERE id(p) = 3 RETURN labels(b) AS l, type(r) AS t").unwrap();
        assert_eq!(column(&result, "l"), vec![Value::List(vec![Value::from("Brand")])]);
        assert_eq!(column(&result, "t"), vec![Value::from("BRAND")]);
    }

    #[test]
    fn test_unknown_variable_and_function_fail() {
        let g = catalog();
        assert!(run(&g, "MATCH (p:Product) RETURN q.name").is_err());
        assert!(run(&g, "MATCH (p:Product) RETURN shout(p.name)").is_err());
        assert!(run(&g, "MATCH (p:Product) WHERE count(p) > 1 RETURN p").is_err());
    }

    #[test]
    fn test_division_by_zero() {
        let g = MemoryGraph::new();
        assert!(run(&g, "RETURN 1 / 0 AS x").is_err());
    }
}
