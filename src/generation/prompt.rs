//! Prompt text for both generation stages.

use std::fmt::Write;

use crate::execution::QueryResult;
use crate::model::{ContextFragment, SchemaSnapshot};
use crate::retrieval::Seed;

pub const CYPHER_SYSTEM: &str = "You are a Neo4j Cypher expert. You translate natural-language questions \
into Cypher. Produce only read-only MATCH ... RETURN queries. Reply with JSON only.";

pub const ANSWER_SYSTEM: &str = "You are a helpful graph database assistant. Answer in the language of \
the question. Be complete and precise, format numbers readably and use few emoji. If there is no data, \
suggest what else could be asked.";

const CYPHER_RULES: &str = "\
RULES:
1. Use only the labels, relationship types and properties listed in the schema.
2. Use only MATCH, OPTIONAL MATCH, WHERE, WITH, RETURN, ORDER BY, SKIP and LIMIT.
3. Never create, delete, merge, set or remove anything; never touch indexes or constraints.
4. One statement, no semicolons, no comments.
5. Compare text case-insensitively with toLower(...) when the exact spelling is uncertain.
6. Prefer entities and values from the context when they match the question.";

const CYPHER_FORMAT: &str = r#"FORMAT:
{"cypher": "MATCH ... RETURN ...", "description": "one sentence saying what the query returns"}"#;

/// Prompt asking for a Cypher query as a JSON envelope.
pub fn cypher_prompt(question: &str, schema: &SchemaSnapshot, seeds: &[Seed], fragments: &[ContextFragment]) -> String {
    let mut out = schema.render_prompt();
    out.push('\n');
    out.push_str(&context_section(fragments));
    if !seeds.is_empty() {
        let names: Vec<&str> = seeds.iter().map(Seed::text).collect();
        let _ = writeln!(out, "DETECTED ENTITIES: {}", names.join(", "));
    }
    let _ = writeln!(out, "\nQUESTION: \"{}\"\n", question.trim());
    out.push_str(CYPHER_RULES);
    out.push_str("\n\n");
    out.push_str(CYPHER_FORMAT);
    out.push('\n');
    out
}

/// Prompt asking for a prose answer over the result rows.
pub fn answer_prompt(
    question: &str,
    query: &str,
    result: &QueryResult,
    fragments: &[ContextFragment],
    max_rows: usize,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "QUESTION: {}", question.trim());
    let _ = writeln!(out, "CYPHER: {query}");
    let _ = writeln!(out, "RESULTS ({} rows):", result.rows.len());
    if result.is_empty() {
        out.push_str("no data found\n");
    } else {
        out.push_str(&render_rows(result, max_rows));
    }
    out.push('\n');
    out.push_str(&context_section(fragments));
    out.push_str(
        "\nTASK: Answer the question from the results. List every result as a numbered line \
         with its properties; do not skip any. Mention relevant relationships from the context.\n",
    );
    out
}

fn context_section(fragments: &[ContextFragment]) -> String {
    if fragments.is_empty() {
        return "CONTEXT: none\n".into();
    }
    let mut out = String::from("CONTEXT (most relevant first):\n");
    for f in fragments {
        let _ = writeln!(out, "- {}", f.describe());
    }
    out
}

/// Numbered rows, one per line. Single-column rows show the bare value.
pub fn render_rows(result: &QueryResult, max_rows: usize) -> String {
    let mut out = String::new();
    for (i, row) in result.rows.iter().take(max_rows).enumerate() {
        let values = result.ordered(row);
        let line = if values.len() == 1 {
            values[0].render()
        } else {
            result
                .columns
                .iter()
                .zip(&values)
                .map(|(c, v)| format!("{c}: {}", v.render()))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let _ = writeln!(out, "{}. {line}", i + 1);
    }
    if result.rows.len() > max_rows {
        let _ = writeln!(out, "... {} more", result.rows.len() - max_rows);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ResultRow;
    use crate::model::{Evidence, Node, NodeId, Value};
    use chrono::Utc;

    fn result(columns: &[&str], rows: Vec<Vec<Value>>) -> QueryResult {
        QueryResult {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: rows
                .into_iter()
                .map(|vals| ResultRow { values: columns.iter().map(|c| c.to_string()).zip(vals).collect() })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_cypher_prompt_sections() {
        let mut b = SchemaSnapshot::builder(1);
        b.label("Product", 2).label_property("Product", "category", Some("Anakart".into()));
        let schema = b.build(Utc::now());
        let frag = ContextFragment::structural(
            Evidence::Node(Node::new(NodeId(1)).with_labels(["Product"]).with_property("name", "B650")),
            0,
            1.0,
            0,
        );
        let p = cypher_prompt("anakartlar?", &schema, &[Seed::Value("MSI".into())], &[frag]);
        assert!(p.contains("- Product (2) {category}"));
        assert!(p.contains("(:Product {name: B650}) score=1.00"));
        assert!(p.contains("DETECTED ENTITIES: MSI"));
        assert!(p.contains("QUESTION: \"anakartlar?\""));
        assert!(p.contains("\"cypher\""));
    }

    #[test]
    fn test_render_rows() {
        let r = result(&["name", "price"], vec![vec!["B650".into(), Value::Int(7999)], vec!["Z790".into(), Value::Null]]);
        assert_eq!(render_rows(&r, 10), "1. name: B650, price: 7999\n2. name: Z790, price: -\n");
        assert_eq!(render_rows(&r, 1), "1. name: B650, price: 7999\n... 1 more\n");
        let single = result(&["name"], vec![vec!["B650".into()]]);
        assert_eq!(render_rows(&single, 10), "1. B650\n");
    }

    #[test]
    fn test_answer_prompt_empty_result() {
        let p = answer_prompt("q", "MATCH (n) RETURN n", &result(&["n"], vec![]), &[], 10);
        assert!(p.contains("RESULTS (0 rows):\nno data found"));
        assert!(p.contains("CONTEXT: none"));
    }
}
