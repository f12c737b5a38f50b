//! SchemaSnapshot: one discovery pass worth of graph structure.
//!
//! A snapshot is built by exactly one `SchemaSnapshotBuilder` and frozen by
//! `build()`. Nothing mutates it afterwards; the schema store replaces the
//! whole `Arc<SchemaSnapshot>` instead.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum sample values retained per property.
pub const MAX_SAMPLE_VALUES: usize = 3;

/// `(:From)-[:TYPE]->(:To)` shape observed while sampling relationships.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConnectionPattern {
    pub from: String,
    pub rel_type: String,
    pub to: String,
}

/// Captured description of the graph's labels, types and properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaSnapshot {
    pub labels: BTreeSet<String>,
    pub relationship_types: BTreeSet<String>,
    pub label_properties: BTreeMap<String, BTreeSet<String>>,
    pub relationship_properties: BTreeMap<String, BTreeSet<String>>,
    pub label_counts: BTreeMap<String, u64>,
    pub relationship_counts: BTreeMap<String, u64>,
    pub connections: BTreeSet<ConnectionPattern>,
    /// label → property → up to `MAX_SAMPLE_VALUES` rendered values.
    pub sample_values: BTreeMap<String, BTreeMap<String, Vec<String>>>,
    pub captured_at: DateTime<Utc>,
    /// Monotonic pass number; 0 means "never discovered".
    pub generation: u64,
}

impl SchemaSnapshot {
    /// The placeholder published before the first successful discovery.
    pub fn empty() -> Self {
        Self {
            labels: BTreeSet::new(),
            relationship_types: BTreeSet::new(),
            label_properties: BTreeMap::new(),
            relationship_properties: BTreeMap::new(),
            label_counts: BTreeMap::new(),
            relationship_counts: BTreeMap::new(),
            connections: BTreeSet::new(),
            sample_values: BTreeMap::new(),
            captured_at: DateTime::<Utc>::UNIX_EPOCH,
            generation: 0,
        }
    }

    pub fn builder(generation: u64) -> SchemaSnapshotBuilder {
        SchemaSnapshotBuilder {
            snapshot: Self { generation, ..Self::empty() },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.generation == 0 || (self.labels.is_empty() && self.relationship_types.is_empty())
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.contains(label)
    }

    pub fn has_relationship_type(&self, rel_type: &str) -> bool {
        self.relationship_types.contains(rel_type)
    }

    pub fn properties_of(&self, label: &str) -> impl Iterator<Item = &str> {
        self.label_properties.get(label).into_iter().flatten().map(String::as_str)
    }

    pub fn total_nodes(&self) -> u64 {
        self.label_counts.values().sum()
    }

    pub fn total_relationships(&self) -> u64 {
        self.relationship_counts.values().sum()
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.captured_at
    }

    /// Every sampled `(label, property, value)` triple, in key order.
    pub fn known_values(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.sample_values.iter().flat_map(|(label, props)| {
            props.iter().flat_map(move |(prop, values)| {
                values.iter().map(move |v| (label.as_str(), prop.as_str(), v.as_str()))
            })
        })
    }

    /// Schema section of the synthesis prompt. Only names captured in this
    /// snapshot appear, so generated queries can be held to them.
    pub fn render_prompt(&self) -> String {
        if self.is_empty() {
            return "GRAPH SCHEMA: unavailable (no discovery pass has completed)\n".into();
        }
        let mut out = String::new();
        let _ = writeln!(
            out,
            "GRAPH SCHEMA ({} nodes, {} relationships):",
            self.total_nodes(),
            self.total_relationships()
        );
        out.push_str("Node labels:\n");
        for label in &self.labels {
            let props: Vec<&str> = self.properties_of(label).collect();
            let count = self.label_counts.get(label).copied().unwrap_or(0);
            let _ = writeln!(out, "- {label} ({count}) {{{}}}", props.join(", "));
            if let Some(samples) = self.sample_values.get(label) {
                for (prop, values) in samples {
                    let quoted: Vec<String> = values.iter().map(|v| format!("'{v}'")).collect();
                    let _ = writeln!(out, "    {prop} e.g. {}", quoted.join(", "));
                }
            }
        }
        out.push_str("Relationship types:\n");
        for rel_type in &self.relationship_types {
            let props: Vec<&str> = self
                .relationship_properties
                .get(rel_type)
                .into_iter()
                .flatten()
                .map(String::as_str)
                .collect();
            let _ = writeln!(out, "- {rel_type} {{{}}}", props.join(", "));
        }
        if !self.connections.is_empty() {
            out.push_str("Patterns:\n");
            for c in &self.connections {
                let _ = writeln!(out, "- (:{})-[:{}]->(:{})", c.from, c.rel_type, c.to);
            }
        }
        out
    }
}

/// Accumulates one discovery pass. Consumed by `build()`, so a snapshot can
/// never receive data from a second pass.
#[derive(Debug)]
pub struct SchemaSnapshotBuilder {
    snapshot: SchemaSnapshot,
}

impl SchemaSnapshotBuilder {
    pub fn label(&mut self, label: impl Into<String>, count: u64) -> &mut Self {
        let label = label.into();
        self.snapshot.label_counts.insert(label.clone(), count);
        self.snapshot.label_properties.entry(label.clone()).or_default();
        self.snapshot.labels.insert(label);
        self
    }

    pub fn relationship_type(&mut self, rel_type: impl Into<String>, count: u64) -> &mut Self {
        let rel_type = rel_type.into();
        self.snapshot.relationship_counts.insert(rel_type.clone(), count);
        self.snapshot.relationship_properties.entry(rel_type.clone()).or_default();
        self.snapshot.relationship_types.insert(rel_type);
        self
    }

    pub fn label_property(&mut self, label: &str, key: &str, sample: Option<String>) -> &mut Self {
        self.snapshot
            .label_properties
            .entry(label.to_string())
            .or_default()
            .insert(key.to_string());
        if let Some(value) = sample.filter(|v| !v.trim().is_empty()) {
            let values = self
                .snapshot
                .sample_values
                .entry(label.to_string())
                .or_default()
                .entry(key.to_string())
                .or_default();
            if values.len() < MAX_SAMPLE_VALUES && !values.contains(&value) {
                values.push(value);
            }
        }
        self
    }

    pub fn relationship_property(&mut self, rel_type: &str, key: &str) -> &mut Self {
        self.snapshot
            .relationship_properties
            .entry(rel_type.to_string())
            .or_default()
            .insert(key.to_string());
        self
    }

    pub fn connection(&mut self, from: &str, rel_type: &str, to: &str) -> &mut Self {
        self.snapshot.connections.insert(ConnectionPattern {
            from: from.to_string(),
            rel_type: rel_type.to_string(),
            to: to.to_string(),
        });
        self
    }

    pub fn build(self, captured_at: DateTime<Utc>) -> SchemaSnapshot {
        SchemaSnapshot { captured_at, ..self.snapshot }
    }
}
