//! Seed extraction: which parts of a question name things in the graph.
//!
//! Lightweight string matching only. Seeds come, in this order, from:
//! 1. sampled property values in the schema that occur in the question,
//! 2. labels the question mentions,
//! 3. capitalised words (Turkish capitals included) of three or more letters.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::model::SchemaSnapshot;

/// Shortest sample value or capitalised word treated as a seed.
const MIN_SEED_CHARS: usize = 3;

/// A starting point for structural retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Seed {
    /// Text expected to occur in some property of the wanted nodes.
    Value(String),
    /// Every node carrying this label.
    Label(String),
}

impl Seed {
    pub fn text(&self) -> &str {
        match self {
            Seed::Value(s) | Seed::Label(s) => s,
        }
    }
}

/// Extract up to `max` seeds from `question`.
pub fn extract_seeds(question: &str, schema: &SchemaSnapshot, max: usize) -> Vec<Seed> {
    let lowered = question.to_lowercase();
    let words: Vec<&str> = question.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()).collect();
    let lowered_words: Vec<String> = words.iter().map(|w| w.to_lowercase()).collect();

    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut seeds = Vec::new();
    let mut push = |seed: Seed, seeds: &mut Vec<Seed>| {
        let key = seed.text().to_lowercase();
        if seeds.len() < max && seen.insert(key) {
            seeds.push(seed);
        }
    };

    for (_, _, value) in schema.known_values() {
        let v = value.trim();
        if v.chars().count() >= MIN_SEED_CHARS && lowered.contains(&v.to_lowercase()) {
            push(Seed::Value(v.to_string()), &mut seeds);
        }
    }

    for label in &schema.labels {
        let l = label.to_lowercase();
        if lowered_words.iter().any(|w| *w == l || (w.starts_with(&l) && l.chars().count() >= 4)) {
            push(Seed::Label(label.clone()), &mut seeds);
        }
    }

    for word in capitalised_words(&words) {
        push(Seed::Value(word.to_string()), &mut seeds);
    }

    seeds
}

/// Words starting with an uppercase letter, letters only, at least three
/// characters, in order of first appearance.
fn capitalised_words<'q>(words: &[&'q str]) -> Vec<&'q str> {
    words
        .iter()
        .copied()
        .filter(|w| {
            let mut chars = w.chars();
            chars.next().is_some_and(char::is_uppercase)
                && w.chars().all(char::is_alphabetic)
                && w.chars().count() >= MIN_SEED_CHARS
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn schema() -> SchemaSnapshot {
        let mut b = SchemaSnapshot::builder(1);
        b.label("Product", 3)
            .label("Brand", 2)
            .label_property("Brand", "name", Some("MSI".into()))
            .label_property("Brand", "name", Some("ASUS".into()))
            .label_property("Product", "category", Some("Anakart".into()))
            .label_property("Product", "category", Some("Ekran Kartı".into()));
        b.build(Utc::now())
    }

    #[test]
    fn test_known_values_come_first() {
        let seeds = extract_seeds("MSI markasına ait anakart ürünlerini listele", &schema(), 10);
        assert_eq!(seeds, vec![Seed::Value("MSI".into()), Seed::Value("Anakart".into())]);
    }

    #[test]
    fn test_labels_and_capitalised_words() {
        let seeds = extract_seeds("Which products does Gigabyte make?", &schema(), 10);
        assert_eq!(seeds, vec![
            Seed::Label("Product".into()),
            Seed::Value("Which".into()),
            Seed::Value("Gigabyte".into()),
        ]);
    }

    #[test]
    fn test_turkish_capitals_and_short_words() {
        let seeds = extract_seeds("Öğrenci ve Şirket AB", &SchemaSnapshot::empty(), 10);
        assert_eq!(seeds, vec![Seed::Value("Öğrenci".into()), Seed::Value("Şirket".into())]);
    }

    #[test]
    fn test_bounded_and_deduplicated() {
        let q = "Alpha Beta Gamma Delta Alpha Epsilon";
        let seeds = extract_seeds(q, &SchemaSnapshot::empty(), 3);
        assert_eq!(seeds.len(), 3);
        let seeds = extract_seeds(q, &SchemaSnapshot::empty(), 10);
        assert_eq!(seeds.len(), 5);
    }

    #[test]
    fn test_nothing_to_extract() {
        assert!(extract_seeds("hangi ürünler var?", &SchemaSnapshot::empty(), 10).is_empty());
    }
}
