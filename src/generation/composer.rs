//! Result rows -> natural-language answer.
//!
//! The generator chain is asked first. If it is missing or exhausted the
//! answer is rendered from the rows directly, so a request that got as far
//! as execution always gets an answer.

use tracing::{debug, warn};

use crate::execution::QueryResult;
use crate::model::ContextFragment;
use super::GeneratorChain;
use super::prompt::{ANSWER_SYSTEM, answer_prompt, render_rows};

pub const NO_DATA: &str = "No data found for this question.";

pub struct AnswerComposer {
    chain: Option<GeneratorChain>,
    max_rows: usize,
}

impl AnswerComposer {
    pub fn new(chain: Option<GeneratorChain>, max_rows: usize) -> Self {
        Self { chain, max_rows: max_rows.max(1) }
    }

    pub async fn compose(&self, question: &str, query: &str, fragments: &[ContextFragment], result: &QueryResult) -> String {
        let Some(chain) = &self.chain else {
            return fallback_answer(result, self.max_rows);
        };
        let prompt = answer_prompt(question, query, result, fragments, self.max_rows);
        match chain.complete("compose", ANSWER_SYSTEM, &prompt).await {
            Ok(completion) => {
                debug!(stage = "compose", backend = %completion.backend, "answer generated");
                tidy(&completion.text)
            }
            Err(err) => {
                warn!(stage = "compose", code = err.code(), error = %err, "answer generation failed, rendering rows");
                fallback_answer(result, self.max_rows)
            }
        }
    }
}

/// Direct rendering of a result.
///
/// | Result | Answer |
/// |--------|--------|
/// | no rows | `NO_DATA` |
/// | one row, one column | `Result: v` |
/// | otherwise | `Total N results:` and a numbered listing |
pub fn fallback_answer(result: &QueryResult, max_rows: usize) -> String {
    if result.is_empty() {
        return NO_DATA.to_string();
    }
    if let Some(v) = result.single_value() {
        return format!("Result: {}", v.render());
    }
    format!("Total {} results:\n{}", result.rows.len(), render_rows(result, max_rows).trim_end())
}

/// Trim and squeeze blank-line runs to one blank line.
fn tidy(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank = 0;
    for line in text.trim().lines() {
        if line.trim().is_empty() {
            blank += 1;
            if blank > 1 {
                continue;
            }
        } else {
            blank = 0;
        }
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out.trim_end().to_string()
}
