//! Scripted text generator.
//!
//! Replies come from prompt rules first (first rule whose needle occurs in
//! the prompt wins), then from a queue of steps. The last queued step is
//! repeated once the queue runs dry. Every call is recorded.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{Error, Result};
use super::TextGenerator;

#[derive(Debug, Clone)]
enum Step {
    Reply(String),
    Fail(String),
}

#[derive(Debug, Default)]
struct Script {
    rules: Vec<(String, Step)>,
    queue: VecDeque<Step>,
    prompts: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ScriptedGenerator {
    name: String,
    delay: Duration,
    script: Arc<Mutex<Script>>,
}

impl ScriptedGenerator {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), delay: Duration::ZERO, script: Arc::default() }
    }

    /// Queue a successful reply.
    pub fn reply(self, text: impl Into<String>) -> Self {
        self.script.lock().queue.push_back(Step::Reply(text.into()));
        self
    }

    /// Queue a failure, reported as `Unavailable`.
    pub fn fail(self, message: impl Into<String>) -> Self {
        self.script.lock().queue.push_back(Step::Fail(message.into()));
        self
    }

    /// Reply with `text` whenever the prompt contains `needle`.
    pub fn when(self, needle: impl Into<String>, text: impl Into<String>) -> Self {
        self.script.lock().rules.push((needle.into(), Step::Reply(text.into())));
        self
    }

    /// Fail whenever the prompt contains `needle`.
    pub fn fail_when(self, needle: impl Into<String>, message: impl Into<String>) -> Self {
        self.script.lock().rules.push((needle.into(), Step::Fail(message.into())));
        self
    }

    /// Sleep before every reply.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.script.lock().prompts.len()
    }

    /// Prompts seen so far, oldest first.
    pub fn prompts(&self) -> Vec<String> {
        self.script.lock().prompts.clone()
    }

    fn next_step(&self, prompt: &str) -> Option<Step> {
        let mut script = self.script.lock();
        script.prompts.push(prompt.to_string());
        if let Some((_, step)) = script.rules.iter().find(|(needle, _)| prompt.contains(needle.as_str())) {
            return Some(step.clone());
        }
        if script.queue.len() > 1 {
            script.queue.pop_front()
        } else {
            script.queue.front().cloned()
        }
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, _system: &str, prompt: &str) -> Result<String> {
        let step = self.next_step(prompt);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match step {
            Some(Step::Reply(text)) => Ok(text),
            Some(Step::Fail(message)) => Err(Error::Unavailable(message)),
            None => Err(Error::Unavailable(format!("{} has no scripted reply", self.name))),
        }
    }

    /// Reachable unless the next queued step is a failure. Not recorded
    /// as a prompt.
    async fn ping(&self) -> Result<()> {
        match self.script.lock().queue.front() {
            Some(Step::Fail(message)) => Err(Error::Unavailable(message.clone())),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queue_then_repeat_last() {
        let g = ScriptedGenerator::new("s").reply("one").reply("two");
        assert_eq!(g.generate("", "a").await.unwrap(), "one");
        assert_eq!(g.generate("", "b").await.unwrap(), "two");
        assert_eq!(g.generate("", "c").await.unwrap(), "two");
        assert_eq!(g.prompts(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_rules_win_over_queue() {
        let g = ScriptedGenerator::new("s").reply("default").when("Cypher", "MATCH (n) RETURN n").fail_when("boom", "down");
        assert_eq!(g.generate("", "write Cypher").await.unwrap(), "MATCH (n) RETURN n");
        assert_eq!(g.generate("", "hello").await.unwrap(), "default");
        assert!(matches!(g.generate("", "boom").await, Err(Error::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_empty_script_fails() {
        assert!(ScriptedGenerator::new("s").generate("", "x").await.is_err());
    }
}
