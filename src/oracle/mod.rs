//! Reasoning oracle boundary
//!
//! Stage agents delegate judgment to an external LLM through
//! [`ReasoningOracle`]. Replies are free text; `response` turns them into
//! one of the four expected stage schemas.

use crate::error::PipelineError;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Duration;
use tokio::sync::Mutex;

pub mod response;
pub use response::{DecisionDraft, SchemaError, StageResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Behavioral,
    Decision,
    Evaluator,
    Report,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Behavioral => "behavioral",
            Stage::Decision => "decision",
            Stage::Evaluator => "evaluator",
            Stage::Report => "report",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured prompt: task instructions plus JSON-serialized inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub stage: Stage,
    pub system: String,
    pub user: String,
}

/// External natural-language reasoning service.
#[async_trait]
pub trait ReasoningOracle: Send + Sync {
    /// Free-text completion. Failure is fatal to the calling pipeline run.
    async fn complete(&self, prompt: &Prompt) -> Result<String>;
}

//
// ================= Scripted Oracle =================
//

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    /// Sleep before answering; used to exercise caller timeouts.
    Delayed(Duration, String),
    Fail(String),
}

impl From<&str> for ScriptedReply {
    fn from(text: &str) -> Self {
        ScriptedReply::Text(text.to_string())
    }
}

impl From<String> for ScriptedReply {
    fn from(text: String) -> Self {
        ScriptedReply::Text(text)
    }
}

/// Replays per-stage replies and records every prompt it receives.
///
/// Keeps the pipeline runnable without an LLM. The last reply queued for a
/// stage repeats once the queue is drained.
#[derive(Default)]
pub struct ScriptedOracle {
    replies: Mutex<HashMap<Stage, VecDeque<ScriptedReply>>>,
    calls: Mutex<Vec<Prompt>>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style: queue replies for `stage`.
    pub fn with_replies<I, R>(mut self, stage: Stage, replies: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<ScriptedReply>,
    {
        self.replies
            .get_mut()
            .entry(stage)
            .or_default()
            .extend(replies.into_iter().map(Into::into));
        self
    }

    pub async fn push(&self, stage: Stage, reply: impl Into<ScriptedReply>) {
        self.replies
            .lock()
            .await
            .entry(stage)
            .or_default()
            .push_back(reply.into());
    }

    pub async fn calls(&self) -> Vec<Prompt> {
        self.calls.lock().await.clone()
    }

    pub async fn call_count(&self, stage: Stage) -> usize {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|p| p.stage == stage)
            .count()
    }

    /// Stages in call order.
    pub async fn call_sequence(&self) -> Vec<Stage> {
        self.calls.lock().await.iter().map(|p| p.stage).collect()
    }
}

#[async_trait]
impl ReasoningOracle for ScriptedOracle {
    async fn complete(&self, prompt: &Prompt) -> Result<String> {
        self.calls.lock().await.push(prompt.clone());

        let reply = {
            let mut replies = self.replies.lock().await;
            let queue = replies.get_mut(&prompt.stage).ok_or_else(|| {
                PipelineError::Reasoning(format!("no scripted reply for {} stage", prompt.stage))
            })?;
            if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            }
        };

        match reply {
            Some(ScriptedReply::Text(text)) => Ok(text),
            Some(ScriptedReply::Delayed(delay, text)) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
            Some(ScriptedReply::Fail(message)) => Err(PipelineError::Reasoning(message)),
            None => Err(PipelineError::Reasoning(format!(
                "no scripted reply for {} stage",
                prompt.stage
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt(stage: Stage) -> Prompt {
        Prompt {
            stage,
            system: String::new(),
            user: String::new(),
        }
    }

    #[tokio::test]
    async fn test_scripted_replies_drain_then_repeat() {
        let oracle = ScriptedOracle::new().with_replies(Stage::Evaluator, ["first", "last"]);

        assert_eq!(oracle.complete(&prompt(Stage::Evaluator)).await.unwrap(), "first");
        assert_eq!(oracle.complete(&prompt(Stage::Evaluator)).await.unwrap(), "last");
        assert_eq!(oracle.complete(&prompt(Stage::Evaluator)).await.unwrap(), "last");
        assert_eq!(oracle.call_count(Stage::Evaluator).await, 3);
    }

    #[tokio::test]
    async fn test_unscripted_stage_is_reasoning_error() {
        let oracle = ScriptedOracle::new();
        let err = oracle.complete(&prompt(Stage::Report)).await.unwrap_err();
        assert!(matches!(err, PipelineError::Reasoning(_)));
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let oracle = ScriptedOracle::new();
        oracle
            .push(Stage::Decision, ScriptedReply::Fail("quota".to_string()))
            .await;
        let err = oracle.complete(&prompt(Stage::Decision)).await.unwrap_err();
        assert!(err.to_string().contains("quota"));
    }
}
