//! Stage agents
//!
//! Each stage takes the pipeline state by value and returns the replacement.
//! Numeric work is delegated to the extractor and the scorer; judgment is
//! delegated to the reasoning oracle.

pub mod behavioral;
pub mod decision;
pub mod evaluator;
pub mod prompts;
pub mod report;

use crate::error::PipelineError;
use crate::oracle::{Prompt, ReasoningOracle};
use crate::profiles::RuleProfiler;
use crate::retrieval::{Embedder, SimilarityRetriever};
use crate::scoring::ScoringContext;
use crate::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Shared collaborators for all stages of one chain.
pub struct StageContext {
    pub oracle: Arc<dyn ReasoningOracle>,
    pub oracle_timeout: Duration,
    pub scoring: Arc<ScoringContext>,
    pub profiler: RuleProfiler,
    pub embedder: Arc<dyn Embedder>,
    pub retriever: Arc<dyn SimilarityRetriever>,
    pub similar_cases_top_k: usize,
    pub retrieval_timeout: Duration,
}

impl StageContext {
    /// Call the oracle under the configured timeout. Any failure is fatal to
    /// the run.
    pub async fn ask(&self, prompt: &Prompt) -> Result<String> {
        let start = Instant::now();
        let reply = tokio::time::timeout(self.oracle_timeout, self.oracle.complete(prompt))
            .await
            .map_err(|_| {
                PipelineError::Reasoning(format!(
                    "{} stage timed out after {}s",
                    prompt.stage,
                    self.oracle_timeout.as_secs_f64()
                ))
            })??;

        debug!(
            stage = %prompt.stage,
            elapsed_ms = start.elapsed().as_millis() as u64,
            reply_len = reply.len(),
            "Oracle replied"
        );
        Ok(reply)
    }
}

/// Borrow a piece of state an earlier stage should have produced.
pub(crate) fn require<'a, T>(value: &'a Option<T>, what: &str) -> Result<&'a T> {
    value
        .as_ref()
        .ok_or_else(|| PipelineError::State(format!("{} not available yet", what)))
}
