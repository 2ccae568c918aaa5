//! Eligibility chain - drives one application through the stage machine
//!
//! BEHAVIORAL → DECISION → EVALUATOR → (approve | revise → retry) → REPORT

use crate::audit::{build_store, ApplicationStore};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::gemini::GeminiClient;
use crate::memory::Transcript;
use crate::models::{
    ApplicationRecord, LoanApplication, PipelineOutcome, RiskTolerance, Termination,
    TransactionLedger, TranscriptRole,
};
use crate::oracle::ReasoningOracle;
use crate::profiles::RuleProfiler;
use crate::retrieval::{Embedder, InMemoryRetriever, QdrantRetriever, SimilarityRetriever};
use crate::scoring::ScoringContext;
use crate::stages::{behavioral, decision, evaluator, prompts, report, require, StageContext};
use crate::state::{transition, PipelineState, Step, Transition};
use crate::Result;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct EligibilityChain {
    ctx: StageContext,
    max_retries: u32,
    store: Arc<dyn ApplicationStore>,
}

impl EligibilityChain {
    pub fn new(ctx: StageContext, max_retries: u32, store: Arc<dyn ApplicationStore>) -> Self {
        Self {
            ctx,
            max_retries,
            store,
        }
    }

    /// Wire the production collaborators: Gemini for reasoning and
    /// embeddings, Qdrant when configured, Postgres when configured.
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let api_key = config
            .gemini_api_key
            .clone()
            .ok_or_else(|| PipelineError::Config("GEMINI_API_KEY is not set".to_string()))?;
        let mut client = GeminiClient::new(api_key)?;
        if let Some(model) = &config.gemini_model {
            client = client.with_model(model);
        }
        info!(model = client.model(), "Gemini client ready");
        let gemini = Arc::new(client);

        let scoring = Arc::new(ScoringContext::load(&config.artifacts_dir)?);

        let retriever: Arc<dyn SimilarityRetriever> = match &config.qdrant_url {
            Some(url) => Arc::new(QdrantRetriever::new(
                url,
                &config.qdrant_collection,
                config.qdrant_api_key.clone(),
            )?),
            None => {
                warn!("QDRANT_URL not set; similar-case retrieval uses an empty in-memory index");
                Arc::new(InMemoryRetriever::new())
            }
        };

        let oracle: Arc<dyn ReasoningOracle> = gemini.clone();
        let embedder: Arc<dyn Embedder> = gemini;
        let ctx = StageContext {
            oracle,
            oracle_timeout: config.oracle_timeout,
            scoring,
            profiler: RuleProfiler::new(),
            embedder,
            retriever,
            similar_cases_top_k: config.similar_cases_top_k,
            retrieval_timeout: config.retrieval_timeout,
        };

        Ok(Self::new(
            ctx,
            config.max_retries,
            build_store(config.database_url.as_deref()),
        ))
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn store(&self) -> Arc<dyn ApplicationStore> {
        self.store.clone()
    }

    /// Parse both ledgers before any oracle call, then run.
    pub async fn run_from_csv(
        &self,
        user_id: Uuid,
        application: LoanApplication,
        bank_csv: &str,
        card_csv: &str,
        risk_tolerance: RiskTolerance,
        directives: Option<String>,
    ) -> Result<PipelineOutcome> {
        let ledger = TransactionLedger::from_csv_text(bank_csv, card_csv)?;
        self.run(user_id, application, ledger, risk_tolerance, directives)
            .await
    }

    /// Run one application to a report.
    ///
    /// Any fatal error returns before the application log is touched.
    pub async fn run(
        &self,
        user_id: Uuid,
        application: LoanApplication,
        ledger: TransactionLedger,
        risk_tolerance: RiskTolerance,
        directives: Option<String>,
    ) -> Result<PipelineOutcome> {
        let start_time = Instant::now();
        let mut reasoning_trace = Vec::new();
        let mut transcript = Transcript::new();

        let mut state = PipelineState::new(user_id, application, ledger, risk_tolerance, directives);

        info!(
            application_id = %state.application_id,
            user_id = %user_id,
            bank_rows = state.ledger.bank.len(),
            card_rows = state.ledger.card.len(),
            max_retries = self.max_retries,
            "Eligibility chain: starting"
        );

        reasoning_trace.push("INPUT: Application received".to_string());
        transcript.push(
            TranscriptRole::Applicant,
            format!(
                "Application submitted: {:.2} for {} over {} months",
                state.application.loan_amount,
                state.application.loan_purpose.as_str(),
                state.application.loan_term
            ),
        );

        let termination = loop {
            if state.retry_count > self.max_retries {
                warn!(
                    application_id = %state.application_id,
                    retry_count = state.retry_count,
                    evaluator_invocations = state.evaluator_invocations,
                    "Retry budget exhausted; forcing report on last state"
                );
                reasoning_trace.push(format!(
                    "EXHAUSTED: {} retries spent without approval",
                    self.max_retries
                ));
                break Termination::Exhausted;
            }

            let step = state.current_step;
            debug!(step = %step, retry_count = state.retry_count, "Running stage");

            state = match step {
                Step::Behavioral => behavioral::run(&self.ctx, state).await?,
                Step::Decision => decision::run(&self.ctx, state).await?,
                Step::Evaluator => evaluator::run(&self.ctx, state).await?,
            };
            record_step(step, &state, &mut transcript, &mut reasoning_trace);

            let next = transition(step, state.last_action());
            if state.apply(next) {
                reasoning_trace.push(format!(
                    "COMPLETE: approved after {} retries",
                    state.retry_count
                ));
                break Termination::Approved;
            }
            if let Transition::Retry(target) = next {
                info!(
                    application_id = %state.application_id,
                    retry_count = state.retry_count,
                    next = %target,
                    "Evaluator requested revision"
                );
            }
        };

        // === REPORT ===
        let features = require(&state.user_features, "user features")?.clone();
        let profiles = require(&state.behavioral_profiles, "behavioral profiles")?.clone();
        let decision = require(&state.decision, "decision")?.clone();

        let final_report = report::run(
            &self.ctx,
            &prompts::ReviewInputs {
                application: &state.application,
                features: &features,
                profiles: &profiles,
                decision: &decision,
                directives: state.directives.as_deref(),
            },
        )
        .await?;
        reasoning_trace.push("REPORT: Final report produced".to_string());
        transcript.push(TranscriptRole::System, "Report produced");

        // === RECORD ===
        let record = ApplicationRecord::new(user_id, state.application.clone(), &decision)?;
        let record_id = self.store.append(record).await?;

        info!(
            application_id = %state.application_id,
            record_id = %record_id,
            decision = %decision.decision,
            termination = ?termination,
            retry_count = state.retry_count,
            evaluator_invocations = state.evaluator_invocations,
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "Eligibility chain: complete"
        );

        Ok(PipelineOutcome {
            application_id: state.application_id,
            user_id,
            application: state.application,
            final_report,
            decision,
            termination,
            retry_count: state.retry_count,
            evaluator_invocations: state.evaluator_invocations,
            behavioral_profiles: profiles,
            user_features: features,
            last_verdict: state.evaluation_result,
            similar_cases: state.similar_cases.unwrap_or_default(),
            risk_tolerance: state.risk_tolerance,
            directives: state.directives,
            transcript: transcript.into_entries(),
            reasoning_trace,
        })
    }

    /// Re-run only the report stage with new directives. Decision, rate and
    /// risk score are reused as decided; the application log is untouched.
    pub async fn regenerate_report(
        &self,
        outcome: &PipelineOutcome,
        directives: Option<String>,
    ) -> Result<PipelineOutcome> {
        let final_report = report::run(
            &self.ctx,
            &prompts::ReviewInputs {
                application: &outcome.application,
                features: &outcome.user_features,
                profiles: &outcome.behavioral_profiles,
                decision: &outcome.decision,
                directives: directives.as_deref(),
            },
        )
        .await?;

        info!(
            application_id = %outcome.application_id,
            "Report regenerated with new directives"
        );

        let mut updated = outcome.clone();
        let mut transcript = Transcript::from_entries(std::mem::take(&mut updated.transcript));
        transcript.push(TranscriptRole::System, "Report regenerated with new directives");

        updated.final_report = final_report;
        updated.directives = directives;
        updated.transcript = transcript.into_entries();
        updated
            .reasoning_trace
            .push("REPORT: Regenerated with new directives".to_string());
        Ok(updated)
    }
}

fn record_step(
    step: Step,
    state: &PipelineState,
    transcript: &mut Transcript,
    reasoning_trace: &mut Vec<String>,
) {
    match step {
        Step::Behavioral => {
            if let Some(profiles) = &state.behavioral_profiles {
                let flagged = profiles.profiles.values().filter(|v| **v == 1).count();
                transcript.push(
                    TranscriptRole::Agent,
                    format!(
                        "Behavioral profiles assigned: {} ({} flagged)",
                        profiles.profiles.len(),
                        flagged
                    ),
                );
            }
        }
        Step::Decision => {
            if let Some(decision) = &state.decision {
                transcript.push(
                    TranscriptRole::Agent,
                    format!(
                        "Decision: {} at {:.2}% over {} months (risk {:.3})",
                        decision.decision,
                        decision.interest_rate * 100.0,
                        decision.loan_term,
                        decision.risk_score
                    ),
                );
            }
        }
        Step::Evaluator => {
            if let Some(verdict) = &state.evaluation_result {
                transcript.push(
                    TranscriptRole::Agent,
                    format!("Evaluator {}: {}", verdict.action, verdict.comments),
                );
            }
        }
    }
    reasoning_trace.push(format!("STEP: {} (retry {})", step, state.retry_count));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryApplicationStore;
    use crate::models::{DecisionOutcome, VerdictAction};
    use crate::oracle::{ScriptedOracle, ScriptedReply, Stage};
    use crate::test_support::{
        ninety_day_ledger, sample_application, stage_context, BEHAVIORAL_REPLY, DECISION_REPLY,
    };
    use std::time::Duration;

    const APPROVE: &str = r#"{"action": "approve", "comments": "sound"}"#;
    const REVISE_TERMS: &str = r#"{"action": "revise_terms", "comments": "shorten the term"}"#;
    const REVISE_PROFILES: &str =
        r#"{"action": "revise_profiles", "comments": "liquidity looks tight"}"#;

    fn oracle_with(evaluator: &[&str]) -> Arc<ScriptedOracle> {
        Arc::new(
            ScriptedOracle::new()
                .with_replies(Stage::Behavioral, [BEHAVIORAL_REPLY])
                .with_replies(Stage::Decision, [DECISION_REPLY])
                .with_replies(Stage::Evaluator, evaluator.iter().copied())
                .with_replies(Stage::Report, ["# Loan Report\nAccepted."]),
        )
    }

    fn chain(
        oracle: Arc<ScriptedOracle>,
        max_retries: u32,
    ) -> (EligibilityChain, Arc<InMemoryApplicationStore>) {
        let store = Arc::new(InMemoryApplicationStore::new());
        let chain = EligibilityChain::new(stage_context(oracle), max_retries, store.clone());
        (chain, store)
    }

    async fn run(chain: &EligibilityChain) -> Result<PipelineOutcome> {
        chain
            .run(
                Uuid::new_v4(),
                sample_application(),
                ninety_day_ledger(),
                RiskTolerance::Medium,
                None,
            )
            .await
    }

    #[tokio::test]
    async fn test_approve_first_time() {
        let oracle = oracle_with(&[APPROVE]);
        let (chain, store) = chain(oracle.clone(), 3);

        let outcome = run(&chain).await.unwrap();

        assert_eq!(
            oracle.call_sequence().await,
            vec![Stage::Behavioral, Stage::Decision, Stage::Evaluator, Stage::Report]
        );
        assert_eq!(outcome.retry_count, 0);
        assert_eq!(outcome.evaluator_invocations, 1);
        assert_eq!(outcome.termination, Termination::Approved);
        assert_eq!(outcome.decision.decision, DecisionOutcome::Accepted);
        assert_eq!(outcome.final_report, "# Loan Report\nAccepted.");
        assert_eq!(
            outcome.last_verdict.map(|v| v.action),
            Some(VerdictAction::Approve)
        );

        assert_eq!(outcome.transcript.len(), 5);
        assert_eq!(outcome.transcript[0].role, TranscriptRole::Applicant);
        assert!(outcome.transcript[3].content.starts_with("Evaluator approve"));
        assert_eq!(outcome.transcript[4].content, "Report produced");

        let records = store.list().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].user_id, outcome.user_id);
        assert_eq!(records[0].decision, DecisionOutcome::Accepted);
    }

    #[tokio::test]
    async fn test_revise_terms_then_approve() {
        let oracle = oracle_with(&[REVISE_TERMS, APPROVE]);
        let (chain, _) = chain(oracle.clone(), 3);

        let outcome = run(&chain).await.unwrap();

        assert_eq!(oracle.call_count(Stage::Behavioral).await, 1);
        assert_eq!(oracle.call_count(Stage::Decision).await, 2);
        assert_eq!(oracle.call_count(Stage::Evaluator).await, 2);
        assert_eq!(outcome.retry_count, 1);
        assert_eq!(outcome.termination, Termination::Approved);

        // second decision call carries the evaluator's feedback
        let calls = oracle.calls().await;
        let decisions: Vec<_> = calls.iter().filter(|p| p.stage == Stage::Decision).collect();
        assert!(!decisions[0].user.contains("shorten the term"));
        assert!(decisions[1].user.contains("shorten the term"));
    }

    #[tokio::test]
    async fn test_revise_profiles_routes_through_behavioral() {
        let oracle = oracle_with(&[REVISE_PROFILES, APPROVE]);
        let (chain, _) = chain(oracle.clone(), 3);

        let outcome = run(&chain).await.unwrap();

        assert_eq!(
            oracle.call_sequence().await,
            vec![
                Stage::Behavioral,
                Stage::Decision,
                Stage::Evaluator,
                Stage::Behavioral,
                Stage::Decision,
                Stage::Evaluator,
                Stage::Report,
            ]
        );
        assert_eq!(outcome.retry_count, 1);

        let calls = oracle.calls().await;
        assert!(calls[3].user.contains("liquidity looks tight"));
    }

    #[tokio::test]
    async fn test_never_approving_evaluator_exhausts_budget() {
        let oracle = oracle_with(&[r#"{"action": "revise_decision", "comments": "again"}"#]);
        let (chain, store) = chain(oracle.clone(), 2);

        let outcome = run(&chain).await.unwrap();

        assert_eq!(oracle.call_count(Stage::Evaluator).await, 3);
        assert_eq!(oracle.call_count(Stage::Report).await, 1);
        assert_eq!(outcome.evaluator_invocations, 3);
        assert_eq!(outcome.retry_count, 3);
        assert_eq!(outcome.termination, Termination::Exhausted);
        assert!(!outcome.final_report.is_empty());
        assert_eq!(store.list().await.unwrap().len(), 1);
        assert!(outcome
            .reasoning_trace
            .iter()
            .any(|line| line.starts_with("EXHAUSTED")));
    }

    #[tokio::test]
    async fn test_unrecognized_action_consumes_retry() {
        let oracle = oracle_with(&[r#"{"action": "escalate"}"#, APPROVE]);
        let (chain, _) = chain(oracle.clone(), 3);

        let outcome = run(&chain).await.unwrap();

        assert_eq!(outcome.retry_count, 1);
        assert_eq!(oracle.call_count(Stage::Behavioral).await, 1);
        assert_eq!(oracle.call_count(Stage::Decision).await, 2);
    }

    #[tokio::test]
    async fn test_oracle_failure_is_fatal_and_logs_nothing() {
        let oracle = Arc::new(
            ScriptedOracle::new()
                .with_replies(Stage::Behavioral, [BEHAVIORAL_REPLY])
                .with_replies(
                    Stage::Decision,
                    [ScriptedReply::Fail("quota exceeded".to_string())],
                ),
        );
        let (chain, store) = chain(oracle.clone(), 3);

        let err = run(&chain).await.unwrap_err();

        assert!(matches!(err, PipelineError::Reasoning(_)));
        assert_eq!(oracle.call_count(Stage::Report).await, 0);
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_oracle_timeout_is_fatal() {
        let oracle = Arc::new(ScriptedOracle::new().with_replies(
            Stage::Behavioral,
            [ScriptedReply::Delayed(
                Duration::from_secs(5),
                BEHAVIORAL_REPLY.to_string(),
            )],
        ));
        let store = Arc::new(InMemoryApplicationStore::new());
        let mut ctx = stage_context(oracle);
        ctx.oracle_timeout = Duration::from_millis(20);
        let chain = EligibilityChain::new(ctx, 3, store.clone());

        let err = run(&chain).await.unwrap_err();

        assert!(matches!(err, PipelineError::Reasoning(_)));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_ledger_fails_before_any_oracle_call() {
        let oracle = oracle_with(&[APPROVE]);
        let (chain, store) = chain(oracle.clone(), 3);

        let err = chain
            .run_from_csv(
                Uuid::new_v4(),
                sample_application(),
                "date,income\n2024-01-01,100\n",
                "date,business_name,amount_of_deal,amount_paid,category\n",
                RiskTolerance::Low,
                None,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::MalformedLedger(_)));
        assert!(oracle.calls().await.is_empty());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_regenerate_report_reuses_decision() {
        let oracle = Arc::new(
            ScriptedOracle::new()
                .with_replies(Stage::Behavioral, [BEHAVIORAL_REPLY])
                .with_replies(Stage::Decision, [DECISION_REPLY])
                .with_replies(Stage::Evaluator, [APPROVE])
                .with_replies(Stage::Report, ["# First", "# Second"]),
        );
        let (chain, store) = chain(oracle.clone(), 3);

        let outcome = run(&chain).await.unwrap();
        let updated = chain
            .regenerate_report(&outcome, Some("mention the collateral".to_string()))
            .await
            .unwrap();

        assert_eq!(outcome.final_report, "# First");
        assert_eq!(updated.final_report, "# Second");
        assert_eq!(updated.decision, outcome.decision);
        assert_eq!(updated.directives.as_deref(), Some("mention the collateral"));
        assert_eq!(updated.transcript.len(), outcome.transcript.len() + 1);
        assert_eq!(oracle.call_count(Stage::Decision).await, 1);
        assert_eq!(store.list().await.unwrap().len(), 1);

        let calls = oracle.calls().await;
        assert!(calls.last().unwrap().user.contains("mention the collateral"));
    }
}
