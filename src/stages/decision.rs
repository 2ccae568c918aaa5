//! Decision stage: score, retrieve precedent, ask for a verdict.

use super::{prompts, require, StageContext};
use crate::error::PipelineError;
use crate::oracle::StageResponse;
use crate::retrieval::retrieve_similar_cases;
use crate::scoring::score;
use crate::state::PipelineState;
use crate::Result;
use tracing::info;

pub async fn run(ctx: &StageContext, mut state: PipelineState) -> Result<PipelineState> {
    // Scoring and retrieval are deterministic for one application; retries
    // reuse the first result.
    let risk = match state.risk {
        Some(risk) => risk,
        None => score(&ctx.scoring, &state.application)?,
    };

    if state.similar_cases.is_none() {
        let cases = retrieve_similar_cases(
            ctx.embedder.as_ref(),
            ctx.retriever.as_ref(),
            &state.application,
            ctx.similar_cases_top_k,
            ctx.retrieval_timeout,
        )
        .await;
        state.similar_cases = Some(cases);
    }

    let feedback = state.supervisor_feedback();
    let prompt = prompts::decision(&prompts::DecisionInputs {
        application: &state.application,
        features: require(&state.user_features, "user features")?,
        profiles: require(&state.behavioral_profiles, "behavioral profiles")?,
        risk: &risk,
        similar_cases: state.similar_cases.as_deref().unwrap_or_default(),
        feedback: feedback.as_deref(),
        previous: state.decision.as_ref(),
    });
    let raw = ctx.ask(&prompt).await?;

    let draft = StageResponse::decision(&raw).map_err(|e| PipelineError::InvalidResponse {
        stage: "decision",
        detail: e.detail,
    })?;
    let decision = draft.complete(&risk, state.application.loan_term);

    info!(
        application_id = %state.application_id,
        decision = %decision.decision,
        interest_rate = decision.interest_rate,
        loan_term = decision.loan_term,
        risk_score = decision.risk_score,
        "Decision made"
    );

    state.risk = Some(risk);
    state.decision = Some(decision);
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DecisionOutcome;
    use crate::oracle::{ScriptedOracle, Stage};
    use crate::stages::behavioral;
    use crate::test_support::{initial_state, stage_context, BEHAVIORAL_REPLY};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_decision_uses_scorer_risk() {
        let oracle = Arc::new(
            ScriptedOracle::new()
                .with_replies(Stage::Behavioral, [BEHAVIORAL_REPLY])
                .with_replies(
                    Stage::Decision,
                    [r#"{"decision": "accepted", "reason": "good", "risk_score": 0.01}"#],
                ),
        );
        let ctx = stage_context(oracle);

        let state = behavioral::run(&ctx, initial_state()).await.unwrap();
        let state = run(&ctx, state).await.unwrap();

        let risk = state.risk.unwrap();
        let decision = state.decision.unwrap();
        assert_eq!(decision.decision, DecisionOutcome::Accepted);
        assert_eq!(decision.risk_score, risk.risk_score);
        assert_eq!(decision.interest_rate, risk.predicted_interest_rate);
        assert_eq!(decision.loan_term, 36);
        assert_eq!(state.similar_cases.map(|c| c.len()), Some(0));
    }

    #[tokio::test]
    async fn test_decision_without_verdict_is_fatal() {
        let oracle = Arc::new(
            ScriptedOracle::new()
                .with_replies(Stage::Behavioral, [BEHAVIORAL_REPLY])
                .with_replies(Stage::Decision, ["I would need more information."]),
        );
        let ctx = stage_context(oracle);

        let state = behavioral::run(&ctx, initial_state()).await.unwrap();
        let err = run(&ctx, state).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InvalidResponse { stage: "decision", .. }
        ));
    }

    #[tokio::test]
    async fn test_decision_requires_behavioral_output() {
        let oracle = Arc::new(ScriptedOracle::new());
        let ctx = stage_context(oracle.clone());

        let err = run(&ctx, initial_state()).await.unwrap_err();
        assert!(matches!(err, PipelineError::State(_)));
        assert_eq!(oracle.call_count(Stage::Decision).await, 0);
    }
}
