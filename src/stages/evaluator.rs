//! Evaluator stage: supervisory review of profiles and decision.

use super::{prompts, require, StageContext};
use crate::models::{EvaluationVerdict, VerdictAction};
use crate::oracle::StageResponse;
use crate::state::PipelineState;
use crate::Result;
use tracing::{info, warn};

/// Action recorded when the evaluator reply has no usable verdict.
pub const UNPARSEABLE_ACTION: &str = "unparseable";

pub async fn run(ctx: &StageContext, mut state: PipelineState) -> Result<PipelineState> {
    let prompt = prompts::evaluator(
        &prompts::ReviewInputs {
            application: &state.application,
            features: require(&state.user_features, "user features")?,
            profiles: require(&state.behavioral_profiles, "behavioral profiles")?,
            decision: require(&state.decision, "decision")?,
            directives: state.directives.as_deref(),
        },
        state.risk_tolerance,
    );
    let raw = ctx.ask(&prompt).await?;
    state.evaluator_invocations += 1;

    let verdict = StageResponse::evaluation(&raw).unwrap_or_else(|e| {
        warn!(error = %e, "Evaluator reply unusable; treating as non-approval");
        EvaluationVerdict {
            action: VerdictAction::Unrecognized(UNPARSEABLE_ACTION.to_string()),
            comments: e.detail,
        }
    });

    if let VerdictAction::Unrecognized(action) = &verdict.action {
        warn!(action = %action, "Unrecognized evaluator action");
    }
    info!(
        application_id = %state.application_id,
        action = %verdict.action,
        retry_count = state.retry_count,
        "Evaluator verdict"
    );

    state.evaluation_result = Some(verdict);
    Ok(state)
}
