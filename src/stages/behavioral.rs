//! Behavioral stage: features, rule profiles, oracle validation.

use super::{prompts, StageContext};
use crate::features::extract;
use crate::models::BehavioralProfiles;
use crate::oracle::StageResponse;
use crate::state::PipelineState;
use crate::Result;
use tracing::{info, warn};

pub async fn run(ctx: &StageContext, mut state: PipelineState) -> Result<PipelineState> {
    let features = extract(&state.ledger);
    let rules = ctx.profiler.infer(&features);
    info!(
        application_id = %state.application_id,
        ?rules,
        "Behavioral features extracted"
    );

    let feedback = state.supervisor_feedback();
    let prompt = prompts::behavioral(
        &features,
        &rules,
        feedback.as_deref(),
        state.behavioral_profiles.as_ref(),
    );
    let raw = ctx.ask(&prompt).await?;

    let mut profiles = StageResponse::behavioral(&raw).unwrap_or_else(|e| {
        warn!(error = %e, "Behavioral reply unusable; falling back to rule profiles");
        BehavioralProfiles::default()
    });

    // Rule-validated profiles the oracle left out keep their rule value.
    for (name, flag) in rules.as_flags() {
        profiles.profiles.entry(name).or_insert(flag);
    }

    info!(profiles = profiles.profiles.len(), "Behavioral profiles assigned");

    state.user_features = Some(features);
    state.rule_profiles = Some(rules);
    state.behavioral_profiles = Some(profiles);
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{ScriptedOracle, Stage};
    use crate::test_support::{initial_state, stage_context};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_oracle_profiles_are_kept() {
        let oracle = Arc::new(ScriptedOracle::new().with_replies(
            Stage::Behavioral,
            [r#"{"profiles": {"income_stability": 0, "liquidity_stress": 1}, "reasoning": {"liquidity_stress": "low buffer"}}"#],
        ));
        let ctx = stage_context(oracle.clone());

        let state = run(&ctx, initial_state()).await.unwrap();
        let profiles = state.behavioral_profiles.unwrap();

        // oracle override wins
        assert_eq!(profiles.profiles["income_stability"], 0);
        assert_eq!(profiles.profiles["liquidity_stress"], 1);
        // omitted rule profiles are filled in
        assert!(profiles.profiles.contains_key("savings_habit"));
        assert!(state.user_features.is_some());
        assert_eq!(oracle.call_count(Stage::Behavioral).await, 1);
    }

    #[tokio::test]
    async fn test_garbage_reply_falls_back_to_rules() {
        let oracle = Arc::new(ScriptedOracle::new().with_replies(Stage::Behavioral, ["I cannot help"]));
        let ctx = stage_context(oracle);

        let state = run(&ctx, initial_state()).await.unwrap();
        let rules = state.rule_profiles.unwrap();
        let profiles = state.behavioral_profiles.unwrap();

        assert_eq!(profiles.profiles, rules.as_flags());
        assert!(profiles.reasoning.is_empty());
    }
}
