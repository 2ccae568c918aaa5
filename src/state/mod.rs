//! Pipeline state and the orchestrator's transition function
//!
//! `PipelineState` is owned by the chain for one application and handed to
//! each stage by value; the stage returns the replacement. `transition` is
//! the whole routing table and has no oracle dependency.

use crate::models::{
    BehavioralProfiles, EvaluationVerdict, FeatureVector, LoanApplication, LoanDecision,
    RiskAssessment, RiskTolerance, RuleProfiles, SimilarCase, TransactionLedger, VerdictAction,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    Behavioral,
    Decision,
    Evaluator,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Step::Behavioral => "behavioral",
            Step::Decision => "decision",
            Step::Evaluator => "evaluator",
        };
        f.write_str(s)
    }
}

/// What the orchestrator does after a step completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Move forward; retry count unchanged.
    Advance(Step),
    /// Re-run an earlier step; consumes one retry.
    Retry(Step),
    /// Evaluator approved; produce the report.
    Finish,
}

/// Routing table.
///
/// `verdict` is only read after the evaluator step. A missing or
/// unrecognized action counts as non-approval and re-runs the decision.
pub fn transition(step: Step, verdict: Option<&VerdictAction>) -> Transition {
    match step {
        Step::Behavioral => Transition::Advance(Step::Decision),
        Step::Decision => Transition::Advance(Step::Evaluator),
        Step::Evaluator => match verdict {
            Some(VerdictAction::Approve) => Transition::Finish,
            Some(VerdictAction::ReviseProfiles) => Transition::Retry(Step::Behavioral),
            Some(VerdictAction::ReviseDecision)
            | Some(VerdictAction::ReviseTerms)
            | Some(VerdictAction::Unrecognized(_))
            | None => Transition::Retry(Step::Decision),
        },
    }
}

/// Working record for one application.
#[derive(Debug, Clone)]
pub struct PipelineState {
    pub application_id: Uuid,
    pub user_id: Uuid,
    pub application: LoanApplication,
    pub ledger: TransactionLedger,
    pub risk_tolerance: RiskTolerance,
    pub directives: Option<String>,

    pub current_step: Step,
    pub retry_count: u32,
    pub evaluator_invocations: u32,

    pub user_features: Option<FeatureVector>,
    pub rule_profiles: Option<RuleProfiles>,
    pub behavioral_profiles: Option<BehavioralProfiles>,
    pub risk: Option<RiskAssessment>,
    /// `None` until retrieval has run once.
    pub similar_cases: Option<Vec<SimilarCase>>,
    pub decision: Option<LoanDecision>,
    pub evaluation_result: Option<EvaluationVerdict>,
}

impl PipelineState {
    pub fn new(
        user_id: Uuid,
        application: LoanApplication,
        ledger: TransactionLedger,
        risk_tolerance: RiskTolerance,
        directives: Option<String>,
    ) -> Self {
        Self {
            application_id: Uuid::new_v4(),
            user_id,
            application,
            ledger,
            risk_tolerance,
            directives,
            current_step: Step::Behavioral,
            retry_count: 0,
            evaluator_invocations: 0,
            user_features: None,
            rule_profiles: None,
            behavioral_profiles: None,
            risk: None,
            similar_cases: None,
            decision: None,
            evaluation_result: None,
        }
    }

    /// Evaluator feedback for the stage being re-run. Only present on retries.
    pub fn supervisor_feedback(&self) -> Option<String> {
        if self.retry_count == 0 {
            return None;
        }
        self.evaluation_result.as_ref().map(|v| v.feedback())
    }

    pub fn last_action(&self) -> Option<&VerdictAction> {
        self.evaluation_result.as_ref().map(|v| &v.action)
    }

    /// Apply a transition. Returns `true` when the evaluator approved.
    pub fn apply(&mut self, transition: Transition) -> bool {
        match transition {
            Transition::Advance(next) => {
                self.current_step = next;
                false
            }
            Transition::Retry(next) => {
                self.retry_count += 1;
                self.current_step = next;
                false
            }
            Transition::Finish => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ninety_day_ledger, sample_application};

    #[test]
    fn test_forward_edges() {
        assert_eq!(
            transition(Step::Behavioral, None),
            Transition::Advance(Step::Decision)
        );
        assert_eq!(
            transition(Step::Decision, Some(&VerdictAction::Approve)),
            Transition::Advance(Step::Evaluator)
        );
    }

    #[test]
    fn test_verdict_routing() {
        assert_eq!(
            transition(Step::Evaluator, Some(&VerdictAction::Approve)),
            Transition::Finish
        );
        assert_eq!(
            transition(Step::Evaluator, Some(&VerdictAction::ReviseProfiles)),
            Transition::Retry(Step::Behavioral)
        );
        assert_eq!(
            transition(Step::Evaluator, Some(&VerdictAction::ReviseDecision)),
            Transition::Retry(Step::Decision)
        );
        assert_eq!(
            transition(Step::Evaluator, Some(&VerdictAction::ReviseTerms)),
            Transition::Retry(Step::Decision)
        );
    }

    #[test]
    fn test_unrecognized_or_missing_verdict_is_non_approval() {
        let odd = VerdictAction::Unrecognized("escalate".to_string());
        assert_eq!(
            transition(Step::Evaluator, Some(&odd)),
            Transition::Retry(Step::Decision)
        );
        assert_eq!(
            transition(Step::Evaluator, None),
            Transition::Retry(Step::Decision)
        );
    }

    #[test]
    fn test_apply_counts_retries() {
        let mut state = PipelineState::new(
            Uuid::new_v4(),
            sample_application(),
            ninety_day_ledger(),
            RiskTolerance::Medium,
            None,
        );
        assert_eq!(state.current_step, Step::Behavioral);

        assert!(!state.apply(Transition::Advance(Step::Decision)));
        assert_eq!(state.retry_count, 0);

        assert!(!state.apply(Transition::Retry(Step::Behavioral)));
        assert_eq!(state.retry_count, 1);
        assert_eq!(state.current_step, Step::Behavioral);

        assert!(state.apply(Transition::Finish));
    }

    #[test]
    fn test_feedback_only_on_retry() {
        let mut state = PipelineState::new(
            Uuid::new_v4(),
            sample_application(),
            TransactionLedger::default(),
            RiskTolerance::Low,
            None,
        );
        state.evaluation_result = Some(EvaluationVerdict {
            action: VerdictAction::ReviseTerms,
            comments: "shorten the term".to_string(),
        });
        assert_eq!(state.supervisor_feedback(), None);

        state.retry_count = 1;
        assert_eq!(
            state.supervisor_feedback().as_deref(),
            Some("revise_terms: shorten the term")
        );
    }
}
