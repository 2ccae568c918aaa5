//! Stage response schemas
//!
//! Oracle text is normalized first, then checked against the schema of the
//! stage that asked. Shape is never assumed.

use super::Stage;
use crate::models::{
    BehavioralProfiles, DecisionOutcome, EvaluationVerdict, LoanDecision, RiskAssessment,
    VerdictAction,
};
use crate::normalize::{normalize_markdown, normalize_text};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
#[error("{stage} response does not match its schema: {detail}")]
pub struct SchemaError {
    pub stage: Stage,
    pub detail: String,
}

impl SchemaError {
    fn new(stage: Stage, detail: impl Into<String>) -> Self {
        Self {
            stage,
            detail: detail.into(),
        }
    }
}

/// Decision fields as the oracle returned them. Completed against the
/// scorer's output before use.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionDraft {
    pub decision: DecisionOutcome,
    pub reason: Option<String>,
    /// Fractional rate
    pub interest_rate: Option<f64>,
    pub loan_term: Option<u32>,
}

impl DecisionDraft {
    /// Fill gaps from the scorer and the application. `risk_score` always
    /// comes from the scorer.
    pub fn complete(self, assessment: &RiskAssessment, application_term: u32) -> LoanDecision {
        LoanDecision {
            decision: self.decision,
            reason: self.reason.unwrap_or_default(),
            interest_rate: self
                .interest_rate
                .unwrap_or(assessment.predicted_interest_rate),
            loan_term: self.loan_term.unwrap_or(application_term),
            risk_score: assessment.risk_score,
        }
    }
}

/// The four reply shapes the pipeline understands.
#[derive(Debug, Clone, PartialEq)]
pub enum StageResponse {
    Behavioral(BehavioralProfiles),
    Decision(DecisionDraft),
    Evaluation(EvaluationVerdict),
    /// Display markdown
    Report(String),
}

impl StageResponse {
    /// Normalize raw oracle text and validate it for `stage`.
    pub fn parse(stage: Stage, raw: &str) -> Result<Self, SchemaError> {
        if stage == Stage::Report {
            return Ok(StageResponse::Report(report_markdown(raw)));
        }
        Self::from_value(stage, &normalize_text(raw))
    }

    pub fn behavioral(raw: &str) -> Result<BehavioralProfiles, SchemaError> {
        parse_behavioral(&normalize_text(raw))
    }

    pub fn decision(raw: &str) -> Result<DecisionDraft, SchemaError> {
        parse_decision(&normalize_text(raw))
    }

    pub fn evaluation(raw: &str) -> Result<EvaluationVerdict, SchemaError> {
        parse_evaluation(&normalize_text(raw))
    }

    pub fn report(raw: &str) -> String {
        report_markdown(raw)
    }

    pub fn from_value(stage: Stage, value: &Value) -> Result<Self, SchemaError> {
        match stage {
            Stage::Behavioral => parse_behavioral(value).map(StageResponse::Behavioral),
            Stage::Decision => parse_decision(value).map(StageResponse::Decision),
            Stage::Evaluator => parse_evaluation(value).map(StageResponse::Evaluation),
            Stage::Report => Ok(StageResponse::Report(normalize_markdown(value))),
        }
    }
}

fn object(stage: Stage, value: &Value) -> Result<&Map<String, Value>, SchemaError> {
    match value {
        Value::Object(map) if map.contains_key("raw_text") && map.len() == 1 => {
            Err(SchemaError::new(stage, "reply contained no JSON"))
        }
        Value::Object(map) => Ok(map),
        other => Err(SchemaError::new(
            stage,
            format!("expected an object, got {}", kind(other)),
        )),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

//
// ================= Behavioral =================
//

fn parse_behavioral(value: &Value) -> Result<BehavioralProfiles, SchemaError> {
    let stage = Stage::Behavioral;
    let map = object(stage, value)?;

    let raw_profiles = map
        .get("profiles")
        .and_then(Value::as_object)
        .ok_or_else(|| SchemaError::new(stage, "missing 'profiles' mapping"))?;
    if raw_profiles.is_empty() {
        return Err(SchemaError::new(stage, "'profiles' is empty"));
    }

    let mut profiles = BTreeMap::new();
    for (name, flag) in raw_profiles {
        let flag = binary_flag(flag).ok_or_else(|| {
            SchemaError::new(stage, format!("profile '{}' is not 0/1: {}", name, flag))
        })?;
        profiles.insert(name.clone(), flag);
    }

    let reasoning = map
        .get("reasoning")
        .and_then(Value::as_object)
        .map(|r| r.iter().map(|(k, v)| (k.clone(), text(v))).collect())
        .unwrap_or_default();

    Ok(BehavioralProfiles {
        profiles,
        reasoning,
    })
}

fn binary_flag(value: &Value) -> Option<u8> {
    match value {
        Value::Bool(b) => Some(u8::from(*b)),
        Value::Number(n) => match n.as_f64() {
            Some(v) if v == 0.0 => Some(0),
            Some(v) if v == 1.0 => Some(1),
            _ => None,
        },
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "0" | "no" | "false" => Some(0),
            "1" | "yes" | "true" => Some(1),
            _ => None,
        },
        _ => None,
    }
}

//
// ================= Decision =================
//

fn parse_decision(value: &Value) -> Result<DecisionDraft, SchemaError> {
    let stage = Stage::Decision;
    let map = object(stage, value)?;

    let raw = map
        .get("decision")
        .ok_or_else(|| SchemaError::new(stage, "missing 'decision'"))?;
    let decision = raw
        .as_str()
        .and_then(DecisionOutcome::parse)
        .ok_or_else(|| SchemaError::new(stage, format!("unrecognized decision {}", raw)))?;

    let reason = map.get("reason").map(text);
    let interest_rate = map.get("interest_rate").and_then(fractional_rate);
    let loan_term = map
        .get("loan_term")
        .or_else(|| map.get("term"))
        .and_then(term_months);

    Ok(DecisionDraft {
        decision,
        reason,
        interest_rate,
        loan_term,
    })
}

/// Accepts 0.12, "0.12", "12%" and 12 (percentage points above 1).
fn fractional_rate(value: &Value) -> Option<f64> {
    let (number, percent) = match value {
        Value::Number(n) => (n.as_f64()?, false),
        Value::String(s) => {
            let s = s.trim();
            match s.strip_suffix('%') {
                Some(stripped) => (stripped.trim().parse().ok()?, true),
                None => (s.parse().ok()?, false),
            }
        }
        _ => return None,
    };

    if !number.is_finite() || number < 0.0 {
        return None;
    }
    if percent || number > 1.0 {
        Some(number / 100.0)
    } else {
        Some(number)
    }
}

fn term_months(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|v| v.fract() == 0.0 && *v >= 0.0).map(|v| v as u64))
            .and_then(|v| u32::try_from(v).ok()),
        Value::String(s) => {
            let digits: String = s.chars().filter(char::is_ascii_digit).collect();
            digits.parse().ok()
        }
        _ => None,
    }
}

//
// ================= Evaluator =================
//

fn parse_evaluation(value: &Value) -> Result<EvaluationVerdict, SchemaError> {
    let stage = Stage::Evaluator;
    let map = object(stage, value)?;

    let action = map
        .get("action")
        .and_then(Value::as_str)
        .ok_or_else(|| SchemaError::new(stage, "missing 'action'"))?;

    let comments = map
        .get("comments")
        .or_else(|| map.get("feedback"))
        .map(text)
        .unwrap_or_default();

    Ok(EvaluationVerdict {
        action: VerdictAction::from(action.to_string()),
        comments,
    })
}

//
// ================= Report =================
//

/// Reports are prose. Only a reply that is entirely JSON is unpacked.
fn report_markdown(raw: &str) -> String {
    match serde_json::from_str::<Value>(raw.trim()) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => normalize_markdown(&value),
        _ => normalize_markdown(&Value::String(raw.to_string())),
    }
}
