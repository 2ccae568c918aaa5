//! Prompt builders for the four reasoning stages.
//!
//! Inputs are embedded as pretty JSON. Undefined features serialize as
//! `null` so the oracle sees them as missing rather than zero.

use crate::models::{
    BehavioralProfiles, FeatureVector, LoanApplication, LoanDecision, RiskAssessment,
    RiskTolerance, RuleProfiles, SimilarCase,
};
use crate::oracle::{Prompt, Stage};
use crate::profiles::PROFILE_DEFINITIONS;
use serde::Serialize;
use serde_json::{json, Map, Value};

const NO_DIRECTIVES: &str = "No additional directives provided.";

fn pretty<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "null".to_string())
}

/// Features without the per-category breakdown; used where the scalar
/// summary is enough.
fn feature_summary(features: &FeatureVector) -> Value {
    let mut value = serde_json::to_value(features).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut value {
        map.remove("last3_category_shares");
    }
    value
}

fn application_with_dti(application: &LoanApplication) -> Value {
    let mut value = serde_json::to_value(application).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut value {
        map.insert("debt_to_income".to_string(), json!(application.debt_to_income()));
    }
    value
}

fn revision_block(feedback: Option<&str>, previous: Option<String>) -> String {
    match feedback {
        None => String::new(),
        Some(feedback) => format!(
            "\nSupervisor feedback on your previous answer:\n{}\n\nPrevious answer being revised:\n{}\n\n\
             Revise your answer to address the feedback.\n",
            feedback,
            previous.unwrap_or_else(|| "none".to_string())
        ),
    }
}

pub fn behavioral(
    features: &FeatureVector,
    rules: &RuleProfiles,
    feedback: Option<&str>,
    previous: Option<&BehavioralProfiles>,
) -> Prompt {
    let definitions: Map<String, Value> = PROFILE_DEFINITIONS
        .iter()
        .map(|d| (d.name.to_string(), json!(d.description)))
        .collect();

    let user = format!(
        "Task: classify_financial_profiles\n\n\
         Profile definitions:\n{}\n\n\
         User data:\n{}\n\n\
         Rule-based profiles:\n{}\n{}\n\
         Instructions:\n\
         - Validate each rule-based profile (0 = no, 1 = yes), overriding it if the data disagrees.\n\
         - Infer the remaining profiles directly from the data.\n\
         - Give a short reason for every profile.\n\
         - Respond ONLY with JSON: {{\"profiles\": {{profile: 0|1}}, \"reasoning\": {{profile: string}}}}\n",
        pretty(&definitions),
        pretty(features),
        pretty(&rules.as_flags()),
        revision_block(feedback, previous.map(pretty)),
    );

    Prompt {
        stage: Stage::Behavioral,
        system: "You are a financial profile inference agent. You analyse applicant \
                 transaction summaries and assign binary behavioural profiles. \
                 Answer with a single JSON object."
            .to_string(),
        user,
    }
}

pub struct DecisionInputs<'a> {
    pub application: &'a LoanApplication,
    pub features: &'a FeatureVector,
    pub profiles: &'a BehavioralProfiles,
    pub risk: &'a RiskAssessment,
    pub similar_cases: &'a [SimilarCase],
    pub feedback: Option<&'a str>,
    pub previous: Option<&'a LoanDecision>,
}

pub fn decision(inputs: &DecisionInputs<'_>) -> Prompt {
    let cases: Vec<Value> = inputs
        .similar_cases
        .iter()
        .map(|c| json!({"case_id": c.case_id, "similarity": c.score, "details": c.payload}))
        .collect();

    let user = format!(
        "Task: loan_decision\n\n\
         Loan application:\n{}\n\n\
         Applicant financial metrics:\n{}\n\n\
         Behavioural profiles:\n{}\n\n\
         Model estimates:\n- predicted interest rate: {:.4}\n- default risk score: {:.4}\n- requested term: {} months\n\n\
         Similar historical cases:\n{}\n{}\n\
         Instructions:\n\
         - Decide whether to accept or reject the application.\n\
         - You may adjust the interest rate (fraction, e.g. 0.12) and the term in months.\n\
         - Respond ONLY with JSON: {{\"decision\": \"accepted\"|\"rejected\", \"reason\": string, \
         \"interest_rate\": number, \"loan_term\": integer}}\n",
        pretty(&application_with_dti(inputs.application)),
        pretty(inputs.features),
        pretty(inputs.profiles),
        inputs.risk.predicted_interest_rate,
        inputs.risk.risk_score,
        inputs.application.loan_term,
        if cases.is_empty() {
            "none available".to_string()
        } else {
            pretty(&cases)
        },
        revision_block(inputs.feedback, inputs.previous.map(pretty)),
    );

    Prompt {
        stage: Stage::Decision,
        system: "You are a loan decision agent at a retail bank. You weigh model \
                 estimates, behavioural profiles and precedent to accept or reject \
                 an application. Answer with a single JSON object."
            .to_string(),
        user,
    }
}

pub struct ReviewInputs<'a> {
    pub application: &'a LoanApplication,
    pub features: &'a FeatureVector,
    pub profiles: &'a BehavioralProfiles,
    pub decision: &'a LoanDecision,
    pub directives: Option<&'a str>,
}

pub fn evaluator(inputs: &ReviewInputs<'_>, risk_tolerance: RiskTolerance) -> Prompt {
    let user = format!(
        "Task: assess agent outputs for consistency and quality.\n\n\
         Loan application:\n{}\n\n\
         Applicant financial metrics:\n{}\n\n\
         Behavioural profiles:\n{}\n\n\
         Reasons for profile assignments:\n{}\n\n\
         Interest rate: {:.4}\nLoan term: {} months\nRisk score: {:.4}\n\n\
         Loan decision and justification:\n{}\n\n\
         Bank risk tolerance: {}\n\
         User directives: {}\n\n\
         Instructions:\n\
         1. Check that the behavioural profiling is logical given the data.\n\
         2. Check that the decision is fair and consistent with the profiles and the risk tolerance.\n\
         3. Consider whether a different interest rate or term would serve the bank better.\n\
         Return exactly one of:\n\
         {{\"action\": \"revise_profiles\", \"comments\": \"...\"}} if the profiling is flawed,\n\
         {{\"action\": \"revise_decision\", \"comments\": \"...\"}} if the decision is flawed,\n\
         {{\"action\": \"revise_terms\", \"comments\": \"...\"}} if only rate or term should change,\n\
         {{\"action\": \"approve\", \"comments\": \"...\"}} if everything is acceptable.\n",
        pretty(&application_with_dti(inputs.application)),
        pretty(&feature_summary(inputs.features)),
        pretty(&inputs.profiles.profiles),
        pretty(&inputs.profiles.reasoning),
        inputs.decision.interest_rate,
        inputs.decision.loan_term,
        inputs.decision.risk_score,
        pretty(inputs.decision),
        risk_tolerance,
        inputs.directives.unwrap_or(NO_DIRECTIVES),
    );

    Prompt {
        stage: Stage::Evaluator,
        system: "You are the evaluator agent (bank manager). You oversee the other \
                 agents and make sure profiling is logical and the decision is fair, \
                 in the bank's interest and within its risk tolerance. Answer with a \
                 single JSON object."
            .to_string(),
        user,
    }
}

pub fn report(inputs: &ReviewInputs<'_>) -> Prompt {
    let user = format!(
        "Task: generate a loan decision report.\n\n\
         Loan application:\n{}\n\n\
         Applicant financial metrics:\n{}\n\n\
         Behavioural profiles:\n{}\n\n\
         Reasons for profile assignments:\n{}\n\n\
         Interest rate: {:.4}\nLoan term: {} months\nRisk score: {:.4}\n\n\
         Final decision:\n{}\n\n\
         User directives: {}\n\n\
         Instructions:\n\
         1. Summarise the applicant's request.\n\
         2. Integrate the behavioural profiles and their reasoning.\n\
         3. Include the financial analysis: interest rate, risk score and debt-to-income ratio.\n\
         4. State the final decision with its motivation.\n\
         5. Compute the monthly instalment including interest.\n\
         6. Write a professional report for internal bank documentation, in markdown.\n\
         7. Follow the user directives where given.\n",
        pretty(&application_with_dti(inputs.application)),
        pretty(&feature_summary(inputs.features)),
        pretty(&inputs.profiles.profiles),
        pretty(&inputs.profiles.reasoning),
        inputs.decision.interest_rate,
        inputs.decision.loan_term,
        inputs.decision.risk_score,
        pretty(inputs.decision),
        inputs.directives.unwrap_or(NO_DIRECTIVES),
    );

    Prompt {
        stage: Stage::Report,
        system: "You are a financial reporting agent. You write professional, \
                 bank-internal documentation justifying loan decisions."
            .to_string(),
        user,
    }
}
