//! Core data models for the loan eligibility pipeline

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

//
// ================= Enums =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RiskTolerance {
    Low,
    #[default]
    Medium,
    High,
}

impl RiskTolerance {
    /// Lenient parse used for form and env input; unknown values map to Medium.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "low" | "none" => RiskTolerance::Low,
            "high" => RiskTolerance::High,
            _ => RiskTolerance::Medium,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum HomeOwnership {
    Rent,
    Mortgage,
    Own,
    None,
}

impl HomeOwnership {
    pub fn as_str(&self) -> &'static str {
        match self {
            HomeOwnership::Rent => "RENT",
            HomeOwnership::Mortgage => "MORTGAGE",
            HomeOwnership::Own => "OWN",
            HomeOwnership::None => "NONE",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LoanPurpose {
    #[serde(rename = "car")]
    Car,
    #[serde(rename = "credit card")]
    CreditCard,
    #[serde(rename = "debt consolidation")]
    DebtConsolidation,
    #[serde(rename = "education")]
    Education,
    #[serde(rename = "home improvement")]
    HomeImprovement,
    #[serde(rename = "house")]
    House,
    #[serde(rename = "major purchase")]
    MajorPurchase,
    #[serde(rename = "medical")]
    Medical,
    #[serde(rename = "moving")]
    Moving,
    #[serde(rename = "other")]
    Other,
    #[serde(rename = "small business")]
    SmallBusiness,
    #[serde(rename = "vacation")]
    Vacation,
    #[serde(rename = "wedding")]
    Wedding,
}

impl LoanPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanPurpose::Car => "car",
            LoanPurpose::CreditCard => "credit card",
            LoanPurpose::DebtConsolidation => "debt consolidation",
            LoanPurpose::Education => "education",
            LoanPurpose::HomeImprovement => "home improvement",
            LoanPurpose::House => "house",
            LoanPurpose::MajorPurchase => "major purchase",
            LoanPurpose::Medical => "medical",
            LoanPurpose::Moving => "moving",
            LoanPurpose::Other => "other",
            LoanPurpose::SmallBusiness => "small business",
            LoanPurpose::Vacation => "vacation",
            LoanPurpose::Wedding => "wedding",
        }
    }
}

//
// ================= Application =================
//

/// Applicant form input. Created once per session and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoanApplication {
    pub loan_amount: f64,
    /// Months
    pub loan_term: u32,
    pub job_title: String,
    /// Years in current job
    #[serde(default)]
    pub job_tenure: Option<f64>,
    pub home_status: HomeOwnership,
    pub annual_income: f64,
    pub loan_purpose: LoanPurpose,
    #[serde(alias = "total_debt")]
    pub monthly_debt: f64,
    #[serde(with = "yes_no")]
    pub delinquencies: bool,
    pub credit_score: u32,
    pub accounts: u32,
    #[serde(with = "yes_no")]
    pub bankruptcy: bool,
}

impl LoanApplication {
    /// `monthly_debt / annual_income`, undefined when income is not positive.
    pub fn debt_to_income(&self) -> Option<f64> {
        if self.annual_income > 0.0 && self.monthly_debt.is_finite() {
            Some(self.monthly_debt / self.annual_income)
        } else {
            None
        }
    }
}

/// Form fields arrive as "yes"/"no"; booleans are accepted too.
mod yes_no {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(if *value { "yes" } else { "no" })
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        match Flag::deserialize(deserializer)? {
            Flag::Bool(b) => Ok(b),
            Flag::Text(s) => match s.trim().to_lowercase().as_str() {
                "yes" | "y" | "true" | "1" => Ok(true),
                "no" | "n" | "false" | "0" | "" => Ok(false),
                other => Err(serde::de::Error::custom(format!(
                    "expected yes/no, got '{}'",
                    other
                ))),
            },
        }
    }
}

//
// ================= Ledgers =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BankTransaction {
    pub date: NaiveDate,
    pub income: f64,
    pub expense: f64,
    /// Running total kept by the ledger source; never recomputed.
    pub balance: f64,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CardTransaction {
    pub date: NaiveDate,
    pub merchant: String,
    pub deal_amount: f64,
    pub amount_paid: f64,
    pub category: String,
}

/// Bank and card logs for one applicant. Order is not guaranteed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TransactionLedger {
    pub bank: Vec<BankTransaction>,
    pub card: Vec<CardTransaction>,
}

//
// ================= Features =================
//

/// Fixed-shape behavioural summary of a ledger.
///
/// `None` marks an undefined value (zero denominator, too few months) and is
/// serialized as `null` for the oracle prompts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FeatureVector {
    pub income_mean: Option<f64>,
    pub income_std: Option<f64>,
    pub expense_mean: Option<f64>,
    pub expense_std: Option<f64>,
    pub savings_rate_mean: Option<f64>,
    pub overdraft_frequency: Option<f64>,
    pub discretionary_share: Option<f64>,
    pub top_category_share: Option<f64>,
    pub category_volatility: Option<f64>,
    pub cc_payment_ratio_mean: Option<f64>,
    pub last3_category_shares: BTreeMap<String, Option<f64>>,
    pub income_trend: f64,
    pub expense_trend: f64,
    pub savings_trend: f64,
}

/// Threshold flags computed from a [`FeatureVector`].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuleProfiles {
    pub income_stability: bool,
    pub expense_volatility: bool,
    pub savings_habit: bool,
    pub category_concentration_risk: bool,
}

impl RuleProfiles {
    /// 0/1 view used in prompts and as the behavioural fallback.
    pub fn as_flags(&self) -> BTreeMap<String, u8> {
        [
            ("income_stability", self.income_stability),
            ("expense_volatility", self.expense_volatility),
            ("savings_habit", self.savings_habit),
            ("category_concentration_risk", self.category_concentration_risk),
        ]
        .into_iter()
        .map(|(name, flag)| (name.to_string(), u8::from(flag)))
        .collect()
    }
}

//
// ================= Scoring =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RiskAssessment {
    /// Fractional rate, e.g. 0.12
    pub predicted_interest_rate: f64,
    /// Default probability in [0, 1]
    pub risk_score: f64,
}

//
// ================= Stage Outputs =================
//

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BehavioralProfiles {
    pub profiles: BTreeMap<String, u8>,
    #[serde(default)]
    pub reasoning: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DecisionOutcome {
    Accepted,
    Rejected,
}

impl DecisionOutcome {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "accepted" | "accept" | "approved" | "approve" => Some(DecisionOutcome::Accepted),
            "rejected" | "reject" | "denied" | "declined" => Some(DecisionOutcome::Rejected),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionOutcome::Accepted => "accepted",
            DecisionOutcome::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoanDecision {
    pub decision: DecisionOutcome,
    pub reason: String,
    pub interest_rate: f64,
    pub loan_term: u32,
    /// Always the scorer's value, never the oracle's.
    pub risk_score: f64,
}

/// Evaluator action. Open: anything unrecognized is kept verbatim and treated
/// as a non-approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum VerdictAction {
    Approve,
    ReviseProfiles,
    ReviseDecision,
    ReviseTerms,
    Unrecognized(String),
}

impl VerdictAction {
    pub fn as_str(&self) -> &str {
        match self {
            VerdictAction::Approve => "approve",
            VerdictAction::ReviseProfiles => "revise_profiles",
            VerdictAction::ReviseDecision => "revise_decision",
            VerdictAction::ReviseTerms => "revise_terms",
            VerdictAction::Unrecognized(raw) => raw,
        }
    }
}

impl From<String> for VerdictAction {
    fn from(value: String) -> Self {
        match value.trim().to_lowercase().as_str() {
            "approve" => VerdictAction::Approve,
            "revise_profiles" => VerdictAction::ReviseProfiles,
            "revise_decision" => VerdictAction::ReviseDecision,
            "revise_terms" => VerdictAction::ReviseTerms,
            _ => VerdictAction::Unrecognized(value),
        }
    }
}

impl From<VerdictAction> for String {
    fn from(action: VerdictAction) -> Self {
        action.as_str().to_string()
    }
}

impl fmt::Display for VerdictAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EvaluationVerdict {
    pub action: VerdictAction,
    #[serde(default)]
    pub comments: String,
}

impl EvaluationVerdict {
    /// Supervisory feedback threaded into the next behavioral/decision call.
    pub fn feedback(&self) -> String {
        format!("{}: {}", self.action, self.comments)
    }
}

//
// ================= Retrieval =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimilarCase {
    pub case_id: String,
    pub score: f32,
    #[serde(default)]
    pub payload: serde_json::Map<String, serde_json::Value>,
}

//
// ================= Final Result =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Evaluator returned `approve`.
    Approved,
    /// Retry budget ran out; the report was forced on the last state.
    Exhausted,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptRole {
    Applicant,
    Agent,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: TranscriptRole,
    pub content: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOutcome {
    pub application_id: Uuid,
    pub user_id: Uuid,
    pub application: LoanApplication,
    pub final_report: String,
    pub decision: LoanDecision,
    pub termination: Termination,
    pub retry_count: u32,
    pub evaluator_invocations: u32,
    pub behavioral_profiles: BehavioralProfiles,
    pub user_features: FeatureVector,
    pub last_verdict: Option<EvaluationVerdict>,
    pub similar_cases: Vec<SimilarCase>,
    pub risk_tolerance: RiskTolerance,
    pub directives: Option<String>,
    pub transcript: Vec<TranscriptEntry>,
    pub reasoning_trace: Vec<String>,
}

/// One line of the append-only application log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApplicationRecord {
    pub record_id: Uuid,
    pub user_id: Uuid,
    pub loan_data: LoanApplication,
    pub decision: DecisionOutcome,
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
    pub record_hash: String,
}

impl fmt::Display for RiskTolerance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskTolerance::Low => "Low",
            RiskTolerance::Medium => "Medium",
            RiskTolerance::High => "High",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for DecisionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
