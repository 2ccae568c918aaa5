//! Shared fixtures for unit tests.

use crate::models::{
    BankTransaction, CardTransaction, HomeOwnership, LoanApplication, LoanPurpose, RiskTolerance,
    TransactionLedger,
};
use crate::oracle::ScriptedOracle;
use crate::profiles::RuleProfiler;
use crate::retrieval::{HashingEmbedder, InMemoryRetriever};
use crate::scoring::{
    Classifier, Regressor, ScoringContext, TfidfVectorizer, HOME_OWNERSHIP_FILE,
    INTEREST_MODEL_FILE, MEDIANS_FILE, NUMERIC_COLUMNS, RISK_MODEL_FILE, TFIDF_EMP_FILE,
    TFIDF_PURPOSE_FILE,
};
use crate::stages::StageContext;
use crate::state::PipelineState;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const BEHAVIORAL_REPLY: &str = r#"```json
{
  "profiles": {
    "income_stability": 1,
    "expense_volatility": 0,
    "savings_habit": 1,
    "category_concentration_risk": 0,
    "discretionary_spending_share": 0,
    "liquidity_stress": 0,
    "growth_potential": 1,
    "debt_dependence": 0
  },
  "reasoning": {"income_stability": "salary within 3% each month"}
}
```"#;

/// Accepted, leaving rate and term to the scorer and the application.
pub const DECISION_REPLY: &str =
    r#"{"decision": "accepted", "reason": "Stable salary and modest existing debt"}"#;

pub fn date(value: &str) -> NaiveDate {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").unwrap()
}

pub fn bank_tx(
    day: &str,
    income: f64,
    expense: f64,
    balance: f64,
    description: &str,
) -> BankTransaction {
    BankTransaction {
        date: date(day),
        income,
        expense,
        balance,
        description: description.to_string(),
    }
}

pub fn card_tx(day: &str, amount_paid: f64, category: &str) -> CardTransaction {
    CardTransaction {
        date: date(day),
        merchant: format!("{} store", category),
        deal_amount: amount_paid,
        amount_paid,
        category: category.to_string(),
    }
}

/// January through March 2023: salary, rent, utilities, card spend and the
/// matching card payment each month.
pub fn ninety_day_ledger() -> TransactionLedger {
    let mut bank = Vec::new();
    let mut card = Vec::new();
    let mut balance = 1500.0;

    for (month, salary) in [(1u32, 4000.0), (2, 4100.0), (3, 4050.0)] {
        let day = |d: u32| format!("2023-{:02}-{:02}", month, d);

        balance += salary;
        bank.push(bank_tx(&day(1), salary, 0.0, balance, "Salary"));
        balance -= 1200.0;
        bank.push(bank_tx(&day(5), 0.0, 1200.0, balance, "Rent"));
        balance -= 150.0;
        bank.push(bank_tx(&day(12), 0.0, 150.0, balance, "Utilities"));

        let mut spends = vec![
            card_tx(&day(8), 350.0, "Groceries"),
            card_tx(&day(15), 100.0 + 10.0 * f64::from(month), "Dining"),
            card_tx(&day(22), 200.0, "Shopping"),
        ];
        if month == 2 {
            spends.push(card_tx(&day(18), 600.0, "Travel"));
        }

        let card_total: f64 = spends.iter().map(|t| t.amount_paid).sum();
        card.extend(spends);

        balance -= card_total;
        bank.push(bank_tx(&day(25), 0.0, card_total, balance, "Credit Card Payment"));
    }

    TransactionLedger { bank, card }
}

/// `ninety_day_ledger` rendered as bank and card CSV text.
pub fn ledger_csv() -> (String, String) {
    let ledger = ninety_day_ledger();

    let mut bank = String::from("date,income,expense,balance,description\n");
    for tx in &ledger.bank {
        bank.push_str(&format!(
            "{},{},{},{},{}\n",
            tx.date, tx.income, tx.expense, tx.balance, tx.description
        ));
    }

    let mut card = String::from("date,business_name,amount_of_deal,amount_paid,category\n");
    for tx in &ledger.card {
        card.push_str(&format!(
            "{},{},{},{},{}\n",
            tx.date, tx.merchant, tx.deal_amount, tx.amount_paid, tx.category
        ));
    }

    (bank, card)
}

pub fn sample_application() -> LoanApplication {
    LoanApplication {
        loan_amount: 15000.0,
        loan_term: 36,
        job_title: "Nurse".to_string(),
        job_tenure: Some(6.0),
        home_status: HomeOwnership::Own,
        annual_income: 72000.0,
        loan_purpose: LoanPurpose::DebtConsolidation,
        monthly_debt: 900.0,
        delinquencies: false,
        credit_score: 710,
        accounts: 4,
        bankruptcy: false,
    }
}

struct ArtifactParts {
    emp_title: TfidfVectorizer,
    purpose: TfidfVectorizer,
    home_ownership_columns: Vec<String>,
    medians: BTreeMap<String, f64>,
    interest_model: Regressor,
    risk_model: Classifier,
}

fn vectorizer(terms: &[&str], idf: Vec<f64>) -> TfidfVectorizer {
    let vocabulary: HashMap<String, usize> = terms
        .iter()
        .enumerate()
        .map(|(i, term)| (term.to_string(), i))
        .collect();
    TfidfVectorizer { vocabulary, idf }
}

/// Row width 19: 8 numerics, 3 home columns, 3 job-title terms, 5 purpose
/// terms. Interest is 10 + 0.05 * term; risk is logistic in the raw interest.
fn artifact_parts() -> ArtifactParts {
    let medians = NUMERIC_COLUMNS
        .iter()
        .zip([10000.0, 5.0, 60000.0, 0.15, 0.0, 4.0, 0.0, 36.0])
        .map(|(column, median)| (column.to_string(), median))
        .collect();

    let mut interest = vec![0.0; 19];
    interest[7] = 0.05;
    let mut risk = vec![0.0; 20];
    risk[19] = 0.1;

    ArtifactParts {
        emp_title: vectorizer(&["doctor", "engineer", "nurse"], vec![1.5, 1.2, 1.8]),
        purpose: vectorizer(
            &["car", "debt", "consolidation", "credit", "card"],
            vec![1.0; 5],
        ),
        home_ownership_columns: ["NONE", "OWN", "RENT"]
            .iter()
            .map(|c| format!("home_ownership_{}", c))
            .collect(),
        medians,
        interest_model: Regressor::Linear {
            intercept: 10.0,
            coefficients: interest,
        },
        risk_model: Classifier::Logistic {
            intercept: -2.0,
            coefficients: risk,
        },
    }
}

pub fn scoring_context() -> ScoringContext {
    let parts = artifact_parts();
    ScoringContext::from_parts(
        parts.emp_title,
        parts.purpose,
        parts.home_ownership_columns,
        parts.medians,
        parts.interest_model,
        parts.risk_model,
    )
    .unwrap()
}

pub fn write_artifacts(dir: &Path) {
    let parts = artifact_parts();
    let write = |file: &str, value: serde_json::Value| {
        std::fs::write(dir.join(file), serde_json::to_vec_pretty(&value).unwrap()).unwrap();
    };

    write(TFIDF_EMP_FILE, serde_json::to_value(&parts.emp_title).unwrap());
    write(TFIDF_PURPOSE_FILE, serde_json::to_value(&parts.purpose).unwrap());
    write(
        HOME_OWNERSHIP_FILE,
        serde_json::to_value(&parts.home_ownership_columns).unwrap(),
    );
    write(MEDIANS_FILE, serde_json::to_value(&parts.medians).unwrap());
    write(
        INTEREST_MODEL_FILE,
        serde_json::to_value(&parts.interest_model).unwrap(),
    );
    write(RISK_MODEL_FILE, serde_json::to_value(&parts.risk_model).unwrap());
}

pub fn stage_context(oracle: Arc<ScriptedOracle>) -> StageContext {
    StageContext {
        oracle,
        oracle_timeout: Duration::from_secs(5),
        scoring: Arc::new(scoring_context()),
        profiler: RuleProfiler::new(),
        embedder: Arc::new(HashingEmbedder::default()),
        retriever: Arc::new(InMemoryRetriever::new()),
        similar_cases_top_k: 5,
        retrieval_timeout: Duration::from_secs(5),
    }
}

pub fn initial_state() -> PipelineState {
    PipelineState::new(
        Uuid::new_v4(),
        sample_application(),
        ninety_day_ledger(),
        RiskTolerance::Medium,
        None,
    )
}
