//! Risk and interest scoring over frozen artifacts
//!
//! Deterministic. No oracle is involved here: the application is mapped to
//! the trained feature row, run through the interest regressor, then through
//! the default classifier with the predicted interest appended.

pub mod model;
pub mod tfidf;

pub use model::{Classifier, DecisionTree, Regressor, TreeNode};
pub use tfidf::TfidfVectorizer;

use crate::error::PipelineError;
use crate::models::{LoanApplication, RiskAssessment};
use crate::Result;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

/// Model output is in percentage points; the pipeline works in fractions.
pub const INTEREST_RATE_SCALE: f64 = 100.0;

/// Numeric columns in training order.
pub const NUMERIC_COLUMNS: [&str; 8] = [
    "Amount Requested",
    "Employment Length",
    "annual_inc",
    "Debt-To-Income Ratio",
    "delinq_2yrs",
    "num_actv_bc_tl",
    "pub_rec_bankruptcies",
    "term",
];

pub const TFIDF_EMP_FILE: &str = "tfidf_emp.json";
pub const TFIDF_PURPOSE_FILE: &str = "tfidf_purpose.json";
pub const HOME_OWNERSHIP_FILE: &str = "home_ownership_categories.json";
pub const MEDIANS_FILE: &str = "numeric_medians.json";
pub const INTEREST_MODEL_FILE: &str = "interest_model.json";
pub const RISK_MODEL_FILE: &str = "risk_model.json";

const HOME_OWNERSHIP_PREFIX: &str = "home_ownership_";

/// Frozen encoders and models. Loaded once per process and shared read-only.
#[derive(Debug, Clone)]
pub struct ScoringContext {
    emp_title: TfidfVectorizer,
    purpose: TfidfVectorizer,
    /// One-hot columns kept after drop-first encoding, e.g. `home_ownership_OWN`
    home_ownership_columns: Vec<String>,
    medians: [f64; 8],
    interest_model: Regressor,
    risk_model: Classifier,
}

impl ScoringContext {
    /// Load all artifacts from `dir`. Any missing or malformed file is
    /// `ModelUnavailable`.
    pub fn load(dir: &Path) -> Result<Self> {
        let context = Self::from_parts(
            read_artifact(dir, TFIDF_EMP_FILE)?,
            read_artifact(dir, TFIDF_PURPOSE_FILE)?,
            read_artifact(dir, HOME_OWNERSHIP_FILE)?,
            read_artifact(dir, MEDIANS_FILE)?,
            read_artifact(dir, INTEREST_MODEL_FILE)?,
            read_artifact(dir, RISK_MODEL_FILE)?,
        )?;

        info!(
            dir = %dir.display(),
            row_width = context.row_width(),
            "Scoring artifacts loaded"
        );
        Ok(context)
    }

    pub fn from_parts(
        emp_title: TfidfVectorizer,
        purpose: TfidfVectorizer,
        home_ownership_columns: Vec<String>,
        medians: BTreeMap<String, f64>,
        interest_model: Regressor,
        risk_model: Classifier,
    ) -> Result<Self> {
        emp_title
            .validate()
            .map_err(|e| unavailable(TFIDF_EMP_FILE, &e))?;
        purpose
            .validate()
            .map_err(|e| unavailable(TFIDF_PURPOSE_FILE, &e))?;

        let mut frozen = [0.0; 8];
        for (slot, column) in frozen.iter_mut().zip(NUMERIC_COLUMNS) {
            *slot = medians
                .get(column)
                .copied()
                .filter(|v| v.is_finite())
                .ok_or_else(|| unavailable(MEDIANS_FILE, &format!("no median for '{}'", column)))?;
        }

        let context = Self {
            emp_title,
            purpose,
            home_ownership_columns,
            medians: frozen,
            interest_model,
            risk_model,
        };

        let width = context.row_width();
        context
            .interest_model
            .validate(width)
            .map_err(|e| unavailable(INTEREST_MODEL_FILE, &e))?;
        context
            .risk_model
            .validate(width + 1)
            .map_err(|e| unavailable(RISK_MODEL_FILE, &e))?;

        Ok(context)
    }

    /// Width of the interest model's input row.
    pub fn row_width(&self) -> usize {
        NUMERIC_COLUMNS.len()
            + self.home_ownership_columns.len()
            + self.emp_title.width()
            + self.purpose.width()
    }

    /// Interest model input row for `application`.
    pub fn feature_row(&self, application: &LoanApplication) -> Vec<f64> {
        let raw = [
            Some(application.loan_amount),
            application.job_tenure,
            Some(application.annual_income),
            application.debt_to_income(),
            Some(flag(application.delinquencies)),
            Some(f64::from(application.accounts)),
            Some(flag(application.bankruptcy)),
            Some(f64::from(application.loan_term)),
        ];

        let mut row = Vec::with_capacity(self.row_width() + 1);
        for (value, median) in raw.iter().zip(self.medians) {
            row.push(value.filter(|v| v.is_finite()).unwrap_or(median));
        }

        let home = format!("{}{}", HOME_OWNERSHIP_PREFIX, application.home_status.as_str());
        row.extend(
            self.home_ownership_columns
                .iter()
                .map(|col| if *col == home { 1.0 } else { 0.0 }),
        );

        row.extend(self.emp_title.transform(&application.job_title));
        row.extend(self.purpose.transform(application.loan_purpose.as_str()));
        row
    }
}

/// Predict interest rate and default probability for one application.
pub fn score(context: &ScoringContext, application: &LoanApplication) -> Result<RiskAssessment> {
    let mut row = context.feature_row(application);

    let raw_interest = context
        .interest_model
        .predict(&row)
        .filter(|v| v.is_finite())
        .ok_or_else(|| unavailable(INTEREST_MODEL_FILE, "prediction failed"))?;

    row.push(raw_interest);
    let risk_score = context
        .risk_model
        .predict_proba(&row)
        .filter(|v| v.is_finite())
        .ok_or_else(|| unavailable(RISK_MODEL_FILE, "prediction failed"))?;

    let assessment = RiskAssessment {
        predicted_interest_rate: raw_interest / INTEREST_RATE_SCALE,
        risk_score,
    };

    debug!(
        interest_rate = assessment.predicted_interest_rate,
        risk_score = assessment.risk_score,
        "Application scored"
    );
    Ok(assessment)
}

fn flag(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

fn unavailable(artifact: &str, detail: &str) -> PipelineError {
    PipelineError::ModelUnavailable(format!("{}: {}", artifact, detail))
}

fn read_artifact<T: DeserializeOwned>(dir: &Path, file: &str) -> Result<T> {
    let path = dir.join(file);
    let bytes = std::fs::read(&path).map_err(|e| unavailable(file, &e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| unavailable(file, &e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HomeOwnership;
    use crate::test_support::{sample_application, scoring_context, write_artifacts};

    #[test]
    fn test_score_linear_artifacts() {
        let context = scoring_context();
        let assessment = score(&context, &sample_application()).unwrap();

        // intercept 10 + 0.05 * 36-month term
        assert!((assessment.predicted_interest_rate - 0.118).abs() < 1e-9);
        let expected_risk = 1.0 / (1.0 + (-(-2.0 + 0.1 * 11.8f64)).exp());
        assert!((assessment.risk_score - expected_risk).abs() < 1e-9);
    }

    #[test]
    fn test_feature_row_layout() {
        let context = scoring_context();
        let mut app = sample_application();
        app.home_status = HomeOwnership::Rent;
        app.job_title = "Senior Engineer".to_string();

        let row = context.feature_row(&app);
        assert_eq!(row.len(), context.row_width());
        assert_eq!(row[0], app.loan_amount);
        assert_eq!(row[7], 36.0);
        // NONE, OWN, RENT
        assert_eq!(&row[8..11], &[0.0, 0.0, 1.0]);
        // "engineer" is the only known emp-title term
        assert_eq!(&row[11..14], &[0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_missing_numerics_use_frozen_medians() {
        let context = scoring_context();
        let mut app = sample_application();
        app.job_tenure = None;
        app.annual_income = 0.0;

        let row = context.feature_row(&app);
        assert_eq!(row[1], 5.0);
        assert_eq!(row[3], 0.15);
    }

    #[test]
    fn test_load_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        write_artifacts(dir.path());

        let context = ScoringContext::load(dir.path()).unwrap();
        assert_eq!(context.row_width(), scoring_context().row_width());
    }

    #[test]
    fn test_missing_artifact_is_model_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        write_artifacts(dir.path());
        std::fs::remove_file(dir.path().join(RISK_MODEL_FILE)).unwrap();

        let err = ScoringContext::load(dir.path()).unwrap_err();
        assert!(matches!(err, PipelineError::ModelUnavailable(_)));
        assert!(err.to_string().contains(RISK_MODEL_FILE));
    }

    #[test]
    fn test_width_mismatch_is_model_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        write_artifacts(dir.path());
        std::fs::write(
            dir.path().join(INTEREST_MODEL_FILE),
            r#"{"kind": "linear", "intercept": 1.0, "coefficients": [1.0]}"#,
        )
        .unwrap();

        let err = ScoringContext::load(dir.path()).unwrap_err();
        assert!(matches!(err, PipelineError::ModelUnavailable(_)));
    }
}
