//! Rule profiler and behavioural profile catalogue
//!
//! Deterministic threshold rules over a [`FeatureVector`]. Undefined
//! features never satisfy a threshold, so every flag is total.

use crate::models::{FeatureVector, RuleProfiles};
use tracing::debug;

/// Keeps coefficient-of-variation style ratios finite.
pub const EPSILON: f64 = 1e-6;

pub const INCOME_STABILITY_MAX_CV: f64 = 0.1;
pub const EXPENSE_VOLATILITY_MIN_CV: f64 = 0.3;
pub const SAVINGS_HABIT_MIN_RATE: f64 = 0.1;
pub const CONCENTRATION_MIN_SHARE: f64 = 0.4;

/// A named threshold over the feature vector.
pub trait ProfileRule: Send + Sync {
    fn name(&self) -> &'static str;

    /// `None` when an input feature is undefined.
    fn evaluate(&self, features: &FeatureVector) -> Option<bool>;
}

pub struct IncomeStabilityRule;

impl ProfileRule for IncomeStabilityRule {
    fn name(&self) -> &'static str {
        "income_stability"
    }

    fn evaluate(&self, features: &FeatureVector) -> Option<bool> {
        let cv = features.income_std? / (features.income_mean? + EPSILON);
        Some(cv < INCOME_STABILITY_MAX_CV)
    }
}

pub struct ExpenseVolatilityRule;

impl ProfileRule for ExpenseVolatilityRule {
    fn name(&self) -> &'static str {
        "expense_volatility"
    }

    fn evaluate(&self, features: &FeatureVector) -> Option<bool> {
        let cv = features.expense_std? / (features.expense_mean? + EPSILON);
        Some(cv > EXPENSE_VOLATILITY_MIN_CV)
    }
}

pub struct SavingsHabitRule;

impl ProfileRule for SavingsHabitRule {
    fn name(&self) -> &'static str {
        "savings_habit"
    }

    fn evaluate(&self, features: &FeatureVector) -> Option<bool> {
        Some(features.savings_rate_mean? > SAVINGS_HABIT_MIN_RATE)
    }
}

pub struct CategoryConcentrationRule;

impl ProfileRule for CategoryConcentrationRule {
    fn name(&self) -> &'static str {
        "category_concentration_risk"
    }

    fn evaluate(&self, features: &FeatureVector) -> Option<bool> {
        Some(features.top_category_share? > CONCENTRATION_MIN_SHARE)
    }
}

/// Applies the four rule-validated profiles.
pub struct RuleProfiler {
    rules: Vec<Box<dyn ProfileRule>>,
}

impl RuleProfiler {
    pub fn new() -> Self {
        Self {
            rules: vec![
                Box::new(IncomeStabilityRule),
                Box::new(ExpenseVolatilityRule),
                Box::new(SavingsHabitRule),
                Box::new(CategoryConcentrationRule),
            ],
        }
    }

    /// Pure and total. Undefined inputs (and NaN) resolve to `false`.
    pub fn infer(&self, features: &FeatureVector) -> RuleProfiles {
        let mut profiles = RuleProfiles::default();

        for rule in &self.rules {
            let flag = rule.evaluate(features).unwrap_or(false);
            match rule.name() {
                "income_stability" => profiles.income_stability = flag,
                "expense_volatility" => profiles.expense_volatility = flag,
                "savings_habit" => profiles.savings_habit = flag,
                "category_concentration_risk" => profiles.category_concentration_risk = flag,
                _ => {}
            }
        }

        debug!(?profiles, "Rule profiles inferred");
        profiles
    }
}

impl Default for RuleProfiler {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience wrapper over the default profiler.
pub fn infer(features: &FeatureVector) -> RuleProfiles {
    RuleProfiler::new().infer(features)
}

//
// ================= Profile Catalogue =================
//

pub struct ProfileDefinition {
    pub name: &'static str,
    pub description: &'static str,
}

/// Profiles the behavioural oracle is asked to score as 0/1.
pub const PROFILE_DEFINITIONS: &[ProfileDefinition] = &[
    ProfileDefinition {
        name: "discretionary_spending_share",
        description: "Share of card spend going to Entertainment, Travel and Dining is high",
    },
    ProfileDefinition {
        name: "liquidity_stress",
        description: "Balances run low or overdraw; spending outpaces cash on hand",
    },
    ProfileDefinition {
        name: "growth_potential",
        description: "Income and savings trend upward across recent months",
    },
    ProfileDefinition {
        name: "income_stability",
        description: "Monthly income varies little relative to its mean",
    },
    ProfileDefinition {
        name: "expense_volatility",
        description: "Monthly expenses swing widely relative to their mean",
    },
    ProfileDefinition {
        name: "savings_habit",
        description: "Applicant consistently keeps more than a tenth of income",
    },
    ProfileDefinition {
        name: "debt_dependence",
        description: "Card repayments absorb a large part of card spend or income",
    },
    ProfileDefinition {
        name: "category_concentration_risk",
        description: "A single spending category dominates card spend",
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thresholds() {
        let features = FeatureVector {
            income_mean: Some(3100.0),
            income_std: Some(100.0),
            expense_mean: Some(500.0),
            expense_std: Some(100.0),
            savings_rate_mean: Some(0.84),
            top_category_share: Some(0.44),
            ..Default::default()
        };

        let profiles = infer(&features);
        assert!(profiles.income_stability);
        assert!(!profiles.expense_volatility);
        assert!(profiles.savings_habit);
        assert!(profiles.category_concentration_risk);
    }

    #[test]
    fn test_undefined_features_resolve_to_false() {
        let profiles = infer(&FeatureVector::default());
        assert_eq!(profiles, RuleProfiles::default());

        let nan = FeatureVector {
            savings_rate_mean: Some(f64::NAN),
            top_category_share: Some(f64::NAN),
            ..Default::default()
        };
        let profiles = infer(&nan);
        assert!(!profiles.savings_habit);
        assert!(!profiles.category_concentration_risk);
    }

    #[test]
    fn test_zero_mean_uses_epsilon() {
        let features = FeatureVector {
            expense_mean: Some(0.0),
            expense_std: Some(0.0),
            ..Default::default()
        };
        assert!(!infer(&features).expense_volatility);
    }

    #[test]
    fn test_catalogue_covers_rule_profiles() {
        assert_eq!(PROFILE_DEFINITIONS.len(), 8);
        let profiler = RuleProfiler::new();
        for rule in &profiler.rules {
            assert!(PROFILE_DEFINITIONS.iter().any(|d| d.name == rule.name()));
        }
    }
}
