//! Loan Eligibility Orchestrator
//!
//! Decides consumer loan applications by combining deterministic analysis
//! with reasoning-oracle judgment:
//! - Extracts behavioural features from bank and card ledgers
//! - Scores interest rate and default risk on frozen model artifacts
//! - Retrieves similar historical cases as precedent
//! - Runs behavioural, decision and evaluator stages with bounded revision
//! - Produces a report and appends the outcome to an application log
//!
//! LOOP:
//! BEHAVIORAL → DECISION → EVALUATOR → (REVISE → retry)* → REPORT

pub mod agent;
pub mod api;
pub mod audit;
pub mod config;
pub mod error;
pub mod features;
pub mod gemini;
pub mod memory;
pub mod models;
pub mod normalize;
pub mod oracle;
pub mod profiles;
pub mod retrieval;
pub mod scoring;
pub mod stages;
pub mod state;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use agent::EligibilityChain;
