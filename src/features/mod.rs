//! Feature extraction layer
//!
//! Raw bank/card ledgers in, fixed-shape [`FeatureVector`](crate::models::FeatureVector) out.
//! Pure and deterministic: no oracle, no I/O beyond CSV ingest.

pub mod extract;
pub mod ledger;
pub mod stats;

pub use extract::{extract, monthly_aggregates, MonthlyAggregate, Month};
pub use ledger::{parse_bank_csv, parse_card_csv};
