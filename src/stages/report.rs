//! Report stage: prose justification of the final decision.

use super::{prompts, StageContext};
use crate::oracle::StageResponse;
use crate::Result;
use tracing::info;

/// Produce the display markdown for a decided application.
pub async fn run(ctx: &StageContext, inputs: &prompts::ReviewInputs<'_>) -> Result<String> {
    let raw = ctx.ask(&prompts::report(inputs)).await?;
    let report = StageResponse::report(&raw);

    info!(
        decision = %inputs.decision.decision,
        report_len = report.len(),
        "Report generated"
    );
    Ok(report)
}
