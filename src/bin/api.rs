use loan_eligibility_orchestrator::{
    agent::EligibilityChain, api::start_server, config::PipelineConfig,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = PipelineConfig::from_env()?;

    info!("Loan Eligibility Orchestrator - API Server");
    info!(
        port = config.port,
        max_retries = config.max_retries,
        risk_tolerance = %config.risk_tolerance,
        "Configuration loaded"
    );

    let chain = Arc::new(EligibilityChain::from_config(&config)?);
    info!("Eligibility chain initialized");

    start_server(chain, config.risk_tolerance, config.port).await?;

    Ok(())
}
