use clap::Parser;
use loan_eligibility_orchestrator::{
    agent::EligibilityChain, config::PipelineConfig, memory::Transcript, models::LoanApplication,
    RiskTolerance, TransactionLedger,
};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Run one loan application end-to-end and print the decision and report
#[derive(Parser, Debug)]
#[command(name = "eligibility")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Application form as JSON
    #[arg(long)]
    application: PathBuf,

    /// Bank ledger CSV (date,income,expense,balance,description)
    #[arg(long)]
    bank: PathBuf,

    /// Card ledger CSV (date,business_name,amount_of_deal,amount_paid,category)
    #[arg(long)]
    card: PathBuf,

    /// Evaluator revision budget
    #[arg(long)]
    max_retries: Option<u32>,

    /// Bank risk tolerance (low, medium, high)
    #[arg(long)]
    risk_tolerance: Option<String>,

    /// Banker directives for the evaluator and report
    #[arg(long)]
    directives: Option<String>,

    /// Directory holding the frozen scoring artifacts
    #[arg(long)]
    artifacts_dir: Option<PathBuf>,

    /// Applicant id; a fresh one is generated when omitted
    #[arg(long)]
    user_id: Option<Uuid>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let mut config = PipelineConfig::from_env()?;
    if let Some(max_retries) = cli.max_retries {
        config.max_retries = max_retries;
    }
    if let Some(tolerance) = cli.risk_tolerance.as_deref() {
        config.risk_tolerance = RiskTolerance::parse(tolerance);
    }
    if let Some(dir) = cli.artifacts_dir {
        config.artifacts_dir = dir;
    }

    // Ledgers first: a malformed upload must fail before any oracle cost.
    let ledger = TransactionLedger::from_csv_paths(&cli.bank, &cli.card)?;
    let application: LoanApplication =
        serde_json::from_str(&std::fs::read_to_string(&cli.application)?)?;

    let chain = EligibilityChain::from_config(&config)?;
    let user_id = cli.user_id.unwrap_or_else(Uuid::new_v4);

    info!(
        user_id = %user_id,
        max_retries = config.max_retries,
        risk_tolerance = %config.risk_tolerance,
        "Running eligibility chain"
    );

    let outcome = chain
        .run(
            user_id,
            application,
            ledger,
            config.risk_tolerance,
            cli.directives,
        )
        .await?;

    println!("\n=== LOAN DECISION ===");
    println!("Application ID: {}", outcome.application_id);
    println!("Decision: {}", outcome.decision.decision);
    println!("Interest rate: {:.2}%", outcome.decision.interest_rate * 100.0);
    println!("Term: {} months", outcome.decision.loan_term);
    println!("Risk score: {:.3}", outcome.decision.risk_score);
    println!(
        "Termination: {:?} after {} retries",
        outcome.termination, outcome.retry_count
    );
    println!("\n=== REPORT ===\n{}", outcome.final_report);
    println!("\nReasoning Trace:");
    for (i, trace) in outcome.reasoning_trace.iter().enumerate() {
        println!("  {}: {}", i + 1, trace);
    }

    let transcript = Transcript::from_entries(outcome.transcript);
    println!("\n{}", transcript.formatted());

    Ok(())
}
