//! Survey admin CLI
//!
//! Talks to a deployed survey program over RPC.
//!
//! # Usage
//!
//! ```bash
//! # Every survey and how far its decryption got
//! survey --config client.toml list-surveys
//!
//! # Close survey 3, reveal its sums, then publish it
//! survey --config client.toml --keypair admin.json end 3
//! survey --config client.toml --keypair admin.json finalize 3
//! survey --config client.toml --keypair admin.json complete 3
//!
//! # Sums and averages
//! survey --config client.toml results 3
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use survey_client::{
    logging, ClientConfig, DecryptSession, FinalizeOutcome, Orchestrator, RpcSurveyProgram,
};
use tracing::info;

/// Anonymous product survey administration
#[derive(Parser)]
#[command(name = "survey")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Administer anonymous product satisfaction surveys", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, env = "SURVEY_CONFIG")]
    config: Option<PathBuf>,

    /// RPC endpoint, overriding the config
    #[arg(long, global = true)]
    rpc_url: Option<String>,

    /// Keypair that signs admin writes, overriding the config
    #[arg(short, long, global = true)]
    keypair: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Output logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List every survey with its decryption progress
    ListSurveys,

    /// Print sums and averages of the decrypted products
    Results { survey_id: u64 },

    /// Close a survey to new ratings
    End { survey_id: u64 },

    /// Request decryption of one product, or every product, and wait
    Finalize {
        survey_id: u64,

        /// Only this product
        #[arg(short, long)]
        product: Option<u8>,
    },

    /// Publish a survey once every product is decrypted
    Complete { survey_id: u64 },
}

/// Config file, then command-line overrides
fn load_config(cli: &Cli) -> anyhow::Result<ClientConfig> {
    let mut config = match &cli.config {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::default(),
    };
    if let Some(url) = &cli.rpc_url {
        config.network.rpc_url = url.clone();
    }
    if let Some(path) = &cli.keypair {
        config.network.keypair_path = Some(path.clone());
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if cli.json_logs {
        config.logging.format = "json".to_string();
    }
    config.validate()?;
    Ok(config)
}

fn print_outcome(survey_id: u64, product_index: u8, outcome: &FinalizeOutcome) {
    match outcome {
        FinalizeOutcome::Decrypted(sum) => {
            println!("survey {} product {}: sum {}", survey_id, product_index, sum)
        }
        FinalizeOutcome::Pending {
            request_id,
            attempts,
        } => println!(
            "survey {} product {}: request {} still pending after {} polls",
            survey_id, product_index, request_id, attempts
        ),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    logging::init_from_settings(&config.logging)?;

    let program = Arc::new(RpcSurveyProgram::from_config(&config)?);
    let admin = program.payer();
    info!(rpc = %config.network.rpc_url, program = %program.addresses().program_id, "Connected");

    // No local oracle exists against a real cluster
    let session = DecryptSession::gateway(config.network.rpc_url.clone());
    let orch = Orchestrator::without_ledger(program, session, config.decryption.clone());
    let need_admin = || admin.context("this command needs --keypair or network.keypair_path");

    match cli.command {
        Commands::ListSurveys => {
            let surveys = orch.list_surveys().await?;
            if surveys.is_empty() {
                println!("no surveys");
            }
            for survey in surveys {
                let decrypted = survey
                    .statuses
                    .iter()
                    .filter(|s| **s == product_survey::DecryptionStatus::Decrypted)
                    .count();
                let state = match (survey.is_active, survey.is_finalized) {
                    (true, _) => "active",
                    (false, false) => "ended",
                    (false, true) => "finalized",
                };
                println!(
                    "{:>4}  {:<10} {:>5} responses  {}/{} decrypted  {}",
                    survey.survey_id,
                    state,
                    survey.total_responses,
                    decrypted,
                    survey.statuses.len(),
                    survey.title
                );
            }
        }
        Commands::Results { survey_id } => {
            print!("{}", orch.results(survey_id).await?);
        }
        Commands::End { survey_id } => {
            orch.end_survey(survey_id, &need_admin()?).await?;
            println!("survey {} ended", survey_id);
        }
        Commands::Finalize { survey_id, product } => {
            let admin = need_admin()?;
            match product {
                Some(product_index) => {
                    let outcome = orch.finalize_product(survey_id, product_index, &admin).await?;
                    print_outcome(survey_id, product_index, &outcome);
                }
                None => {
                    let outcomes = orch.finalize_all(survey_id, &admin).await?;
                    for (product_index, outcome) in outcomes.iter().enumerate() {
                        print_outcome(survey_id, product_index as u8, outcome);
                    }
                }
            }
        }
        Commands::Complete { survey_id } => {
            orch.complete_survey(survey_id, &need_admin()?).await?;
            println!("survey {} finalized", survey_id);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "survey",
            "finalize",
            "3",
            "--product",
            "1",
            "--rpc-url",
            "http://rpc.test:8899",
            "--json-logs",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Finalize {
                survey_id: 3,
                product: Some(1)
            }
        ));

        let config = load_config(&cli).unwrap();
        assert_eq!(config.network.rpc_url, "http://rpc.test:8899");
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_overrides_are_validated() {
        let cli = Cli::try_parse_from(["survey", "--rpc-url", "", "list-surveys"]).unwrap();
        assert!(load_config(&cli).is_err());
    }

    #[test]
    fn test_survey_id_required() {
        assert!(Cli::try_parse_from(["survey", "results"]).is_err());
    }
}
