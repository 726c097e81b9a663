//! Thin command-line wrapper around the orchestrator engine.
//!
//! Runs one task through the pipeline and prints either the generated code
//! or the full JSON artefact. Exit code 0 on a completed pipeline,
//! non-zero on any terminal error.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use quorum_core::{
    AnthropicClient, ClientConfig, CommandClient, Language, LLMClient, Orchestrator, VoteConfig,
};

#[derive(Parser, Debug)]
#[command(name = "quorum", about = "LLM code generation with consensus voting")]
struct Args {
    /// Task description
    task: String,

    /// Target language
    #[arg(short, long, default_value = "python")]
    language: String,

    /// Voting margin: first group ahead by k wins
    #[arg(short, long, default_value_t = 3)]
    k: u32,

    /// Upper bound on candidates per vote
    #[arg(long, default_value_t = 20)]
    max_steps: u32,

    /// Write the result JSON to this file instead of stdout
    #[arg(short, long)]
    output: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Use a local `claude`-style CLI instead of the hosted API
    #[arg(long)]
    use_cli: bool,
}

fn build_client(args: &Args, config: &VoteConfig) -> Result<Arc<dyn LLMClient>, String> {
    if args.use_cli {
        let client = CommandClient::new("claude")
            .map_err(|e| e.to_string())?
            .with_timeout(std::time::Duration::from_secs(config.request_timeout_seconds));
        return Ok(Arc::new(client));
    }

    let api_key = std::env::var("ANTHROPIC_API_KEY")
        .map_err(|_| "ANTHROPIC_API_KEY is not set (or pass --use-cli)".to_string())?;
    Ok(Arc::new(AnthropicClient::new(
        ClientConfig::new(api_key)
            .with_default_model(&config.model)
            .with_timeout(config.request_timeout_seconds),
    )))
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let filter = if args.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .init();

    let Some(language) = Language::parse(&args.language) else {
        eprintln!("Unsupported language: {}", args.language);
        return ExitCode::FAILURE;
    };

    let config = VoteConfig::default()
        .with_k(args.k)
        .with_max_samples(args.max_steps);

    let client = match build_client(&args, &config) {
        Ok(client) => client,
        Err(message) => {
            eprintln!("{}", message);
            return ExitCode::FAILURE;
        }
    };

    let mut orchestrator = Orchestrator::new(client, config);

    let outcome = match orchestrator.run_task(&args.task, language).await {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("Pipeline error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let Some(result) = outcome.result else {
        eprintln!(
            "Pipeline ended in {} without a result{}",
            outcome.state,
            outcome
                .error
                .map(|e| format!(": {}", e))
                .unwrap_or_default()
        );
        return ExitCode::FAILURE;
    };

    match args.output {
        Some(path) => {
            let json = match serde_json::to_string_pretty(&result) {
                Ok(json) => json,
                Err(e) => {
                    eprintln!("Cannot serialize result: {}", e);
                    return ExitCode::FAILURE;
                }
            };
            if let Err(e) = std::fs::write(&path, json) {
                eprintln!("Cannot write {}: {}", path, e);
                return ExitCode::FAILURE;
            }
            println!("Result saved to {}", path);
        }
        None => {
            println!("\n=== Generated code ===\n");
            for function in &result.functions {
                if let Some(code) = result.code.get(&function.id) {
                    println!("# {}", function.signature);
                    println!("{}\n", code);
                }
            }

            println!("=== Metrics ===");
            println!("Decisions: {}", outcome.decisions_made);
            println!(
                "Tokens: {} in / {} out",
                result.metrics.tokens_input, result.metrics.tokens_output
            );
            println!("API calls: {}", result.metrics.api_calls);
            println!("Duration: {:.1}s", result.metrics.duration_seconds);
            println!("Estimated cost: ${:.4}", result.metrics.estimated_cost_usd);
        }
    }

    ExitCode::SUCCESS
}
