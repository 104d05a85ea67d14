use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ragvault::{RagConfig, RagRegistry};

#[derive(Parser)]
#[command(name = "ragvault")]
#[command(version = "0.1")]
#[command(about = "Per-user document retrieval for chat prompts", long_about = None)]
struct Cli {
    /// User whose documents and index are used
    #[arg(long, global = true, default_value = "default")]
    user: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index documents that have not been processed yet
    Update,
    /// Nearest chunks for a query
    Search {
        query: String,
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// Prompt context for a query
    Context {
        query: String,
        #[arg(long)]
        max_chunks: Option<usize>,
    },
    /// Remove a document and its chunks
    Delete { filename: String },
    /// Drop the index and embed every document again
    Rebuild,
    Summary,
    Config,
}

fn search_command(registry: &RagRegistry, user: &str, query: &str, top_k: usize) -> Result<()> {
    let results = registry
        .retrieve(user, query, top_k)
        .with_context(|| format!("search failed for user '{user}'"))?;

    let output = serde_json::json!({
        "user": user,
        "query": query,
        "results": results.iter().map(|hit| {
            serde_json::json!({
                "source": hit.chunk.source,
                "distance": hit.distance,
                "text": hit.chunk.text,
            })
        }).collect::<Vec<_>>(),
        "actual_results_count": results.len(),
        "requested_results_count": top_k,
    });
    println!("{}", serde_json::to_string(&output)?);
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ragvault=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Cli::parse();
    let config = RagConfig::load().context("failed to load configuration")?;
    let registry = RagRegistry::from_config(&config)?;
    let user = args.user.as_str();

    match args.command {
        Commands::Update => {
            let ready = registry.update_with_new_files(user)?;
            println!("{}", serde_json::json!({ "user": user, "index_ready": ready }));
        }
        Commands::Search { query, top_k } => {
            search_command(&registry, user, &query, top_k.unwrap_or(config.top_k))?
        }
        Commands::Context { query, max_chunks } => {
            let max_chunks = max_chunks.unwrap_or(config.top_k);
            print!("{}", registry.context_for_prompt(user, &query, max_chunks)?);
        }
        Commands::Delete { filename } => {
            let deleted = registry.delete_file(user, &filename)?;
            println!(
                "{}",
                serde_json::json!({ "user": user, "filename": filename, "deleted": deleted })
            );
        }
        Commands::Rebuild => {
            let ready = registry.rebuild_index(user)?;
            println!("{}", serde_json::json!({ "user": user, "index_ready": ready }));
        }
        Commands::Summary => {
            println!("{}", serde_json::to_string_pretty(&registry.summary(user))?);
        }
        Commands::Config => config.print_config(),
    }
    Ok(())
}
