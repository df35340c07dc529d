mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "glimpse-cli")]
#[command(about = "Glimpse CLI - Run submissions and inspect language toolchains", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile and run a source file once
    Run {
        /// Language id (java, cpp, py, c, js, go)
        #[arg(short, long)]
        language: String,

        /// Source file to run
        #[arg(short, long)]
        file: PathBuf,

        /// Text piped to the program's stdin
        #[arg(short, long, conflicts_with = "input_file")]
        input: Option<String>,

        /// File whose contents are piped to the program's stdin
        #[arg(long)]
        input_file: Option<PathBuf>,

        /// Run inside a Docker sandbox instead of on the host
        #[arg(long, default_value = "false")]
        pooled: bool,

        /// Print the result as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// List configured languages
    Languages {
        /// Run each version probe on this host
        #[arg(long, default_value = "false")]
        probe: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            language,
            file,
            input,
            input_file,
            pooled,
            json,
        } => {
            let ok = commands::run_file(
                &language,
                &file,
                input.as_deref(),
                input_file.as_deref(),
                pooled,
                json,
            )
            .await?;
            if !ok {
                std::process::exit(1);
            }
        }
        Commands::Languages { probe } => {
            commands::list_languages(probe).await?;
        }
    }

    Ok(())
}
