//! kiln CLI - Build custom Caddy binaries with plugins.

mod build;
mod colors;
mod env;
mod post;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "Build custom Caddy binaries with plugins")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a custom binary
    Build {
        /// Base program version, branch or commit (default: latest)
        version: Option<String>,

        /// Output path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Plugin to link in: module[@version][=replacement]
        #[arg(long = "with", value_name = "MODULE")]
        with: Vec<String>,

        /// Dependency replacement: module[@version]=replacement
        #[arg(long, value_name = "MODULE=REPLACEMENT")]
        replace: Vec<String>,

        /// Directory to embed: [all:][alias:]path
        #[arg(long, value_name = "DIR")]
        embed: Vec<String>,
    },

    /// Print the kiln version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG takes precedence over --verbose
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Helper to format kiln-core errors with recovery hints
    let format_error = |err: anyhow::Error| -> anyhow::Error {
        if let Some(kiln_err) = err.downcast_ref::<kiln_core::Error>() {
            anyhow::anyhow!("{}", kiln_err.with_hint())
        } else {
            err
        }
    };

    match cli.command {
        Commands::Build {
            version,
            output,
            with,
            replace,
            embed,
        } => {
            let args = build::BuildArgs {
                version,
                output,
                with,
                replace,
                embed,
            };
            build::execute(args).await.map_err(format_error)?;
        }

        Commands::Version => {
            println!("kiln {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
