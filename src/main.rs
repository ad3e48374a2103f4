//! custos - network secret store
//!
//! Commands:
//! - setup: generate role tokens and write the provisioning record
//! - serve: run the HTTP service

use std::fs::OpenOptions;
use std::io::Write;
use std::net::SocketAddr;
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use custos::{provision, Custos, CustosPaths};

#[derive(Parser)]
#[command(name = "custos")]
#[command(about = "Network secret store with role tokens, a lock gate, and emergency wipe")]
#[command(version)]
struct Cli {
    /// Installation root (config.json and data/ live here)
    #[arg(long, env = "CUSTOS_BASE_DIR", default_value = custos::config::DEFAULT_BASE_DIR, global = true)]
    base_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate primary, emergency and setup tokens and write config.json
    Setup {
        /// Where to write the one-time token handout (owner-only)
        #[arg(long)]
        token_file: Option<PathBuf>,
    },

    /// Serve the HTTP API
    Serve {
        /// Address to listen on
        #[arg(long, env = "CUSTOS_BIND", default_value = "0.0.0.0:5555")]
        bind: SocketAddr,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let paths = CustosPaths::new(&cli.base_dir);

    match cli.command {
        Commands::Setup { token_file } => cmd_setup(&paths, token_file),
        Commands::Serve { bind } => {
            let service = Custos::open(&paths).context("failed to load custos state")?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(custos::http::serve(Arc::new(service), bind))?;
            Ok(())
        }
    }
}

fn cmd_setup(paths: &CustosPaths, token_file: Option<PathBuf>) -> Result<()> {
    let token_file = match token_file {
        Some(path) => path,
        None => dirs::home_dir()
            .context("cannot determine home directory; pass --token-file")?
            .join("custos-tokens.txt"),
    };

    let tokens = provision(paths).context("setup failed")?;
    let handout = tokens.render_handout(Utc::now());

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(&token_file)
        .with_context(|| format!("failed to create {}", token_file.display()))?;
    file.write_all(handout.as_bytes())?;
    file.sync_all()?;

    println!("Configuration written to {}", paths.config_file.display());
    println!("Tokens saved to {}", token_file.display());
    println!("Save them in a password manager now, then delete the file.");
    Ok(())
}
