//! # Volume Events Exporter
//!
//! A Kubernetes controller that exports `PersistentVolume` lifecycle events to an
//! HTTP collector.
//!
//! ## Overview
//!
//! 1. **Watching volumes** - Monitors every `PersistentVolume` in the cluster
//! 2. **Create events** - Sends the volume's resource graph once it is provisioned
//! 3. **Delete events** - Holds deletion with a finalizer until the delete event is accepted
//! 4. **Signing** - Optionally signs every payload with RSA-PSS (SHA-256)
//!
//! ## Usage
//!
//! ```bash
//! # Run the exporter (default subcommand)
//! volume-events-exporter run
//!
//! # Generate a signing key pair
//! volume-events-exporter keygen --bits 2048 --out-dir /etc/exporter/keys
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use volume_events_exporter::runtime::{initialization::initialize, watch_loop::run_watch_loop};
use volume_events_exporter::sign::{generate_key_pair, write_key_pair};

/// Volume events exporter
#[derive(Parser)]
#[command(name = "volume-events-exporter", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the exporter (configured through environment variables)
    Run,
    /// Generate an RSA key pair for payload signing
    Keygen {
        /// Modulus size in bits
        #[arg(long, default_value_t = 2048)]
        bits: usize,

        /// Directory receiving `signing.pem` and `signing.pub.pem`
        #[arg(long, value_name = "DIR", default_value = ".")]
        out_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run().await,
        Commands::Keygen { bits, out_dir } => keygen(bits, &out_dir),
    }
}

async fn run() -> Result<()> {
    let init = initialize().await?;
    run_watch_loop(init.volumes, init.reconciler, init.server_state).await
}

fn keygen(bits: usize, out_dir: &std::path::Path) -> Result<()> {
    let keys = generate_key_pair(bits).context("Failed to generate key pair")?;
    let (private_path, public_path) =
        write_key_pair(&keys, out_dir).context("Failed to write key pair")?;
    println!("private key: {}", private_path.display());
    println!("public key:  {}", public_path.display());
    Ok(())
}
