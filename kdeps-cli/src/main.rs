//! Thin process surface for kdeps: loads a bundle directory and starts `kdeps-serve`.

use std::path::PathBuf;

use clap::Parser;
use kdeps_core::action::Version;
use kdeps_serve::ServeSelection;
use tracing_subscriber::EnvFilter;

/// Starts the HTTP edge for a kdeps bundle.
#[derive(Parser, Debug)]
#[command(name = "kdeps", version, about = "Serve a kdeps resource-graph bundle over HTTP")]
struct Args {
    /// Bundle root containing `agents/<agent>/<version>/workflow.*`.
    #[arg(long, env = "KDEPS_HOME", default_value = ".")]
    kdeps_home: PathBuf,

    /// Address to bind the HTTP edge to.
    #[arg(long, default_value = "127.0.0.1:8080")]
    addr: String,

    /// Agent to serve; defaults to the sole/first agent discovered under `kdeps_home`.
    #[arg(long)]
    agent: Option<String>,

    /// Version to serve; defaults to the latest version of the selected agent.
    #[arg(long)]
    version: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let _ = kdeps_config::load_and_apply("kdeps", None::<&std::path::Path>);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let version = args
        .version
        .map(|v| Version::parse(&v))
        .transpose()
        .map_err(|e| format!("invalid --version: {e}"))?;

    let selection = ServeSelection { agent: args.agent, version };

    kdeps_serve::run_serve(Some(&args.addr), args.kdeps_home, selection).await
}
