use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use toolsgate_core::{cancel_pair, Artifact, GateConfig, PostProcessor, ValidatedConfig};
use toolsgate_vsphere::VsphereConnector;

#[derive(Debug, Parser)]
#[command(
    name = "toolsgate",
    version,
    about = "Waits for VMware Tools to register on a freshly built VM"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, short, default_value = "toolsgate.toml")]
    config: PathBuf,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check the configuration and print the resolved endpoint and poll policy
    Validate,

    /// Post-process one build artifact
    Process {
        /// JSON file describing the incoming artifact.
        #[arg(long)]
        artifact: PathBuf,

        /// Write the resulting artifact JSON here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries the resulting artifact JSON.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = GateConfig::load_from(&cli.config)?
        .validate()
        .with_context(|| format!("invalid configuration in {}", cli.config.display()))?;

    match cli.cmd {
        Command::Validate => {
            println!("endpoint: {}", cfg.endpoint.redacted());
            println!("insecure: {}", cfg.endpoint.insecure);
            println!(
                "datacenter: {}",
                cfg.datacenter.as_deref().unwrap_or("(default)")
            );
            println!(
                "poll: every {:?}, {} attempts",
                cfg.policy.interval, cfg.policy.max_attempts
            );
        }
        Command::Process { artifact, output } => process(cfg, &artifact, output).await?,
    }
    Ok(())
}

async fn process(cfg: ValidatedConfig, artifact: &Path, output: Option<PathBuf>) -> Result<()> {
    let bytes = tokio::fs::read(artifact)
        .await
        .with_context(|| format!("read {}", artifact.display()))?;
    let artifact: Artifact = serde_json::from_slice(&bytes).context("parse artifact json")?;

    let (handle, signal) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; cancelling");
            handle.cancel();
        }
    });

    info!(endpoint = %cfg.endpoint.redacted(), "post-processing {}", artifact.id);
    let pp = PostProcessor::new(VsphereConnector::new(cfg.endpoint), cfg.policy)
        .with_datacenter(cfg.datacenter);
    let out = pp
        .process(&artifact, &signal)
        .await
        .with_context(|| format!("post-process {}", artifact.description()))?;

    let json = serde_json::to_string_pretty(&out)?;
    match output {
        Some(path) => tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("write {}", path.display()))?,
        None => println!("{json}"),
    }
    info!("{}", out.artifact.description());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_process_arguments() {
        let cli = Cli::try_parse_from([
            "toolsgate",
            "--config",
            "gate.toml",
            "process",
            "--artifact",
            "artifact.json",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("gate.toml"));
        match cli.cmd {
            Command::Process { artifact, output } => {
                assert_eq!(artifact, PathBuf::from("artifact.json"));
                assert!(output.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
