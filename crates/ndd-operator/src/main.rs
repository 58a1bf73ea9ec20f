//! ndd operator - runs a device driver for every NetworkNode

mod config;
mod controller_runner;
mod startup;

use std::sync::Arc;

use clap::{Parser, Subcommand};
use kube::Client;

use ndd_common::telemetry::{init_telemetry, TelemetryConfig};
use ndd_network_node::Context;

use config::StartArgs;
use startup::CrdRegistry;

/// ndd - network device driver operator
#[derive(Parser, Debug)]
#[command(name = "ndd", version, about, long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    /// Print CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    start: StartArgs,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controllers (default mode)
    Start(StartArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: failed to install aws-lc-rs crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();
    let registry = CrdRegistry::ndd();

    if cli.crd {
        println!("{}", registry.to_yaml()?);
        return Ok(());
    }

    let args = match cli.command {
        Some(Commands::Start(args)) => args,
        None => cli.start,
    };
    args.validate()?;

    init_telemetry(TelemetryConfig {
        service_name: "ndd-operator".to_string(),
        debug: args.debug,
        ..Default::default()
    })?;

    run(args, registry).await
}

async fn run(args: StartArgs, registry: CrdRegistry) -> anyhow::Result<()> {
    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("failed to create kubernetes client: {}", e))?;

    if args.skip_crd_install {
        tracing::info!(crds = ?registry.names(), "skipping CRD installation");
    } else {
        registry.install(&client).await?;
    }

    let ctx = Arc::new(Context::new(client.clone(), args.controller_config()));

    tracing::info!(
        namespace = %args.namespace,
        concurrency = args.concurrency,
        "starting controllers"
    );
    controller_runner::build_network_node_controller(client, ctx, args.concurrency).await;

    tracing::info!("controllers stopped, shutting down");
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
    fn start_is_the_default_command() {
        let cli = Cli::parse_from(["ndd", "--namespace", "lab"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.start.namespace, "lab");

        let cli = Cli::parse_from(["ndd", "start", "--namespace", "lab", "--debug"]);
        let Some(Commands::Start(args)) = cli.command else {
            panic!("expected start subcommand");
        };
        assert!(args.debug);
    }

    #[test]
    fn crd_flag_parses_without_a_command() {
        let cli = Cli::parse_from(["ndd", "--crd"]);
        assert!(cli.crd);
    }
}
