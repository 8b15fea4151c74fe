//! Fabric Operator - forwarding agent rollout under staged upgrade control

use clap::{Parser, Subcommand};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, CustomResourceExt};

use fabric_common::crd::{Manager, Vrouter};
use fabric_common::telemetry::{init_telemetry, TelemetryConfig};
use fabric_common::FIELD_MANAGER;
use fabric_operator::controller_runner::build_vrouter_controllers;
use fabric_operator::{OperatorConfig, OsEnvSource};

/// Fabric - operator for the forwarding agent fleet of the network fabric
#[derive(Parser, Debug)]
#[command(name = "fabric-operator", version, about, long_about = None)]
struct Cli {
    /// Print the CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    Controller,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        for crd in [Vrouter::crd(), Manager::crd()] {
            let yaml = serde_yaml::to_string(&crd)
                .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
            println!("---\n{yaml}");
        }
        return Ok(());
    }

    init_telemetry(TelemetryConfig::default())?;

    match cli.command {
        Some(Commands::Controller) | None => run_controller().await,
    }
}

/// Ensure the fabric CRDs are installed
///
/// Applied with server-side apply on every start so the installed schema
/// always matches the operator version.
async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for (name, crd) in [
        (Vrouter::crd_name(), Vrouter::crd()),
        (Manager::crd_name(), Manager::crd()),
    ] {
        tracing::info!(crd = name, "Installing CRD...");
        crds.patch(name, &params, &Patch::Apply(&crd))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to install CRD {}: {}", name, e))?;
    }

    tracing::info!("All fabric CRDs installed/updated");
    Ok(())
}

async fn run_controller() -> anyhow::Result<()> {
    let config = OperatorConfig::from_env(&OsEnvSource)?;
    tracing::info!(
        namespace = %config.namespace,
        manager = %config.manager_name,
        "Starting fabric operator"
    );

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    ensure_crds_installed(&client).await?;

    let controllers = build_vrouter_controllers(client, &config);
    futures::future::join_all(controllers).await;

    tracing::info!("Fabric operator shutting down");
    Ok(())
}
