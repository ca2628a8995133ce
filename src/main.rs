// src/main.rs
mod app;
mod cert;
mod config;
mod crd;
mod discovery;
mod error;
mod store;
mod utils;

use clap::Parser;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};
use std::sync::Arc;

use app::Context;
use config::OperatorConfig;
use crd::SearchCluster;
use store::MANAGED_BY_LABEL;

/// Certificate lifecycle controller for SearchCluster resources
#[derive(Parser, Debug)]
#[command(name = "search-cluster-pki", version, about, long_about = None)]
pub struct Args {
    /// Operator configuration file (JSON, or YAML by extension)
    #[arg(short, long, default_value = "operator.json")]
    pub config: String,
    #[arg(short, long)]
    pub debug: bool,
    /// Also write logs to this file
    #[arg(long)]
    pub log_file: Option<String>,
    /// Print the SearchCluster CRD as YAML and exit
    #[arg(long)]
    pub crd: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if args.crd {
        print!("{}", serde_yaml::to_string(&SearchCluster::crd())?);
        return Ok(());
    }

    utils::logging::init(args.debug, args.log_file.as_deref())?;

    let config = OperatorConfig::load_from_file(&args.config)?;
    let client = Client::try_default().await?;

    let (clusters, secrets): (Api<SearchCluster>, Api<Secret>) = match &config.namespace {
        Some(namespace) => (
            Api::namespaced(client.clone(), namespace),
            Api::namespaced(client.clone(), namespace),
        ),
        None => (Api::all(client.clone()), Api::all(client.clone())),
    };
    tracing::info!(
        namespace = config.namespace.as_deref().unwrap_or("*"),
        config = %args.config,
        "starting SearchCluster certificate controller"
    );

    let ctx = Arc::new(Context { client, config });
    let owned_secrets = WatcherConfig::default().labels(&format!(
        "{}={}",
        MANAGED_BY_LABEL,
        env!("CARGO_PKG_NAME")
    ));

    Controller::new(clusters, WatcherConfig::default())
        .owns(secrets, owned_secrets)
        .shutdown_on_signal()
        .run(app::reconcile, app::error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((object, action)) => {
                    tracing::debug!(cluster = %object.name, ?action, "reconciliation completed");
                }
                Err(e) => {
                    tracing::debug!(error = %e, "reconciliation error");
                }
            }
        })
        .await;

    tracing::info!("controller stopped");
    Ok(())
}
