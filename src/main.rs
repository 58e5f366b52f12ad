// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use acme_http01_proxy::{
    cluster::ClusterClient,
    config::Cli,
    constants::TOKIO_WORKER_THREADS,
    orchestrator::{start, Startup, StartupOptions},
    redirect::{
        iptables::IptablesProvisioner, machineconfig::MachineConfigProvisioner,
        LogOnlyProvisioner, ProvisionMode, RedirectProvisioner,
    },
    resolver::SystemResolver,
};
use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use tracing::{debug, error, info};

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Build Tokio runtime with custom thread names
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(TOKIO_WORKER_THREADS)
        .thread_name("acme-http01-proxy")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<ExitCode> {
    // Respects RUST_LOG (default INFO) and RUST_LOG_FORMAT=json
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }

    info!(mode = %cli.mode, "Starting ACME HTTP-01 proxy");
    debug!(?cli, "Configuration loaded");

    match run(cli).await {
        Ok(code) => Ok(code),
        Err(e) => {
            error!("{e:#}");
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let client = ClusterClient::try_default().await?;
    let provisioner = provisioner_for(&cli, &client);

    let startup = start(
        &client,
        &SystemResolver,
        provisioner.as_ref(),
        &StartupOptions::from(&cli),
    )
    .await?;

    let ready = match startup {
        Startup::NoProxyNeeded(endpoints) => {
            debug!(endpoints = %serde_json::to_string(&endpoints)?, "Exiting");
            return Ok(ExitCode::SUCCESS);
        }
        Startup::Ready(ready) => ready,
    };

    ready.serve(shutdown_signal()).await?;
    info!("Proxy stopped");
    Ok(ExitCode::SUCCESS)
}

fn provisioner_for(cli: &Cli, client: &ClusterClient) -> Box<dyn RedirectProvisioner> {
    match cli.mode {
        ProvisionMode::LogOnly => Box::new(LogOnlyProvisioner),
        ProvisionMode::Iptables => Box::new(
            IptablesProvisioner::new(cli.iptables_path.clone())
                .with_ip6tables_path(cli.ip6tables_path.clone()),
        ),
        ProvisionMode::MachineConfig => Box::new(MachineConfigProvisioner::new(client.clone())),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received, draining connections");
}
