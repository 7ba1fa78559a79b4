use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use portd::bridge::protocol::Envelope;
use portd::config::{DaemonConfig, HostConfig, PortConfig};
use portd::daemon::Daemon;
use portd::handlers::Registry;
use portd::host::{LocalFileStore, LocalProcessHost, ProcessHost};
use portd::port::{FileSlotHost, Port};
use portd::pull::{ManifestPuller, PullConfig};
use portd::services::{Evaluator, Io};

mod cli;

use cli::{Cli, CliCommand, HostArgs, PortArgs};

#[tokio::main]
async fn main() -> ExitCode {
    portd::logging::init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn host_config(args: HostArgs) -> HostConfig {
    HostConfig {
        root: args.root,
        home: args.home,
    }
}

fn open_port(args: &PortArgs) -> anyhow::Result<(FileSlotHost, portd::PortNumber)> {
    let config = PortConfig {
        dir: args.port_dir.clone(),
        capacity: args.capacity,
    };
    config.validate()?;
    Ok((FileSlotHost::new(config.dir, config.capacity), args.port))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let hosts = host_config(cli.hosts);

    match cli.command {
        CliCommand::Daemon {
            server,
            url,
            keepalive_secs,
            shutdown_grace_secs,
        } => {
            let config = DaemonConfig {
                server,
                url,
                keepalive_interval: Duration::from_secs(keepalive_secs),
                shutdown_grace: Duration::from_secs(shutdown_grace_secs),
            };
            let store = LocalFileStore::new(hosts.host_dir(&config.server));
            let process_host = LocalProcessHost::new(hosts.root.clone(), hosts.home.clone());
            let registry = Registry::new(
                Io::new(Arc::new(store)),
                Evaluator::over(Arc::new(process_host)),
                config.server.clone(),
            );
            let daemon = Daemon::new(config, registry)?;
            daemon.run().await.context("control connection failed")?;
        }
        CliCommand::Bootstrap {
            target,
            script,
            threads,
            support_files,
            args,
        } => {
            let evaluator = Evaluator::over(Arc::new(LocalProcessHost::new(
                hosts.root.clone(),
                hosts.home.clone(),
            )));
            let pid = evaluator
                .launch(&target, &script, threads, &args, &support_files)
                .await
                .with_context(|| format!("failed to bootstrap {script} on {target}"))?;
            println!("{pid}");
        }
        CliCommand::ReadPort { port } => {
            let (slots, number) = open_port(&port)?;
            let envelope = Port::open(&slots, number).read().await?;
            println!("{}", serde_json::to_string(&envelope)?);
        }
        CliCommand::GetServer { port, id, request } => {
            let process_host = LocalProcessHost::new(hosts.root.clone(), hosts.home.clone());
            let info = process_host
                .describe(&request)
                .await
                .with_context(|| format!("failed to describe {request}"))?;

            let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let envelope = Envelope::success(serde_json::to_value(info)?).with_id(Some(id));

            let (slots, number) = open_port(&port)?;
            Port::open(&slots, number).write(&envelope).await?;
            tracing::info!(port = %number, id = ?envelope.id, "Server info written");
        }
        CliCommand::Pull { base_url, manifest } => {
            let config = PullConfig {
                base_url,
                manifest_path: manifest,
                ..Default::default()
            };
            let io = Io::new(Arc::new(LocalFileStore::new(hosts.host_dir(&hosts.home))));
            let summary = ManifestPuller::new(config, io)?.pull().await?;
            println!(
                "fetched {}, failed {}, skipped {}",
                summary.fetched, summary.failed, summary.skipped
            );
        }
    }

    Ok(())
}
