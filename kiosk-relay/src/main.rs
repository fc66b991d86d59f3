use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::{net::TcpListener, sync::watch};
use tracing::{info, warn};

use kiosk_relay::{
    cli::{Cli, Command, ServeArgs},
    client,
    config::Settings,
    hub::{HubHandle, spawn_hub},
    input, server, web,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => serve(args).await?,
        Command::Simulate(args) => client::run(args).await?,
    }

    Ok(())
}

async fn serve(args: ServeArgs) -> Result<()> {
    let settings = Settings::load(&args).await?;

    let line_listener = TcpListener::bind(settings.listen)
        .await
        .with_context(|| format!("failed to bind line listener on {}", settings.listen))?;
    let ws_listener = TcpListener::bind(settings.ws_listen)
        .await
        .with_context(|| format!("failed to bind websocket listener on {}", settings.ws_listen))?;

    let (hub, hub_task) = spawn_hub(settings.hub_config());
    let line_server = server::Server::new(line_listener, hub.clone());
    info!("relay listening on {}", line_server.local_addr()?);
    info!("websocket endpoint on ws://{}/ws", ws_listener.local_addr()?);

    let input_task = match settings.input_device.clone() {
        Some(path) => Some(tokio::spawn(run_input(path, hub.clone()))),
        None => {
            info!("no input device configured; simulator mode");
            None
        }
    };

    let (stop_tx, stop_rx) = watch::channel(false);
    let line_task = tokio::spawn(line_server.run_until(stopped(stop_rx.clone())));
    let ws_task = tokio::spawn(web::serve_until(ws_listener, hub.clone(), stopped(stop_rx)));

    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = ?err, "failed to install ctrl-c handler");
    }
    info!("shutting down relay");

    // Dropping the reader closes the serial device.
    if let Some(task) = input_task {
        task.abort();
        match task.await {
            Ok(()) => {}
            Err(err) if err.is_cancelled() => {}
            Err(err) => warn!("input device task failed: {err}"),
        }
    }
    let _ = stop_tx.send(true);
    let _ = hub.shutdown();

    for (name, task) in [("line listener", line_task), ("websocket listener", ws_task)] {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!("{name} exited with error: {err:?}"),
            Err(err) => warn!("{name} task failed: {err}"),
        }
    }
    let _ = hub_task.await;

    Ok(())
}

async fn run_input(path: PathBuf, hub: HubHandle) {
    if let Err(err) = input::run_device(path, hub).await {
        warn!("input device task exited with error: {err:?}");
    }
}

async fn stopped(mut stop: watch::Receiver<bool>) {
    while !*stop.borrow() {
        if stop.changed().await.is_err() {
            break;
        }
    }
}
