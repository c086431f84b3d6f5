// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use metric_receiver::{
    auth::Authorizer,
    config::Config,
    connection::SessionConfig,
    intake,
    server::{self, ServerState},
    shipper::Shipper,
    sink::InfluxSink,
    tls,
};

/// Accepts JSON metrics over WebSocket and ships them to InfluxDB.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Configuration file. Defaults to $METRIC_RECEIVER_CONFIG, then
    /// /etc/metric-receiver/metric-receiver.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
pub async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            // no subscriber yet
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(&config.log_level) {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }
    info!("Starting metric receiver v{}", env!("CARGO_PKG_VERSION"));

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(log_level: &str) -> Result<(), String> {
    let env_filter = format!("h2=off,hyper=off,rustls=off,{log_level}");
    let filter = EnvFilter::try_new(env_filter)
        .map_err(|e| format!("could not parse log level {log_level}: {e}"))?;

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| format!("setting default subscriber failed: {e}"))
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let web = &config.web_server;
    let tls = if web.use_tls {
        Some(tls::load(&web.cert_path, &web.key_path).await?)
    } else {
        None
    };

    let influx = &config.influx_server;
    let (intake_tx, intake_rx) = intake::channel(influx.write_buffer);

    let sink = InfluxSink::new(influx)?;
    let shipper = Shipper::new(
        Arc::new(sink),
        intake_rx,
        influx.batch_size,
        influx.send_interval(),
    )?;
    let shipper = shipper.start().await?;

    let authorizer = Authorizer::from_config(&config.auth_server)?;
    info!("Using {authorizer:?}");

    let listener = TcpListener::bind((web.listen_address.as_str(), web.listen_port)).await?;

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    let state = ServerState {
        intake: intake_tx,
        authorizer,
        session: SessionConfig::new(web.max_socket_lifetime()),
        max_message_size: web.max_message_size,
        shutdown: shutdown.clone(),
    };
    let router = server::router(state);
    let served = match tls {
        Some(tls) => server::serve_tls(listener, router, tls, shutdown.clone()).await,
        None => server::serve(listener, router, shutdown.clone()).await,
    };
    // serve can also fail on its own
    shutdown.cancel();

    info!("Flushing remaining metrics");
    shipper.stop().await?;
    served?;
    info!("Metric receiver stopped");
    Ok(())
}

async fn wait_for_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {e}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("Shutdown signal received");
    shutdown.cancel();
}
