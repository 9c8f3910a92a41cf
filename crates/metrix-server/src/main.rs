mod app;
mod background;
mod config;
mod error;
mod handlers;
mod middleware;
mod rpc;
mod state;

use std::net::SocketAddr;
use std::process;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use metrix_core::security::{Decryptor, Signer};
use metrix_core::storage::{self, BackendConfig, FlushPolicy, Storage};

use config::{Args, Settings};
use rpc::MetricsService;
use state::{AppState, Security};

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let settings = match Settings::load(args) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            process::exit(2);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to build tokio runtime");
            process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(settings)) {
        error!(error = format!("{e:#}"), "server stopped");
        process::exit(1);
    }
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        LevelFilter::ERROR
    } else {
        match verbose {
            0 => LevelFilter::INFO,
            1 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    };

    let mut filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();
    for target in ["metrix_server", "metrix_core"] {
        if let Ok(directive) = format!("{target}={level}").parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn build_security(settings: &Settings) -> anyhow::Result<Security> {
    let signer = settings
        .key
        .as_deref()
        .map(|k| Signer::new(k.as_bytes()))
        .transpose()
        .context("cannot initialize HMAC key")?;
    let decryptor = settings
        .crypto_key
        .as_ref()
        .map(Decryptor::from_file)
        .transpose()
        .context("cannot load private key")?;

    info!(
        integrity = signer.is_some(),
        encryption = decryptor.is_some(),
        trusted_subnet = ?settings.trusted_subnet.map(|s| s.to_string()),
        "transport security"
    );
    Ok(Security {
        signer,
        decryptor,
        trusted: settings.trusted_subnet,
    })
}

async fn run(settings: Settings) -> anyhow::Result<()> {
    info!(version = metrix_core::VERSION, "starting metrix-server");

    let backend = settings.backend.clone();
    let store: Arc<dyn Storage> = tokio::task::spawn_blocking(move || storage::open(&backend))
        .await
        .context("storage initialization panicked")?
        .context("cannot open storage")?;

    let state = AppState::new(store.clone(), build_security(&settings)?);
    let shutdown = CancellationToken::new();

    let token = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("received shutdown signal");
        token.cancel();
    }) {
        warn!(error = %e, "failed to set signal handler");
    }

    let mut flusher = None;
    if let BackendConfig::File {
        policy: FlushPolicy::Interval(period),
        ..
    } = settings.backend
    {
        flusher = Some(tokio::spawn(background::flush_loop(
            store.clone(),
            period,
            shutdown.clone(),
        )));
    }

    let grpc = match &settings.grpc_address {
        Some(addr) => Some(spawn_grpc(addr, state.clone(), shutdown.clone()).await?),
        None => None,
    };

    let listener = tokio::net::TcpListener::bind(&settings.address)
        .await
        .with_context(|| format!("cannot bind {}", settings.address))?;
    info!(addr = %listener.local_addr()?, "http listening");

    let app = app::router(state).into_make_service_with_connect_info::<SocketAddr>();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await
        .context("http server error");
    // A failed HTTP listener still stops the other tasks and flushes.
    shutdown.cancel();

    if let Some(grpc) = grpc {
        match grpc.await {
            Ok(Err(e)) => error!(error = %e, "grpc server error"),
            Err(e) => error!(error = %e, "grpc task panicked"),
            Ok(Ok(())) => {}
        }
    }
    if let Some(flusher) = flusher {
        let _ = flusher.await;
    }

    background::flush(store).await;
    info!("shutdown complete");
    served
}

async fn spawn_grpc(
    addr: &str,
    state: AppState,
    shutdown: CancellationToken,
) -> anyhow::Result<tokio::task::JoinHandle<Result<(), tonic::transport::Error>>> {
    let addr: SocketAddr = tokio::net::lookup_host(addr)
        .await
        .with_context(|| format!("cannot resolve {addr}"))?
        .next()
        .with_context(|| format!("{addr} resolves to no address"))?;
    info!(%addr, "grpc listening");

    let service = MetricsService::new(state).into_server();
    Ok(tokio::spawn(
        tonic::transport::Server::builder()
            .add_service(service)
            .serve_with_shutdown(addr, shutdown.cancelled_owned()),
    ))
}
