mod config;
mod net;
mod report;
mod scheduler;

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::process;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use metrix_core::collector::RuntimeCollector;
use metrix_core::security::{Encryptor, Signer};

use config::{Args, Settings, Transport};
use report::{AnyReporter, GrpcReporter, HttpReporter};
use scheduler::Scheduler;

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

    // Collection and reporting share one thread.
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to build tokio runtime");
            process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(settings)) {
        error!(error = format!("{e:#}"), "agent stopped");
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
    for target in ["metrix_agent", "metrix_core"] {
        if let Ok(directive) = format!("{target}={level}").parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn build_reporter(settings: &Settings) -> anyhow::Result<AnyReporter> {
    let signer = settings
        .key
        .as_deref()
        .map(|k| Signer::new(k.as_bytes()))
        .transpose()
        .context("cannot initialize HMAC key")?;
    let encryptor = settings
        .crypto_key
        .as_ref()
        .map(Encryptor::from_file)
        .transpose()
        .context("cannot load public key")?;

    let real_ip = match net::outbound_ip(&settings.address) {
        Ok(ip) => Some(ip),
        Err(e) => {
            warn!(address = %settings.address, error = %e, "cannot determine outbound address");
            None
        }
    };

    info!(
        address = %settings.address,
        transport = ?settings.transport,
        integrity = signer.is_some(),
        encryption = encryptor.is_some(),
        gzip = settings.gzip,
        real_ip = ?real_ip,
        "reporter configured"
    );

    let reporter = match settings.transport {
        Transport::Http => AnyReporter::Http(HttpReporter::new(
            &settings.address,
            signer,
            encryptor,
            settings.gzip,
            real_ip,
        )?),
        Transport::Grpc => AnyReporter::Grpc(GrpcReporter::new(
            &settings.address,
            signer,
            encryptor,
            settings.gzip,
            real_ip,
        )?),
    };
    Ok(reporter)
}

async fn run(settings: Settings) -> anyhow::Result<()> {
    info!(version = metrix_core::VERSION, "starting metrix-agent");

    let reporter = build_reporter(&settings)?;
    let shutdown = CancellationToken::new();

    let token = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("received shutdown signal");
        token.cancel();
    }) {
        warn!(error = %e, "failed to set signal handler");
    }

    Scheduler::new(RuntimeCollector::real(), reporter)
        .run(settings.poll_interval, settings.report_interval, shutdown)
        .await;
    Ok(())
}
