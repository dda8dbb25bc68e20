#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo,
        clippy::indexing_slicing
    )
)]

//! Process entry point for the MITM proxy: parses configuration, wires the root CA, the
//! proxy engine, the subscriber RPC server, and the health endpoint together, and drives
//! graceful shutdown on SIGINT.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::watch;

use swarpf_ca::RootCa;
use swarpf_emitter::Emitter;
use swarpf_proxy::{EngineConfig, EventRouter, ProxyEngine};
use swarpf_rpc::proxyapi::proxy_api_server::ProxyApiServer;
use swarpf_subscriber::{ProxyApiService, Publisher, Registry};

const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[clap(name = "swarpf-proxy", about = "MITM forward proxy for the game API")]
struct Opts {
    /// Listen address for the HTTP(S) proxy.
    #[clap(long = "proxy_listen_addr", env = "SWARPF_PROXY_PROXY_LISTEN_ADDR", default_value = "0.0.0.0:8010")]
    proxy_listen_addr: SocketAddr,

    /// Listen address for the subscriber RPC server.
    #[clap(
        long = "proxyapi_listen_addr",
        env = "SWARPF_PROXY_PROXYAPI_LISTEN_ADDR",
        default_value = "0.0.0.0:11000"
    )]
    proxyapi_listen_addr: SocketAddr,

    /// Enable verbose (trace-level) logging.
    #[clap(long = "verbose", env = "SWARPF_PROXY_VERBOSE")]
    verbose: bool,

    /// Enable human-readable console logging instead of structured JSON.
    #[clap(long = "log_pretty_print", env = "SWARPF_PROXY_LOG_PRETTY_PRINT")]
    log_pretty_print: bool,

    /// Enable HTTPS interception (TLS termination via a minted root CA).
    #[clap(long = "intercept_https", env = "SWARPF_PROXY_INTERCEPT_HTTPS")]
    intercept_https: bool,

    /// Directory holding (or to generate) the root CA's certificate and key.
    #[clap(
        long = "certificate_directory",
        env = "SWARPF_PROXY_CERTIFICATE_DIRECTORY",
        default_value = "./certs/"
    )]
    certificate_directory: PathBuf,

    /// Force the location-service response rewrite, downgrading subsequent traffic to HTTP.
    #[clap(long = "force_http_downgrade", env = "SWARPF_PROXY_FORCE_HTTP_DOWNGRADE")]
    force_http_downgrade: bool,

    /// Listen address for the `/healthz` side-channel.
    #[clap(long = "healthz_addr", env = "SWARPF_PROXY_HEALTHZ_ADDR", default_value = "127.0.0.1:9617")]
    healthz_addr: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = rustls::crypto::ring::default_provider().install_default();

    let opts = Opts::parse();
    swarpf_telemetry::init::init_tracing(opts.log_pretty_print, opts.verbose)
        .context("failed to initialize logging")?;

    let root_ca = RootCa::load(&opts.certificate_directory).context("failed to load root CA")?;
    let emitter = Arc::new(Emitter::new(1));
    let registry = Arc::new(Registry::new());
    let router: Arc<dyn EventRouter> = Arc::new(Publisher::new(registry.clone(), emitter.clone()));

    let engine = ProxyEngine::new(
        root_ca,
        EngineConfig {
            intercept_https: opts.intercept_https,
            force_http_downgrade: opts.force_http_downgrade,
            verbose: opts.verbose,
        },
        router,
    );

    let proxy_listener = TcpListener::bind(opts.proxy_listen_addr)
        .await
        .with_context(|| format!("failed to bind proxy listener on {}", opts.proxy_listen_addr))?;
    tracing::info!(addr = %opts.proxy_listen_addr, "proxy listening");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (rpc_shutdown_tx, rpc_shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let engine_for_serve = engine.clone();
    let proxy_task = tokio::spawn(engine_for_serve.serve(proxy_listener, shutdown_rx));

    // Bind (and immediately release) the RPC address up front so a port conflict is a fatal
    // startup error rather than a silently-failed background task.
    drop(
        TcpListener::bind(opts.proxyapi_listen_addr)
            .await
            .with_context(|| format!("failed to bind subscriber RPC listener on {}", opts.proxyapi_listen_addr))?,
    );

    let proxy_api_service = ProxyApiServer::new(ProxyApiService::new(registry.clone()));
    let proxyapi_addr = opts.proxyapi_listen_addr;
    let rpc_task = tokio::spawn(async move {
        let result = tonic::transport::Server::builder()
            .add_service(proxy_api_service)
            .serve_with_shutdown(proxyapi_addr, async {
                let _ = rpc_shutdown_rx.await;
            })
            .await;
        if let Err(err) = result {
            tracing::error!(error = %err, "subscriber RPC server stopped with an error");
        }
    });
    tracing::info!(addr = %proxyapi_addr, "subscriber RPC server listening");

    let readiness = swarpf_telemetry::http::Readiness::default();
    readiness.set_ready();
    let healthz_task = tokio::spawn(swarpf_telemetry::http::run_server(opts.healthz_addr, readiness));

    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown requested, stopping new connections");

    let _ = shutdown_tx.send(true);
    let _ = rpc_shutdown_tx.send(());
    emitter.off("*", &[]);

    let deadline = tokio::time::Instant::now() + SHUTDOWN_DEADLINE;
    while engine.active_connections() > 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    if engine.active_connections() > 0 {
        tracing::warn!(
            remaining = engine.active_connections(),
            "shutdown deadline reached, force-closing remaining connections"
        );
    }

    proxy_task.abort();
    rpc_task.abort();
    healthz_task.abort();

    tracing::info!("proxy shut down");
    Ok(())
}
