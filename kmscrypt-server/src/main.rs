//! Long-running key provider service.

mod http;

use anyhow::Context;
use clap::Parser;
use kmscrypt::ProviderArgs;

/// Serve OCI layer key wrap/unwrap requests over HTTP, backed by a KMS key.
///
/// Requests are key-provider protocol JSON posted to /v1/wrapkey and
/// /v1/unwrapkey. This is not the gRPC KeyProviderService: ocicrypt's `grpc`
/// provider config cannot call it, use a `cmd` provider with kmscrypt-plugin
/// or an HTTP client instead.
///
/// The key URI is read from the `kmscrypt` provider parameter. Callers of the
/// older gRPC server send `grpc-keyprovider`; run with
/// `--provider-name grpc-keyprovider` to serve them.
#[derive(Parser)]
#[command(name = "kmscrypt-server", version)]
struct Cli {
    /// Address to listen on; a bare `:port` listens on all interfaces.
    /// `--grpcport` is accepted as an alias, but the protocol is HTTP/JSON.
    #[arg(long, alias = "grpcport", env = "KMSCRYPT_LISTEN", default_value = "0.0.0.0:50051")]
    listen: String,

    /// Requests served at once; further requests wait.
    #[arg(long, env = "KMSCRYPT_MAX_CONCURRENT_REQUESTS", default_value_t = 10)]
    max_concurrent_requests: usize,

    #[command(flatten)]
    provider: ProviderArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let provider = cli
        .provider
        .build()
        .context("error initializing kms client")?;

    let addr = listen_addr(&cli.listen);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to listen on {addr}"))?;

    let app = http::router(http::AppState::new(provider, cli.max_concurrent_requests));
    log::info!("starting key provider server at {addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    log::info!("server stopped");
    Ok(())
}

fn listen_addr(listen: &str) -> String {
    if listen.starts_with(':') {
        format!("0.0.0.0{listen}")
    } else {
        listen.to_owned()
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    log::info!("shutdown signal received");
}
