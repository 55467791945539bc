//! fnproxy - signing edge proxy for AWS Lambda Function URLs

use clap::Parser;
use fnproxy::{create_router, AppState, ProxyConfig};
use std::net::SocketAddr;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "fnproxy")]
#[command(about = "Signs and forwards requests to an AWS Lambda Function URL", long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "8787", env = "FNPROXY_PORT")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0", env = "FNPROXY_HOST")]
    host: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "FNPROXY_LOG_LEVEL")]
    log_level: String,

    #[command(flatten)]
    proxy: ProxyConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("fnproxy={},tower_http=debug", args.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting fnproxy...");
    for name in args.proxy.missing() {
        warn!("{name} is not set, GET / will fail until it is provided");
    }
    match args.proxy.resolve() {
        Ok(target) => info!(
            "  Upstream: {} (service: {}, region: {})",
            target.url, target.scope.service, target.scope.region
        ),
        Err(err) if args.proxy.missing().is_empty() => warn!("  Upstream: {err}"),
        Err(_) => {}
    }

    let app = create_router(AppState::new(args.proxy));

    // Start server
    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
