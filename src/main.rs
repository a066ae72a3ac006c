use clap::Parser;
use dotenv::dotenv;
use tracing::{error, info};
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use warden_server::server::config::ServerConfig;
use warden_server::server::core_services::AppServices;
use warden_server::version::VERSION;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<String>,
}

fn init_logging(log_dir: &str) {
    // Log to a file: JSON format, daily rotation
    let file_appender = rolling::daily(log_dir, "warden.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    // Log to stdout: human-readable format
    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    // Default to `info,sea_orm=warn` if RUST_LOG is not set.
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sea_orm=warn,sqlx::query=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if std::env::args().any(|arg| arg == "--version") {
        println!("Warden version: {VERSION}");
        return Ok(());
    }

    let args = Args::parse();
    dotenv().ok();

    let config = match ServerConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load server configuration: {e}");
            return Err(e.into());
        }
    };

    init_logging(&config.log_dir);
    info!("starting warden, version: {}", VERSION);

    let services = match AppServices::initialize(&config).await {
        Ok(services) => services,
        Err(e) => {
            error!(error = %e, "failed to initialize core services");
            return Err(e.into());
        }
    };

    let sweep_handle = services.spawn_sweep(&config);

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, stopping sweep");
    sweep_handle.abort();

    Ok(())
}
