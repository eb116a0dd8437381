use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info, Level};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::MakeWriterExt;

use mailstash::api;
use mailstash::config::Config;
use mailstash::AppState;

fn setup_logging(log_dir: &Path) -> tracing_appender::non_blocking::WorkerGuard {
    let _ = fs::create_dir_all(log_dir);

    // Daily-rotating file appender, teeing to stdout
    let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, "mailstash.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_writer(non_blocking.and(std::io::stdout))
        .with_ansi(false)
        .with_target(true)
        .init();

    info!("Logging initialized. Log directory: {:?}", log_dir);

    guard
}

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.json"));

    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load {:?}: {}", config_path, e);
            std::process::exit(1);
        }
    };

    let _guard = setup_logging(&config.data_dir.join("logs"));

    info!(
        "starting mailstash (data dir {:?}, auth {})",
        config.data_dir,
        if config.auth_enabled() { "enabled" } else { "disabled" }
    );

    let addr: IpAddr = match config.host.parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("invalid listen host {:?}: {}", config.host, e);
            std::process::exit(1);
        }
    };
    let port = config.port;

    let state = match AppState::new(config) {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!("failed to open data directory: {}", e);
            std::process::exit(1);
        }
    };

    info!("listening on {}:{}", addr, port);
    warp::serve(api::routes(state)).run((addr, port)).await;
}
