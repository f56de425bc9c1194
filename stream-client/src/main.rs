use anyhow::Result;
use clap::{Arg, Command};
use std::path::PathBuf;
use std::time::Duration;
use stream_client::{ClientConfig, StreamManager};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志 - 使用环境变量 RUST_LOG 控制级别
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let matches = Command::new("stream-client")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Receives MJPEG streams from the camera server")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("host")
                .long("host")
                .value_name("HOST")
                .help("Camera server address"),
        )
        .arg(
            Arg::new("interval")
                .long("interval")
                .value_name("SECONDS")
                .default_value("1")
                .value_parser(clap::value_parser!(u64))
                .help("Status report interval"),
        )
        .get_matches();

    info!("🎥 Stream client starting...");

    let config_path = matches.get_one::<String>("config").map(PathBuf::from);
    let mut config = ClientConfig::load(config_path.as_deref())?;
    if let Some(host) = matches.get_one::<String>("host") {
        config.host = host.clone();
    }
    config.validate()?;
    let report_every = Duration::from_secs(
        matches.get_one::<u64>("interval").copied().unwrap_or(1).max(1),
    );

    info!("✓ Configuration loaded");
    for camera in &config.cameras {
        info!("  {} -> {}:{}", camera.feed, config.host, camera.port);
    }

    let manager = StreamManager::http(&config)?;
    manager.connect_all().await;

    info!("   Press Ctrl+C to stop");

    let mut report = tokio::time::interval(report_every);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = report.tick() => {
                let line = manager
                    .statuses()
                    .iter()
                    .map(|s| format!("{}={} {:.1}fps", s.feed, s.state, s.fps))
                    .collect::<Vec<_>>()
                    .join("  ");
                info!("📷 {}", line);
            }
        }
    }

    info!("Shutting down...");
    manager.disconnect_all().await;

    Ok(())
}
