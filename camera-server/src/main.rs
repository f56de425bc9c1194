use anyhow::Result;
use camera_server::capture::DefaultDeviceFactory;
use camera_server::{CameraRig, CaptureSource, ServerConfig};
use clap::{Arg, ArgAction, Command};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

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

    let matches = Command::new("camera-server")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Multi-camera MJPEG streaming server")
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
                .help("Address to bind the camera ports on"),
        )
        .arg(
            Arg::new("synthetic")
                .long("synthetic")
                .action(ArgAction::SetTrue)
                .help("Use synthetic test patterns instead of libcamera"),
        )
        .arg(
            Arg::new("console")
                .long("console")
                .action(ArgAction::SetTrue)
                .help("Read control commands (CAMERA_START, CAMERA_STOP, STATUS) from stdin"),
        )
        .get_matches();

    info!("📷 Camera server starting...");

    // 加载配置
    let config_path = matches.get_one::<String>("config").map(PathBuf::from);
    let mut config = ServerConfig::load(config_path.as_deref())?;
    if let Some(host) = matches.get_one::<String>("host") {
        config.bind_host = host.clone();
    }
    if matches.get_flag("synthetic") {
        config.source = CaptureSource::Synthetic;
    }
    config.validate()?;

    info!("✓ Configuration loaded");
    info!("  Resolution: {}x{}", config.width, config.height);
    info!(
        "  Target FPS: {} (floor {}), JPEG quality {}",
        config.target_fps, config.min_fps, config.jpeg_quality
    );
    info!("  Source: {:?}", config.source);

    let factory = Arc::new(DefaultDeviceFactory::from_config(&config));
    let mut rig = CameraRig::start(config, factory).await?;

    info!("   Press Ctrl+C to stop");

    if matches.get_flag("console") {
        info!("   Console enabled, type STATUS / CAMERA_START[:cam] / CAMERA_STOP[:cam]");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                line = lines.next_line() => match line {
                    Ok(Some(line)) if line.trim().is_empty() => {}
                    Ok(Some(line)) => println!("{}", rig.handle_line(&line).await),
                    Ok(None) => {
                        // stdin 关闭后继续运行直到 Ctrl+C
                        tokio::signal::ctrl_c().await?;
                        break;
                    }
                    Err(e) => {
                        warn!("Failed to read console input: {}", e);
                        tokio::signal::ctrl_c().await?;
                        break;
                    }
                },
            }
        }
    } else {
        tokio::signal::ctrl_c().await?;
    }

    info!("Shutting down...");
    rig.shutdown().await;

    Ok(())
}
