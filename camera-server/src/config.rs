use anyhow::{Context, Result};
use common::{CameraFeed, VisionStreamError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// 采集源类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureSource {
    /// 通过 libcamera-vid 子进程采集
    Libcamera,
    /// 合成测试图案
    Synthetic,
}

/// 单个摄像头的配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    pub feed: CameraFeed,
    /// 0 表示由系统分配端口
    pub port: u16,
    pub device_index: u32,
}

impl CameraConfig {
    pub fn for_feed(feed: CameraFeed) -> Self {
        Self {
            feed,
            port: feed.default_port(),
            device_index: feed.default_device_index(),
        }
    }
}

/// 摄像头服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_host: String,
    pub width: u32,
    pub height: u32,
    /// 标称帧率
    pub target_fps: u32,
    /// 帧率下限
    pub min_fps: u32,
    pub jpeg_quality: u8,
    /// 降级模式下占位帧的发布帧率
    pub placeholder_fps: u32,
    pub capture_retry_delay_ms: u64,
    /// 单次采集+编码的最长耗时，超时视为设备卡死
    pub capture_timeout_ms: u64,
    /// 连续多少个周期低于标称间隔后提升帧率
    pub recovery_cycles: u32,
    /// 连续失败多少次后放弃设备进入降级模式
    pub max_consecutive_failures: u32,
    pub device_reopen_interval_ms: u64,
    pub source: CaptureSource,
    pub libcamera_command: String,
    pub cameras: Vec<CameraConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            width: 1920,
            height: 1080,
            target_fps: 10,
            min_fps: 5,
            jpeg_quality: 80,
            placeholder_fps: 1,
            capture_retry_delay_ms: 100,
            capture_timeout_ms: 2000,
            recovery_cycles: 20,
            max_consecutive_failures: 50,
            device_reopen_interval_ms: 5000,
            source: CaptureSource::Libcamera,
            libcamera_command: "libcamera-vid".to_string(),
            cameras: CameraFeed::ALL.iter().map(|f| CameraConfig::for_feed(*f)).collect(),
        }
    }
}

impl ServerConfig {
    /// 加载配置：有文件时从 TOML 读取，否则使用默认值
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {:?}", path))?;
                Self::from_toml(&content)?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse server config")?;
        Ok(config)
    }

    pub fn validate(&self) -> common::Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(VisionStreamError::ConfigError(
                "Resolution must be greater than 0".to_string(),
            ));
        }

        if self.min_fps == 0 {
            return Err(VisionStreamError::ConfigError(
                "Minimum fps must be greater than 0".to_string(),
            ));
        }

        if self.target_fps < self.min_fps {
            return Err(VisionStreamError::ConfigError(format!(
                "Target fps {} is below minimum fps {}",
                self.target_fps, self.min_fps
            )));
        }

        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err(VisionStreamError::ConfigError(
                "JPEG quality must be within 1..=100".to_string(),
            ));
        }

        if self.placeholder_fps == 0 {
            return Err(VisionStreamError::ConfigError(
                "Placeholder fps must be greater than 0".to_string(),
            ));
        }

        if self.capture_timeout_ms == 0 {
            return Err(VisionStreamError::ConfigError(
                "Capture timeout must be greater than 0".to_string(),
            ));
        }

        if self.cameras.is_empty() {
            return Err(VisionStreamError::ConfigError(
                "At least one camera must be configured".to_string(),
            ));
        }

        let mut feeds = HashSet::new();
        let mut ports = HashSet::new();
        for camera in &self.cameras {
            if !feeds.insert(camera.feed) {
                return Err(VisionStreamError::ConfigError(format!(
                    "Camera {} configured twice",
                    camera.feed
                )));
            }
            if camera.port != 0 && !ports.insert(camera.port) {
                return Err(VisionStreamError::ConfigError(format!(
                    "Port {} shared by more than one camera",
                    camera.port
                )));
            }
        }

        Ok(())
    }

    pub fn camera(&self, feed: CameraFeed) -> Option<&CameraConfig> {
        self.cameras.iter().find(|c| c.feed == feed)
    }

    pub fn capture_retry_delay(&self) -> Duration {
        Duration::from_millis(self.capture_retry_delay_ms)
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }

    pub fn device_reopen_interval(&self) -> Duration {
        Duration::from_millis(self.device_reopen_interval_ms)
    }

    pub fn placeholder_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.placeholder_fps as f64)
    }
}
