use anyhow::{Context, Result};
use common::{CameraFeed, VisionStreamError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// 远端摄像头
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteCamera {
    pub feed: CameraFeed,
    pub port: u16,
}

impl RemoteCamera {
    pub fn for_feed(feed: CameraFeed) -> Self {
        Self {
            feed,
            port: feed.default_port(),
        }
    }
}

/// 存活探测策略
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbePolicy {
    /// 进入 Failed 之前的最大尝试次数
    pub max_attempts: u32,
    pub interval_ms: u64,
    pub timeout_ms: u64,
}

impl Default for ProbePolicy {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            interval_ms: 1000,
            timeout_ms: 2000,
        }
    }
}

impl ProbePolicy {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// 客户端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// 摄像头服务器地址
    pub host: String,
    pub cameras: Vec<RemoteCamera>,
    pub probe: ProbePolicy,
    pub connect_timeout_ms: u64,
    /// 流读取空闲超时
    pub stream_timeout_ms: u64,
    pub backoff_ms: u64,
    /// Failed 状态下自动重新探测的延迟，None 或 0 表示不自动重启
    pub failed_restart_ms: Option<u64>,
    /// 解析缓冲区上限
    pub max_buffer_bytes: usize,
    /// FPS 统计窗口大小（帧数）
    pub fps_window: usize,
    /// 超过该时间无新帧则 FPS 归零
    pub fps_stale_ms: u64,
    /// 每个摄像头帧广播通道容量
    pub frame_channel_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "192.168.50.1".to_string(),
            cameras: CameraFeed::ALL.iter().map(|f| RemoteCamera::for_feed(*f)).collect(),
            probe: ProbePolicy::default(),
            connect_timeout_ms: 5000,
            stream_timeout_ms: 10_000,
            backoff_ms: 2000,
            failed_restart_ms: Some(5000),
            max_buffer_bytes: 8 * 1024 * 1024,
            fps_window: 30,
            fps_stale_ms: 3000,
            frame_channel_capacity: 4,
        }
    }
}

impl ClientConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {:?}", path))?;
                toml::from_str(&content).context("Failed to parse client config")?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> common::Result<()> {
        if self.host.trim().is_empty() {
            return Err(VisionStreamError::ConfigError(
                "Host cannot be empty".to_string(),
            ));
        }

        if self.cameras.is_empty() {
            return Err(VisionStreamError::ConfigError(
                "At least one camera must be configured".to_string(),
            ));
        }

        let mut feeds = HashSet::new();
        for camera in &self.cameras {
            if camera.port == 0 {
                return Err(VisionStreamError::ConfigError(format!(
                    "Camera {} port must be greater than 0",
                    camera.feed
                )));
            }
            if !feeds.insert(camera.feed) {
                return Err(VisionStreamError::ConfigError(format!(
                    "Camera {} configured twice",
                    camera.feed
                )));
            }
        }

        if self.probe.max_attempts == 0 {
            return Err(VisionStreamError::ConfigError(
                "Probe attempts must be greater than 0".to_string(),
            ));
        }

        if self.max_buffer_bytes < 1024 {
            return Err(VisionStreamError::ConfigError(
                "Parser buffer limit must be at least 1 KiB".to_string(),
            ));
        }

        if self.fps_window < 2 {
            return Err(VisionStreamError::ConfigError(
                "FPS window must hold at least 2 samples".to_string(),
            ));
        }

        if self.frame_channel_capacity == 0 {
            return Err(VisionStreamError::ConfigError(
                "Frame channel capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn camera(&self, feed: CameraFeed) -> Option<&RemoteCamera> {
        self.cameras.iter().find(|c| c.feed == feed)
    }

    /// 某个摄像头的基础 URL
    pub fn base_url(&self, feed: CameraFeed) -> Option<String> {
        self.camera(feed)
            .map(|c| format!("http://{}:{}", self.host, c.port))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn stream_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_timeout_ms)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn failed_restart(&self) -> Option<Duration> {
        self.failed_restart_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub fn fps_stale(&self) -> Duration {
        Duration::from_millis(self.fps_stale_ms)
    }
}
