// 传输层：存活探测、帧流连接、统计查询

use async_trait::async_trait;
use bytes::Bytes;
use common::{CameraFeed, HealthResponse, StatsResponse, HEALTH_PATH, STATS_PATH, STREAM_PATH};
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::pin::Pin;
use thiserror::Error;
use tracing::debug;

use crate::config::ClientConfig;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Camera {0} is not configured")]
    UnknownCamera(CameraFeed),

    #[error("Request timed out")]
    Timeout,

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Unexpected HTTP status {0}")]
    Status(u16),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("HTTP error: {0}")]
    Http(reqwest::Error),

    #[error("Stream closed")]
    Closed,
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else if let Some(status) = e.status() {
            TransportError::Status(status.as_u16())
        } else {
            TransportError::Http(e)
        }
    }
}

/// 原始字节流
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// 摄像头传输接口
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// 存活检查
    async fn probe(&self, feed: CameraFeed) -> Result<HealthResponse, TransportError>;

    /// 打开帧流
    async fn open_stream(&self, feed: CameraFeed) -> Result<ByteStream, TransportError>;

    /// 查询远端统计
    async fn fetch_stats(&self, feed: CameraFeed) -> Result<StatsResponse, TransportError>;
}

/// 基于 HTTP 的传输实现
pub struct HttpTransport {
    base_urls: HashMap<CameraFeed, String>,
    /// 短超时，用于 /health 和 /stats
    control: reqwest::Client,
    /// 仅限制连接超时，读取超时由上层控制
    streaming: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self, TransportError> {
        let base_urls = config
            .cameras
            .iter()
            .filter_map(|c| config.base_url(c.feed).map(|url| (c.feed, url)))
            .collect();

        let control = reqwest::Client::builder()
            .timeout(config.probe.timeout())
            .connect_timeout(config.probe.timeout())
            .build()?;

        let streaming = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()?;

        Ok(Self {
            base_urls,
            control,
            streaming,
        })
    }

    fn url(&self, feed: CameraFeed, path: &str) -> Result<String, TransportError> {
        self.base_urls
            .get(&feed)
            .map(|base| format!("{}{}", base, path))
            .ok_or(TransportError::UnknownCamera(feed))
    }
}

#[async_trait]
impl StreamTransport for HttpTransport {
    async fn probe(&self, feed: CameraFeed) -> Result<HealthResponse, TransportError> {
        let url = self.url(feed, HEALTH_PATH)?;
        let response = self.control.get(&url).send().await?.error_for_status()?;
        let health: HealthResponse = response.json().await?;

        if !health.is_ok() {
            return Err(TransportError::Protocol(format!(
                "health status is {:?}",
                health.status
            )));
        }
        if health.camera != feed {
            return Err(TransportError::Protocol(format!(
                "expected camera {}, server reports {}",
                feed, health.camera
            )));
        }

        Ok(health)
    }

    async fn open_stream(&self, feed: CameraFeed) -> Result<ByteStream, TransportError> {
        let url = self.url(feed, STREAM_PATH)?;
        debug!("Opening stream {}", url);

        let response = self.streaming.get(&url).send().await?.error_for_status()?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if !content_type.starts_with("multipart/x-mixed-replace") {
            return Err(TransportError::Protocol(format!(
                "unexpected content type {:?}",
                content_type
            )));
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(TransportError::from))
            .boxed())
    }

    async fn fetch_stats(&self, feed: CameraFeed) -> Result<StatsResponse, TransportError> {
        let url = self.url(feed, STATS_PATH)?;
        let response = self.control.get(&url).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }
}
