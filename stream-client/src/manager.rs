// 多路流管理
//
// 为每个配置的摄像头维护一个连接监管任务，对外提供帧订阅、状态和帧率查询。

use common::{CameraFeed, EncodedFrame, StatsResponse, VisionStreamError};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::state::{StateChange, StreamConnectionState};
use crate::supervisor::{ConnectionSupervisor, SupervisorHandle, SupervisorOutputs, SupervisorSettings};
use crate::transport::{HttpTransport, StreamTransport, TransportError};

/// 单个摄像头的状态快照
#[derive(Debug, Clone, Serialize)]
pub struct FeedStatus {
    pub feed: CameraFeed,
    pub state: String,
    pub fps: f64,
    pub dropped_frames: u64,
}

/// 多路流管理器
pub struct StreamManager {
    transport: Arc<dyn StreamTransport>,
    settings: SupervisorSettings,
    /// 创建后不再变化，重连时沿用
    outputs: BTreeMap<CameraFeed, SupervisorOutputs>,
    supervisors: DashMap<CameraFeed, SupervisorHandle>,
}

impl StreamManager {
    pub fn new(config: &ClientConfig, transport: Arc<dyn StreamTransport>) -> Self {
        let outputs = config
            .cameras
            .iter()
            .map(|camera| {
                (
                    camera.feed,
                    SupervisorOutputs::new(camera.feed, config.frame_channel_capacity),
                )
            })
            .collect();

        Self {
            transport,
            settings: SupervisorSettings::from_config(config),
            outputs,
            supervisors: DashMap::new(),
        }
    }

    /// 使用 HTTP 传输
    pub fn http(config: &ClientConfig) -> Result<Self, TransportError> {
        let transport = HttpTransport::new(config)?;
        Ok(Self::new(config, Arc::new(transport)))
    }

    pub fn feeds(&self) -> Vec<CameraFeed> {
        self.outputs.keys().copied().collect()
    }

    fn outputs(&self, feed: CameraFeed) -> Result<&SupervisorOutputs, VisionStreamError> {
        self.outputs
            .get(&feed)
            .ok_or_else(|| VisionStreamError::UnknownCamera(feed.to_string()))
    }

    /// 连接所有配置的摄像头
    pub async fn connect_all(&self) {
        for feed in self.feeds() {
            // 已配置的摄像头不会失败
            let _ = self.connect(feed).await;
        }
    }

    /// 启动指定摄像头的监管任务；已在运行时不做任何事
    pub async fn connect(&self, feed: CameraFeed) -> Result<(), VisionStreamError> {
        let outputs = self.outputs(feed)?.clone();

        let finished = match self.supervisors.entry(feed) {
            Entry::Occupied(entry) if !entry.get().is_finished() => {
                debug!("[{}] Already connected", feed);
                return Ok(());
            }
            Entry::Occupied(entry) => Some(entry.remove()),
            Entry::Vacant(_) => None,
        };
        if let Some(handle) = finished {
            handle.stop().await;
        }

        info!("🚀 [{}] Connecting", feed);
        let handle =
            ConnectionSupervisor::new(self.transport.clone(), self.settings.clone(), outputs).spawn();
        if let Some(displaced) = self.supervisors.insert(feed, handle) {
            displaced.stop().await;
        }
        Ok(())
    }

    /// 停止指定摄像头的监管任务
    pub async fn disconnect(&self, feed: CameraFeed) -> Result<(), VisionStreamError> {
        self.outputs(feed)?;
        if let Some((_, handle)) = self.supervisors.remove(&feed) {
            handle.stop().await;
            info!("[{}] Disconnected", feed);
        }
        Ok(())
    }

    pub async fn disconnect_all(&self) {
        for feed in self.feeds() {
            let _ = self.disconnect(feed).await;
        }
    }

    /// 订阅帧；慢订阅者会丢失最旧的帧
    pub fn subscribe(
        &self,
        feed: CameraFeed,
    ) -> Result<broadcast::Receiver<EncodedFrame>, VisionStreamError> {
        Ok(self.outputs(feed)?.subscribe_frames())
    }

    /// 帧流形式的订阅，跳过因滞后丢失的帧
    pub fn frames(
        &self,
        feed: CameraFeed,
    ) -> Result<impl Stream<Item = EncodedFrame> + Send + 'static, VisionStreamError> {
        let rx = self.subscribe(feed)?;
        Ok(BroadcastStream::new(rx).filter_map(move |item| async move {
            match item {
                Ok(frame) => Some(frame),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    debug!("[{}] Subscriber lagged, skipped {} frames", feed, skipped);
                    None
                }
            }
        }))
    }

    pub fn fps(&self, feed: CameraFeed) -> Result<f64, VisionStreamError> {
        Ok(self.outputs(feed)?.fps())
    }

    pub fn state(&self, feed: CameraFeed) -> Result<StreamConnectionState, VisionStreamError> {
        Ok(self.outputs(feed)?.state())
    }

    pub fn watch_state(
        &self,
        feed: CameraFeed,
    ) -> Result<watch::Receiver<StreamConnectionState>, VisionStreamError> {
        Ok(self.outputs(feed)?.watch_state())
    }

    pub fn state_changes(
        &self,
        feed: CameraFeed,
    ) -> Result<broadcast::Receiver<StateChange>, VisionStreamError> {
        Ok(self.outputs(feed)?.subscribe_events())
    }

    pub fn dropped_frames(&self, feed: CameraFeed) -> Result<u64, VisionStreamError> {
        Ok(self.outputs(feed)?.dropped_frames())
    }

    pub fn statuses(&self) -> Vec<FeedStatus> {
        self.outputs
            .values()
            .map(|outputs| FeedStatus {
                feed: outputs.feed(),
                state: outputs.state().to_string(),
                fps: outputs.fps(),
                dropped_frames: outputs.dropped_frames(),
            })
            .collect()
    }

    /// 查询服务端统计
    pub async fn remote_stats(&self, feed: CameraFeed) -> Result<StatsResponse, TransportError> {
        if !self.outputs.contains_key(&feed) {
            return Err(TransportError::UnknownCamera(feed));
        }
        self.transport.fetch_stats(feed).await
    }
}
