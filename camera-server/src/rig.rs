// 摄像头组
//
// 持有所有摄像头的流水线（FrameSlot + 采集任务 + HTTP 发布端），
// 负责按摄像头启停以及控制命令分发。

use anyhow::{Context, Result};
use common::{CameraFeed, CameraRunState, ControlCommand, ControlResponse, VisionStreamError};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::capture::worker::WorkerSettings;
use crate::capture::{CaptureEncodeWorker, DeviceFactory, WorkerHandle};
use crate::config::{CameraConfig, ServerConfig};
use crate::publisher::{create_router, PublisherState};
use crate::slot::{FrameSlot, FrameSlotWriter};
use crate::stats::CameraStats;

const SERVER_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// 运行中的 HTTP 发布端
struct PublisherHandle {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl PublisherHandle {
    async fn stop(self, feed: CameraFeed) {
        self.shutdown.cancel();
        let mut task = self.task;
        match tokio::time::timeout(SERVER_STOP_TIMEOUT, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Publisher task for {} failed: {}", feed, e),
            Err(_) => {
                warn!("Publisher for {} did not stop in time, aborting", feed);
                task.abort();
            }
        }
    }
}

/// 单个摄像头的流水线
pub struct CameraPipeline {
    camera: CameraConfig,
    slot: FrameSlot,
    /// 停止状态下保存写入端
    writer: Option<FrameSlotWriter>,
    worker: Option<WorkerHandle>,
    publisher: Option<PublisherHandle>,
    stats: Arc<CameraStats>,
    addr: Option<SocketAddr>,
}

impl CameraPipeline {
    fn new(camera: CameraConfig, target_fps: u32) -> Self {
        let (writer, slot) = FrameSlot::new();
        Self {
            camera,
            slot,
            writer: Some(writer),
            worker: None,
            publisher: None,
            stats: CameraStats::new(target_fps),
            addr: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    pub fn stats(&self) -> &Arc<CameraStats> {
        &self.stats
    }

    pub fn slot(&self) -> &FrameSlot {
        &self.slot
    }
}

/// 摄像头组
pub struct CameraRig {
    config: ServerConfig,
    factory: Arc<dyn DeviceFactory>,
    pipelines: BTreeMap<CameraFeed, CameraPipeline>,
}

impl CameraRig {
    /// 为每个配置的摄像头绑定端口并启动采集
    pub async fn start(config: ServerConfig, factory: Arc<dyn DeviceFactory>) -> Result<Self> {
        config.validate()?;

        let pipelines = config
            .cameras
            .iter()
            .map(|camera| {
                (
                    camera.feed,
                    CameraPipeline::new(camera.clone(), config.target_fps),
                )
            })
            .collect();

        let mut rig = Self {
            config,
            factory,
            pipelines,
        };

        let feeds: Vec<CameraFeed> = rig.pipelines.keys().copied().collect();
        for feed in feeds {
            if let Err(e) = rig.start_camera(feed).await {
                rig.shutdown().await;
                return Err(e);
            }
        }

        info!("✅ Camera rig ready with {} camera(s)", rig.pipelines.len());
        Ok(rig)
    }

    pub fn feeds(&self) -> Vec<CameraFeed> {
        self.pipelines.keys().copied().collect()
    }

    pub fn pipeline(&self, feed: CameraFeed) -> Option<&CameraPipeline> {
        self.pipelines.get(&feed)
    }

    /// 摄像头实际监听的地址
    pub fn local_addr(&self, feed: CameraFeed) -> Option<SocketAddr> {
        self.pipelines.get(&feed).and_then(|p| p.addr)
    }

    pub fn status(&self) -> Vec<(CameraFeed, CameraRunState)> {
        self.pipelines
            .iter()
            .map(|(feed, p)| (*feed, p.stats.run_state()))
            .collect()
    }

    /// 启动单个摄像头（已运行时不做任何事）
    pub async fn start_camera(&mut self, feed: CameraFeed) -> Result<()> {
        let bind_host = self.config.bind_host.clone();
        let settings = WorkerSettings::from_config(&self.config);
        let factory = self.factory.clone();

        let pipeline = self
            .pipelines
            .get_mut(&feed)
            .ok_or_else(|| VisionStreamError::UnknownCamera(feed.to_string()))?;

        if pipeline.is_running() {
            return Ok(());
        }

        // 重启时复用第一次绑定到的端口
        let port = pipeline
            .addr
            .map(|a| a.port())
            .unwrap_or(pipeline.camera.port);
        let listener = TcpListener::bind((bind_host.as_str(), port))
            .await
            .with_context(|| format!("Failed to bind {}:{} for camera {}", bind_host, port, feed))?;
        let addr = listener.local_addr()?;

        let writer = match pipeline.writer.take() {
            Some(writer) => writer,
            None => {
                let (writer, slot) = FrameSlot::new();
                pipeline.slot = slot;
                writer
            }
        };

        let shutdown = CancellationToken::new();
        let router = create_router(PublisherState {
            feed,
            slot: pipeline.slot.clone(),
            stats: pipeline.stats.clone(),
            shutdown: shutdown.clone(),
        });

        let signal = shutdown.clone();
        let task = tokio::spawn(async move {
            let server = axum::serve(listener, router)
                .with_graceful_shutdown(async move { signal.cancelled().await });
            if let Err(e) = server.await {
                error!("Publisher for {} stopped with error: {}", feed, e);
            }
        });

        let worker = CaptureEncodeWorker::new(
            pipeline.camera.clone(),
            settings,
            factory,
            writer,
            pipeline.stats.clone(),
        )
        .spawn();

        pipeline.addr = Some(addr);
        pipeline.publisher = Some(PublisherHandle { shutdown, task });
        pipeline.worker = Some(worker);

        info!("🚀 Camera {} streaming on http://{}/stream", feed, addr);
        Ok(())
    }

    /// 停止单个摄像头：采集任务和发布端一起停止
    pub async fn stop_camera(&mut self, feed: CameraFeed) -> Result<()> {
        let pipeline = self
            .pipelines
            .get_mut(&feed)
            .ok_or_else(|| VisionStreamError::UnknownCamera(feed.to_string()))?;

        if let Some(publisher) = pipeline.publisher.take() {
            publisher.stop(feed).await;
        }

        if let Some(worker) = pipeline.worker.take() {
            pipeline.writer = worker.stop().await;
        }

        info!("Camera {} stopped", feed);
        Ok(())
    }

    /// 执行控制命令
    pub async fn dispatch(&mut self, command: ControlCommand) -> ControlResponse {
        info!("Control command: {}", command);

        let result = match command {
            ControlCommand::CameraStart(target) => {
                let mut outcome = Ok(());
                for feed in self.targets(target) {
                    outcome = outcome.and(self.start_camera(feed).await);
                }
                outcome.map(|_| ControlResponse::Started)
            }
            ControlCommand::CameraStop(target) => {
                let mut outcome = Ok(());
                for feed in self.targets(target) {
                    outcome = outcome.and(self.stop_camera(feed).await);
                }
                outcome.map(|_| ControlResponse::Stopped)
            }
            ControlCommand::Status => Ok(ControlResponse::Status(self.status())),
        };

        result.unwrap_or_else(|e| {
            warn!("Control command {} failed: {:#}", command, e);
            ControlResponse::Error(format!("{:#}", e))
        })
    }

    /// 解析并执行一行文本命令
    pub async fn handle_line(&mut self, line: &str) -> ControlResponse {
        match line.parse::<ControlCommand>() {
            Ok(command) => self.dispatch(command).await,
            Err(e) => ControlResponse::Error(e.to_string()),
        }
    }

    /// 停止全部摄像头
    pub async fn shutdown(&mut self) {
        let feeds: Vec<CameraFeed> = self.pipelines.keys().copied().collect();
        for feed in feeds {
            if let Err(e) = self.stop_camera(feed).await {
                error!("Failed to stop camera {}: {}", feed, e);
            }
        }
        info!("Camera rig shut down");
    }

    fn targets(&self, target: Option<CameraFeed>) -> Vec<CameraFeed> {
        match target {
            Some(feed) => vec![feed],
            None => self.feeds(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureDevice, CaptureError, SyntheticDevice};

    struct SyntheticFactory;

    impl DeviceFactory for SyntheticFactory {
        fn open(&self, camera: &CameraConfig) -> Result<Box<dyn CaptureDevice>, CaptureError> {
            Ok(Box::new(SyntheticDevice::new(camera.device_index, 32, 24)))
        }
    }

    fn config() -> ServerConfig {
        let mut config = ServerConfig::default();
        config.bind_host = "127.0.0.1".to_string();
        config.width = 32;
        config.height = 24;
        for camera in &mut config.cameras {
            camera.port = 0;
        }
        config
    }

    async fn wait_for_frames(rig: &CameraRig, feed: CameraFeed) {
        let slot = rig.pipeline(feed).unwrap().slot().clone();
        tokio::time::timeout(Duration::from_secs(2), slot.wait_newer(0))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_rig_starts_all_cameras_on_distinct_ports() {
        let mut rig = CameraRig::start(config(), Arc::new(SyntheticFactory))
            .await
            .unwrap();

        let mut ports: Vec<u16> = rig
            .feeds()
            .iter()
            .map(|f| rig.local_addr(*f).unwrap().port())
            .collect();
        ports.sort_unstable();
        ports.dedup();
        assert_eq!(ports.len(), 3);

        for feed in CameraFeed::ALL {
            wait_for_frames(&rig, feed).await;
        }
        assert!(rig
            .status()
            .iter()
            .all(|(_, state)| *state == CameraRunState::Running));

        rig.shutdown().await;
    }

    #[tokio::test]
    async fn test_dispatch_stop_and_start_single_camera() {
        let mut rig = CameraRig::start(config(), Arc::new(SyntheticFactory))
            .await
            .unwrap();
        let port = rig.local_addr(CameraFeed::Left).unwrap().port();

        let response = rig.handle_line("CAMERA_STOP:left").await;
        assert_eq!(response, ControlResponse::Stopped);
        assert_eq!(
            rig.handle_line("status").await.to_string(),
            "STATUS:left=stopped,right=running,eye=running"
        );

        let response = rig.dispatch(ControlCommand::CameraStart(Some(CameraFeed::Left))).await;
        assert_eq!(response, ControlResponse::Started);
        assert_eq!(rig.local_addr(CameraFeed::Left).unwrap().port(), port);

        let before = rig.pipeline(CameraFeed::Left).unwrap().slot().sequence();
        let slot = rig.pipeline(CameraFeed::Left).unwrap().slot().clone();
        tokio::time::timeout(Duration::from_secs(2), slot.wait_newer(before))
            .await
            .unwrap();

        rig.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_command_yields_error() {
        let mut rig = CameraRig::start(config(), Arc::new(SyntheticFactory))
            .await
            .unwrap();

        let response = rig.handle_line("WIFI_START").await;
        assert!(response.to_string().starts_with("ERROR:"));

        rig.shutdown().await;
    }

    #[tokio::test]
    async fn test_unconfigured_camera_is_rejected() {
        let mut config = config();
        config.cameras.retain(|c| c.feed != CameraFeed::Eye);
        let mut rig = CameraRig::start(config, Arc::new(SyntheticFactory))
            .await
            .unwrap();

        let response = rig.handle_line("CAMERA_START:eye").await;
        assert!(matches!(response, ControlResponse::Error(_)));

        rig.shutdown().await;
    }
}
