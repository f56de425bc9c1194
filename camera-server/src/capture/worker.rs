// 采集编码任务
//
// 每个摄像头一个 tokio 任务；阻塞的采集+编码放在阻塞线程池执行，
// 摄像头之间互不影响。设备不可用时进入降级模式，以低帧率发布占位帧。

use common::{CameraFeed, EncodedFrame};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::encoder::placeholder_frame;
use super::rate::RateAdjustment;
use super::{AdaptiveRateController, CaptureDevice, CaptureError, DeviceFactory, JpegFrameEncoder};
use crate::config::{CameraConfig, ServerConfig};
use crate::slot::FrameSlotWriter;
use crate::stats::CameraStats;

/// 采集任务参数
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub width: u32,
    pub height: u32,
    pub jpeg_quality: u8,
    pub target_fps: u32,
    pub min_fps: u32,
    pub recovery_cycles: u32,
    pub capture_retry_delay: Duration,
    pub capture_timeout: Duration,
    pub max_consecutive_failures: u32,
    pub device_reopen_interval: Duration,
    pub placeholder_interval: Duration,
}

impl WorkerSettings {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            jpeg_quality: config.jpeg_quality,
            target_fps: config.target_fps,
            min_fps: config.min_fps,
            recovery_cycles: config.recovery_cycles,
            capture_retry_delay: config.capture_retry_delay(),
            capture_timeout: config.capture_timeout(),
            max_consecutive_failures: config.max_consecutive_failures.max(1),
            device_reopen_interval: config.device_reopen_interval(),
            placeholder_interval: config.placeholder_interval(),
        }
    }
}

/// 运行中的采集任务
pub struct WorkerHandle {
    cancel: CancellationToken,
    task: JoinHandle<FrameSlotWriter>,
}

impl WorkerHandle {
    /// 停止任务并取回写入端，以便重新启动
    pub async fn stop(self) -> Option<FrameSlotWriter> {
        self.cancel.cancel();
        match self.task.await {
            Ok(writer) => Some(writer),
            Err(e) => {
                error!("Capture task ended abnormally: {}", e);
                None
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// 单个摄像头的采集编码循环
pub struct CaptureEncodeWorker {
    camera: CameraConfig,
    settings: WorkerSettings,
    factory: Arc<dyn DeviceFactory>,
    writer: FrameSlotWriter,
    stats: Arc<CameraStats>,
    placeholder: Option<EncodedFrame>,
}

/// 一秒窗口内的发布帧率
struct PublishRate {
    window_start: Instant,
    frames: u32,
}

impl PublishRate {
    fn new() -> Self {
        Self {
            window_start: Instant::now(),
            frames: 0,
        }
    }

    fn tick(&mut self, stats: &CameraStats) {
        self.frames += 1;
        let elapsed = self.window_start.elapsed();
        if elapsed >= Duration::from_secs(1) {
            stats.set_actual_fps(self.frames as f64 / elapsed.as_secs_f64());
            self.frames = 0;
            self.window_start = Instant::now();
        }
    }
}

impl CaptureEncodeWorker {
    pub fn new(
        camera: CameraConfig,
        settings: WorkerSettings,
        factory: Arc<dyn DeviceFactory>,
        writer: FrameSlotWriter,
        stats: Arc<CameraStats>,
    ) -> Self {
        Self {
            camera,
            settings,
            factory,
            writer,
            stats,
            placeholder: None,
        }
    }

    pub fn feed(&self) -> CameraFeed {
        self.camera.feed
    }

    pub fn spawn(self) -> WorkerHandle {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(self.run(cancel.clone()));
        WorkerHandle { cancel, task }
    }

    /// 运行直到取消，返回写入端
    pub async fn run(mut self, cancel: CancellationToken) -> FrameSlotWriter {
        let feed = self.camera.feed;
        let encoder = JpegFrameEncoder::new(self.settings.jpeg_quality);
        let mut rate = AdaptiveRateController::new(
            self.settings.target_fps,
            self.settings.min_fps,
            self.settings.recovery_cycles,
        );
        let mut publish_rate = PublishRate::new();
        let mut consecutive_failures = 0u32;
        let mut next_reopen = Instant::now();

        self.stats.set_running(true);
        self.stats.set_target_fps(rate.current_fps());

        info!(
            "🎥 Capture worker for {} starting (JPEG quality {})",
            feed,
            encoder.quality()
        );
        let mut device = self.open_device().await;
        if device.is_none() {
            next_reopen = Instant::now() + self.settings.device_reopen_interval;
        }

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let Some(dev) = device.take() else {
                // 降级模式
                if Instant::now() >= next_reopen {
                    device = self.open_device().await;
                    if device.is_some() {
                        consecutive_failures = 0;
                        info!("✓ Camera {} recovered, leaving degraded mode", feed);
                        continue;
                    }
                    next_reopen = Instant::now() + self.settings.device_reopen_interval;
                }

                if let Some(frame) = self.placeholder().await {
                    self.writer.publish(frame);
                    publish_rate.tick(&self.stats);
                }

                if !pause(&cancel, self.settings.placeholder_interval).await {
                    break;
                }
                continue;
            };

            let started = Instant::now();
            let outcome = tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = capture_and_encode(dev, encoder, self.settings.capture_timeout) => outcome,
            };
            let elapsed = started.elapsed();

            match outcome {
                (Some(dev), Ok(frame)) => {
                    consecutive_failures = 0;
                    let sequence = self.writer.publish(frame);
                    self.stats.record_frame();
                    publish_rate.tick(&self.stats);

                    match rate.record_cycle(elapsed) {
                        RateAdjustment::Unchanged => {}
                        RateAdjustment::Decreased(fps) | RateAdjustment::Increased(fps) => {
                            self.stats.set_target_fps(fps);
                        }
                    }

                    if sequence % 100 == 0 {
                        debug!("Camera {}: {} frames published", feed, sequence);
                    }

                    device = Some(dev);
                    if !pause(&cancel, rate.remaining(elapsed)).await {
                        break;
                    }
                }
                (dev, result) => {
                    consecutive_failures += 1;
                    self.stats.record_error();

                    let stalled = matches!(result, Err(CaptureError::Stalled(_)));
                    if let Err(e) = &result {
                        warn!("Camera {} missed frame: {}", feed, e);
                    }

                    match dev {
                        Some(dev) if consecutive_failures < self.settings.max_consecutive_failures => {
                            device = Some(dev);
                        }
                        Some(dev) => {
                            warn!(
                                "⚠️  Camera {} failed {} consecutive captures, entering degraded mode",
                                feed, consecutive_failures
                            );
                            drop(dev);
                            self.stats.set_has_camera(false);
                            next_reopen = Instant::now() + self.settings.device_reopen_interval;
                        }
                        None if stalled => {
                            warn!(
                                "⚠️  Camera {} stopped responding, entering degraded mode",
                                feed
                            );
                            self.stats.set_has_camera(false);
                            next_reopen = Instant::now() + self.settings.device_reopen_interval;
                        }
                        None => {
                            // 设备随崩溃的采集调用一起丢失，立即尝试重新打开
                            self.stats.set_has_camera(false);
                            next_reopen = Instant::now();
                        }
                    }

                    if !pause(&cancel, self.settings.capture_retry_delay).await {
                        break;
                    }
                }
            }
        }

        self.stats.set_running(false);
        self.stats.set_has_camera(false);
        self.stats.set_actual_fps(0.0);
        info!("Capture worker for {} stopped", feed);

        self.writer
    }

    async fn open_device(&mut self) -> Option<Box<dyn CaptureDevice>> {
        let factory = self.factory.clone();
        let camera = self.camera.clone();

        let result = tokio::task::spawn_blocking(move || factory.open(&camera))
            .await
            .unwrap_or_else(|e| Err(CaptureError::Aborted(e.to_string())));

        match result {
            Ok(device) => {
                info!("✓ Camera {} opened: {}", self.camera.feed, device.describe());
                self.stats.set_has_camera(true);
                Some(device)
            }
            Err(e) => {
                warn!(
                    "⚠️  Camera {} unavailable ({}), publishing placeholder frames",
                    self.camera.feed, e
                );
                self.stats.set_has_camera(false);
                None
            }
        }
    }

    async fn placeholder(&mut self) -> Option<EncodedFrame> {
        if self.placeholder.is_none() {
            let (width, height) = (self.settings.width, self.settings.height);
            let result = tokio::task::spawn_blocking(move || placeholder_frame(width, height))
                .await
                .unwrap_or_else(|e| Err(CaptureError::Aborted(e.to_string())));

            match result {
                Ok(frame) => self.placeholder = Some(frame),
                Err(e) => {
                    error!("Failed to build placeholder for {}: {}", self.camera.feed, e);
                    return None;
                }
            }
        }
        self.placeholder.clone()
    }
}

/// 在阻塞线程池中执行一次采集+编码
///
/// 设备随闭包移入移出；闭包崩溃或超时时设备丢失，返回 `None`。
async fn capture_and_encode(
    mut device: Box<dyn CaptureDevice>,
    encoder: JpegFrameEncoder,
    deadline: Duration,
) -> (Option<Box<dyn CaptureDevice>>, Result<EncodedFrame, CaptureError>) {
    let task = tokio::task::spawn_blocking(move || {
        let result = device.capture().and_then(|raw| encoder.encode(&raw));
        (device, result)
    });

    match tokio::time::timeout(deadline, task).await {
        Ok(Ok((device, result))) => (Some(device), result),
        Ok(Err(e)) => (None, Err(CaptureError::Aborted(e.to_string()))),
        // 阻塞线程仍持有设备，返回后随之释放
        Err(_) => (None, Err(CaptureError::Stalled(deadline))),
    }
}

/// 可取消的等待，被取消时返回 false
async fn pause(cancel: &CancellationToken, duration: Duration) -> bool {
    if duration.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
