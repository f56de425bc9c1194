// 采集设备：libcamera-vid 子进程 / 合成测试图案

use std::io::Read;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::CaptureError;
use crate::config::{CameraConfig, CaptureSource, ServerConfig};

/// 一帧未压缩的 RGB 图像
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    /// RGB8，长度为 width * height * 3
    pub rgb: Vec<u8>,
}

impl RawFrame {
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let pixels = (width as usize) * (height as usize);
        let mut data = Vec::with_capacity(pixels * 3);
        for _ in 0..pixels {
            data.extend_from_slice(&rgb);
        }
        Self {
            width,
            height,
            rgb: data,
        }
    }
}

/// 采集设备（阻塞调用，在阻塞线程池中运行）
pub trait CaptureDevice: Send {
    /// 读取一帧
    fn capture(&mut self) -> Result<RawFrame, CaptureError>;

    fn describe(&self) -> String;
}

/// 设备工厂
///
/// 打开设备统一经过工厂，测试可以注入缺失或故障设备。
pub trait DeviceFactory: Send + Sync {
    fn open(&self, camera: &CameraConfig) -> Result<Box<dyn CaptureDevice>, CaptureError>;
}

/// 默认工厂：按配置选择 libcamera 或合成源
#[derive(Debug, Clone)]
pub struct DefaultDeviceFactory {
    source: CaptureSource,
    command: String,
    width: u32,
    height: u32,
    fps: u32,
}

impl DefaultDeviceFactory {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            source: config.source,
            command: config.libcamera_command.clone(),
            width: config.width,
            height: config.height,
            fps: config.target_fps,
        }
    }
}

impl DeviceFactory for DefaultDeviceFactory {
    fn open(&self, camera: &CameraConfig) -> Result<Box<dyn CaptureDevice>, CaptureError> {
        match self.source {
            CaptureSource::Libcamera => {
                let device = LibcameraDevice::spawn(
                    &self.command,
                    camera.device_index,
                    self.width,
                    self.height,
                    self.fps,
                )?;
                Ok(Box::new(device))
            }
            CaptureSource::Synthetic => Ok(Box::new(SyntheticDevice::new(
                camera.device_index,
                self.width,
                self.height,
            ))),
        }
    }
}

/// libcamera-vid 子进程，输出原始 YUV420 (I420) 到 stdout
pub struct LibcameraDevice {
    child: Child,
    stdout: ChildStdout,
    index: u32,
    width: u32,
    height: u32,
    yuv: Vec<u8>,
}

impl LibcameraDevice {
    pub fn spawn(
        command: &str,
        index: u32,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Result<Self, CaptureError> {
        if width % 2 != 0 || height % 2 != 0 {
            return Err(CaptureError::DeviceUnavailable(format!(
                "I420 requires even dimensions, got {}x{}",
                width, height
            )));
        }

        let args = [
            "--camera".to_string(),
            index.to_string(),
            "-t".to_string(),
            "0".to_string(),
            "-n".to_string(),
            "--width".to_string(),
            width.to_string(),
            "--height".to_string(),
            height.to_string(),
            "--framerate".to_string(),
            fps.to_string(),
            "--codec".to_string(),
            "yuv420".to_string(),
            "--flush".to_string(),
            "-o".to_string(),
            "-".to_string(),
        ];

        info!(
            "Starting {} for camera {}: {}x{} @ {}fps",
            command, index, width, height, fps
        );
        debug!("{} args: {:?}", command, args);

        let mut child = Command::new(command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                CaptureError::DeviceUnavailable(format!("failed to spawn {}: {}", command, e))
            })?;

        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(CaptureError::DeviceUnavailable(
                    "capture process has no stdout".to_string(),
                ));
            }
        };

        let frame_len = i420_len(width, height);
        Ok(Self {
            child,
            stdout,
            index,
            width,
            height,
            yuv: vec![0u8; frame_len],
        })
    }
}

impl CaptureDevice for LibcameraDevice {
    fn capture(&mut self) -> Result<RawFrame, CaptureError> {
        match self.stdout.read_exact(&mut self.yuv) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(CaptureError::EndOfStream);
            }
            Err(e) => return Err(CaptureError::Io(e)),
        }

        Ok(RawFrame {
            width: self.width,
            height: self.height,
            rgb: i420_to_rgb(&self.yuv, self.width, self.height),
        })
    }

    fn describe(&self) -> String {
        format!("libcamera:{}", self.index)
    }
}

impl Drop for LibcameraDevice {
    fn drop(&mut self) {
        if let Err(e) = self.child.kill() {
            warn!("Failed to stop capture process for camera {}: {}", self.index, e);
        }
        let _ = self.child.wait();
    }
}

fn i420_len(width: u32, height: u32) -> usize {
    let y = (width as usize) * (height as usize);
    y + y / 2
}

/// I420 转 RGB8（BT.601，有限范围）
pub fn i420_to_rgb(yuv: &[u8], width: u32, height: u32) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;
    let y_plane = &yuv[..w * h];
    let u_plane = &yuv[w * h..w * h + (w / 2) * (h / 2)];
    let v_plane = &yuv[w * h + (w / 2) * (h / 2)..];

    let mut rgb = Vec::with_capacity(w * h * 3);
    for row in 0..h {
        for col in 0..w {
            let y = y_plane[row * w + col] as f32 - 16.0;
            let chroma = (row / 2) * (w / 2) + col / 2;
            let u = u_plane[chroma] as f32 - 128.0;
            let v = v_plane[chroma] as f32 - 128.0;

            let r = 1.164 * y + 1.596 * v;
            let g = 1.164 * y - 0.392 * u - 0.813 * v;
            let b = 1.164 * y + 2.017 * u;

            rgb.push(r.clamp(0.0, 255.0) as u8);
            rgb.push(g.clamp(0.0, 255.0) as u8);
            rgb.push(b.clamp(0.0, 255.0) as u8);
        }
    }
    rgb
}

/// 合成测试图案（移动的渐变条纹）
pub struct SyntheticDevice {
    index: u32,
    width: u32,
    height: u32,
    frame_number: u64,
    frame_delay: Option<Duration>,
}

impl SyntheticDevice {
    pub fn new(index: u32, width: u32, height: u32) -> Self {
        Self {
            index,
            width,
            height,
            frame_number: 0,
            frame_delay: None,
        }
    }

    /// 每帧额外耗时，用于模拟慢速设备
    pub fn with_frame_delay(mut self, delay: Duration) -> Self {
        self.frame_delay = Some(delay);
        self
    }
}

impl CaptureDevice for SyntheticDevice {
    fn capture(&mut self) -> Result<RawFrame, CaptureError> {
        if let Some(delay) = self.frame_delay {
            std::thread::sleep(delay);
        }

        let offset = (self.frame_number * 4) as usize;
        let tint = (self.index as u8).wrapping_mul(80);
        let w = self.width as usize;
        let h = self.height as usize;

        let mut rgb = Vec::with_capacity(w * h * 3);
        for row in 0..h {
            for col in 0..w {
                let shade = ((col + offset) % 256) as u8;
                rgb.push(shade);
                rgb.push(((row * 255) / h.max(1)) as u8);
                rgb.push(tint);
            }
        }

        self.frame_number += 1;
        Ok(RawFrame {
            width: self.width,
            height: self.height,
            rgb,
        })
    }

    fn describe(&self) -> String {
        format!("synthetic:{}", self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::CameraFeed;

    #[test]
    fn test_synthetic_device_frames_move() {
        let mut device = SyntheticDevice::new(0, 16, 8);
        let first = device.capture().unwrap();
        let second = device.capture().unwrap();

        assert_eq!(first.rgb.len(), 16 * 8 * 3);
        assert_ne!(first.rgb, second.rgb);
        assert_eq!(device.describe(), "synthetic:0");
    }

    #[test]
    fn test_i420_grey_converts_to_grey() {
        let (w, h) = (4u32, 2u32);
        let mut yuv = vec![126u8; (w * h) as usize];
        yuv.extend(vec![128u8; (w * h / 2) as usize]);

        let rgb = i420_to_rgb(&yuv, w, h);
        assert_eq!(rgb.len(), (w * h * 3) as usize);
        for px in rgb.chunks(3) {
            assert_eq!(px[0], px[1]);
            assert_eq!(px[1], px[2]);
        }
    }

    #[test]
    fn test_missing_libcamera_binary_is_unavailable() {
        let mut config = ServerConfig::default();
        config.libcamera_command = "/nonexistent/libcamera-vid".to_string();
        let factory = DefaultDeviceFactory::from_config(&config);

        let result = factory.open(&CameraConfig::for_feed(CameraFeed::Left));
        assert!(matches!(result, Err(CaptureError::DeviceUnavailable(_))));
    }

    #[test]
    fn test_synthetic_factory() {
        let mut config = ServerConfig::default();
        config.source = CaptureSource::Synthetic;
        config.width = 32;
        config.height = 16;
        let factory = DefaultDeviceFactory::from_config(&config);

        let mut device = factory.open(&CameraConfig::for_feed(CameraFeed::Eye)).unwrap();
        let frame = device.capture().unwrap();
        assert_eq!((frame.width, frame.height), (32, 16));
    }
}
