use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::VisionStreamError;
use crate::protocol::{JPEG_EOI, JPEG_SOI};

/// 摄像头标识
///
/// 每个摄像头对应唯一的采集设备和网络端口，摄像头之间互相独立。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraFeed {
    Left,
    Right,
    Eye,
}

impl CameraFeed {
    pub const ALL: [CameraFeed; 3] = [CameraFeed::Left, CameraFeed::Right, CameraFeed::Eye];

    pub fn name(self) -> &'static str {
        match self {
            CameraFeed::Left => "left",
            CameraFeed::Right => "right",
            CameraFeed::Eye => "eye",
        }
    }

    /// 默认端口（8081-8083）
    pub fn default_port(self) -> u16 {
        match self {
            CameraFeed::Left => 8081,
            CameraFeed::Right => 8082,
            CameraFeed::Eye => 8083,
        }
    }

    /// 默认采集设备索引
    pub fn default_device_index(self) -> u32 {
        match self {
            CameraFeed::Left => 0,
            CameraFeed::Right => 1,
            CameraFeed::Eye => 2,
        }
    }
}

impl fmt::Display for CameraFeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CameraFeed {
    type Err = VisionStreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" => Ok(CameraFeed::Left),
            "right" => Ok(CameraFeed::Right),
            "eye" => Ok(CameraFeed::Eye),
            other => Err(VisionStreamError::UnknownCamera(other.to_string())),
        }
    }
}

/// 编码后的单帧图像（不可变）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    data: Bytes,
}

impl EncodedFrame {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// 起始标记和结束标记都存在时才算完整帧
    pub fn is_complete(&self) -> bool {
        self.data.len() >= JPEG_SOI.len() + JPEG_EOI.len()
            && self.data.starts_with(&JPEG_SOI)
            && self.data.ends_with(&JPEG_EOI)
    }
}

impl From<Vec<u8>> for EncodedFrame {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

/// 健康检查响应
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub camera: CameraFeed,
}

impl HealthResponse {
    pub fn ok(camera: CameraFeed) -> Self {
        Self {
            status: "ok".to_string(),
            camera,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// 单个摄像头的统计信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    pub camera: CameraFeed,
    pub clients: usize,
    pub target_fps: f64,
    pub actual_fps: f64,
    pub frames_captured: u64,
    pub capture_errors: u64,
    pub running: bool,
    pub has_camera: bool,
    pub started_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_feed_parse() {
        assert_eq!("left".parse::<CameraFeed>().unwrap(), CameraFeed::Left);
        assert_eq!(" RIGHT ".parse::<CameraFeed>().unwrap(), CameraFeed::Right);
        assert_eq!("Eye".parse::<CameraFeed>().unwrap(), CameraFeed::Eye);
        assert!(matches!(
            "rear".parse::<CameraFeed>(),
            Err(VisionStreamError::UnknownCamera(_))
        ));
    }

    #[test]
    fn test_camera_feed_defaults_are_distinct() {
        let ports: Vec<u16> = CameraFeed::ALL.iter().map(|f| f.default_port()).collect();
        assert_eq!(ports, vec![8081, 8082, 8083]);

        let devices: Vec<u32> = CameraFeed::ALL
            .iter()
            .map(|f| f.default_device_index())
            .collect();
        assert_eq!(devices, vec![0, 1, 2]);
    }

    #[test]
    fn test_camera_feed_serde_lowercase() {
        let json = serde_json::to_string(&CameraFeed::Eye).unwrap();
        assert_eq!(json, "\"eye\"");

        let health: HealthResponse =
            serde_json::from_str(r#"{"status":"ok","camera":"left"}"#).unwrap();
        assert!(health.is_ok());
        assert_eq!(health.camera, CameraFeed::Left);
    }

    #[test]
    fn test_encoded_frame_completeness() {
        let complete = EncodedFrame::new(vec![0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9]);
        assert!(complete.is_complete());
        assert_eq!(complete.len(), 6);

        let missing_end = EncodedFrame::new(vec![0xFF, 0xD8, 0x01, 0x02]);
        assert!(!missing_end.is_complete());

        let too_short = EncodedFrame::new(vec![0xFF, 0xD8, 0xD9]);
        assert!(!too_short.is_complete());
    }
}
