//! 控制命令
//!
//! 文本格式 `CMD[:ARG]`，命令名大小写不敏感。

use std::fmt;
use std::str::FromStr;

use crate::error::VisionStreamError;
use crate::types::CameraFeed;

/// 控制命令（封闭集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// 启动指定摄像头，`None` 表示全部
    CameraStart(Option<CameraFeed>),
    /// 停止指定摄像头，`None` 表示全部
    CameraStop(Option<CameraFeed>),
    Status,
}

impl FromStr for ControlCommand {
    type Err = VisionStreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (name, arg) = match s.split_once(':') {
            Some((name, arg)) => (name.trim(), Some(arg.trim())),
            None => (s, None),
        };

        match name.to_ascii_uppercase().as_str() {
            "CAMERA_START" => Ok(ControlCommand::CameraStart(parse_target(arg)?)),
            "CAMERA_STOP" => Ok(ControlCommand::CameraStop(parse_target(arg)?)),
            // STATUS 忽略参数
            "STATUS" => Ok(ControlCommand::Status),
            "" => Err(VisionStreamError::UnknownCommand("<empty>".to_string())),
            other => Err(VisionStreamError::UnknownCommand(other.to_string())),
        }
    }
}

/// 空参数或 `all` 表示全部摄像头
fn parse_target(arg: Option<&str>) -> Result<Option<CameraFeed>, VisionStreamError> {
    match arg {
        Some(a) if !a.is_empty() && !a.eq_ignore_ascii_case("all") => Ok(Some(a.parse()?)),
        _ => Ok(None),
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlCommand::CameraStart(None) => f.write_str("CAMERA_START"),
            ControlCommand::CameraStart(Some(feed)) => write!(f, "CAMERA_START:{}", feed),
            ControlCommand::CameraStop(None) => f.write_str("CAMERA_STOP"),
            ControlCommand::CameraStop(Some(feed)) => write!(f, "CAMERA_STOP:{}", feed),
            ControlCommand::Status => f.write_str("STATUS"),
        }
    }
}

/// 单个摄像头的运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraRunState {
    Running,
    /// 采集设备不可用，正在输出占位帧
    Degraded,
    Stopped,
}

impl fmt::Display for CameraRunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraRunState::Running => f.write_str("running"),
            CameraRunState::Degraded => f.write_str("degraded"),
            CameraRunState::Stopped => f.write_str("stopped"),
        }
    }
}

/// 控制命令响应
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlResponse {
    Started,
    Stopped,
    Status(Vec<(CameraFeed, CameraRunState)>),
    Error(String),
}

impl fmt::Display for ControlResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlResponse::Started => f.write_str("CAMERA:started"),
            ControlResponse::Stopped => f.write_str("CAMERA:stopped"),
            ControlResponse::Status(entries) => {
                f.write_str("STATUS:")?;
                for (i, (feed, state)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}={}", feed, state)?;
                }
                Ok(())
            }
            ControlResponse::Error(msg) => write!(f, "ERROR:{}", msg),
        }
    }
}
