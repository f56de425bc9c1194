// 连接状态机

use chrono::{DateTime, Utc};
use common::CameraFeed;
use std::fmt;

/// 进入 Failed 的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// 探测次数用尽
    NotReachable { attempts: u32 },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::NotReachable { attempts } => {
                write!(f, "not reachable after {} attempts", attempts)
            }
        }
    }
}

/// 单个摄像头的连接状态
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StreamConnectionState {
    #[default]
    Idle,
    Probing,
    Connecting,
    Streaming,
    Failed(FailureReason),
    Backoff,
}

impl StreamConnectionState {
    /// 状态转换表
    pub fn can_transition_to(&self, next: &StreamConnectionState) -> bool {
        use StreamConnectionState::*;

        matches!(
            (self, next),
            (_, Idle)
                | (Idle, Probing)
                | (Probing, Connecting)
                | (Probing, Failed(_))
                | (Connecting, Streaming)
                | (Connecting, Backoff)
                | (Streaming, Backoff)
                | (Backoff, Probing)
                | (Failed(_), Probing)
        )
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, StreamConnectionState::Streaming)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, StreamConnectionState::Failed(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            StreamConnectionState::Idle => "idle",
            StreamConnectionState::Probing => "probing",
            StreamConnectionState::Connecting => "connecting",
            StreamConnectionState::Streaming => "streaming",
            StreamConnectionState::Failed(_) => "failed",
            StreamConnectionState::Backoff => "backoff",
        }
    }
}

impl fmt::Display for StreamConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamConnectionState::Failed(reason) => write!(f, "failed ({})", reason),
            other => f.write_str(other.name()),
        }
    }
}

/// 状态变化事件
#[derive(Debug, Clone)]
pub struct StateChange {
    pub feed: CameraFeed,
    pub from: StreamConnectionState,
    pub to: StreamConnectionState,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use StreamConnectionState::*;

    fn failed() -> StreamConnectionState {
        Failed(FailureReason::NotReachable { attempts: 30 })
    }

    #[test]
    fn test_allowed_transitions() {
        assert!(Idle.can_transition_to(&Probing));
        assert!(Probing.can_transition_to(&Connecting));
        assert!(Probing.can_transition_to(&failed()));
        assert!(Connecting.can_transition_to(&Streaming));
        assert!(Connecting.can_transition_to(&Backoff));
        assert!(Streaming.can_transition_to(&Backoff));
        assert!(Backoff.can_transition_to(&Probing));
        assert!(failed().can_transition_to(&Probing));

        for state in [Probing, Connecting, Streaming, Backoff, failed()] {
            assert!(state.can_transition_to(&Idle));
        }
    }

    #[test]
    fn test_rejected_transitions() {
        assert!(!Idle.can_transition_to(&Streaming));
        assert!(!Idle.can_transition_to(&Connecting));
        assert!(!Probing.can_transition_to(&Streaming));
        assert!(!Streaming.can_transition_to(&Probing));
        assert!(!Streaming.can_transition_to(&Connecting));
        assert!(!Backoff.can_transition_to(&Connecting));
        assert!(!Connecting.can_transition_to(&Probing));
        assert!(!failed().can_transition_to(&Connecting));
    }

    #[test]
    fn test_display() {
        assert_eq!(Streaming.to_string(), "streaming");
        assert_eq!(failed().to_string(), "failed (not reachable after 30 attempts)");
    }
}
