// 最新帧存储
//
// 每个摄像头一个 FrameSlot：单写多读，写入方永不等待读取方。
// 读取方拿到的是不可变快照，慢速读取方只会跳帧，不会形成积压。

use arc_swap::ArcSwapOption;
use common::EncodedFrame;
use std::sync::Arc;
use tokio::sync::Notify;

/// 某一时刻的最新帧
#[derive(Debug)]
pub struct FrameSnapshot {
    /// 单调递增的序号，从 1 开始
    pub sequence: u64,
    pub frame: EncodedFrame,
}

struct SlotShared {
    latest: ArcSwapOption<FrameSnapshot>,
    notify: Notify,
}

/// 写入端（不可克隆，保证单写者）
pub struct FrameSlotWriter {
    shared: Arc<SlotShared>,
    next_sequence: u64,
}

/// 读取端
#[derive(Clone)]
pub struct FrameSlot {
    shared: Arc<SlotShared>,
}

impl FrameSlot {
    /// 创建一个空槽，返回唯一的写入端和可克隆的读取端
    pub fn new() -> (FrameSlotWriter, FrameSlot) {
        let shared = Arc::new(SlotShared {
            latest: ArcSwapOption::empty(),
            notify: Notify::new(),
        });

        (
            FrameSlotWriter {
                shared: shared.clone(),
                next_sequence: 1,
            },
            FrameSlot { shared },
        )
    }

    /// 当前最新帧
    pub fn snapshot(&self) -> Option<Arc<FrameSnapshot>> {
        self.shared.latest.load_full()
    }

    /// 当前最新序号，空槽为 0
    pub fn sequence(&self) -> u64 {
        self.shared
            .latest
            .load()
            .as_ref()
            .map(|s| s.sequence)
            .unwrap_or(0)
    }

    /// 等待序号大于 `after` 的帧
    pub async fn wait_newer(&self, after: u64) -> Arc<FrameSnapshot> {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            // 先登记再检查，避免错过检查与等待之间的发布
            notified.as_mut().enable();

            if let Some(snapshot) = self.snapshot() {
                if snapshot.sequence > after {
                    return snapshot;
                }
            }

            notified.await;
        }
    }
}

impl FrameSlotWriter {
    /// 发布新帧，返回其序号
    pub fn publish(&mut self, frame: EncodedFrame) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        self.shared.latest.store(Some(Arc::new(FrameSnapshot {
            sequence,
            frame,
        })));
        self.shared.notify.notify_waiters();

        sequence
    }

    /// 最近一次发布的序号
    pub fn last_sequence(&self) -> u64 {
        self.next_sequence - 1
    }

    pub fn reader(&self) -> FrameSlot {
        FrameSlot {
            shared: self.shared.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn frame(tag: u8) -> EncodedFrame {
        EncodedFrame::new(vec![0xFF, 0xD8, tag, 0xFF, 0xD9])
    }

    #[test]
    fn test_read_after_write() {
        let (mut writer, reader) = FrameSlot::new();
        assert!(reader.snapshot().is_none());
        assert_eq!(reader.sequence(), 0);

        for tag in 0..10u8 {
            let seq = writer.publish(frame(tag));
            let snapshot = reader.snapshot().unwrap();
            assert!(snapshot.sequence >= seq);
            assert_eq!(snapshot.frame.data()[2], tag);
        }
        assert_eq!(writer.last_sequence(), 10);
    }

    #[test]
    fn test_slow_reader_sees_only_latest() {
        let (mut writer, reader) = FrameSlot::new();
        for tag in 0..100u8 {
            writer.publish(frame(tag));
        }

        let snapshot = reader.snapshot().unwrap();
        assert_eq!(snapshot.sequence, 100);
        assert_eq!(snapshot.frame.data()[2], 99);
    }

    #[tokio::test]
    async fn test_wait_newer_wakes_on_publish() {
        let (mut writer, reader) = FrameSlot::new();
        writer.publish(frame(1));

        let waiter = {
            let reader = reader.clone();
            tokio::spawn(async move { reader.wait_newer(1).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        writer.publish(frame(2));

        let snapshot = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.sequence, 2);
    }

    #[tokio::test]
    async fn test_wait_newer_returns_immediately_when_available() {
        let (mut writer, reader) = FrameSlot::new();
        writer.publish(frame(1));
        writer.publish(frame(2));

        let snapshot = reader.wait_newer(0).await;
        assert_eq!(snapshot.sequence, 2);
    }
}
