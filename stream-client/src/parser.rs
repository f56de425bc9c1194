// 帧边界解析器
//
// 从任意切分的字节流中提取完整的 JPEG 帧。
// 部分头部带有 Content-Length 时按长度截取，并用结束标记校验；
// 否则退回到起始/结束标记扫描。

use bytes::{Buf, Bytes, BytesMut};
use common::{content_length_before, find_marker, EncodedFrame, JPEG_EOI, JPEG_SOI};
use futures::{Stream, StreamExt};
use tracing::{debug, warn};

/// 默认缓冲区上限
pub const DEFAULT_MAX_BUFFER: usize = 8 * 1024 * 1024;

/// 解析统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParserStats {
    pub frames_emitted: u64,
    /// 校验失败或被截断而丢弃的帧
    pub corrupt_frames: u64,
    /// 超出缓冲区上限的次数
    pub overflows: u64,
    pub bytes_discarded: u64,
}

/// 帧边界解析器
#[derive(Debug)]
pub struct FrameBoundaryParser {
    buf: BytesMut,
    max_buffer: usize,
    /// buf[..soi_hint] 中不存在起始标记
    soi_hint: usize,
    /// 从该位置继续查找结束标记
    eoi_hint: usize,
    stats: ParserStats,
}

impl Default for FrameBoundaryParser {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BUFFER)
    }
}

impl FrameBoundaryParser {
    pub fn new(max_buffer: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(64 * 1024),
            max_buffer: max_buffer.max(JPEG_SOI.len() + JPEG_EOI.len()),
            soi_hint: 0,
            eoi_hint: 0,
            stats: ParserStats::default(),
        }
    }

    pub fn stats(&self) -> ParserStats {
        self.stats
    }

    /// 当前缓冲的字节数
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// 追加一块数据
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// 追加数据并取出所有已完整的帧
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<EncodedFrame> {
        self.push(chunk);
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame() {
            frames.push(frame);
        }
        frames
    }

    /// 取出下一个完整帧，数据不足时返回 None
    pub fn next_frame(&mut self) -> Option<EncodedFrame> {
        loop {
            let soi = match find_marker(&self.buf, &JPEG_SOI, self.soi_hint.saturating_sub(1)) {
                Some(pos) => pos,
                None => {
                    self.soi_hint = self.buf.len();
                    self.check_overflow();
                    return None;
                }
            };
            self.soi_hint = soi;

            // 按 Content-Length 截取
            if let Some(len) = content_length_before(&self.buf[..soi])
                .filter(|len| *len <= self.max_buffer)
            {
                let end = soi + len;
                if self.buf.len() < end {
                    self.check_overflow();
                    return None;
                }

                if len >= JPEG_SOI.len() + JPEG_EOI.len() && self.buf[..end].ends_with(&JPEG_EOI) {
                    return Some(self.emit(soi, end));
                }

                debug!(
                    "Frame at offset {} does not match its Content-Length {}, resyncing",
                    soi, len
                );
                self.drop_corrupt(soi + JPEG_SOI.len());
                continue;
            }

            // 标记扫描
            let search_from = self.eoi_hint.max(soi + JPEG_SOI.len());
            let eoi = find_marker(&self.buf, &JPEG_EOI, search_from);
            let nested = find_marker(&self.buf, &JPEG_SOI, search_from);

            match (eoi, nested) {
                (Some(eoi), Some(next)) if next < eoi => {
                    // 结束标记之前又出现起始标记：前一帧被截断
                    self.drop_corrupt(next);
                }
                (None, Some(next)) => {
                    self.drop_corrupt(next);
                }
                (Some(eoi), _) => {
                    return Some(self.emit(soi, eoi + JPEG_EOI.len()));
                }
                (None, None) => {
                    // 保留最后一个字节，结束标记可能跨块
                    self.eoi_hint = self.buf.len().saturating_sub(1).max(soi + JPEG_SOI.len());
                    self.check_overflow();
                    return None;
                }
            }
        }
    }

    fn emit(&mut self, soi: usize, end: usize) -> EncodedFrame {
        let mut head = self.buf.split_to(end);
        let frame = head.split_off(soi).freeze();
        self.reset_hints();
        self.stats.frames_emitted += 1;
        EncodedFrame::new(frame)
    }

    fn drop_corrupt(&mut self, upto: usize) {
        self.buf.advance(upto);
        self.reset_hints();
        self.stats.corrupt_frames += 1;
        self.stats.bytes_discarded += upto as u64;
    }

    fn check_overflow(&mut self) {
        if self.buf.len() <= self.max_buffer {
            return;
        }

        // 保留最后一个字节，起始标记可能跨块
        let discard = self.buf.len() - 1;
        warn!(
            "Parser buffer exceeded {} bytes without a complete frame, discarding {} bytes",
            self.max_buffer, discard
        );
        self.buf.advance(discard);
        self.reset_hints();
        self.stats.overflows += 1;
        self.stats.bytes_discarded += discard as u64;
    }

    fn reset_hints(&mut self) {
        self.soi_hint = 0;
        self.eoi_hint = 0;
    }
}

/// 把字节流转换为帧流
pub fn frames<S, E>(
    chunks: S,
    mut parser: FrameBoundaryParser,
) -> impl Stream<Item = Result<EncodedFrame, E>>
where
    S: Stream<Item = Result<Bytes, E>>,
{
    async_stream::stream! {
        futures::pin_mut!(chunks);
        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(chunk) => {
                    parser.push(&chunk);
                    while let Some(frame) = parser.next_frame() {
                        yield Ok(frame);
                    }
                }
                Err(e) => {
                    yield Err(e);
                    break;
                }
            }
        }
    }
}
