//! 多部分（multipart）流的线路格式
//!
//! 每个部分：`--frame\r\nContent-Type: image/jpeg\r\nContent-Length: N\r\n\r\n<N 字节>\r\n`

use bytes::{BufMut, Bytes, BytesMut};

/// 分隔符
pub const BOUNDARY: &str = "frame";

/// JPEG 起始标记
pub const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

/// JPEG 结束标记
pub const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

pub const STREAM_PATH: &str = "/stream";
pub const HEALTH_PATH: &str = "/health";
pub const STATS_PATH: &str = "/stats";

pub const PART_CONTENT_TYPE: &str = "image/jpeg";

const CONTENT_LENGTH: &[u8] = b"content-length:";

/// 流响应的 Content-Type
pub fn stream_content_type() -> String {
    format!("multipart/x-mixed-replace; boundary={}", BOUNDARY)
}

/// 编码一个完整的部分（分隔符 + 头部 + 数据 + CRLF）
pub fn encode_part(frame: &[u8]) -> Bytes {
    let header = format!(
        "--{}\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n",
        BOUNDARY,
        PART_CONTENT_TYPE,
        frame.len()
    );

    let mut buf = BytesMut::with_capacity(header.len() + frame.len() + 2);
    buf.put_slice(header.as_bytes());
    buf.put_slice(frame);
    buf.put_slice(b"\r\n");
    buf.freeze()
}

/// 从 `from` 开始查找标记位置
pub fn find_marker(haystack: &[u8], marker: &[u8], from: usize) -> Option<usize> {
    if marker.is_empty() || from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(marker.len())
        .position(|w| w == marker)
        .map(|pos| pos + from)
}

/// 解析紧邻数据之前的部分头部中的 Content-Length
///
/// 只有当 `prefix` 以空行（`\r\n\r\n`）结尾时才认为头部有效，
/// 取最后一个 Content-Length 头。
pub fn content_length_before(prefix: &[u8]) -> Option<usize> {
    if !prefix.ends_with(b"\r\n\r\n") {
        return None;
    }

    let headers = &prefix[..prefix.len() - 4];

    headers
        .split(|b| *b == b'\n')
        .filter_map(|line| {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if line.len() < CONTENT_LENGTH.len()
                || !line[..CONTENT_LENGTH.len()].eq_ignore_ascii_case(CONTENT_LENGTH)
            {
                return None;
            }
            std::str::from_utf8(&line[CONTENT_LENGTH.len()..])
                .ok()
                .and_then(|v| v.trim().parse::<usize>().ok())
        })
        .last()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_part_layout() {
        let part = encode_part(&[0xFF, 0xD8, 0x00, 0xFF, 0xD9]);
        let expected_header = b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 5\r\n\r\n";

        assert!(part.starts_with(expected_header));
        assert_eq!(&part[expected_header.len()..part.len() - 2], &[0xFF, 0xD8, 0x00, 0xFF, 0xD9]);
        assert!(part.ends_with(b"\r\n"));
    }

    #[test]
    fn test_stream_content_type() {
        assert_eq!(
            stream_content_type(),
            "multipart/x-mixed-replace; boundary=frame"
        );
    }

    #[test]
    fn test_find_marker() {
        let data = [0x00, 0xFF, 0xD8, 0x01, 0xFF, 0xD9, 0xFF, 0xD8];
        assert_eq!(find_marker(&data, &JPEG_SOI, 0), Some(1));
        assert_eq!(find_marker(&data, &JPEG_SOI, 2), Some(6));
        assert_eq!(find_marker(&data, &JPEG_EOI, 0), Some(4));
        assert_eq!(find_marker(&data, &JPEG_EOI, 5), None);
        assert_eq!(find_marker(&data, &JPEG_SOI, 100), None);
    }

    #[test]
    fn test_content_length_before() {
        let header = b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 1234\r\n\r\n";
        assert_eq!(content_length_before(header), Some(1234));

        let lower = b"\r\n--frame\r\ncontent-length:42\r\n\r\n";
        assert_eq!(content_length_before(lower), Some(42));
    }

    #[test]
    fn test_content_length_requires_blank_line() {
        let incomplete = b"--frame\r\nContent-Length: 10\r\n";
        assert_eq!(content_length_before(incomplete), None);

        let no_header = b"garbage\r\n\r\n";
        assert_eq!(content_length_before(no_header), None);

        let bad_value = b"Content-Length: abc\r\n\r\n";
        assert_eq!(content_length_before(bad_value), None);
    }
}
