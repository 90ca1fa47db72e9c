//! # SSE 解码器
//!
//! 按行解析 `text/event-stream`，每个空行结束一个事件。
//! `data` 行累积后尝试解析为 JSON，`[DONE]` 与非 JSON 载荷解析为 `Null`。

use bytes::BytesMut;
use serde_json::Value;
use std::io;
use tokio_util::codec::Decoder;

/// 单个 SSE 事件
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub id: Option<String>,
    pub data: Value,
    pub retry: Option<u64>,
}

/// `SseDecoder::drain` 的结果
#[derive(Debug, Default)]
pub struct Drained {
    pub events: Vec<SseEvent>,
    pub invalid_lines: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SseDecoder {
    current: SseEvent,
    pending: bool,
    data: String,
}

impl SseDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// 解码当前缓冲区里所有完整事件，非 UTF-8 的行跳过并计数
    pub fn drain(&mut self, src: &mut BytesMut) -> Drained {
        let mut drained = Drained::default();
        loop {
            match self.decode(src) {
                Ok(Some(event)) => drained.events.push(event),
                Ok(None) => break,
                // 出错的行已移出缓冲区
                Err(_) => drained.invalid_lines += 1,
            }
        }
        drained
    }

    fn finish(&mut self) -> Option<SseEvent> {
        if !self.pending {
            return None;
        }
        let payload = self.data.trim();
        self.current.data = if payload.is_empty() || payload == "[DONE]" {
            Value::Null
        } else {
            payload
                .find('{')
                .and_then(|pos| serde_json::from_str::<Value>(&payload[pos..]).ok())
                .unwrap_or(Value::Null)
        };
        self.pending = false;
        self.data.clear();
        Some(std::mem::take(&mut self.current))
    }

    fn feed_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.finish();
        }
        // 注释行（心跳）
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = line.split_once(':').map_or((line, ""), |(f, v)| {
            (f, v.strip_prefix(' ').unwrap_or(v))
        });

        match field {
            "data" => {
                if !self.data.is_empty() {
                    self.data.push('\n');
                }
                self.data.push_str(value);
            }
            "event" => self.current.event = Some(value.to_string()),
            "id" => self.current.id = Some(value.to_string()),
            "retry" => self.current.retry = value.parse::<u64>().ok(),
            _ => return None,
        }
        self.pending = true;
        None
    }

    fn next_line(src: &mut BytesMut) -> io::Result<Option<String>> {
        let Some(pos) = src.iter().position(|b| *b == b'\n') else {
            return Ok(None);
        };
        let raw = src.split_to(pos + 1);
        let line = trim_line_ending(&raw);
        String::from_utf8(line.to_vec())
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

fn trim_line_ending(raw: &[u8]) -> &[u8] {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    raw.strip_suffix(b"\r").unwrap_or(raw)
}

impl Decoder for SseDecoder {
    type Item = SseEvent;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<Self::Item>> {
        while let Some(line) = Self::next_line(src)? {
            if let Some(event) = self.feed_line(&line) {
                return Ok(Some(event));
            }
        }
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> io::Result<Option<Self::Item>> {
        if let Some(event) = self.decode(src)? {
            return Ok(Some(event));
        }
        if !src.is_empty() {
            let rest = src.split_to(src.len());
            let line = String::from_utf8(trim_line_ending(&rest).to_vec())
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            if let Some(event) = self.feed_line(&line) {
                return Ok(Some(event));
            }
        }
        Ok(self.finish())
    }
}
