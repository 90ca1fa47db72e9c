//! # 入站请求载荷
//!
//! 只解析分发需要的字段（模型名、是否流式），其余字段原样保留交给转换器。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// OpenAI 兼容的通用请求
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneralOpenAIRequest {
    #[serde(default)]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GeneralOpenAIRequest {
    #[must_use]
    pub fn is_stream(&self) -> bool {
        self.stream.unwrap_or(false)
    }
}

/// Claude Messages 请求
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClaudeRequest {
    #[serde(default)]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ClaudeRequest {
    #[must_use]
    pub fn is_stream(&self) -> bool {
        self.stream.unwrap_or(false)
    }
}

/// multipart 音频请求，只取出 `model` 字段
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioRequest {
    pub model: String,
}

impl AudioRequest {
    /// 从 multipart/form-data 正文中读取 `model` 字段
    #[must_use]
    pub fn from_multipart(content_type: &str, body: &[u8]) -> Option<Self> {
        let boundary = content_type
            .split(';')
            .map(str::trim)
            .find_map(|part| part.strip_prefix("boundary="))?
            .trim_matches('"');
        let delimiter = format!("--{boundary}");
        let text = String::from_utf8_lossy(body);

        text.split(delimiter.as_str()).find_map(|part| {
            let (head, value) = part.split_once("\r\n\r\n")?;
            head.contains("name=\"model\"").then(|| Self {
                model: value.trim_end_matches("\r\n").trim().to_string(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extra_fields_survive_round_trip() {
        let raw = json!({"model": "gpt-4o", "stream": true, "messages": [{"role": "user", "content": "hi"}]});
        let request: GeneralOpenAIRequest = serde_json::from_value(raw.clone()).unwrap();
        assert!(request.is_stream());
        assert_eq!(request.extra["messages"][0]["content"], "hi");
        assert_eq!(serde_json::to_value(&request).unwrap(), raw);
    }

    #[test]
    fn missing_stream_means_non_streaming() {
        let request: ClaudeRequest = serde_json::from_str(r#"{"model":"claude-3-haiku","max_tokens":16}"#).unwrap();
        assert!(!request.is_stream());
    }

    #[test]
    fn model_from_multipart_form() {
        let body = "--XyZ\r\nContent-Disposition: form-data; name=\"file\"; filename=\"a.mp3\"\r\n\r\nID3...\r\n\
                    --XyZ\r\nContent-Disposition: form-data; name=\"model\"\r\n\r\nwhisper-1\r\n--XyZ--\r\n";
        let request = AudioRequest::from_multipart("multipart/form-data; boundary=XyZ", body.as_bytes()).unwrap();
        assert_eq!(request.model, "whisper-1");
        assert!(AudioRequest::from_multipart("application/json", body.as_bytes()).is_none());
    }
}
