//! OpenAI 兼容的 Chat Completions 客户端。
//!
//! 题库生成与章节聚类都通过这里访问大模型。对外抽象为 [`ChatModel`]
//! trait，服务层只依赖 trait，测试可以用本地 HTTP 服务或内存桩替换。
//! 另外提供一组回复解析辅助函数，把模型输出里混着提示语、代码围栏
//! 或被截断的 JSON 清理成可反序列化的文本。

use crate::models::{AppError, AppErrorType};
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use reqwest::{header::HeaderMap, Client, ClientBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

type Result<T> = std::result::Result<T, AppError>;

/// 知识提取助手的人设提示词
pub const SYSTEM_PROMPT: &str = "You are an assistant who is good at extracting knowledge.";

/// 传输层错误的最大请求次数（首次 + 重试）
const MAX_ATTEMPTS: usize = 3;
/// 重试的起始退避间隔
const RETRY_MIN_DELAY_MS: u64 = 500;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

// 默认值函数
fn default_temperature() -> f32 {
    0.7
}

fn default_max_output_tokens() -> u32 {
    8192
}

fn default_timeout_secs() -> u64 {
    300
}

impl ApiConfig {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            model: model.into(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// 一轮对话：发送系统提示词 + 用户提示词，返回助手回复的纯文本
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn chat(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;
}

/// 走 OpenAI 兼容协议（POST {base_url}/chat/completions）的实现
pub struct OpenAiChatModel {
    config: ApiConfig,
    client: Client,
}

impl OpenAiChatModel {
    pub fn new(config: ApiConfig) -> Self {
        let client = create_http_client_with_fallback(config.timeout_secs);
        Self { config, client }
    }

    async fn send_once(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let request_body = json!({
            "model": self.config.model,
            "messages": [
                {
                    "role": "system",
                    "content": system_prompt
                },
                {
                    "role": "user",
                    "content": user_prompt
                }
            ],
            "max_tokens": self.config.max_output_tokens,
            "stream": false,  // 需要完整的结构化 JSON 输出，不使用流式
            "temperature": self.config.temperature
        });

        debug!(
            "[LlmClient] 发送请求: {}/chat/completions (model={}, max_tokens={})",
            self.config.base_url, self.config.model, self.config.max_output_tokens
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/plain, */*")
            .header("Accept-Encoding", "identity") // 禁用压缩，避免二进制响应
            .json(&request_body)
            .send()
            .await
            .map_err(|e| {
                let error_msg = if e.is_timeout() {
                    format!("API请求超时，请检查网络连接或稍后重试: {}", e)
                } else if e.is_connect() {
                    format!("无法连接到API服务器，请检查网络和API地址: {}", e)
                } else {
                    format!("API请求失败: {}", e)
                };
                AppError::network(error_msg)
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::llm(format!(
                "API请求失败: {} - {}",
                status, error_text
            )));
        }

        let response_text = response
            .text()
            .await
            .map_err(|e| AppError::llm(format!("获取响应文本失败: {}", e)))?;

        if response_text.trim().is_empty() {
            return Err(AppError::llm("API返回空响应".to_string()));
        }

        // SSE 开头说明上游忽略了 stream=false
        if response_text.starts_with("data:") || response_text.contains("\ndata: ") {
            return Err(AppError::llm(
                "API返回了流式响应，请检查API配置或换用支持非流式输出的模型".to_string(),
            ));
        }

        // 一些网关会在 JSON 前后附加额外字符，先裁剪到最外层大括号
        let cleaned = response_text.trim();
        let cleaned = match (cleaned.find('{'), cleaned.rfind('}')) {
            (Some(start), Some(end)) if start <= end => &cleaned[start..=end],
            _ => cleaned,
        };

        let response_json: Value = serde_json::from_str(cleaned).map_err(|e| {
            let preview = truncate_at_char_boundary(&response_text, 500);
            AppError::llm(format!("解析API响应失败: {} \n原始响应: {}", e, preview))
        })?;

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| AppError::llm("API响应中缺少 choices[0].message.content"))?;

        debug!("[LlmClient] 收到回复: {} 字符", content.chars().count());
        Ok(content.to_string())
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn chat(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(RETRY_MIN_DELAY_MS))
            .with_max_times(MAX_ATTEMPTS.saturating_sub(1));

        (|| async { self.send_once(system_prompt, user_prompt).await })
            .retry(&backoff)
            .when(|e: &AppError| matches!(e.error_type, AppErrorType::Network))
            .notify(|e: &AppError, dur: Duration| {
                warn!("[LlmClient] 请求失败，{:?} 后重试: {}", dur, e);
            })
            .await
    }
}

/// 创建HTTP客户端，使用渐进式回退策略确保始终有合理的配置
fn create_http_client_with_fallback(timeout_secs: u64) -> Client {
    // 默认请求头显式禁用压缩，防止上游返回 gzip/deflate 数据导致乱码
    let mut headers = HeaderMap::new();
    headers.insert("Accept-Encoding", "identity".parse().unwrap());

    // 尝试1: 完整配置的客户端（推荐配置）
    if let Ok(client) = ClientBuilder::new()
        .timeout(Duration::from_secs(timeout_secs))
        .connect_timeout(Duration::from_secs(30)) // 连接超时30秒
        .danger_accept_invalid_certs(false) // 保持SSL验证
        .use_rustls_tls() // 使用rustls而不是系统TLS
        .default_headers(headers.clone())
        .build()
    {
        debug!(
            "[LlmClient] HTTP客户端创建成功: 完整配置（超时{}s，连接30s，rustls TLS）",
            timeout_secs
        );
        return client;
    }

    // 尝试2: 简化TLS配置的客户端
    if let Ok(client) = ClientBuilder::new()
        .timeout(Duration::from_secs(timeout_secs))
        .connect_timeout(Duration::from_secs(30))
        .danger_accept_invalid_certs(false)
        .default_headers(headers.clone())
        .build()
    {
        debug!("[LlmClient] HTTP客户端创建成功: 简化TLS配置");
        return client;
    }

    // 尝试3: 仅超时配置的客户端
    if let Ok(client) = ClientBuilder::new()
        .timeout(Duration::from_secs(timeout_secs))
        .default_headers(headers.clone())
        .build()
    {
        debug!("[LlmClient] HTTP客户端创建成功: 仅超时配置");
        return client;
    }

    // 尝试4: 最小配置的客户端（保证基本超时）
    if let Ok(client) = ClientBuilder::new()
        .timeout(Duration::from_secs(180))
        .default_headers(headers.clone())
        .build()
    {
        debug!("[LlmClient] HTTP客户端创建成功: 最小配置（超时180s）");
        return client;
    }

    // 最后回退: 默认客户端
    warn!("[LlmClient] 所有配置均失败，使用默认HTTP客户端（无超时配置），网络请求可能挂起");
    Client::new()
}

/// 安全截取前 max_bytes 个字节，避开 UTF-8 字符边界问题
fn truncate_at_char_boundary(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

// ============================================================================
// 回复解析辅助：把模型输出清理成可反序列化的 JSON 文本
// ============================================================================

/// 从模型回复中提取并修复 JSON 负载。
///
/// 依次执行：剥离 Markdown 代码围栏、从夹杂的提示语中截取 JSON
/// 数组/对象、清理尾随逗号与未闭合的字符串、补全因截断缺失的右括号。
/// 右括号多于左括号说明负载不是截断而是实际损坏，返回错误。
pub fn repair_json_reply(reply: &str) -> Result<String> {
    let body = strip_code_fences(reply);
    let span = extract_json_span(body).ok_or_else(|| AppError::llm("回复中未找到 JSON 内容"))?;
    let cleaned = clean_json_payload(span);
    complete_brackets(&cleaned)
}

/// 剥离 ```json ... ``` 或 ``` ... ``` 代码围栏，返回围栏内的正文
fn strip_code_fences(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed;
    };
    let after = &trimmed[start + 3..];
    let after = after.strip_prefix("json").unwrap_or(after);
    // 被截断的回复可能没有闭合围栏
    match after.find("```") {
        Some(end) => after[..end].trim(),
        None => after.trim(),
    }
}

/// 截取第一个 '[' / '{' 到最后一个 ']' / '}' 之间的内容。
/// 找不到任何右括号时视为截断负载，取到结尾交给后续步骤补全。
fn extract_json_span(text: &str) -> Option<&str> {
    let start = text.find(|c: char| c == '[' || c == '{')?;
    match text.rfind(|c: char| c == ']' || c == '}') {
        Some(end) if end > start => Some(&text[start..=end]),
        _ => Some(&text[start..]),
    }
}

/// 清理常见的输出瑕疵：闭合截断在字符串中间的引号，
/// 去掉右括号前以及负载结尾的尾随逗号。字符串内部的内容原样保留。
fn clean_json_payload(payload: &str) -> String {
    let mut out = String::with_capacity(payload.len() + 1);
    let mut in_string = false;
    let mut escaped = false;

    for ch in payload.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            out.push(ch);
            continue;
        }
        if ch == '"' {
            in_string = true;
            out.push(ch);
            continue;
        }
        if ch == ']' || ch == '}' {
            // 右括号前的尾随逗号非法
            while out.ends_with(|c: char| c.is_whitespace()) {
                out.pop();
            }
            if out.ends_with(',') {
                out.pop();
            }
        }
        out.push(ch);
    }

    if in_string {
        // 截断发生在字符串中间；悬空的转义反斜杠会吞掉补上的引号
        if escaped {
            out.pop();
        }
        out.push('"');
    }

    while out.ends_with(|c: char| c.is_whitespace()) {
        out.pop();
    }
    if out.ends_with(',') {
        out.pop();
    }
    out
}

/// 按左括号栈补全缺失的右括号。出现多余的右括号直接报错。
fn complete_brackets(payload: &str) -> Result<String> {
    let mut series: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for ch in payload.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' | '[' => series.push(ch),
            '}' | ']' => {
                if series.pop().is_none() {
                    return Err(AppError::llm("JSON 内容已损坏"));
                }
            }
            _ => {}
        }
    }

    let mut completed = payload.to_string();
    while let Some(token) = series.pop() {
        completed.push('\n');
        completed.push(if token == '[' { ']' } else { '}' });
    }
    Ok(completed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repair_strips_code_fences() {
        let reply = "以下是生成结果：\n```json\n[{\"name\": \"第一章\"}]\n```\n请查收。";
        let fixed = repair_json_reply(reply).unwrap();
        let value: Value = serde_json::from_str(&fixed).unwrap();
        assert_eq!(value[0]["name"], "第一章");
    }

    #[test]
    fn test_repair_extracts_from_prose() {
        let reply = "好的，结果如下。{\"names\": [\"绪论\"], \"uname\": \"绪论\", \"number\": 1} 已完成。";
        let fixed = repair_json_reply(reply).unwrap();
        let value: Value = serde_json::from_str(&fixed).unwrap();
        assert_eq!(value["uname"], "绪论");
    }

    #[test]
    fn test_repair_removes_trailing_comma() {
        let fixed = repair_json_reply("[{\"a\": 1}, {\"a\": 2},]").unwrap();
        let value: Value = serde_json::from_str(&fixed).unwrap();
        assert_eq!(value.as_array().map(|a| a.len()), Some(2));
    }

    #[test]
    fn test_repair_completes_truncated_array() {
        // 截断丢掉了第二个元素的尾部，保留完整的第一个元素
        let reply = "```json\n[{\"text\": \"光合作用发生在________。\"}, {\"text\": \"叶绿";
        let fixed = repair_json_reply(reply).unwrap();
        let value: Value = serde_json::from_str(&fixed).unwrap();
        let items = value.as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["text"], "光合作用发生在________。");
    }

    #[test]
    fn test_repair_closes_truncated_string() {
        let fixed = repair_json_reply("[{\"text\": \"中国的首").unwrap();
        let value: Value = serde_json::from_str(&fixed).unwrap();
        assert_eq!(value[0]["text"], "中国的首");
    }

    #[test]
    fn test_repair_ignores_brackets_inside_strings() {
        let reply = "[{\"text\": \"集合 {1, 2} 的子集个数是________。\", \"correct_answer\": \"4\"}]";
        let fixed = repair_json_reply(reply).unwrap();
        let value: Value = serde_json::from_str(&fixed).unwrap();
        assert_eq!(value[0]["correct_answer"], "4");
    }

    #[test]
    fn test_repair_rejects_surplus_closers() {
        let err = repair_json_reply("[{\"a\": 1}]}").unwrap_err();
        assert!(err.message.contains("JSON 内容已损坏"));
    }

    #[test]
    fn test_repair_no_json_found() {
        assert!(repair_json_reply("抱歉，我无法处理这段文本。").is_err());
    }

    #[test]
    fn test_repair_keeps_valid_payload_intact() {
        let payload = "[{\"name\": \"第一章\", \"number\": 1, \"bank\": []}]";
        let fixed = repair_json_reply(payload).unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(&fixed).unwrap(),
            serde_json::from_str::<Value>(payload).unwrap()
        );
    }

    #[test]
    fn test_api_config_defaults_when_absent() {
        let json = r#"{"apiKey": "sk-test", "baseUrl": "https://api.deepseek.com/v1", "model": "deepseek-chat"}"#;
        let config: ApiConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.temperature, 0.7);
        assert_eq!(config.max_output_tokens, 8192);
        assert_eq!(config.timeout_secs, 300);
    }
}
