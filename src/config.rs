//! 应用配置
//!
//! TOML 配置文件与环境变量两层加载，环境变量优先。变量名以 `RECITE` 为
//! 前缀、双下划线分层，例如 `RECITE__LLM__API_KEY` 对应 `[llm] api_key`。
//! 支持 .env 文件（dotenvy）。

use crate::llm_client::ApiConfig;
use crate::models::{AppError, MissingStrategy};
use crate::question_bank_service::DEFAULT_CONCURRENCY;
use crate::quiz_service::{DEFAULT_R_STANDARD, DEFAULT_WRONG_STREAK_WINDOW};
use crate::text_chunker::DEFAULT_CHUNK_SIZE;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

type Result<T> = std::result::Result<T, AppError>;

/// 环境变量前缀
const ENV_PREFIX: &str = "RECITE";
/// 默认配置文件（相对工作目录）
const DEFAULT_CONFIG_FILE: &str = "recite.toml";
/// 配置格式版本号
const CONFIG_VERSION: &str = "v2";

/// DeepSeek 兼容端点的默认值
pub const DEFAULT_BASE_URL: &str = "https://api.deepseek.com";
pub const DEFAULT_MODEL: &str = "deepseek-chat";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 配置格式版本
    pub version: String,
    pub llm: LlmSection,
    pub generation: GenerationSection,
    pub quiz: QuizSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 为空视为未配置
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSection {
    pub chunk_size: usize,
    pub concurrency: usize,
    pub missing_strategy: MissingStrategy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuizSection {
    /// 语速基准（字/秒），用于答题速度比值
    pub r_standard: f64,
    /// 连错预警窗口长度
    pub wrong_streak_window: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION.to_string(),
            llm: LlmSection::default(),
            generation: GenerationSection::default(),
            quiz: QuizSection::default(),
        }
    }
}

impl Default for LlmSection {
    fn default() -> Self {
        // 温度等缺省值与 ApiConfig 保持同源
        let api = ApiConfig::new("", DEFAULT_BASE_URL, DEFAULT_MODEL);
        Self {
            api_key: api.api_key,
            base_url: api.base_url,
            model: api.model,
            temperature: api.temperature,
            max_output_tokens: api.max_output_tokens,
            timeout_secs: api.timeout_secs,
        }
    }
}

impl Default for GenerationSection {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            missing_strategy: MissingStrategy::default(),
        }
    }
}

impl Default for QuizSection {
    fn default() -> Self {
        Self {
            r_standard: DEFAULT_R_STANDARD,
            wrong_streak_window: DEFAULT_WRONG_STREAK_WINDOW,
        }
    }
}

impl AppConfig {
    /// 从默认位置（./recite.toml + 环境变量）加载
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(DEFAULT_CONFIG_FILE))
    }

    /// 从指定配置文件与环境变量加载，环境变量覆盖文件
    pub fn load_from(config_file: &Path) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder();
        if config_file.exists() {
            debug!("[Config] 读取配置文件: {}", config_file.display());
            builder = builder.add_source(config::File::from(config_file.to_path_buf()));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let loaded = builder
            .build()
            .map_err(|e| AppError::configuration(format!("配置加载失败: {}", e)))?;
        let mut app: AppConfig = loaded
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("配置解析失败: {}", e)))?;

        // 直连环境变量兜底，沿用服务商文档里的变量名
        if app.llm.api_key.is_empty() {
            if let Ok(key) = std::env::var("DEEPSEEK_API_KEY") {
                app.llm.api_key = key;
            }
        }

        app.validate()?;
        Ok(app)
    }

    fn validate(&self) -> Result<()> {
        if self.generation.chunk_size == 0 {
            return Err(AppError::configuration("chunk_size 必须大于 0"));
        }
        if self.generation.concurrency == 0 {
            return Err(AppError::configuration("concurrency 必须大于 0"));
        }
        if self.quiz.r_standard <= 0.0 {
            return Err(AppError::configuration("r_standard 必须为正数"));
        }
        if self.quiz.wrong_streak_window == 0 {
            return Err(AppError::configuration("wrong_streak_window 必须大于 0"));
        }
        Ok(())
    }

    /// 组装 LLM 客户端配置；API Key 未配置时报错
    pub fn api_config(&self) -> Result<ApiConfig> {
        if self.llm.api_key.trim().is_empty() {
            return Err(AppError::configuration(
                "尚未配置 API Key，请在配置文件或 RECITE__LLM__API_KEY 中设置",
            ));
        }
        Ok(ApiConfig {
            api_key: self.llm.api_key.clone(),
            base_url: self.llm.base_url.clone(),
            model: self.llm.model.clone(),
            temperature: self.llm.temperature,
            max_output_tokens: self.llm.max_output_tokens,
            timeout_secs: self.llm.timeout_secs,
        })
    }
}
