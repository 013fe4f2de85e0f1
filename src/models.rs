use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// 背诵项目：一个 .rhproj 文件的内存形态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    #[serde(rename = "name", default)]
    pub project_name: Option<String>,

    /// 存储根目录，项目文件位于 <path>/<name>/<name>.rhproj
    #[serde(rename = "path", default)]
    pub storage_path: Option<String>,

    /// 生成题库时使用的源文件路径，多个文件以 ';' 分隔
    #[serde(rename = "bankfile", default)]
    pub question_bank_path: Option<String>,

    #[serde(rename = "chapter", default)]
    pub chapters: Option<Vec<Chapter>>,

    #[serde(rename = "last_accessed", default, skip_serializing_if = "Option::is_none")]
    pub last_accessed: Option<DateTime<Utc>>,
}

impl Project {
    pub fn new(name: impl Into<String>, storage_path: impl Into<String>) -> Self {
        Self {
            project_name: Some(name.into()),
            storage_path: Some(storage_path.into()),
            question_bank_path: None,
            chapters: Some(Vec::new()),
            last_accessed: None,
        }
    }

    /// 项目文件完整路径：<storage>/<name>/<name>.rhproj
    pub fn project_file_path(&self) -> Option<PathBuf> {
        let storage = self.storage_path.as_deref()?;
        let name = self.project_name.as_deref()?;
        Some(
            PathBuf::from(storage)
                .join(name)
                .join(format!("{}.rhproj", name)),
        )
    }

    /// 项目目录：<storage>/<name>
    pub fn project_dir(&self) -> Option<PathBuf> {
        let storage = self.storage_path.as_deref()?;
        let name = self.project_name.as_deref()?;
        Some(PathBuf::from(storage).join(name))
    }

    pub fn total_questions(&self) -> usize {
        self.chapters
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|c| c.questions.as_deref().unwrap_or_default().len())
            .sum()
    }

    /// 导出全部题目的干净副本（仅题干与正确答案），用于组卷
    pub fn export_questions(&self) -> Vec<Question> {
        self.chapters
            .as_deref()
            .unwrap_or_default()
            .iter()
            .flat_map(|c| c.questions.as_deref().unwrap_or_default())
            .map(|q| Question {
                status: None,
                text: q.text.clone(),
                user_answer: None,
                correct_answer: q.correct_answer.clone(),
                ef_value: default_ef_value(),
                review_tags: Vec::new(),
            })
            .collect()
    }

    pub fn find_chapter(&self, name: &str) -> Option<&Chapter> {
        self.chapters
            .as_deref()?
            .iter()
            .find(|c| c.name.as_deref() == Some(name))
    }

    pub fn find_chapter_mut(&mut self, name: &str) -> Option<&mut Chapter> {
        self.chapters
            .as_deref_mut()?
            .iter_mut()
            .find(|c| c.name.as_deref() == Some(name))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    #[serde(rename = "name", default)]
    pub name: Option<String>,

    #[serde(rename = "number", default)]
    pub number: i32,

    #[serde(rename = "bank", default)]
    pub questions: Option<Vec<Question>>,

    #[serde(rename = "know", default, skip_serializing_if = "Option::is_none")]
    pub knowledge_points: Option<Vec<KnowledgePoint>>,
}

impl Chapter {
    pub fn empty(name: impl Into<String>, number: i32) -> Self {
        Self {
            name: Some(name.into()),
            number,
            questions: Some(Vec::new()),
            knowledge_points: Some(Vec::new()),
        }
    }
}

/// 题目。status 为 None 表示未作答，Some(true)/Some(false) 表示答对/答错
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    #[serde(rename = "status", default)]
    pub status: Option<bool>,

    #[serde(rename = "text", default)]
    pub text: Option<String>,

    #[serde(rename = "user_answer", default)]
    pub user_answer: Option<String>,

    #[serde(rename = "correct_answer", default)]
    pub correct_answer: Option<String>,

    #[serde(rename = "ef_value", default = "default_ef_value")]
    pub ef_value: f64,

    #[serde(rename = "review_tag", default)]
    pub review_tags: Vec<ReviewTag>,
}

pub fn default_ef_value() -> f64 {
    2.5
}

impl Question {
    pub fn new(text: impl Into<String>, correct_answer: impl Into<String>) -> Self {
        Self {
            status: None,
            text: Some(text.into()),
            user_answer: None,
            correct_answer: Some(correct_answer.into()),
            ef_value: default_ef_value(),
            review_tags: Vec::new(),
        }
    }

    /// 清除作答记录（保留 EF 与复习历史）
    pub fn reset_answer(&mut self) {
        self.status = None;
        self.user_answer = None;
    }
}

/// 单次作答的复习记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewTag {
    #[serde(rename = "similarity")]
    pub similarity: f64,

    /// 相对作答速率（经过短答案线性变换与 1.125 封顶）
    #[serde(rename = "rate")]
    pub rate: f64,

    #[serde(rename = "time")]
    pub time: DateTime<Utc>,

    #[serde(rename = "q_value")]
    pub q_value: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgePoint {
    #[serde(rename = "name", default)]
    pub name: Option<String>,

    /// Markdown 格式的知识点内容
    #[serde(rename = "content", default)]
    pub content: Option<String>,

    #[serde(rename = "is_mastered", default)]
    pub is_mastered: bool,
}

/// LLM 章节聚类结果：把含义相近的原始章节名归并为一个统一章节
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterCluster {
    #[serde(rename = "names", default)]
    pub chapters: Option<Vec<String>>,

    #[serde(rename = "uname", default)]
    pub unified_name: Option<String>,

    #[serde(rename = "number", default)]
    pub number: i32,
}

/// 文档文本分块，带处理成功标记
#[derive(Debug, Clone)]
pub struct Chunk {
    pub index: usize,
    pub content: String,
    pub is_success: bool,
}

impl Chunk {
    pub fn new(index: usize, content: impl Into<String>) -> Self {
        Self {
            index,
            content: content.into(),
            is_success: false,
        }
    }
}

/// 导出归档中的清单文件（manifest.json）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(rename = "ProjectFile", default)]
    pub project_file: Option<String>,

    #[serde(rename = "BankFile", default)]
    pub bank_file: Option<String>,

    #[serde(rename = "Version", default)]
    pub version: Option<String>,

    /// 项目文件的 SHA-256 校验和（十六进制），旧版归档可能缺失
    #[serde(rename = "Checksum", default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentProject {
    #[serde(rename = "ProjectName", default)]
    pub project_name: Option<String>,

    #[serde(rename = "ProjectPath")]
    pub project_path: String,

    #[serde(rename = "LastAccessed")]
    pub last_accessed: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamSettings {
    #[serde(rename = "CourseNumber")]
    pub course_number: String,

    #[serde(rename = "ExamTimeMinutes")]
    pub exam_time_minutes: u32,

    #[serde(rename = "QuestionCount")]
    pub question_count: usize,

    #[serde(rename = "ScorePerQuestion")]
    pub score_per_question: u32,

    /// 章节名 → 权重（0..=100），全为 0 表示均匀随机抽题
    #[serde(rename = "ChapterWeights")]
    pub chapter_weights: std::collections::HashMap<String, f64>,
}

impl Default for ExamSettings {
    fn default() -> Self {
        Self {
            course_number: "XF114514".to_string(),
            exam_time_minutes: 60,
            question_count: 20,
            score_per_question: 5,
            chapter_weights: std::collections::HashMap::new(),
        }
    }
}

/// 分块生成失败后的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MissingStrategy {
    /// 放弃失败的分块，只保留成功结果
    Ignore,
    /// 重发失败的分块（有限轮次）
    Replay,
}

impl Default for MissingStrategy {
    fn default() -> Self {
        MissingStrategy::Ignore
    }
}

// 结构化错误处理
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AppErrorType {
    Validation,
    LLM,
    FileSystem,
    NotFound,
    Configuration,
    Network,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppError {
    pub error_type: AppErrorType,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl AppError {
    pub fn new(error_type: AppErrorType, message: impl Into<String>) -> Self {
        Self {
            error_type,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(
        error_type: AppErrorType,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error_type,
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(AppErrorType::Validation, message)
    }

    pub fn llm(message: impl Into<String>) -> Self {
        Self::new(AppErrorType::LLM, message)
    }

    pub fn file_system(message: impl Into<String>) -> Self {
        Self::new(AppErrorType::FileSystem, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(AppErrorType::NotFound, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(AppErrorType::Configuration, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(AppErrorType::Network, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(AppErrorType::Unknown, message)
    }
}

// 为AppError实现From trait以支持自动转换
impl From<String> for AppError {
    fn from(message: String) -> Self {
        AppError::validation(message)
    }
}

impl From<&str> for AppError {
    fn from(message: &str) -> Self {
        AppError::validation(message.to_string())
    }
}

// 实现Display trait
impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

// 实现Error trait
impl std::error::Error for AppError {}

// 实现从其他错误类型的转换
impl From<zip::result::ZipError> for AppError {
    fn from(err: zip::result::ZipError) -> Self {
        AppError::file_system(format!("ZIP操作错误: {}", err))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::unknown(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::validation(format!("JSON序列化错误: {}", err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::file_system(format!("文件系统错误: {}", err))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::network(format!("HTTP请求错误: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_file_path() {
        let project = Project::new("线代", "/tmp/recite");
        assert_eq!(
            project.project_file_path(),
            Some(PathBuf::from("/tmp/recite/线代/线代.rhproj"))
        );
    }

    #[test]
    fn test_project_file_path_missing_fields() {
        let mut project = Project::new("x", "/tmp");
        project.project_name = None;
        assert!(project.project_file_path().is_none());
    }

    #[test]
    fn test_question_roundtrip_preserves_field_names() {
        let q = Question::new("中国的首都是________。", "北京");
        let json = serde_json::to_value(&q).unwrap();
        assert!(json.get("text").is_some());
        assert!(json.get("correct_answer").is_some());
        assert!(json.get("ef_value").is_some());
        assert!(json.get("review_tag").is_some());
        let back: Question = serde_json::from_value(json).unwrap();
        assert_eq!(back.correct_answer.as_deref(), Some("北京"));
        assert_eq!(back.ef_value, 2.5);
    }

    #[test]
    fn test_question_default_ef_when_absent() {
        // 旧版项目文件没有 ef_value/review_tag 字段
        let json = serde_json::json!({
            "status": null,
            "text": "t",
            "user_answer": null,
            "correct_answer": "a"
        });
        let q: Question = serde_json::from_value(json).unwrap();
        assert_eq!(q.ef_value, 2.5);
        assert!(q.review_tags.is_empty());
    }

    #[test]
    fn test_export_questions_strips_records() {
        let mut project = Project::new("p", "/tmp");
        let mut q = Question::new("题", "答");
        q.status = Some(true);
        q.user_answer = Some("我的答案".to_string());
        q.ef_value = 1.3;
        project.chapters = Some(vec![Chapter {
            name: Some("第一章".to_string()),
            number: 1,
            questions: Some(vec![q]),
            knowledge_points: None,
        }]);

        let exported = project.export_questions();
        assert_eq!(exported.len(), 1);
        assert!(exported[0].status.is_none());
        assert!(exported[0].user_answer.is_none());
        assert_eq!(exported[0].ef_value, 2.5);
    }

    #[test]
    fn test_chapter_serde_names() {
        let c = Chapter::empty("绪论", 1);
        let json = serde_json::to_value(&c).unwrap();
        assert!(json.get("bank").is_some());
        assert!(json.get("know").is_some());
    }

    #[test]
    fn test_manifest_checksum_optional() {
        let json = serde_json::json!({
            "ProjectFile": "高数_exp.rhproj",
            "BankFile": "高数.pdf",
            "Version": "v2"
        });
        let manifest: Manifest = serde_json::from_value(json).unwrap();
        assert!(manifest.checksum.is_none());
        assert_eq!(manifest.project_file.as_deref(), Some("高数_exp.rhproj"));
    }

    #[test]
    fn test_app_error_display() {
        let err = AppError::validation("字段缺失");
        assert_eq!(err.to_string(), "字段缺失");
    }
}
