// ReciteCore library entry
// 抽背复习核心引擎：文档取题、LLM 题库生成、抽背/复习/模拟考试与项目打包。

pub mod answer_grading;
pub mod config;
pub mod document_parser;
pub mod exam_service;
pub mod json_validator;
pub mod latest_buffer;
pub mod llm_client;
pub mod logging;
pub mod merge_service;
pub mod models;
pub mod project_manager;
pub mod question_bank_service;
pub mod quiz_service;
pub mod similarity;
pub mod spaced_repetition; // SM-2 风格的 EF 间隔重复
pub mod text_chunker;
