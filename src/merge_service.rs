//! 文档合并
//!
//! 把多个文档的抽取文本拼成一个 .meg 纯文本文件，供建项目时当作
//! 单一源文件使用。支持的输入格式与文档解析器一致。

use crate::document_parser::DocumentParser;
use crate::models::AppError;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

type Result<T> = std::result::Result<T, AppError>;

/// 合并产物的扩展名
pub const MERGED_EXTENSION: &str = "meg";

/// 默认的合并产物文件名，带时间戳
pub fn default_merge_name() -> String {
    format!("Merge_{}.meg", chrono::Local::now().format("%Y%m%d_%H%M%S"))
}

/// 一次合并的结果统计
#[derive(Debug)]
pub struct MergeReport {
    /// 成功并入的文件数
    pub merged: usize,
    /// 抽取失败而被跳过的文件路径
    pub skipped: Vec<String>,
    pub output: PathBuf,
}

/// 合并多个文档为一个 .meg 文件
///
/// 逐个抽取文本，按行拼接后写入 `output`。单个文件抽取失败跳过并
/// 告警；全部失败或输入为空则报错，不产出空文件。
pub fn merge_files<P: AsRef<Path>>(paths: &[P], output: &Path) -> Result<MergeReport> {
    if paths.is_empty() {
        return Err(AppError::validation("请先添加要合并的文件"));
    }

    let parser = DocumentParser::new();
    let mut content = String::new();
    let mut merged = 0usize;
    let mut skipped = Vec::new();

    for path in paths {
        let path_str = path.as_ref().to_string_lossy().into_owned();
        match parser.extract_text_from_path(&path_str) {
            Ok(text) => {
                content.push_str(&text);
                content.push('\n');
                merged += 1;
            }
            Err(e) => {
                warn!("[MergeService] 跳过无法抽取的文件 {}: {}", path_str, e);
                skipped.push(path_str);
            }
        }
    }

    if merged == 0 {
        return Err(AppError::validation(format!(
            "所有文件都无法抽取文本，共 {} 个",
            skipped.len()
        )));
    }

    fs::write(output, &content)?;
    info!(
        "[MergeService] 合并完成: {} 个文件 -> {}（跳过 {} 个）",
        merged,
        output.display(),
        skipped.len()
    );

    Ok(MergeReport {
        merged,
        skipped,
        output: output.to_path_buf(),
    })
}
