use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

// PPTX 解析
use pptx_to_md::{ParserConfig, PptxContainer};

/// 文档文件大小限制 (200MB)
const MAX_DOCUMENT_SIZE: usize = 200 * 1024 * 1024;

/// 文档解析错误枚举
#[derive(Debug, Serialize, Deserialize)]
pub enum ParsingError {
    /// 文件不存在或无法访问
    FileNotFound(String),
    /// IO错误
    IoError(String),
    /// 不支持的文件格式
    UnsupportedFormat(String),
    /// DOCX解析错误
    DocxParsingError(String),
    /// PDF解析错误
    PdfParsingError(String),
    /// PPTX解析错误
    PptxParsingError(String),
    /// 文件过大错误
    FileTooLarge(String),
    /// 其他错误
    Other(String),
}

impl std::fmt::Display for ParsingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParsingError::FileNotFound(msg) => write!(f, "文件未找到: {}", msg),
            ParsingError::IoError(msg) => write!(f, "IO错误: {}", msg),
            ParsingError::UnsupportedFormat(msg) => write!(f, "不支持的文件格式: {}", msg),
            ParsingError::DocxParsingError(msg) => write!(f, "DOCX解析错误: {}", msg),
            ParsingError::PdfParsingError(msg) => write!(f, "PDF解析错误: {}", msg),
            ParsingError::PptxParsingError(msg) => write!(f, "PPTX解析错误: {}", msg),
            ParsingError::FileTooLarge(msg) => write!(f, "文件过大: {}", msg),
            ParsingError::Other(msg) => write!(f, "其他错误: {}", msg),
        }
    }
}

impl std::error::Error for ParsingError {}

/// 从IO错误转换
impl From<std::io::Error> for ParsingError {
    fn from(error: std::io::Error) -> Self {
        ParsingError::IoError(error.to_string())
    }
}

/// 支持的文档扩展名（小写）
pub const SUPPORTED_EXTENSIONS: [&str; 6] = ["docx", "pdf", "pptx", "txt", "md", "meg"];

/// 判断文件扩展名是否在支持范围内
pub fn is_supported_document(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// 文档解析器结构体
pub struct DocumentParser;

impl DocumentParser {
    /// 创建新的文档解析器实例
    pub fn new() -> Self {
        DocumentParser
    }

    /// 检查文件大小是否超出限制
    fn check_file_size(&self, size: usize) -> Result<(), ParsingError> {
        if size > MAX_DOCUMENT_SIZE {
            return Err(ParsingError::FileTooLarge(format!(
                "文件大小 {}MB 超过限制 {}MB",
                size / (1024 * 1024),
                MAX_DOCUMENT_SIZE / (1024 * 1024)
            )));
        }
        Ok(())
    }

    /// 安全读取文件：先检查大小再读入内存
    fn read_file_safely(&self, file_path: &str) -> Result<Vec<u8>, ParsingError> {
        let metadata = fs::metadata(file_path)?;
        self.check_file_size(metadata.len() as usize)?;

        let bytes = fs::read(file_path)?;
        Ok(bytes)
    }

    /// 从文件路径提取文本
    pub fn extract_text_from_path(&self, file_path: &str) -> Result<String, ParsingError> {
        let path = Path::new(file_path);

        // 检查文件是否存在
        if !path.exists() {
            return Err(ParsingError::FileNotFound(file_path.to_string()));
        }

        // 根据文件扩展名确定处理方式
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .ok_or_else(|| ParsingError::UnsupportedFormat("无法确定文件扩展名".to_string()))?
            .to_lowercase();

        match extension.as_str() {
            "docx" => self.extract_docx_from_path(file_path),
            "pdf" => self.extract_pdf_from_path(file_path),
            "pptx" => self.extract_pptx_from_path(file_path),
            // meg 是合并产物，本质是纯文本
            "txt" | "md" | "meg" => self.extract_txt_from_path(file_path),
            _ => Err(ParsingError::UnsupportedFormat(format!(
                "不支持的文件格式: .{}",
                extension
            ))),
        }
    }

    /// 从DOCX文件路径提取文本
    fn extract_docx_from_path(&self, file_path: &str) -> Result<String, ParsingError> {
        let bytes = self.read_file_safely(file_path)?;

        let docx = docx_rs::read_docx(&bytes)
            .map_err(|e| ParsingError::DocxParsingError(e.to_string()))?;

        Ok(self.extract_docx_text(&docx))
    }

    /// 从DOCX文档对象提取文本内容（段落/表格/目录）
    fn extract_docx_text(&self, docx: &docx_rs::Docx) -> String {
        let mut text_content = String::with_capacity(8192);

        for child in &docx.document.children {
            match child {
                docx_rs::DocumentChild::Paragraph(para) => {
                    let line = Self::extract_paragraph_text(para);
                    if !line.trim().is_empty() {
                        text_content.push_str(&line);
                        text_content.push('\n');
                    }
                }
                docx_rs::DocumentChild::Table(table) => {
                    Self::extract_table_text(table, &mut text_content);
                    text_content.push('\n');
                }
                docx_rs::DocumentChild::TableOfContents(toc) => {
                    for item in &toc.items {
                        if !item.text.is_empty() {
                            text_content.push_str(&format!("{}\n", item.text));
                        }
                    }
                }
                _ => {}
            }
        }

        text_content.trim().to_string()
    }

    /// 从段落中提取纯文本（Run / Hyperlink / 修订插入内容）
    fn extract_paragraph_text(para: &docx_rs::Paragraph) -> String {
        let mut line = String::new();
        for child in &para.children {
            match child {
                docx_rs::ParagraphChild::Run(run) => {
                    Self::extract_run_text(run, &mut line);
                }
                docx_rs::ParagraphChild::Hyperlink(hyperlink) => {
                    for run in &hyperlink.children {
                        if let docx_rs::ParagraphChild::Run(r) = run {
                            Self::extract_run_text(r, &mut line);
                        }
                    }
                }
                docx_rs::ParagraphChild::Insert(ins) => {
                    for ic in &ins.children {
                        if let docx_rs::InsertChild::Run(r) = ic {
                            Self::extract_run_text(r, &mut line);
                        }
                    }
                }
                // 修订删除的内容不进题库
                _ => {}
            }
        }
        line
    }

    /// 从 Run 中提取文本（Text / Tab / Break）
    fn extract_run_text(run: &docx_rs::Run, out: &mut String) {
        for rc in &run.children {
            match rc {
                docx_rs::RunChild::Text(t) => {
                    out.push_str(&t.text);
                }
                docx_rs::RunChild::Tab(_) => {
                    out.push('\t');
                }
                docx_rs::RunChild::Break(_) => {
                    out.push('\n');
                }
                _ => {}
            }
        }
    }

    /// 从表格中提取文本，按行输出竖线分隔的单元格
    fn extract_table_text(table: &docx_rs::Table, out: &mut String) {
        for tc in &table.rows {
            if let docx_rs::TableChild::TableRow(row) = tc {
                let mut cells: Vec<String> = Vec::new();
                for rc in &row.cells {
                    if let docx_rs::TableRowChild::TableCell(cell) = rc {
                        let mut cell_text = String::new();
                        for cc in &cell.children {
                            if let docx_rs::TableCellContent::Paragraph(para) = cc {
                                let t = Self::extract_paragraph_text(para);
                                if !t.trim().is_empty() {
                                    if !cell_text.is_empty() {
                                        cell_text.push(' ');
                                    }
                                    cell_text.push_str(t.trim());
                                }
                            }
                        }
                        cells.push(cell_text);
                    }
                }
                if cells.iter().any(|c| !c.is_empty()) {
                    out.push_str(&format!("| {} |\n", cells.join(" | ")));
                }
            }
        }
    }

    /// 从PDF文件路径提取文本
    fn extract_pdf_from_path(&self, file_path: &str) -> Result<String, ParsingError> {
        let metadata = fs::metadata(file_path)?;
        self.check_file_size(metadata.len() as usize)?;

        // pdf-extract 遇到少数非标准字体编码会 panic，包住转成错误
        let path = file_path.to_string();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            pdf_extract::extract_text(&path)
        }));

        match result {
            Ok(Ok(text)) => Ok(text.trim().to_string()),
            Ok(Err(e)) => Err(ParsingError::PdfParsingError(e.to_string())),
            Err(_) => Err(ParsingError::PdfParsingError(
                "PDF 字体编码不受支持".to_string(),
            )),
        }
    }

    /// 从PPTX文件路径提取文本（Markdown格式）
    fn extract_pptx_from_path(&self, file_path: &str) -> Result<String, ParsingError> {
        let metadata = fs::metadata(file_path)?;
        self.check_file_size(metadata.len() as usize)?;

        // 使用 pptx-to-md 解析（只支持从路径打开）
        let config = ParserConfig::builder()
            .extract_images(false) // 不提取图片，只要文本
            .build();

        let mut container = PptxContainer::open(Path::new(file_path), config)
            .map_err(|e| ParsingError::PptxParsingError(format!("无法打开PPTX: {:?}", e)))?;

        // 解析所有幻灯片
        let slides = container
            .parse_all()
            .map_err(|e| ParsingError::PptxParsingError(format!("解析PPTX失败: {:?}", e)))?;

        // 转换为 Markdown
        let mut markdown = String::with_capacity(8192);
        for slide in slides {
            if let Some(md_content) = slide.convert_to_md() {
                markdown.push_str(&md_content);
                markdown.push_str("\n\n");
            }
        }

        Ok(markdown.trim().to_string())
    }

    /// 从TXT文件路径提取文本
    fn extract_txt_from_path(&self, file_path: &str) -> Result<String, ParsingError> {
        let bytes = self.read_file_safely(file_path)?;
        self.extract_txt_from_bytes(bytes)
    }

    /// 从TXT字节流提取文本
    fn extract_txt_from_bytes(&self, bytes: Vec<u8>) -> Result<String, ParsingError> {
        // 尝试UTF-8解码，先不消费bytes
        match std::str::from_utf8(&bytes) {
            Ok(text) => Ok(text.trim().to_string()),
            Err(_) => {
                // 旧教材资料常见 GBK 编码，先按 GBK 解，仍失败再损耗式转换
                let (decoded, _, had_errors) = encoding_rs::GBK.decode(&bytes);
                if !had_errors {
                    Ok(decoded.trim().to_string())
                } else {
                    Ok(String::from_utf8_lossy(&bytes).trim().to_string())
                }
            }
        }
    }
}
