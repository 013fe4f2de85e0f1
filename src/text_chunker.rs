//! 文本分块
//!
//! 把抽取出的文档全文切成固定大小的分块，供题库生成管线对每个
//! 分块独立调用模型。按 Unicode 字符计数切分，最后一块允许不足。

use crate::models::Chunk;

/// 默认分块大小（字符数）。分块过大时模型输出容易被截断。
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// 按字符数等宽切分文本
///
/// 产出 `ceil(len / chunk_size)` 个分块，编号从 0 开始连续，
/// 全部标记为未处理。空文本或 `chunk_size` 为 0 时产出空列表。
pub fn chunk_text(text: &str, chunk_size: usize) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    if chunk_size == 0 {
        return chunks;
    }

    let chars: Vec<char> = text.chars().collect();
    let total_len = chars.len();
    if total_len == 0 {
        return chunks;
    }

    let mut start = 0;
    let mut index = 0;
    while start < total_len {
        let end = (start + chunk_size).min(total_len);
        let content: String = chars[start..end].iter().collect();
        chunks.push(Chunk::new(index, content));
        start = end;
        index += 1;
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_text() {
        assert!(chunk_text("", DEFAULT_CHUNK_SIZE).is_empty());
    }

    #[test]
    fn test_single_chunk_exact_fit() {
        let text = "甲".repeat(500);
        let chunks = chunk_text(&text, 500);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].content.chars().count(), 500);
        assert!(!chunks[0].is_success);
    }

    #[test]
    fn test_last_chunk_short() {
        let text = "乙".repeat(501);
        let chunks = chunk_text(&text, 500);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].index, 1);
        assert_eq!(chunks[1].content.chars().count(), 1);
    }

    #[test]
    fn test_chunks_cover_text_in_order() {
        let text = "自然数包括零与正整数。".repeat(120);
        let chunks = chunk_text(&text, 500);

        let expected = (text.chars().count() + 499) / 500;
        assert_eq!(chunks.len(), expected);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
        }

        let rejoined: String = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(rejoined, text);
    }

    #[test]
    fn test_zero_chunk_size() {
        assert!(chunk_text("文本", 0).is_empty());
    }
}
