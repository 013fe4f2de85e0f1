//! 文本相似度模块
//!
//! 答案判定使用的全部相似度指标：词级 TF 余弦、字符级 Jaccard、
//! Levenshtein 相似度，以及模糊匹配（重合系数 + 最长公共子序列 +
//! 最长公共子串的平均距离）。全部按 Unicode 字符计算，中日韩文字
//! 逐字成词，拉丁字母与数字按连续串成词。

use std::collections::{HashMap, HashSet};

// ============================================================================
// 余弦相似度
// ============================================================================

/// 计算两段文本的余弦相似度
///
/// 任一侧为空白返回 0.0。分词后任一侧不超过 2 个词时，词级向量
/// 维度太低，改用混合打分：词级相似度 × 0.6 + 字符级 Jaccard × 0.4。
pub fn cosine_similarity(text_a: &str, text_b: &str) -> f64 {
    if text_a.trim().is_empty() || text_b.trim().is_empty() {
        return 0.0;
    }

    let tokens_a = tokenize(text_a);
    let tokens_b = tokenize(text_b);

    // 短文本退化为词级与字符级的加权混合
    if tokens_a.len() <= 2 || tokens_b.len() <= 2 {
        let word_score = word_level_similarity(&tokens_a, &tokens_b);
        let char_score = char_jaccard(text_a, text_b);
        return word_score * 0.6 + char_score * 0.4;
    }

    word_level_similarity(&tokens_a, &tokens_b)
}

/// 字符级 Jaccard 相似度：去重后非空白字符集合的交并比
pub fn char_jaccard(text_a: &str, text_b: &str) -> f64 {
    let chars_a: HashSet<char> = text_a.chars().filter(|c| !c.is_whitespace()).collect();
    let chars_b: HashSet<char> = text_b.chars().filter(|c| !c.is_whitespace()).collect();

    if chars_a.is_empty() || chars_b.is_empty() {
        return 0.0;
    }

    let intersection = chars_a.intersection(&chars_b).count();
    let union = chars_a.union(&chars_b).count();

    intersection as f64 / union as f64
}

/// 词级余弦相似度：并集词表上的词频向量夹角
fn word_level_similarity(tokens_a: &[String], tokens_b: &[String]) -> f64 {
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }

    let mut vocabulary: Vec<&str> = tokens_a
        .iter()
        .chain(tokens_b.iter())
        .map(|s| s.as_str())
        .collect();
    vocabulary.sort_unstable();
    vocabulary.dedup();

    let freq_a = term_frequencies(tokens_a);
    let freq_b = term_frequencies(tokens_b);

    let mut dot = 0.0;
    let mut mag_a = 0.0;
    let mut mag_b = 0.0;
    for term in &vocabulary {
        let a = freq_a.get(term).copied().unwrap_or(0) as f64;
        let b = freq_b.get(term).copied().unwrap_or(0) as f64;
        dot += a * b;
        mag_a += a * a;
        mag_b += b * b;
    }

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a.sqrt() * mag_b.sqrt())
}

fn term_frequencies(tokens: &[String]) -> HashMap<&str, usize> {
    let mut freq = HashMap::new();
    for token in tokens {
        *freq.entry(token.as_str()).or_insert(0) += 1;
    }
    freq
}

/// 分词：CJK 文字逐字成词，字母数字按连续串成词，其余字符作分隔
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut word = String::new();

    for ch in text.chars() {
        if is_cjk_char(ch) {
            if !word.is_empty() {
                tokens.push(std::mem::take(&mut word));
            }
            tokens.push(ch.to_string());
        } else if ch.is_alphanumeric() {
            word.push(ch);
        } else if !word.is_empty() {
            tokens.push(std::mem::take(&mut word));
        }
    }
    if !word.is_empty() {
        tokens.push(word);
    }

    tokens
}

fn is_cjk_char(ch: char) -> bool {
    matches!(ch,
        '\u{4E00}'..='\u{9FFF}'    // CJK 统一汉字
        | '\u{3400}'..='\u{4DBF}'  // 扩展 A
        | '\u{F900}'..='\u{FAFF}'  // 兼容汉字
    )
}

// ============================================================================
// Levenshtein 相似度
// ============================================================================

/// Levenshtein 相似度：1 - 编辑距离 / 最大长度
///
/// 两侧都为空返回 1.0，仅一侧为空返回 0.0。
pub fn levenshtein_similarity(text_a: &str, text_b: &str) -> f64 {
    if text_a.is_empty() && text_b.is_empty() {
        return 1.0;
    }
    if text_a.is_empty() || text_b.is_empty() {
        return 0.0;
    }

    let len_a = text_a.chars().count();
    let len_b = text_b.chars().count();
    let max_len = len_a.max(len_b);

    let distance = levenshtein_distance(text_a, text_b);
    1.0 - distance as f64 / max_len as f64
}

/// 经典 DP 编辑距离，按 Unicode 字符计
fn levenshtein_distance(s1: &str, s2: &str) -> usize {
    let chars1: Vec<char> = s1.chars().collect();
    let chars2: Vec<char> = s2.chars().collect();
    let len1 = chars1.len();
    let len2 = chars2.len();

    if len1 == 0 {
        return len2;
    }
    if len2 == 0 {
        return len1;
    }

    let mut matrix = vec![vec![0usize; len2 + 1]; len1 + 1];
    for (i, row) in matrix.iter_mut().enumerate() {
        row[0] = i;
    }
    for (j, cell) in matrix[0].iter_mut().enumerate() {
        *cell = j;
    }

    for i in 1..=len1 {
        for j in 1..=len2 {
            let cost = if chars1[i - 1] == chars2[j - 1] { 0 } else { 1 };
            matrix[i][j] = (matrix[i - 1][j] + 1)
                .min(matrix[i][j - 1] + 1)
                .min(matrix[i - 1][j - 1] + cost);
        }
    }

    matrix[len1][len2]
}

// ============================================================================
// 模糊匹配
// ============================================================================

/// 模糊匹配容差档位，阈值越小要求越严
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuzzyTolerance {
    Strong,
    Normal,
    Weak,
}

impl FuzzyTolerance {
    fn threshold(&self) -> f64 {
        match self {
            FuzzyTolerance::Strong => 0.25,
            FuzzyTolerance::Normal => 0.5,
            FuzzyTolerance::Weak => 0.75,
        }
    }
}

/// 模糊匹配：三个归一化距离的平均值低于容差阈值则视为匹配
///
/// 距离分量：1 - 重合系数、1 - 最长公共子序列占比、1 - 最长公共
/// 子串占比，占比都以较短一侧的长度为分母。比较前两侧都转大写，
/// 较短一侧长度为 0 时不匹配。
pub fn fuzzy_match(text_a: &str, text_b: &str, tolerance: FuzzyTolerance) -> bool {
    let a: Vec<char> = text_a.to_uppercase().chars().collect();
    let b: Vec<char> = text_b.to_uppercase().chars().collect();

    let min_len = a.len().min(b.len());
    if min_len == 0 {
        return false;
    }

    let overlap = overlap_coefficient(&a, &b);
    let subsequence = longest_common_subsequence_len(&a, &b) as f64 / min_len as f64;
    let substring = longest_common_substring_len(&a, &b) as f64 / min_len as f64;

    let distances = [1.0 - overlap, 1.0 - subsequence, 1.0 - substring];
    let average = distances.iter().sum::<f64>() / distances.len() as f64;

    average < tolerance.threshold()
}

/// 重合系数：去重公共字符数 / 较短一侧的总长度
fn overlap_coefficient(a: &[char], b: &[char]) -> f64 {
    let set_a: HashSet<char> = a.iter().copied().collect();
    let set_b: HashSet<char> = b.iter().copied().collect();
    let common = set_a.intersection(&set_b).count();

    common as f64 / a.len().min(b.len()) as f64
}

fn longest_common_subsequence_len(a: &[char], b: &[char]) -> usize {
    let mut dp = vec![vec![0usize; b.len() + 1]; a.len() + 1];
    for i in 1..=a.len() {
        for j in 1..=b.len() {
            dp[i][j] = if a[i - 1] == b[j - 1] {
                dp[i - 1][j - 1] + 1
            } else {
                dp[i - 1][j].max(dp[i][j - 1])
            };
        }
    }
    dp[a.len()][b.len()]
}

fn longest_common_substring_len(a: &[char], b: &[char]) -> usize {
    let mut best = 0usize;
    // 滚动一行，prev 保存左上角的值
    let mut dp = vec![0usize; b.len() + 1];
    for i in 1..=a.len() {
        let mut prev = 0usize;
        for j in 1..=b.len() {
            let current = dp[j];
            if a[i - 1] == b[j - 1] {
                dp[j] = prev + 1;
                best = best.max(dp[j]);
            } else {
                dp[j] = 0;
            }
            prev = current;
        }
    }
    best
}

// ============================================================================
// 单元测试
// ============================================================================
