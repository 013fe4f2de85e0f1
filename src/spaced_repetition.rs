//! 间隔重复算法模块 - SM-2 易度因子实现
//!
//! 本模块维护每道题目的易度因子（EF），并按 EF 挑选复习题集。
//! 与完整的 SM-2 不同，这里不排期复习日期：抽背场景下用户随时开始
//! 复习，EF 仅用于决定"哪些题先复习"。
//!
//! ## 算法公式
//! - 易度因子更新：EF' = EF + (0.1 - (5 - q) × (0.08 + (5 - q) × 0.02))
//! - 最小易度因子：1.3
//! - 不及格（q < 3）：EF' = EF - 0.2
//!
//! ## 评分标准
//! - 0: 完全不记得（blackout）
//! - 1: 错误答案，但看到正确答案后有印象
//! - 2: 错误答案，但正确答案感觉容易记住
//! - 3: 正确答案，但需要很大努力回忆（勉强通过）
//! - 4: 正确答案，稍有犹豫（良好）
//! - 5: 完美回忆（完美）

use crate::models::{Project, Question};
use rand::Rng;
use tracing::debug;

// ============================================================================
// 常量定义
// ============================================================================

/// 最小易度因子
pub const MIN_EASE_FACTOR: f64 = 1.3;

/// 默认易度因子（新题目初始值）
pub const DEFAULT_EASE_FACTOR: f64 = 2.5;

/// 评分及格线（>= 3 表示通过）
pub const PASSING_GRADE: i32 = 3;

/// EF 更新所需的最少复习记录数，记录不足时评分还不可靠
pub const MIN_REVIEW_HISTORY: usize = 2;

/// 题目总数不超过该值时，复习集直接取全部题目
pub const FULL_REVIEW_THRESHOLD: usize = 20;

// ============================================================================
// SM-2 算法实现
// ============================================================================

/// SM-2 原始公式：EF' = EF + (0.1 - (5 - q) × (0.08 + (5 - q) × 0.02))
///
/// 不做下限截断，调用方负责 clamp 到 [`MIN_EASE_FACTOR`]。
pub fn calculate_ef_value(ef: f64, q: i32) -> f64 {
    let q = q as f64;
    ef + (0.1 - (5.0 - q) * (0.08 + (5.0 - q) * 0.02))
}

/// 更新题目的易度因子
///
/// 复习记录少于 [`MIN_REVIEW_HISTORY`] 条时不更新（样本太少）。
/// q >= 3 按公式更新，q < 3 直接减 0.2 惩罚；两种情况都截断到
/// 最小值 1.3，并保留两位小数。
pub fn update_ef_value(question: &mut Question, q: i32) {
    if question.review_tags.len() < MIN_REVIEW_HISTORY {
        return;
    }

    let old_ef = question.ef_value;
    let new_ef = if q >= PASSING_GRADE {
        calculate_ef_value(old_ef, q).max(MIN_EASE_FACTOR)
    } else {
        (old_ef - 0.2).max(MIN_EASE_FACTOR)
    };

    question.ef_value = (new_ef * 100.0).round() / 100.0;

    debug!(
        "[SM2] EF updated: {:.2} -> {:.2} (q={})",
        old_ef, question.ef_value, q
    );
}

/// 启发式质量评分：由相对作答速率与 Levenshtein 相似度估计 q 值
///
/// 相似度是主导特征（按百分制分档），速率作修正：达到基准速率的
/// 及格作答加一档，过慢的作答降一档。两个输入上均单调。
pub fn estimate_q_value(rate_relative: f64, similarity: f64) -> i32 {
    let scaled = similarity * 100.0;

    let mut q = if scaled >= 95.0 {
        5
    } else if scaled >= 85.0 {
        4
    } else if scaled >= 70.0 {
        3
    } else if scaled >= 50.0 {
        2
    } else if scaled >= 25.0 {
        1
    } else {
        0
    };

    if q >= PASSING_GRADE && rate_relative >= 1.0 {
        q = (q + 1).min(5);
    } else if q > 0 && rate_relative < 0.5 {
        q -= 1;
    }

    q
}

/// 挑选复习题的位置（章节下标, 题目下标）
///
/// 题目总数不超过 [`FULL_REVIEW_THRESHOLD`] 时返回全部位置并保留
/// 作答状态，否则按 EF 升序（低 EF 即薄弱题优先，同值随机打散）取
/// `count` 个。抽背会话按位置直接读写项目内的题目，复习产生的 EF
/// 变化随项目一起保存。
pub fn select_review_indices(project: &Project, count: usize) -> Vec<(usize, usize)> {
    let chapters = project.chapters.as_deref().unwrap_or_default();
    let all: Vec<(usize, usize, f64)> = chapters
        .iter()
        .enumerate()
        .flat_map(|(chapter_index, chapter)| {
            chapter
                .questions
                .as_deref()
                .unwrap_or_default()
                .iter()
                .enumerate()
                .map(move |(question_index, q)| (chapter_index, question_index, q.ef_value))
        })
        .collect();

    if all.len() <= FULL_REVIEW_THRESHOLD {
        return all.into_iter().map(|(ci, qi, _)| (ci, qi)).collect();
    }

    let mut rng = rand::thread_rng();
    let mut keyed: Vec<(f64, u32, (usize, usize))> = all
        .into_iter()
        .map(|(ci, qi, ef)| (ef, rng.gen::<u32>(), (ci, qi)))
        .collect();
    keyed.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

    keyed
        .into_iter()
        .take(count)
        .map(|(_, _, position)| position)
        .collect()
}

/// 生成复习题集的独立副本
///
/// 选题逻辑同 [`select_review_indices`]；走 EF 挑选路径时会清除
/// 副本上的作答记录，小题量全取路径保留原状态以便续答。
pub fn generate_review(project: &Project, count: usize) -> Vec<Question> {
    let total = project.total_questions();
    let chapters = project.chapters.as_deref().unwrap_or_default();

    let mut selected: Vec<Question> = select_review_indices(project, count)
        .into_iter()
        .filter_map(|(ci, qi)| chapters.get(ci)?.questions.as_deref()?.get(qi).cloned())
        .collect();

    if total > FULL_REVIEW_THRESHOLD {
        for question in &mut selected {
            question.reset_answer();
        }
    }

    debug!("[SM2] Review set: {} questions selected", selected.len());

    selected
}

// ============================================================================
// 单元测试
// ============================================================================
