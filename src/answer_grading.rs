//! 答案判定与作答记录
//!
//! 判定走两条通路：模糊匹配（Strong 档）兜住措辞几乎一致的作答，
//! 余弦相似度兜住语序调整和增删虚词的作答，任一通过即判对。
//! 抽背模式对长答案的余弦得分先扣分再比阈值，考试模式不扣分但
//! 阈值更高。

use crate::latest_buffer::LatestBuffer;
use crate::models::{Question, ReviewTag};
use crate::similarity::{cosine_similarity, fuzzy_match, levenshtein_similarity, FuzzyTolerance};
use crate::spaced_repetition::{estimate_q_value, update_ef_value};
use tracing::debug;

/// 抽背判定的余弦阈值
const QUIZ_COSINE_THRESHOLD: f64 = 0.4;

/// 考试判定的余弦阈值，没有长答案扣分所以更高
const EXAM_COSINE_THRESHOLD: f64 = 0.5;

/// 达到该字符数的作答按长答案处理，余弦得分先扣 [`LONG_ANSWER_PENALTY`]
const LONG_ANSWER_LEN: usize = 15;
const LONG_ANSWER_PENALTY: f64 = 0.2;

/// 不超过该字符数的作答做短答案速率修正
const SHORT_ANSWER_LEN: usize = 10;

/// 相对作答速率的封顶值
const RATE_RELATIVE_CAP: f64 = 1.125;

/// 一次作答的判定与记录结果
#[derive(Debug, Clone)]
pub struct GradingOutcome {
    pub is_correct: bool,
    /// Levenshtein 相似度，写入复习记录
    pub similarity: f64,
    /// 修正后的相对作答速率
    pub rate_relative: f64,
    pub q_value: i32,
    /// 最近若干次作答是否全部答错
    pub wrong_streak: bool,
}

/// 抽背模式判定
///
/// 空白作答直接判错。长答案（字符数 >= 15）的余弦得分先扣 0.2，
/// 长文本堆词更容易蹭到词面相似。
pub fn judge_quiz(user_answer: &str, correct_answer: &str) -> bool {
    if user_answer.trim().is_empty() {
        return false;
    }

    let mut score = cosine_similarity(user_answer, correct_answer);
    if user_answer.chars().count() >= LONG_ANSWER_LEN {
        score -= LONG_ANSWER_PENALTY;
    }

    fuzzy_match(user_answer, correct_answer, FuzzyTolerance::Strong)
        || score > QUIZ_COSINE_THRESHOLD
}

/// 考试模式判定，未作答视为错
pub fn judge_exam(user_answer: &str, correct_answer: &str) -> bool {
    if user_answer.trim().is_empty() {
        return false;
    }

    fuzzy_match(user_answer, correct_answer, FuzzyTolerance::Strong)
        || cosine_similarity(user_answer, correct_answer) > EXAM_COSINE_THRESHOLD
}

/// 判定一次抽背作答并写入复习记录
///
/// 流程：判定对错，计算 Levenshtein 相似度与相对作答速率，追加
/// ReviewTag，估计 q 值并做受保护的 EF 更新，最后更新题目状态与
/// 连错缓冲。`r_standard` 是配置的基准作答速率（字符/秒）。
pub fn record_answer(
    question: &mut Question,
    user_answer: &str,
    elapsed_secs: f64,
    r_standard: f64,
    streak: &mut LatestBuffer<bool>,
) -> GradingOutcome {
    let answer = user_answer.trim().to_string();
    let correct = question.correct_answer.clone().unwrap_or_default();

    // 空作答记错但不产生复习记录，速率没有意义
    if answer.is_empty() {
        question.status = Some(false);
        question.user_answer = Some(answer);
        streak.push(false);
        let wrong_streak = streak.all_equal(&false);
        return GradingOutcome {
            is_correct: false,
            similarity: 0.0,
            rate_relative: 0.0,
            q_value: 0,
            wrong_streak,
        };
    }

    // 1. 判定与相似度
    let is_correct = judge_quiz(&answer, &correct);
    let similarity = levenshtein_similarity(&answer, &correct);

    // 2. 相对作答速率：字符数 / 秒，再除以基准速率
    //    分母设毫秒级下限，防零除产生非法浮点数
    let answer_len = answer.chars().count();
    let elapsed = elapsed_secs.max(1e-3);
    let rate = answer_len as f64 / elapsed;
    let mut rate_relative = rate / r_standard.max(1e-3);
    if answer_len <= SHORT_ANSWER_LEN {
        // 短答案几个字就写完，原始速率偏低，线性抬升回标准区间
        rate_relative = -0.3125 * rate_relative + 4.125;
    }
    rate_relative = rate_relative.min(RATE_RELATIVE_CAP);

    // 3. 质量评分与复习记录
    let q_value = estimate_q_value(rate_relative, similarity);
    question.review_tags.push(ReviewTag {
        similarity,
        rate: rate_relative,
        time: chrono::Utc::now(),
        q_value,
    });
    update_ef_value(question, q_value);

    // 4. 更新题目状态与连错缓冲
    question.status = Some(is_correct);
    question.user_answer = Some(answer);
    streak.push(is_correct);
    let wrong_streak = streak.all_equal(&false);

    debug!(
        "[AnswerGrading] correct={} similarity={:.3} rate_relative={:.3} q={} ef={:.2}",
        is_correct, similarity, rate_relative, q_value, question.ef_value
    );

    GradingOutcome {
        is_correct,
        similarity,
        rate_relative,
        q_value,
        wrong_streak,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 16 字答案对，共 9 个同字：余弦 9/16 = 0.5625，模糊匹配不过
    const LONG_USER: &str = "天地玄黄宇宙洪荒日月盈昃辰宿列张";
    const LONG_CORRECT: &str = "天地玄黄宇宙洪荒日寒来暑往秋收冬";

    #[test]
    fn test_judge_quiz_empty_answer() {
        assert!(!judge_quiz("", "北京"));
        assert!(!judge_quiz("   ", "北京"));
    }

    #[test]
    fn test_judge_quiz_exact_answer() {
        assert!(judge_quiz("北京", "北京"));
    }

    #[test]
    fn test_judge_quiz_reordered_answer_passes_cosine() {
        // 语序不同时模糊匹配失败，余弦通路兜住
        assert!(judge_quiz("北京是首都", "中国的首都是北京"));
    }

    #[test]
    fn test_judge_quiz_unrelated_answer() {
        assert!(!judge_quiz("唐太宗李世民", "明成祖朱棣"));
    }

    #[test]
    fn test_long_answer_penalty_separates_quiz_from_exam() {
        let score = cosine_similarity(LONG_USER, LONG_CORRECT);
        assert!((score - 0.5625).abs() < 1e-9);

        // 抽背：0.5625 - 0.2 = 0.3625 <= 0.4，判错
        assert!(!judge_quiz(LONG_USER, LONG_CORRECT));
        // 考试：0.5625 > 0.5，判对
        assert!(judge_exam(LONG_USER, LONG_CORRECT));
    }

    #[test]
    fn test_judge_exam_empty_answer() {
        assert!(!judge_exam("", "北京"));
    }

    #[test]
    fn test_record_answer_appends_tag_and_caps_rate() {
        let mut question = Question::new("中国的首都是________。", "中国的首都是北京");
        let mut streak = LatestBuffer::new(2);

        // 8 字答案 4 秒写完：rate 2.0，基准 2.0，短答案修正后超过封顶
        let outcome = record_answer(&mut question, "中国的首都是北京", 4.0, 2.0, &mut streak);

        assert!(outcome.is_correct);
        assert_eq!(outcome.q_value, 5);
        assert!((outcome.rate_relative - 1.125).abs() < 1e-9);
        assert!(!outcome.wrong_streak);

        assert_eq!(question.review_tags.len(), 1);
        assert!((question.review_tags[0].similarity - 1.0).abs() < 1e-9);
        assert_eq!(question.status, Some(true));
        // 只有一条记录，EF 不更新
        assert_eq!(question.ef_value, 2.5);
    }

    #[test]
    fn test_record_answer_updates_ef_after_two_tags() {
        let mut question = Question::new("题", "中国的首都是北京");
        let mut streak = LatestBuffer::new(2);

        record_answer(&mut question, "中国的首都是北京", 4.0, 2.0, &mut streak);
        record_answer(&mut question, "中国的首都是北京", 4.0, 2.0, &mut streak);

        assert_eq!(question.review_tags.len(), 2);
        // 第二次记录时已有 2 条，q=5 按公式 2.5 + 0.1
        assert_eq!(question.ef_value, 2.6);
    }

    #[test]
    fn test_record_answer_wrong_streak() {
        let mut question = Question::new("题", "明成祖朱棣");
        let mut streak = LatestBuffer::new(2);

        let first = record_answer(&mut question, "唐太宗李世民", 3.0, 1.0, &mut streak);
        assert!(!first.is_correct);
        assert!(!first.wrong_streak);

        let second = record_answer(&mut question, "宋太祖赵匡胤", 3.0, 1.0, &mut streak);
        assert!(!second.is_correct);
        assert!(second.wrong_streak);
    }

    #[test]
    fn test_record_answer_empty_input() {
        let mut question = Question::new("题", "北京");
        let mut streak = LatestBuffer::new(3);

        let outcome = record_answer(&mut question, "  ", 5.0, 2.0, &mut streak);

        assert!(!outcome.is_correct);
        assert_eq!(outcome.q_value, 0);
        assert!(question.review_tags.is_empty());
        assert_eq!(question.status, Some(false));
        assert_eq!(question.ef_value, 2.5);
    }
}
