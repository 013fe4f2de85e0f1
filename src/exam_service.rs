//! 组卷、判分与考试报告
//!
//! 按章节权重从项目题库抽题组卷，考试判分复用模糊加余弦的判定，
//! 最终输出纯文本考试报告。试卷持有题目的干净副本，考试过程不触碰
//! 项目本身，也不参与 EF 调度。

use crate::answer_grading::judge_exam;
use crate::models::{AppError, Chapter, ExamSettings, Project, Question};
use chrono::{Datelike, Local};
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::info;

type Result<T> = std::result::Result<T, AppError>;

/// 模拟考试的固定题量
pub const SIMULATED_EXAM_SIZE: usize = 30;

const MIN_EXAM_MINUTES: u32 = 10;
const MAX_EXAM_MINUTES: u32 = 180;
const MIN_QUESTION_COUNT: usize = 5;
const MAX_QUESTION_COUNT: usize = 100;
const REPORT_SEPARATOR_LEN: usize = 50;

/// 一张组好的试卷
///
/// 题目是题干加标准答案的副本，作答写入各题的 `user_answer`。
#[derive(Debug, Clone)]
pub struct ExamPaper {
    /// 考试编号，形如 RK202609121234
    pub exam_number: String,
    pub title: String,
    pub duration_minutes: u32,
    pub score_per_question: u32,
    pub questions: Vec<Question>,
}

impl ExamPaper {
    /// 保存第 `index` 题（0 起）的作答，作答内容先去除首尾空白
    pub fn fill_answer(&mut self, index: usize, answer: &str) -> Result<()> {
        let question = self
            .questions
            .get_mut(index)
            .ok_or_else(|| AppError::not_found(format!("题目下标越界: {}", index)))?;
        question.user_answer = Some(answer.trim().to_string());
        Ok(())
    }

    /// 清除第 `index` 题的作答
    pub fn clear_answer(&mut self, index: usize) -> Result<()> {
        let question = self
            .questions
            .get_mut(index)
            .ok_or_else(|| AppError::not_found(format!("题目下标越界: {}", index)))?;
        question.user_answer = None;
        Ok(())
    }

    /// 已作答（非空）题数
    pub fn answered_count(&self) -> usize {
        self.questions
            .iter()
            .filter(|q| !q.user_answer.as_deref().unwrap_or("").is_empty())
            .count()
    }
}

/// 交卷后的判分结果
#[derive(Debug, Clone)]
pub struct ExamResult {
    pub total: usize,
    pub correct: usize,
    pub wrong: usize,
    /// 百分制得分，correct * 100 / total
    pub score: f64,
    /// 正确率百分比
    pub accuracy: f64,
    pub encouragement: &'static str,
    /// 与试卷题序对应的逐题判定
    pub verdicts: Vec<bool>,
}

/// 校验考试设置
///
/// 时间 10-180 分钟，题量 5-100，每题分值为正整数，项目必须有章节。
pub fn validate_settings(settings: &ExamSettings, project: &Project) -> Result<()> {
    if !(MIN_EXAM_MINUTES..=MAX_EXAM_MINUTES).contains(&settings.exam_time_minutes) {
        return Err(AppError::validation("考试时间必须在10-180分钟之间"));
    }
    if !(MIN_QUESTION_COUNT..=MAX_QUESTION_COUNT).contains(&settings.question_count) {
        return Err(AppError::validation("考试题量必须在5-100题之间"));
    }
    if settings.score_per_question < 1 {
        return Err(AppError::validation("每题分数必须为正整数"));
    }
    if project.chapters.as_deref().unwrap_or_default().is_empty() {
        return Err(AppError::validation("当前项目没有章节，无法生成考试"));
    }
    Ok(())
}

/// 按设置组卷
///
/// 权重全为 0 时均匀随机抽题；否则各章节按权重占比取
/// `clamp(round(count * w / Σw), 1, 章节题量)` 道，凑不够时按题干
/// 从未入选的题目里随机补足，四舍五入导致的超出则保留。最后打乱
/// 整卷题序。
pub fn assemble(project: &Project, settings: &ExamSettings) -> Result<ExamPaper> {
    validate_settings(settings, project)?;

    let pool = project.export_questions();
    if pool.len() < settings.question_count {
        return Err(AppError::validation(format!(
            "题库仅有 {} 题，不足以组出 {} 题的试卷",
            pool.len(),
            settings.question_count
        )));
    }

    let chapters = project.chapters.as_deref().unwrap_or_default();
    let weight_of = |chapter: &Chapter| -> f64 {
        chapter
            .name
            .as_deref()
            .and_then(|name| settings.chapter_weights.get(name))
            .copied()
            .unwrap_or(0.0)
            .clamp(0.0, 100.0)
    };
    let total_weight: f64 = chapters.iter().map(weight_of).sum();

    let mut rng = rand::thread_rng();
    let mut selected: Vec<Question> = if total_weight == 0.0 {
        let mut pool = pool;
        pool.shuffle(&mut rng);
        pool.truncate(settings.question_count);
        pool
    } else {
        pick_weighted(chapters, settings, total_weight, &weight_of, &mut rng)
    };

    selected.shuffle(&mut rng);
    info!(
        "[ExamService] 组卷完成: {} 题 / {} 分钟",
        selected.len(),
        settings.exam_time_minutes
    );

    let course = project.project_name.as_deref().unwrap_or("未命名课程");
    Ok(ExamPaper {
        exam_number: generate_exam_number(&mut rng),
        title: exam_title(course),
        duration_minutes: settings.exam_time_minutes,
        score_per_question: settings.score_per_question,
        questions: selected,
    })
}

fn pick_weighted(
    chapters: &[Chapter],
    settings: &ExamSettings,
    total_weight: f64,
    weight_of: &dyn Fn(&Chapter) -> f64,
    rng: &mut impl Rng,
) -> Vec<Question> {
    let mut selected: Vec<Question> = Vec::new();

    for chapter in chapters {
        let weight = weight_of(chapter);
        let questions = chapter.questions.as_deref().unwrap_or_default();
        if weight == 0.0 || questions.is_empty() {
            continue;
        }

        let proportion = weight / total_weight;
        let quota = (settings.question_count as f64 * proportion).round() as usize;
        let quota = quota.clamp(1, questions.len());

        let mut indices: Vec<usize> = (0..questions.len()).collect();
        indices.shuffle(rng);
        for &i in indices.iter().take(quota) {
            selected.push(clean_copy(&questions[i]));
        }
    }

    // 按题干排重后从剩余题目里随机补足
    if selected.len() < settings.question_count {
        let chosen: Vec<Option<String>> = selected.iter().map(|q| q.text.clone()).collect();
        let mut remaining: Vec<Question> = chapters
            .iter()
            .flat_map(|c| c.questions.as_deref().unwrap_or_default())
            .filter(|q| !chosen.contains(&q.text))
            .map(clean_copy)
            .collect();
        remaining.shuffle(rng);
        let missing = settings.question_count - selected.len();
        selected.extend(remaining.into_iter().take(missing));
    }

    selected
}

fn clean_copy(question: &Question) -> Question {
    Question {
        status: None,
        text: question.text.clone(),
        user_answer: None,
        correct_answer: question.correct_answer.clone(),
        ef_value: crate::models::default_ef_value(),
        review_tags: Vec::new(),
    }
}

/// 模拟考试：整个项目范围内均匀随机抽题，至多 30 道
///
/// 题库不足 30 题就用全部题目，其余设置取默认值。
pub fn simulate(project: &Project) -> Result<ExamPaper> {
    let mut pool = project.export_questions();
    if pool.is_empty() {
        return Err(AppError::validation("项目没有题目，无法模拟考试"));
    }

    let mut rng = rand::thread_rng();
    pool.shuffle(&mut rng);
    pool.truncate(SIMULATED_EXAM_SIZE);

    let defaults = ExamSettings::default();
    let course = project.project_name.as_deref().unwrap_or("未命名课程");
    Ok(ExamPaper {
        exam_number: generate_exam_number(&mut rng),
        title: exam_title(course),
        duration_minutes: defaults.exam_time_minutes,
        score_per_question: defaults.score_per_question,
        questions: pool,
    })
}

/// 判卷
///
/// 未作答按错计。空卷得分记 0，不产生 NaN。
pub fn grade(paper: &ExamPaper) -> ExamResult {
    let verdicts: Vec<bool> = paper
        .questions
        .iter()
        .map(|question| {
            let user = question.user_answer.as_deref().unwrap_or("");
            let correct = question.correct_answer.as_deref().unwrap_or("");
            judge_exam(user, correct)
        })
        .collect();

    let total = paper.questions.len();
    let correct = verdicts.iter().filter(|v| **v).count();
    let wrong = total - correct;
    let score = if total > 0 {
        correct as f64 * 100.0 / total as f64
    } else {
        0.0
    };

    let encouragement = if score >= 90.0 {
        "优秀！你的表现非常出色！"
    } else if score >= 80.0 {
        "很好！继续努力！"
    } else if score >= 60.0 {
        "及格了，还有提升空间！"
    } else {
        "需要多加练习，加油！"
    };

    ExamResult {
        total,
        correct,
        wrong,
        score,
        accuracy: score,
        encouragement,
        verdicts,
    }
}

/// 生成纯文本考试报告
pub fn render_report(paper: &ExamPaper, result: &ExamResult) -> String {
    let mut report = String::new();
    report.push_str("=== 模拟考试报告 ===\n");
    report.push_str(&format!(
        "生成时间：{}\n",
        Local::now().format("%Y-%m-%d %H:%M:%S")
    ));
    report.push_str(&format!("总题数：{}\n", result.total));
    report.push_str(&format!("答对题数：{}\n", result.correct));
    report.push_str(&format!("答错题数：{}\n", result.wrong));
    report.push_str(&format!("正确率：{:.1}%\n", result.accuracy));
    report.push('\n');
    report.push_str("=== 题目详情 ===\n");
    report.push('\n');

    for (i, question) in paper.questions.iter().enumerate() {
        let verdict = result.verdicts.get(i).copied().unwrap_or(false);
        report.push_str(&format!(
            "第{}题 {}\n",
            i + 1,
            if verdict { "✓" } else { "✗" }
        ));
        report.push_str(&format!(
            "题目：{}\n",
            question.text.as_deref().unwrap_or("题目内容缺失")
        ));
        report.push_str(&format!(
            "您的答案：{}\n",
            question.user_answer.as_deref().unwrap_or("未作答")
        ));
        report.push_str(&format!(
            "正确答案：{}\n",
            question.correct_answer.as_deref().unwrap_or("正确答案缺失")
        ));
        report.push_str("解析：暂无解析\n");
        report.push_str(&"-".repeat(REPORT_SEPARATOR_LEN));
        report.push('\n');
        report.push('\n');
    }

    report
}

/// 章节掌握度：答对题数占比的百分数，空章节为 0
pub fn chapter_mastery(chapter: &Chapter) -> f64 {
    let questions = chapter.questions.as_deref().unwrap_or_default();
    if questions.is_empty() {
        return 0.0;
    }
    let correct = questions
        .iter()
        .filter(|q| q.status == Some(true))
        .count();
    correct as f64 / questions.len() as f64 * 100.0
}

fn generate_exam_number(rng: &mut impl Rng) -> String {
    format!(
        "RK{}{}",
        Local::now().format("%Y%m%d"),
        rng.gen_range(1000..9999)
    )
}

/// 考试标题，学年与学期从当前日期推算
fn exam_title(course_name: &str) -> String {
    let now = Local::now();
    let (start, term) = if now.month() >= 8 {
        (now.year(), 1)
    } else if now.month() == 1 {
        (now.year() - 1, 1)
    } else {
        (now.year() - 1, 2)
    };
    format!(
        "{}-{} 学年第 {} 学期《{}》课程考试（A）卷",
        start,
        start + 1,
        term,
        course_name
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project_with(chapters: &[(&str, usize)]) -> Project {
        let mut project = Project::new("高数", "/tmp/exam-test");
        let mut built = Vec::new();
        for (number, (name, count)) in chapters.iter().enumerate() {
            let mut chapter = Chapter::empty(*name, number as i32 + 1);
            chapter.questions = Some(
                (0..*count)
                    .map(|i| Question::new(format!("{}题目{}", name, i), format!("{}答案{}", name, i)))
                    .collect(),
            );
            built.push(chapter);
        }
        project.chapters = Some(built);
        project
    }

    fn settings(count: usize) -> ExamSettings {
        ExamSettings {
            question_count: count,
            ..ExamSettings::default()
        }
    }

    #[test]
    fn test_validate_time_range() {
        let project = project_with(&[("第一章", 10)]);
        let mut s = settings(5);
        s.exam_time_minutes = 9;
        assert!(validate_settings(&s, &project).is_err());
        s.exam_time_minutes = 181;
        assert!(validate_settings(&s, &project).is_err());
        s.exam_time_minutes = 10;
        assert!(validate_settings(&s, &project).is_ok());
        s.exam_time_minutes = 180;
        assert!(validate_settings(&s, &project).is_ok());
    }

    #[test]
    fn test_validate_question_count_range() {
        let project = project_with(&[("第一章", 200)]);
        let mut s = settings(4);
        assert!(validate_settings(&s, &project).is_err());
        s.question_count = 101;
        assert!(validate_settings(&s, &project).is_err());
        s.question_count = 5;
        assert!(validate_settings(&s, &project).is_ok());
        s.question_count = 100;
        assert!(validate_settings(&s, &project).is_ok());
    }

    #[test]
    fn test_validate_score_and_chapters() {
        let project = project_with(&[("第一章", 10)]);
        let mut s = settings(5);
        s.score_per_question = 0;
        assert!(validate_settings(&s, &project).is_err());

        let empty = Project::new("空", "/tmp/exam-test");
        assert!(validate_settings(&settings(5), &empty).is_err());
    }

    #[test]
    fn test_assemble_pool_too_small() {
        let project = project_with(&[("第一章", 3)]);
        let err = assemble(&project, &settings(5)).unwrap_err();
        assert!(err.message.contains("不足"));
    }

    #[test]
    fn test_assemble_zero_weights_uniform() {
        let project = project_with(&[("第一章", 10), ("第二章", 10)]);
        let paper = assemble(&project, &settings(8)).unwrap();
        assert_eq!(paper.questions.len(), 8);

        // 抽出的题干互不重复
        let mut texts: Vec<_> = paper
            .questions
            .iter()
            .map(|q| q.text.clone().unwrap())
            .collect();
        texts.sort();
        texts.dedup();
        assert_eq!(texts.len(), 8);

        // 干净副本：作答与状态为空
        assert!(paper.questions.iter().all(|q| q.user_answer.is_none()));
        assert!(paper.questions.iter().all(|q| q.status.is_none()));
        assert_eq!(paper.duration_minutes, 60);
    }

    #[test]
    fn test_assemble_single_weighted_chapter() {
        let project = project_with(&[("第一章", 20), ("第二章", 20)]);
        let mut s = settings(10);
        s.chapter_weights.insert("第一章".to_string(), 100.0);

        let paper = assemble(&project, &s).unwrap();
        assert_eq!(paper.questions.len(), 10);
        assert!(paper
            .questions
            .iter()
            .all(|q| q.text.as_deref().unwrap().starts_with("第一章")));
    }

    #[test]
    fn test_assemble_backfills_from_other_chapters() {
        // 权重全压在只有 4 题的章节上，缺口从其他章节补足
        let project = project_with(&[("第一章", 4), ("第二章", 20)]);
        let mut s = settings(10);
        s.chapter_weights.insert("第一章".to_string(), 100.0);

        let paper = assemble(&project, &s).unwrap();
        assert_eq!(paper.questions.len(), 10);

        let from_first = paper
            .questions
            .iter()
            .filter(|q| q.text.as_deref().unwrap().starts_with("第一章"))
            .count();
        assert_eq!(from_first, 4);
    }

    #[test]
    fn test_assemble_small_weight_still_contributes() {
        // 0.1 占比四舍五入为 0，下限抬到 1，配额总和 11 超出按保留处理
        let project = project_with(&[("第一章", 3), ("第二章", 20)]);
        let mut s = settings(10);
        s.chapter_weights.insert("第一章".to_string(), 1.0);
        s.chapter_weights.insert("第二章".to_string(), 99.0);

        let paper = assemble(&project, &s).unwrap();
        assert_eq!(paper.questions.len(), 11);
        assert!(paper
            .questions
            .iter()
            .any(|q| q.text.as_deref().unwrap().starts_with("第一章")));
    }

    #[test]
    fn test_assemble_honors_configured_duration() {
        let project = project_with(&[("第一章", 10)]);
        let mut s = settings(5);
        s.exam_time_minutes = 120;
        let paper = assemble(&project, &s).unwrap();
        assert_eq!(paper.duration_minutes, 120);
    }

    #[test]
    fn test_simulate_caps_at_thirty() {
        let big = project_with(&[("第一章", 25), ("第二章", 25)]);
        let paper = simulate(&big).unwrap();
        assert_eq!(paper.questions.len(), SIMULATED_EXAM_SIZE);

        // 题库不足 30 题时全部入卷
        let small = project_with(&[("第一章", 10)]);
        let paper = simulate(&small).unwrap();
        assert_eq!(paper.questions.len(), 10);

        let empty = Project::new("空", "/tmp/exam-test");
        assert!(simulate(&empty).is_err());
    }

    #[test]
    fn test_fill_and_clear_answer() {
        let project = project_with(&[("第一章", 10)]);
        let mut paper = assemble(&project, &settings(5)).unwrap();

        paper.fill_answer(0, "  作答内容  ").unwrap();
        assert_eq!(
            paper.questions[0].user_answer.as_deref(),
            Some("作答内容")
        );
        assert_eq!(paper.answered_count(), 1);

        paper.clear_answer(0).unwrap();
        assert_eq!(paper.answered_count(), 0);

        assert!(paper.fill_answer(99, "x").is_err());
    }

    fn paper_with_exact_answers(total: usize, correct: usize) -> ExamPaper {
        let mut questions = Vec::new();
        for i in 0..total {
            let mut q = Question::new(format!("题目{}", i), format!("标准答案{}", i));
            if i < correct {
                q.user_answer = Some(format!("标准答案{}", i));
            }
            questions.push(q);
        }
        ExamPaper {
            exam_number: "RK202601011234".to_string(),
            title: "测试卷".to_string(),
            duration_minutes: 60,
            score_per_question: 5,
            questions,
        }
    }

    #[test]
    fn test_grade_counts_and_score() {
        let paper = paper_with_exact_answers(10, 7);
        let result = grade(&paper);
        assert_eq!(result.total, 10);
        assert_eq!(result.correct, 7);
        assert_eq!(result.wrong, 3);
        assert!((result.score - 70.0).abs() < 1e-9);
        assert_eq!(result.verdicts.iter().filter(|v| **v).count(), 7);
    }

    #[test]
    fn test_grade_encouragement_tiers() {
        assert_eq!(
            grade(&paper_with_exact_answers(10, 9)).encouragement,
            "优秀！你的表现非常出色！"
        );
        assert_eq!(
            grade(&paper_with_exact_answers(10, 8)).encouragement,
            "很好！继续努力！"
        );
        assert_eq!(
            grade(&paper_with_exact_answers(10, 6)).encouragement,
            "及格了，还有提升空间！"
        );
        assert_eq!(
            grade(&paper_with_exact_answers(10, 3)).encouragement,
            "需要多加练习，加油！"
        );
    }

    #[test]
    fn test_grade_empty_paper_no_nan() {
        let paper = ExamPaper {
            exam_number: "RK202601011234".to_string(),
            title: "空卷".to_string(),
            duration_minutes: 60,
            score_per_question: 5,
            questions: Vec::new(),
        };
        let result = grade(&paper);
        assert_eq!(result.score, 0.0);
        assert!(!result.score.is_nan());
    }

    #[test]
    fn test_report_format() {
        let paper = paper_with_exact_answers(2, 1);
        let result = grade(&paper);
        let report = render_report(&paper, &result);

        assert!(report.starts_with("=== 模拟考试报告 ===\n"));
        assert!(report.contains("总题数：2\n"));
        assert!(report.contains("答对题数：1\n"));
        assert!(report.contains("正确率：50.0%\n"));
        assert!(report.contains("=== 题目详情 ===\n"));
        assert!(report.contains("第1题 ✓\n"));
        assert!(report.contains("第2题 ✗\n"));
        assert!(report.contains("您的答案：标准答案0\n"));
        assert!(report.contains("您的答案：未作答\n"));
        assert!(report.contains(&"-".repeat(50)));
    }

    #[test]
    fn test_chapter_mastery() {
        let mut chapter = Chapter::empty("第一章", 1);
        assert_eq!(chapter_mastery(&chapter), 0.0);

        let mut questions = vec![
            Question::new("a", "1"),
            Question::new("b", "2"),
            Question::new("c", "3"),
            Question::new("d", "4"),
        ];
        questions[0].status = Some(true);
        questions[1].status = Some(true);
        questions[2].status = Some(false);
        chapter.questions = Some(questions);
        assert!((chapter_mastery(&chapter) - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_exam_number_and_title_shape() {
        let mut rng = rand::thread_rng();
        let number = generate_exam_number(&mut rng);
        assert!(number.starts_with("RK"));
        assert_eq!(number.len(), 14);

        let title = exam_title("线性代数");
        assert!(title.contains("《线性代数》课程考试（A）卷"));
        assert!(title.contains("学年第"));
    }
}
