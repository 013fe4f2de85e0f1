//! 抽背与复习会话
//!
//! 对应桌面端的抽背流程：按章节或按 EF 复习集建立会话，逐题作答、
//! 判定并把结果写回项目。会话只保存题目坐标，不复制题目本身，
//! 作答记录与 EF 更新直接落在 `Project` 上，收尾时持久化。
//! 知识点背诵的掌握标记也由本模块维护。

use crate::answer_grading::{record_answer, GradingOutcome};
use crate::latest_buffer::LatestBuffer;
use crate::models::{AppError, KnowledgePoint, Project, Question};
use crate::project_manager;
use crate::spaced_repetition::{select_review_indices, FULL_REVIEW_THRESHOLD};
use tracing::{debug, info};

type Result<T> = std::result::Result<T, AppError>;

/// 基准作答速率默认值（字符/秒），相对速率 = 实际速率 / 基准
pub const DEFAULT_R_STANDARD: f64 = 2.0;

/// 连错提醒窗口的默认长度
pub const DEFAULT_WRONG_STREAK_WINDOW: usize = 3;

/// 抽背会话工厂，携带判定基准配置
#[derive(Debug, Clone)]
pub struct QuizService {
    r_standard: f64,
    wrong_streak_window: usize,
}

impl Default for QuizService {
    fn default() -> Self {
        Self::new()
    }
}

impl QuizService {
    pub fn new() -> Self {
        Self {
            r_standard: DEFAULT_R_STANDARD,
            wrong_streak_window: DEFAULT_WRONG_STREAK_WINDOW,
        }
    }

    pub fn with_r_standard(mut self, r_standard: f64) -> Self {
        self.r_standard = r_standard;
        self
    }

    pub fn with_streak_window(mut self, window: usize) -> Self {
        self.wrong_streak_window = window.max(1);
        self
    }

    /// 打开某章节的抽背会话
    ///
    /// 章节不存在返回 not_found；空章节得到一个立即完成的空会话。
    /// 会话从第一道未作答的题目继续，全部作答过则回到第一题。
    pub fn start_chapter(&self, project: &Project, chapter_name: &str) -> Result<QuizSession> {
        let chapters = project.chapters.as_deref().unwrap_or_default();
        let chapter_index = chapters
            .iter()
            .position(|c| c.name.as_deref() == Some(chapter_name))
            .ok_or_else(|| AppError::not_found(format!("章节不存在: {}", chapter_name)))?;

        let count = chapters[chapter_index]
            .questions
            .as_deref()
            .unwrap_or_default()
            .len();
        let selection: Vec<(usize, usize)> = (0..count).map(|q| (chapter_index, q)).collect();

        info!(
            "[QuizService] 打开章节抽背: {} ({} 题)",
            chapter_name, count
        );
        Ok(self.session_over(project, selection))
    }

    /// 打开复习会话：按 EF 升序挑出最薄弱的 `count` 道题
    ///
    /// 总题量超过阈值时，被选中的题目先清除作答记录再进入会话；
    /// 不超过阈值则全量进入且保留原状态。
    pub fn start_review(&self, project: &mut Project, count: usize) -> QuizSession {
        let selection = select_review_indices(project, count);
        if project.total_questions() > FULL_REVIEW_THRESHOLD {
            for &(chapter, index) in &selection {
                if let Some(question) = question_at_mut(project, chapter, index) {
                    question.reset_answer();
                }
            }
        }

        info!("[QuizService] 打开复习会话: {} 题", selection.len());
        self.session_over(project, selection)
    }

    fn session_over(&self, project: &Project, selection: Vec<(usize, usize)>) -> QuizSession {
        // 从第一道未作答的题目继续
        let cursor = selection
            .iter()
            .position(|&(chapter, index)| {
                question_at(project, chapter, index).is_some_and(|q| q.status.is_none())
            })
            .unwrap_or(0);

        QuizSession {
            selection,
            cursor,
            streak: LatestBuffer::new(self.wrong_streak_window),
            r_standard: self.r_standard,
        }
    }
}

/// 一次抽背会话：题目坐标序列加游标与连错缓冲
///
/// 题目坐标是 (章节下标, 题目下标)，作答结果通过坐标写回项目。
/// 会话存续期间不应增删项目里的章节或题目。
#[derive(Debug)]
pub struct QuizSession {
    selection: Vec<(usize, usize)>,
    cursor: usize,
    streak: LatestBuffer<bool>,
    r_standard: f64,
}

impl QuizSession {
    pub fn len(&self) -> usize {
        self.selection.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selection.is_empty()
    }

    /// 当前题号（0 起）
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// 当前题目
    pub fn current<'a>(&self, project: &'a Project) -> Option<&'a Question> {
        let &(chapter, index) = self.selection.get(self.cursor)?;
        question_at(project, chapter, index)
    }

    /// 提交当前题目的作答
    ///
    /// 判定、记录复习数据并写回项目；提交后游标停在原题，由调用方
    /// 决定何时翻页。已作答的题目拒绝重复提交。空白作答记为答错。
    pub fn submit(
        &mut self,
        project: &mut Project,
        user_answer: &str,
        elapsed_secs: f64,
    ) -> Result<GradingOutcome> {
        let &(chapter, index) = self
            .selection
            .get(self.cursor)
            .ok_or_else(|| AppError::not_found("会话中没有可作答的题目"))?;
        let question = question_at_mut(project, chapter, index)
            .ok_or_else(|| AppError::not_found("题目不存在，项目结构可能已变更"))?;

        if question.status.is_some() {
            return Err(AppError::validation("该题已作答，请先清空记录再重做"));
        }

        let outcome = record_answer(
            question,
            user_answer,
            elapsed_secs,
            self.r_standard,
            &mut self.streak,
        );
        debug!(
            "[QuizService] 第 {} 题作答: correct={} streak_wrong={}",
            self.cursor + 1,
            outcome.is_correct,
            outcome.wrong_streak
        );
        Ok(outcome)
    }

    /// 下一题，已在末尾返回 false
    pub fn advance(&mut self) -> bool {
        if self.cursor + 1 < self.selection.len() {
            self.cursor += 1;
            true
        } else {
            false
        }
    }

    /// 上一题，已在开头返回 false
    pub fn retreat(&mut self) -> bool {
        if self.cursor > 0 {
            self.cursor -= 1;
            true
        } else {
            false
        }
    }

    /// 跳转到指定题号（1 起），越界返回 false
    pub fn jump_to(&mut self, number: usize) -> bool {
        if number < 1 || number > self.selection.len() {
            return false;
        }
        self.cursor = number - 1;
        true
    }

    /// 已作答题数
    pub fn answered_count(&self, project: &Project) -> usize {
        self.selection
            .iter()
            .filter(|&&(chapter, index)| {
                question_at(project, chapter, index).is_some_and(|q| q.status.is_some())
            })
            .count()
    }

    pub fn is_finished(&self, project: &Project) -> bool {
        self.answered_count(project) == self.selection.len()
    }

    /// 清空会话内全部作答记录并回到第一题
    ///
    /// 只重置状态与作答内容，EF 与复习历史保留。
    pub fn clear_records(&mut self, project: &mut Project) {
        for &(chapter, index) in &self.selection {
            if let Some(question) = question_at_mut(project, chapter, index) {
                question.reset_answer();
            }
        }
        self.cursor = 0;
        self.streak.clear();
        info!("[QuizService] 已清空 {} 题的作答记录", self.selection.len());
    }

    /// 结束会话并保存项目文件
    pub fn finish(&self, project: &Project) -> Result<()> {
        project_manager::save_project(project)
    }
}

/// 某章节的知识点列表，章节不存在返回 not_found
pub fn knowledge_points<'a>(
    project: &'a Project,
    chapter_name: &str,
) -> Result<&'a [KnowledgePoint]> {
    let chapter = project
        .find_chapter(chapter_name)
        .ok_or_else(|| AppError::not_found(format!("章节不存在: {}", chapter_name)))?;
    Ok(chapter.knowledge_points.as_deref().unwrap_or_default())
}

/// 翻转知识点掌握标记并立即保存项目
pub fn set_mastery(
    project: &mut Project,
    chapter_name: &str,
    index: usize,
    mastered: bool,
) -> Result<()> {
    let chapter = project
        .find_chapter_mut(chapter_name)
        .ok_or_else(|| AppError::not_found(format!("章节不存在: {}", chapter_name)))?;
    let point = chapter
        .knowledge_points
        .as_deref_mut()
        .unwrap_or_default()
        .get_mut(index)
        .ok_or_else(|| AppError::not_found(format!("知识点下标越界: {}", index)))?;

    point.is_mastered = mastered;
    project_manager::save_project(project)
}

fn question_at(project: &Project, chapter: usize, index: usize) -> Option<&Question> {
    project
        .chapters
        .as_deref()?
        .get(chapter)?
        .questions
        .as_deref()?
        .get(index)
}

fn question_at_mut(project: &mut Project, chapter: usize, index: usize) -> Option<&mut Question> {
    project
        .chapters
        .as_deref_mut()?
        .get_mut(chapter)?
        .questions
        .as_deref_mut()?
        .get_mut(index)
}
