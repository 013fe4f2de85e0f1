//! 题库生成管线：源文档 → 文本分块 → 并发出题 → 章节聚类 → 合并入项目。
//!
//! 每个分块独立调用一次大模型，互不依赖，失败只标记该分块；
//! `Replay` 策略下失败分块会被有限轮次地重发。由于分块式生成会把同一
//! 章节拆散在多个分块里，最后用一次聚类调用把含义相近的章节名归并，
//! 再把各片段的题目与知识点合入统一章节。

use crate::json_validator::{self, Stage};
use crate::llm_client::{self, ChatModel};
use crate::models::{AppError, Chapter, ChapterCluster, Chunk, MissingStrategy, Project};
use crate::document_parser::DocumentParser;
use crate::text_chunker::{chunk_text, DEFAULT_CHUNK_SIZE};
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

type Result<T> = std::result::Result<T, AppError>;

/// 难以归类的章节片段统一落入的兜底章节名
pub const MISC_CHAPTER_NAME: &str = "杂项题目";

/// 同时在途的分块请求上限
pub const DEFAULT_CONCURRENCY: usize = 16;
/// Replay 策略下失败分块最多重发的轮次
const MAX_RETRY_ROUNDS: usize = 3;
/// 聚类回复解析失败时最多重新询问的次数
const MAX_CLUSTER_ATTEMPTS: usize = 3;

/// 分块出题提示词，末尾拼接分块文本
const GENERATION_PROMPT: &str = r#"The following is knowledge text provided by the user.
Please generate some questions based on the text content.
For fill-in-the-blank questions: extract the knowledge points
from each sentence and replace them with ________.

If you believe there's no need for rote memorization in some question,
provide four options, labeled A, B, C, and D, for the fill-in-the-blank
questions, and set the correct answer as the corresponding option.
Note: This option is only applicable to some questions.
Don't let all the questions be single-choice questions,
nor should there be no single-choice questions at all.

For this type of question, the stem you should generate is:
Question _____ example.
A. aaa
B. bbb
C. ccc
D. ddd

If a sentence contains multiple knowledge points, please
generate multiple questions, rather than filling in multiple
blanks in one question. For problem-solving questions:
simply write the question stem. If the document explicitly
indicates the presence of definition questions, these are
also problem-solving questions, and the question
stem should be uniformly formatted as: 名词解释: 名词.

You should divide the questions into several chapters.
Return a JSON array of chapters. Each chapter is formatted as:

{
  "name": "chapter name, required",
  "number": 1,
  "bank": [
    {
      "status": null,
      "text": "question stem",
      "user_answer": null,
      "correct_answer": "the answer"
    }
  ],
  "know": [
    {
      "name": "knowledge point title",
      "content": "summary of this knowledge point in Markdown, can be more detailed",
      "is_mastered": false
    }
  ]
}

You also need to extract the key knowledge points into "know":
mark the titles and the specific content.

Fill in "text" and "correct_answer". Return only the JSON array.
Below is the user's knowledge base:
"#;

/// 章节名聚类提示词，末尾拼接以空格分隔的全部章节名
const CLUSTER_PROMPT: &str = r#"Below are some chapter titles. You should cluster chapters
with roughly the same meaning.

If you encounter titles that are difficult to categorize,
such as "Chapter 1", please classify them under "杂项题目".

Numbers should be sequentially numbered and should not be repeated.

Return a JSON array of clusters. Each cluster is formatted as:

{
  "names": ["original chapter titles belonging to this cluster"],
  "uname": "a unified name for these chapters",
  "number": 1
}

Return only the JSON array. Below are the titles of all chapters:
"#;

/// 管线进度事件，经可选的无界通道上报
#[derive(Debug, Clone, Serialize)]
pub struct GenerationProgress {
    pub phase: String,
    pub completed: usize,
    pub total: usize,
    pub message: String,
}

/// 生成前的花费预估
#[derive(Debug, Clone, Serialize)]
pub struct CostEstimate {
    pub total_chars: usize,
    pub coefficient: f64,
    pub predicted_tokens: f64,
    pub price_yuan: f64,
}

/// 按字符数预估本次生成的 token 量与价格（元）
pub fn estimate_cost(total_chars: usize) -> CostEstimate {
    let len = total_chars as f64;
    let coff = 1.25;
    let tokens = len * 1.3 * (1.0 + coff);
    let price = len / 1_000_000.0 * 2.5 + len * coff / 1_000_000.0 * 3.0;
    CostEstimate {
        total_chars,
        coefficient: coff,
        predicted_tokens: tokens,
        price_yuan: price,
    }
}

pub struct QuestionBankService {
    chat_model: Arc<dyn ChatModel>,
    parser: DocumentParser,
    strategy: MissingStrategy,
    chunk_size: usize,
    concurrency: usize,
}

impl QuestionBankService {
    pub fn new(chat_model: Arc<dyn ChatModel>, strategy: MissingStrategy) -> Self {
        Self {
            chat_model,
            parser: DocumentParser::new(),
            strategy,
            chunk_size: DEFAULT_CHUNK_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// 为项目生成题库并写入 `project.chapters`。
    ///
    /// 源文件取自项目的 bankfile 字段（';' 分隔的多个路径）。
    /// 进度事件按阶段（generating / clustering）发送到 `progress_tx`。
    pub async fn generate(
        &self,
        project: &mut Project,
        progress_tx: Option<mpsc::UnboundedSender<GenerationProgress>>,
    ) -> Result<()> {
        let bank_path = project
            .question_bank_path
            .as_deref()
            .ok_or_else(|| AppError::validation("项目没有配置题库源文件"))?;

        // 1. 提取并拼接全部源文件的文本
        let text = self.load_texts(bank_path);
        if text.trim().is_empty() {
            return Err(AppError::validation(
                "未能从源文件提取到任何文本，请检查文件格式与内容",
            ));
        }

        // 2. 固定大小分块
        let chunks = chunk_text(&text, self.chunk_size);
        info!(
            "[QuestionBank] 源文本 {} 字符，分为 {} 块（并发 {}）",
            text.chars().count(),
            chunks.len(),
            self.concurrency
        );

        // 3. 并发出题；Replay 策略下有限轮次重发失败分块
        let results: DashMap<usize, Vec<Chapter>> = DashMap::new();
        let mut pending = chunks;
        for round in 0..=MAX_RETRY_ROUNDS {
            if round > 0 {
                info!(
                    "[QuestionBank] 第 {} 轮重发 {} 个失败分块",
                    round,
                    pending.len()
                );
            }
            pending = self
                .send_chunks(pending, &results, &progress_tx)
                .await
                .into_iter()
                .filter(|c| !c.is_success)
                .collect();
            if pending.is_empty() || self.strategy == MissingStrategy::Ignore {
                break;
            }
        }
        if !pending.is_empty() {
            warn!(
                "[QuestionBank] {} 个分块最终失败，按 {:?} 策略放弃",
                pending.len(),
                self.strategy
            );
        }

        // 4. 收集各分块的章节片段，按分块序号排序保证合并顺序稳定
        let mut batches: Vec<(usize, Vec<Chapter>)> = results
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        batches.sort_by_key(|(index, _)| *index);
        let batches: Vec<Vec<Chapter>> = batches.into_iter().map(|(_, batch)| batch).collect();

        let chapter_names: Vec<String> = batches
            .iter()
            .flat_map(|batch| batch.iter())
            .filter_map(|seg| seg.name.clone())
            .collect();
        if chapter_names.is_empty() {
            return Err(AppError::llm(
                "没有生成任何章节，请检查源文档内容或 API 配置",
            ));
        }

        // 5. 章节名聚类
        if let Some(ref tx) = progress_tx {
            let _ = tx.send(GenerationProgress {
                phase: "clustering".to_string(),
                completed: 0,
                total: 1,
                message: "分块聚类中...".to_string(),
            });
        }
        let clusters = self.cluster_chapter_names(&chapter_names).await?;

        // 6. 片段合并入统一章节
        let merged = merge_clusters(batches, &clusters);
        info!(
            "[QuestionBank] 题库生成完成: {} 章 / {} 题",
            merged.len(),
            merged
                .iter()
                .map(|c| c.questions.as_deref().unwrap_or_default().len())
                .sum::<usize>()
        );
        project.chapters = Some(merged);
        Ok(())
    }

    /// 读取 ';' 分隔的多个源文件并拼接全文，单个文件失败只告警跳过
    fn load_texts(&self, path_string: &str) -> String {
        let mut total_text = String::new();
        for path in path_string.split(';') {
            let path = path.trim();
            if path.is_empty() {
                continue;
            }
            match self.parser.extract_text_from_path(path) {
                Ok(text) => {
                    total_text.push_str(&text);
                    total_text.push('\n');
                }
                Err(e) => {
                    warn!("[QuestionBank] 源文件 {} 提取失败，已跳过: {}", path, e);
                }
            }
        }
        total_text
    }

    /// 并发发送一批分块，返回带成功标记的分块；成功结果写入 `results`
    async fn send_chunks(
        &self,
        pending: Vec<Chunk>,
        results: &DashMap<usize, Vec<Chapter>>,
        progress_tx: &Option<mpsc::UnboundedSender<GenerationProgress>>,
    ) -> Vec<Chunk> {
        let total = pending.len();
        let completed = Arc::new(AtomicUsize::new(0));

        stream::iter(pending)
            .map(|mut chunk| {
                let completed = Arc::clone(&completed);
                async move {
                    match self.generate_for_chunk(&chunk.content).await {
                        Ok(batch) => {
                            results.insert(chunk.index, batch);
                            chunk.is_success = true;
                        }
                        Err(e) => {
                            warn!("[QuestionBank] 分块 {} 生成失败: {}", chunk.index, e);
                        }
                    }
                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    if let Some(tx) = progress_tx {
                        let _ = tx.send(GenerationProgress {
                            phase: "generating".to_string(),
                            completed: done,
                            total,
                            message: format!("进度: {}/{}", done, total),
                        });
                    }
                    chunk
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await
    }

    async fn generate_for_chunk(&self, content: &str) -> Result<Vec<Chapter>> {
        let prompt = format!("{}{}", GENERATION_PROMPT, content);
        let reply = self
            .chat_model
            .chat(llm_client::SYSTEM_PROMPT, &prompt)
            .await?;
        parse_chapter_batch(&reply)
    }

    /// 聚类章节名；回复解析失败时重新询问，最多 MAX_CLUSTER_ATTEMPTS 次
    async fn cluster_chapter_names(&self, names: &[String]) -> Result<Vec<ChapterCluster>> {
        let prompt = format!("{}{}", CLUSTER_PROMPT, names.join(" "));
        let mut last_error = String::new();

        for attempt in 1..=MAX_CLUSTER_ATTEMPTS {
            let reply = self
                .chat_model
                .chat(llm_client::SYSTEM_PROMPT, &prompt)
                .await?;
            match parse_cluster_reply(&reply) {
                Ok(clusters) => {
                    debug!(
                        "[QuestionBank] 聚类完成: {} 个章节名 -> {} 个簇",
                        names.len(),
                        clusters.len()
                    );
                    return Ok(clusters);
                }
                Err(e) => {
                    warn!(
                        "[QuestionBank] 聚类回复解析失败（第 {}/{} 次）: {}",
                        attempt, MAX_CLUSTER_ATTEMPTS, e
                    );
                    last_error = e.to_string();
                }
            }
        }
        Err(AppError::llm(format!("章节聚类失败: {}", last_error)))
    }
}

/// 解析单个分块的生成回复：修复 JSON、模式校验、反序列化
fn parse_chapter_batch(reply: &str) -> Result<Vec<Chapter>> {
    let payload = llm_client::repair_json_reply(reply)?;
    let value: Value = serde_json::from_str(&payload)
        .map_err(|e| AppError::llm(format!("生成结果不是合法 JSON: {}", e)))?;
    json_validator::validate(Stage::ChapterBatch, &value).map_err(|violations| {
        AppError::validation(format!("生成结果未通过校验: {}", violations.join("; ")))
    })?;
    Ok(serde_json::from_value(value)?)
}

fn parse_cluster_reply(reply: &str) -> Result<Vec<ChapterCluster>> {
    let payload = llm_client::repair_json_reply(reply)?;
    let value: Value = serde_json::from_str(&payload)
        .map_err(|e| AppError::llm(format!("聚类结果不是合法 JSON: {}", e)))?;
    json_validator::validate(Stage::ChapterCluster, &value).map_err(|violations| {
        AppError::validation(format!("聚类结果未通过校验: {}", violations.join("; ")))
    })?;
    Ok(serde_json::from_value(value)?)
}

/// 按聚类结果合并章节片段。
///
/// 每个簇的统一章节只创建一次，之后把簇内成员名对应的全部片段的题目
/// 与知识点追加进去。没有被任何簇认领的片段落入 [`MISC_CHAPTER_NAME`]。
fn merge_clusters(batches: Vec<Vec<Chapter>>, clusters: &[ChapterCluster]) -> Vec<Chapter> {
    let segments: Vec<Chapter> = batches.into_iter().flatten().collect();
    let mut claimed = vec![false; segments.len()];
    let mut merged: Vec<Chapter> = Vec::new();

    for cluster in clusters {
        let Some(uname) = cluster.unified_name.as_deref() else {
            continue;
        };
        let member_names = cluster.chapters.as_deref().unwrap_or_default();

        for (seg_index, seg) in segments.iter().enumerate() {
            let Some(seg_name) = seg.name.as_deref() else {
                continue;
            };
            if !member_names.iter().any(|n| n == seg_name) {
                continue;
            }
            claimed[seg_index] = true;

            if !merged.iter().any(|c| c.name.as_deref() == Some(uname)) {
                merged.push(Chapter::empty(uname, cluster.number));
            }
            append_segment(&mut merged, uname, seg);
        }
    }

    // 兜底：没被认领的片段归入杂项章节
    let unclaimed: Vec<&Chapter> = segments
        .iter()
        .zip(&claimed)
        .filter(|(_, taken)| !**taken)
        .map(|(seg, _)| seg)
        .collect();
    if !unclaimed.is_empty() {
        debug!(
            "[QuestionBank] {} 个章节片段未被聚类，归入 {}",
            unclaimed.len(),
            MISC_CHAPTER_NAME
        );
        if !merged
            .iter()
            .any(|c| c.name.as_deref() == Some(MISC_CHAPTER_NAME))
        {
            let next_number = merged.iter().map(|c| c.number).max().unwrap_or(0) + 1;
            merged.push(Chapter::empty(MISC_CHAPTER_NAME, next_number));
        }
        for seg in unclaimed {
            append_segment(&mut merged, MISC_CHAPTER_NAME, seg);
        }
    }

    merged
}

fn append_segment(merged: &mut [Chapter], uname: &str, seg: &Chapter) {
    let Some(cur) = merged.iter_mut().find(|c| c.name.as_deref() == Some(uname)) else {
        return;
    };
    if let Some(questions) = &seg.questions {
        cur.questions
            .get_or_insert_with(Vec::new)
            .extend(questions.iter().cloned());
    }
    if let Some(points) = &seg.knowledge_points {
        cur.knowledge_points
            .get_or_insert_with(Vec::new)
            .extend(points.iter().cloned());
    }
}
