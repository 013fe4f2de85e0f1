// 按管线阶段校验模型输出的 JSON 结构
use jsonschema::JSONSchema;
use serde_json::Value;
use std::ops::Deref;
use std::sync::LazyLock;

/// 不同管线阶段的 JSON 校验枚举
pub enum Stage {
    ChapterBatch,   // 分块出题阶段（章节数组，含题库）
    ChapterCluster, // 章节聚类阶段（同义章节归并列表）
}

// ChapterBatch: 每个章节要求 name/number/bank，题目要求题干与答案
static CHAPTER_BATCH_SCHEMA: LazyLock<Value> = LazyLock::new(|| {
    serde_json::json!({
        "type": "array",
        "items": {
            "type": "object",
            "properties": {
                "name": { "type": "string" },
                "number": { "type": "integer" },
                "bank": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "text": { "type": "string" },
                            "correct_answer": { "type": "string" }
                        },
                        "required": ["text", "correct_answer"],
                        "additionalProperties": true
                    }
                },
                "know": {
                    "type": ["array", "null"],
                    "items": {
                        "type": "object",
                        "properties": {
                            "name": { "type": ["string", "null"] },
                            "content": { "type": ["string", "null"] }
                        },
                        "additionalProperties": true
                    }
                }
            },
            "required": ["name", "number", "bank"],
            "additionalProperties": true
        }
    })
});

// ChapterCluster: names 数组 + 统一章节名 + 编号
static CHAPTER_CLUSTER_SCHEMA: LazyLock<Value> = LazyLock::new(|| {
    serde_json::json!({
        "type": "array",
        "items": {
            "type": "object",
            "properties": {
                "names": { "type": "array", "items": { "type": "string" } },
                "uname": { "type": "string" },
                "number": { "type": "integer" }
            },
            "required": ["names", "uname", "number"],
            "additionalProperties": true
        }
    })
});

/// 按阶段校验 JSON 数据
pub fn validate(stage: Stage, data: &Value) -> Result<(), Vec<String>> {
    let schema = match stage {
        Stage::ChapterBatch => CHAPTER_BATCH_SCHEMA.deref(),
        Stage::ChapterCluster => CHAPTER_CLUSTER_SCHEMA.deref(),
    };
    let compiled = JSONSchema::compile(schema).map_err(|e| vec![e.to_string()])?;
    let result = compiled.validate(data);
    if let Err(errors) = result {
        let msgs: Vec<String> = errors.map(|e| e.to_string()).collect();
        Err(msgs)
    } else {
        Ok(())
    }
}
