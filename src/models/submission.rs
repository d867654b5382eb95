use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 一个学生对一道题的提交
///
/// 由 `(student_id, question_id)` 唯一确定；同一键下的多个文件累积到 `files` 中，
/// 顺序与目录中出现的顺序一致。创建后不再修改。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub student_number: String,
    pub student_id: String,
    pub question_id: String,
    pub submission_id: String,
    pub files: Vec<PathBuf>,
}

impl SubmissionRecord {
    /// 唯一键
    pub fn key(&self) -> (String, String) {
        (self.student_id.clone(), self.question_id.clone())
    }
}

/// 单个文件名解析出来的字段，尚未按键聚合
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFilename {
    pub student_number: String,
    pub student_id: String,
    pub question_id: String,
    pub submission_id: String,
    /// 学生上传时的原始文件名
    pub original_name: String,
    /// 是否迟交
    pub late: bool,
}
