//! 提交文件关联服务 - 业务能力层
//!
//! 只负责"把文件名变成提交记录"，不关心评分

use crate::config::AssignmentMode;
use crate::error::{AppError, AppResult, ParseError};
use crate::models::{ParsedFilename, SubmissionRecord};
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use tokio::fs;
use tracing::{debug, warn};

/// 多题作业：`<7位学号><6位学生ID>_question_<6位题目ID>_<7位提交ID>_<文件名>`
const GROUPED_PATTERN: &str = r"^(\d{7})(\d{6})_question_(\d{6})_(\d{7})_(.+)$";
/// 单题作业：`<7位学号>_[LATE_]<6位学生ID>_<7位提交ID>_<文件名>`
const SINGLE_PATTERN: &str = r"^(\d{7})_(LATE_)?(\d{6})_(\d{7})_(.+)$";

/// 提交文件关联器
///
/// 职责：
/// - 按作业模式解析文件名
/// - 把同一 `(学生, 题目)` 的文件聚合成一条记录
pub struct SubmissionCorrelator {
    mode: AssignmentMode,
    assignment_id: String,
    pattern: Regex,
}

impl SubmissionCorrelator {
    pub fn new(mode: AssignmentMode, assignment_id: impl Into<String>) -> AppResult<Self> {
        let raw = match mode {
            AssignmentMode::Grouped => GROUPED_PATTERN,
            AssignmentMode::Single => SINGLE_PATTERN,
        };
        let pattern = Regex::new(raw).map_err(|e| AppError::Other(e.to_string()))?;
        Ok(Self {
            mode,
            assignment_id: assignment_id.into(),
            pattern,
        })
    }

    /// 解析单个文件名
    pub fn parse(&self, filename: &str) -> AppResult<ParsedFilename> {
        let caps = self.pattern.captures(filename).ok_or_else(|| {
            AppError::Parse(ParseError::Filename {
                filename: filename.to_string(),
                mode: self.mode.as_str().to_string(),
            })
        })?;

        let group = |i: usize| caps.get(i).map(|m| m.as_str().to_string()).unwrap_or_default();

        let parsed = match self.mode {
            AssignmentMode::Grouped => ParsedFilename {
                student_number: group(1),
                student_id: group(2),
                question_id: group(3),
                submission_id: group(4),
                original_name: group(5),
                late: false,
            },
            AssignmentMode::Single => ParsedFilename {
                student_number: group(1),
                late: caps.get(2).is_some(),
                student_id: group(3),
                question_id: self.assignment_id.clone(),
                submission_id: group(4),
                original_name: group(5),
            },
        };

        Ok(parsed)
    }

    /// 列出目录中的全部提交，按 `(学生, 题目)` 聚合
    ///
    /// 无法识别的文件名记录日志后跳过。文件按名称排序后处理，
    /// 记录和记录内文件的顺序都保持首次出现的顺序。
    pub async fn list_submissions(&self, directory: &Path) -> AppResult<Vec<SubmissionRecord>> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(directory).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.is_file() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();

        let mut records: Vec<SubmissionRecord> = Vec::new();
        let mut index: HashMap<(String, String), usize> = HashMap::new();

        for name in names {
            let parsed = match self.parse(&name) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!("⚠️ 跳过文件: {}", e);
                    continue;
                }
            };
            if parsed.late {
                debug!("迟交文件: {}", name);
            }

            let key = (parsed.student_id.clone(), parsed.question_id.clone());
            let path = directory.join(&name);
            match index.get(&key) {
                Some(&i) => records[i].files.push(path),
                None => {
                    index.insert(key, records.len());
                    records.push(SubmissionRecord {
                        student_number: parsed.student_number,
                        student_id: parsed.student_id,
                        question_id: parsed.question_id,
                        submission_id: parsed.submission_id,
                        files: vec![path],
                    });
                }
            }
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grouped_filename() {
        let correlator = SubmissionCorrelator::new(AssignmentMode::Grouped, "999999").unwrap();
        let parsed = correlator
            .parse("1234567123456_question_000001_0001234_file.py")
            .unwrap();
        assert_eq!(parsed.student_number, "1234567");
        assert_eq!(parsed.student_id, "123456");
        assert_eq!(parsed.question_id, "000001");
        assert_eq!(parsed.submission_id, "0001234");
        assert_eq!(parsed.original_name, "file.py");
    }

    #[test]
    fn test_single_filename_with_late_flag() {
        let correlator = SubmissionCorrelator::new(AssignmentMode::Single, "777777").unwrap();
        let parsed = correlator.parse("1234567_LATE_123456_0001234_file.py").unwrap();
        assert_eq!(parsed.student_id, "123456");
        assert_eq!(parsed.question_id, "777777");
        assert!(parsed.late);

        let on_time = correlator.parse("1234567_123456_0001234_main.c").unwrap();
        assert!(!on_time.late);
        assert_eq!(on_time.submission_id, "0001234");
    }

    #[test]
    fn test_non_matching_name_is_parse_error() {
        let correlator = SubmissionCorrelator::new(AssignmentMode::Single, "777777").unwrap();
        let err = correlator.parse("readme.txt").unwrap_err();
        assert!(matches!(err, AppError::Parse(ParseError::Filename { .. })));
    }

    #[tokio::test]
    async fn test_list_groups_files_by_key() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "1234567123456_question_000001_0001234_a.py",
            "1234567123456_question_000001_0001234_b.py",
            "1234567123456_question_000002_0001235_c.py",
            "7654321654321_question_000001_0001236_d.py",
            "notes.txt",
        ] {
            std::fs::write(dir.path().join(name), "x").unwrap();
        }

        let correlator = SubmissionCorrelator::new(AssignmentMode::Grouped, "0").unwrap();
        let records = correlator.list_submissions(dir.path()).await.unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].key(), ("123456".to_string(), "000001".to_string()));
        assert_eq!(records[0].files.len(), 2);
        assert!(records[0].files[0].ends_with("1234567123456_question_000001_0001234_a.py"));
        assert!(records[0].files[1].ends_with("1234567123456_question_000001_0001234_b.py"));
        assert_eq!(records[2].student_id, "654321");
    }
}
