//! 成绩账本 - 业务能力层
//!
//! 独占账本文件：整体加载、内存中修改、整体落盘

use crate::error::{AppError, AppResult, StorageError};
use crate::models::GradingResult;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// 成绩账本
///
/// 职责：
/// - 按 `(学生, 题目)` 保存评分结果，重复写入覆盖旧值
/// - 避免重复调用评分服务（`exists` 为真时跳过）
/// - 不处理并发：多个生产者应通过 [`super::ResultWriter`] 串行写入
#[derive(Debug)]
pub struct ResultStore {
    path: PathBuf,
    records: BTreeMap<(String, String), GradingResult>,
}

impl ResultStore {
    /// 创建空账本，不读取文件
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            records: BTreeMap::new(),
        }
    }

    /// 打开账本并立即加载
    pub fn open(path: impl Into<PathBuf>) -> AppResult<Self> {
        let mut store = Self::new(path);
        store.load()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 从文件加载，替换内存中的内容
    ///
    /// 文件不存在时视为空账本。
    pub fn load(&mut self) -> AppResult<Vec<GradingResult>> {
        self.records.clear();

        if !self.path.exists() {
            debug!("账本文件不存在，使用空账本: {}", self.path.display());
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.path)
            .map_err(|e| AppError::storage_read(self.path.display().to_string(), e))?;

        let list: Vec<GradingResult> = if content.trim().is_empty() {
            Vec::new()
        } else {
            serde_json::from_str(&content).map_err(|e| {
                AppError::Storage(StorageError::Corrupted {
                    path: self.path.display().to_string(),
                    reason: e.to_string(),
                })
            })?
        };

        for result in list {
            self.records.insert(result.key(), result);
        }

        info!(
            "✓ 已加载账本 {} ({} 条成绩)",
            self.path.display(),
            self.records.len()
        );
        Ok(self.records.values().cloned().collect())
    }

    pub fn exists(&self, student_id: &str, question_id: &str) -> bool {
        self.records
            .contains_key(&(student_id.to_string(), question_id.to_string()))
    }

    pub fn get(&self, student_id: &str, question_id: &str) -> Option<&GradingResult> {
        self.records
            .get(&(student_id.to_string(), question_id.to_string()))
    }

    /// 写入一条结果，同键覆盖
    pub fn add(&mut self, result: GradingResult) {
        self.records.insert(result.key(), result);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn results(&self) -> impl Iterator<Item = &GradingResult> {
        self.records.values()
    }

    /// 整体落盘，返回账本路径
    ///
    /// 先写临时文件再重命名，避免中途失败留下半个文件。
    pub fn flush(&self) -> AppResult<PathBuf> {
        let path_str = self.path.display().to_string();

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| AppError::storage_write(&path_str, e))?;
            }
        }

        let list: Vec<&GradingResult> = self.records.values().collect();
        let json =
            serde_json::to_string_pretty(&list).map_err(|e| AppError::storage_write(&path_str, e))?;

        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, json).map_err(|e| AppError::storage_write(&path_str, e))?;
        fs::rename(&tmp_path, &self.path).map_err(|e| AppError::storage_write(&path_str, e))?;

        debug!("账本已落盘: {} ({} 条)", path_str, self.records.len());
        Ok(self.path.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ResultStore::new(dir.path().join("nope.json"));
        assert!(store.load().unwrap().is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn test_add_same_key_keeps_latest_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ResultStore::new(dir.path().join("grades.json"));
        store.add(GradingResult::new("S1", "Q1", 3.0, "first"));
        store.add(GradingResult::new("S1", "Q1", 9.0, "second"));

        assert_eq!(store.len(), 1);
        let kept = store.get("S1", "Q1").unwrap();
        assert_eq!(kept.score, 9.0);
        assert_eq!(kept.feedback, "second");
    }

    #[test]
    fn test_flush_then_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("grades.json");
        let mut store = ResultStore::new(&path);
        let a = GradingResult::new("S2", "Q1", 5.0, "ok");
        let b = GradingResult::new("S1", "Q2", 0.0, "缺少答案");
        store.add(a.clone());
        store.add(b.clone());

        assert_eq!(store.flush().unwrap(), path);

        let mut reopened = ResultStore::new(&path);
        let mut loaded = reopened.load().unwrap();
        loaded.sort_by(|x, y| x.key().cmp(&y.key()));
        let mut expected = vec![a, b];
        expected.sort_by(|x, y| x.key().cmp(&y.key()));
        assert_eq!(loaded, expected);
        assert!(reopened.exists("S1", "Q2"));
        assert!(!reopened.exists("S1", "Q1"));
    }

    #[test]
    fn test_corrupted_ledger_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grades.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = ResultStore::open(&path).unwrap_err();
        assert!(err.is_fatal());
    }
}
