use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// 批处理任务状态
///
/// 只能前进：`Submitted -> Running -> {Completed, Failed, Cancelled, Expired}`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Submitted,
    Running,
    Completed,
    Failed,
    Cancelled,
    Expired,
}

impl BatchStatus {
    /// 是否为终止状态
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BatchStatus::Completed | BatchStatus::Failed | BatchStatus::Cancelled | BatchStatus::Expired
        )
    }

    fn rank(self) -> u8 {
        match self {
            BatchStatus::Submitted => 0,
            BatchStatus::Running => 1,
            _ => 2,
        }
    }

    /// 把 OpenAI 兼容接口的状态字符串映射为本地状态
    ///
    /// `validating` 视为已提交；`in_progress` / `finalizing` / `cancelling` 视为运行中。
    pub fn from_remote(status: &str) -> Option<Self> {
        match status {
            "validating" | "submitted" => Some(BatchStatus::Submitted),
            "in_progress" | "finalizing" | "cancelling" | "running" => Some(BatchStatus::Running),
            "completed" => Some(BatchStatus::Completed),
            "failed" => Some(BatchStatus::Failed),
            "cancelled" => Some(BatchStatus::Cancelled),
            "expired" => Some(BatchStatus::Expired),
            _ => None,
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BatchStatus::Submitted => "submitted",
            BatchStatus::Running => "running",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
            BatchStatus::Cancelled => "cancelled",
            BatchStatus::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// 一个已提交的批处理任务
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchJob {
    pub job_id: String,
    pub input_artifact_path: PathBuf,
    pub output_artifact_path: Option<PathBuf>,
    pub error_artifact_path: Option<PathBuf>,
    pub status: BatchStatus,
}

impl BatchJob {
    pub fn submitted(job_id: impl Into<String>, input_artifact_path: PathBuf) -> Self {
        Self {
            job_id: job_id.into(),
            input_artifact_path,
            output_artifact_path: None,
            error_artifact_path: None,
            status: BatchStatus::Submitted,
        }
    }

    /// 记录一次观察到的状态，返回状态是否发生了变化
    ///
    /// 后退或在终止状态之后的变化会被忽略。
    pub fn observe(&mut self, status: BatchStatus) -> bool {
        if self.status.is_terminal() || status.rank() < self.status.rank() || status == self.status {
            return false;
        }
        self.status = status;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_only_moves_forward() {
        let mut job = BatchJob::submitted("batch_1", PathBuf::from("in.jsonl"));
        assert!(job.observe(BatchStatus::Running));
        assert!(!job.observe(BatchStatus::Submitted));
        assert_eq!(job.status, BatchStatus::Running);
        assert!(job.observe(BatchStatus::Completed));
        assert!(!job.observe(BatchStatus::Failed));
        assert_eq!(job.status, BatchStatus::Completed);
    }

    #[test]
    fn test_submitted_can_jump_to_terminal() {
        let mut job = BatchJob::submitted("batch_2", PathBuf::from("in.jsonl"));
        assert!(job.observe(BatchStatus::Failed));
        assert!(job.status.is_terminal());
    }

    #[test]
    fn test_remote_status_mapping() {
        assert_eq!(BatchStatus::from_remote("validating"), Some(BatchStatus::Submitted));
        assert_eq!(BatchStatus::from_remote("finalizing"), Some(BatchStatus::Running));
        assert_eq!(BatchStatus::from_remote("expired"), Some(BatchStatus::Expired));
        assert_eq!(BatchStatus::from_remote("weird"), None);
    }
}
