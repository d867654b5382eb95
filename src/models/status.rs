use serde::{Deserialize, Serialize};

/// 从评分页面网络响应中观察到的学生状态事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub student_id: String,
    pub has_submission: bool,
    pub has_graded: bool,
}

/// 学生状态（只在本次运行内有效，不落盘）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentStatus {
    pub student_id: String,
    pub has_submission: bool,
    pub has_graded: bool,
}

impl From<StatusEvent> for StudentStatus {
    fn from(evt: StatusEvent) -> Self {
        Self {
            student_id: evt.student_id,
            has_submission: evt.has_submission,
            has_graded: evt.has_graded,
        }
    }
}
