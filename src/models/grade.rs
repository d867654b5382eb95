use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// 一个学生一道题的评分结果
///
/// 按 `(student_id, question_id)` 唯一；落盘格式为
/// `{studentId, questionId, grade, comment, gradedAt}`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradingResult {
    #[serde(rename = "studentId")]
    pub student_id: String,
    #[serde(rename = "questionId")]
    pub question_id: String,
    #[serde(rename = "grade")]
    pub score: f64,
    #[serde(rename = "comment")]
    pub feedback: String,
    #[serde(rename = "gradedAt")]
    pub graded_at: DateTime<Local>,
}

impl GradingResult {
    pub fn new(
        student_id: impl Into<String>,
        question_id: impl Into<String>,
        score: f64,
        feedback: impl Into<String>,
    ) -> Self {
        Self {
            student_id: student_id.into(),
            question_id: question_id.into(),
            score,
            feedback: feedback.into(),
            graded_at: Local::now(),
        }
    }

    /// 降级结果：0 分并附上原因，保证整批处理能继续
    pub fn degraded(
        student_id: impl Into<String>,
        question_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::new(student_id, question_id, 0.0, reason)
    }

    pub fn key(&self) -> (String, String) {
        (self.student_id.clone(), self.question_id.clone())
    }

    /// 是否满分
    pub fn is_full_mark(&self, max_points: f64) -> bool {
        max_points > 0.0 && self.score >= max_points
    }
}

/// 把分数限制在 `[0, max_points]`，非有限值按 0 处理
pub fn clamp_score(score: f64, max_points: f64) -> f64 {
    if !score.is_finite() {
        return 0.0;
    }
    let upper = if max_points.is_finite() && max_points > 0.0 {
        max_points
    } else {
        0.0
    };
    score.clamp(0.0, upper)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_score_bounds() {
        assert_eq!(clamp_score(12.0, 10.0), 10.0);
        assert_eq!(clamp_score(-3.0, 10.0), 0.0);
        assert_eq!(clamp_score(7.5, 10.0), 7.5);
        assert_eq!(clamp_score(f64::NAN, 10.0), 0.0);
        assert_eq!(clamp_score(f64::INFINITY, 10.0), 0.0);
    }

    #[test]
    fn test_ledger_field_names() {
        let result = GradingResult::new("123456", "000001", 8.0, "不错");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["studentId"], "123456");
        assert_eq!(json["questionId"], "000001");
        assert_eq!(json["grade"], 8.0);
        assert_eq!(json["comment"], "不错");
        assert!(json["gradedAt"].is_string());
    }
}
