use serde::{Deserialize, Serialize};

/// 评分标准中满分占位符
pub const MAX_POINTS_PLACEHOLDER: &str = "{maxPoints}";

/// 题目及其评分标准
///
/// 每次运行只加载一次，之后只读。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionSpec {
    pub question_id: String,
    pub description: Option<String>,
    /// 含有 `{maxPoints}` 占位符的原始评分标准
    pub rubric_template: String,
    pub max_points: Option<f64>,
}

impl QuestionSpec {
    /// 替换占位符后的评分标准
    ///
    /// `max_points` 为空时使用调用方给出的满分（例如从评分页面读出的分值）。
    pub fn rubric_text(&self, fallback_max: f64) -> String {
        let max = self.max_points.unwrap_or(fallback_max);
        self.rubric_template
            .replace(MAX_POINTS_PLACEHOLDER, &format_points(max))
    }

    /// 题干：没有单独的题干时使用题目 ID
    pub fn question_text(&self) -> String {
        self.description
            .clone()
            .unwrap_or_else(|| format!("题目 {}", self.question_id))
    }
}

/// 分数显示：整数不带小数点
pub fn format_points(points: f64) -> String {
    if points.fract() == 0.0 {
        format!("{}", points as i64)
    } else {
        format!("{}", points)
    }
}
