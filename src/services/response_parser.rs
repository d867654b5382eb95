//! 评分回复解析
//!
//! 严格 JSON → 正则提取 → 降级为 0 分，逐层兜底

use crate::error::{AppError, AppResult};
use crate::models::clamp_score;
use regex::Regex;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

/// 解析方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMethod {
    /// 合法的 `{grade, comment}` JSON
    Structured,
    /// 从自由文本中用正则提取
    Pattern,
    /// 两种方式都失败
    Degraded,
}

/// 解析后的评分
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedGrade {
    /// 已限制在 `[0, max_points]`
    pub score: f64,
    pub feedback: String,
    pub method: ParseMethod,
}

/// 评分回复解析器
pub struct ResponseParser {
    grade_re: Regex,
    comment_re: Regex,
    failure_comment: String,
}

impl ResponseParser {
    pub fn new(failure_comment: impl Into<String>) -> AppResult<Self> {
        let grade_re = Regex::new(r#"(?i)"?\bgrade"?\s*[:=]\s*"?(-?\d+(?:\.\d+)?)"#)
            .map_err(|e| AppError::Other(e.to_string()))?;
        let comment_re = Regex::new(r#"(?is)"?\bcomment"?\s*[:=]\s*"((?:[^"\\]|\\.)*)""#)
            .map_err(|e| AppError::Other(e.to_string()))?;
        Ok(Self {
            grade_re,
            comment_re,
            failure_comment: failure_comment.into(),
        })
    }

    /// 解析评分服务的回复，分数限制在 `[0, max_points]`
    pub fn parse(&self, response: &str, max_points: f64) -> ParsedGrade {
        if let Some((score, feedback)) = self.parse_structured(response) {
            return ParsedGrade {
                score: clamp_score(score, max_points),
                feedback,
                method: ParseMethod::Structured,
            };
        }

        if let Some((score, feedback)) = self.parse_pattern(response) {
            debug!("回复不是合法 JSON，已用正则提取");
            return ParsedGrade {
                score: clamp_score(score, max_points),
                feedback,
                method: ParseMethod::Pattern,
            };
        }

        warn!(
            "⚠️ 无法解析评分回复，按 0 分处理: {}",
            crate::utils::logging::truncate_text(response, 80)
        );
        ParsedGrade {
            score: 0.0,
            feedback: self.failure_comment.clone(),
            method: ParseMethod::Degraded,
        }
    }

    fn parse_structured(&self, response: &str) -> Option<(f64, String)> {
        let body = strip_code_fence(response.trim());

        let value = serde_json::from_str::<JsonValue>(body).ok().or_else(|| {
            let start = body.find('{')?;
            let end = body.rfind('}')?;
            if end <= start {
                return None;
            }
            serde_json::from_str::<JsonValue>(&body[start..=end]).ok()
        })?;

        let grade = match value.get("grade")? {
            JsonValue::Number(n) => n.as_f64()?,
            JsonValue::String(s) => s.trim().parse::<f64>().ok()?,
            _ => return None,
        };
        let comment = match value.get("comment") {
            Some(JsonValue::String(s)) => s.clone(),
            Some(JsonValue::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        Some((grade, comment))
    }

    fn parse_pattern(&self, response: &str) -> Option<(f64, String)> {
        let grade = self
            .grade_re
            .captures(response)?
            .get(1)?
            .as_str()
            .parse::<f64>()
            .ok()?;

        let comment = self
            .comment_re
            .captures(response)
            .and_then(|caps| caps.get(1))
            .map(|m| unescape(m.as_str()))
            .unwrap_or_else(|| response.trim().to_string());

        Some((grade, comment))
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn unescape(raw: &str) -> String {
    serde_json::from_str::<String>(&format!("\"{}\"", raw)).unwrap_or_else(|_| raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> ResponseParser {
        ResponseParser::new("解析失败").unwrap()
    }

    #[test]
    fn test_structured_json() {
        let parsed = parser().parse(r#"{"grade": 8, "comment": "思路清晰"}"#, 10.0);
        assert_eq!(parsed.score, 8.0);
        assert_eq!(parsed.feedback, "思路清晰");
        assert_eq!(parsed.method, ParseMethod::Structured);
    }

    #[test]
    fn test_structured_inside_code_fence_and_prose() {
        let fenced = "```json\n{\"grade\": \"6.5\", \"comment\": \"ok\"}\n```";
        assert_eq!(parser().parse(fenced, 10.0).score, 6.5);

        let prose = "评分如下：{\"grade\": 4, \"comment\": \"缺少边界处理\"} 谢谢";
        let parsed = parser().parse(prose, 10.0);
        assert_eq!(parsed.method, ParseMethod::Structured);
        assert_eq!(parsed.feedback, "缺少边界处理");
    }

    #[test]
    fn test_pattern_fallback() {
        let parsed = parser().parse(r#"grade: 7 comment: "good""#, 10.0);
        assert_eq!(parsed.score, 7.0);
        assert_eq!(parsed.feedback, "good");
        assert_eq!(parsed.method, ParseMethod::Pattern);
    }

    #[test]
    fn test_pattern_with_escaped_quotes() {
        let text = r#""grade": 3, "comment": "uses \"goto\" heavily"  (trailing"#;
        let parsed = parser().parse(text, 5.0);
        assert_eq!(parsed.score, 3.0);
        assert_eq!(parsed.feedback, "uses \"goto\" heavily");
    }

    #[test]
    fn test_degraded_when_nothing_matches() {
        let parsed = parser().parse("I cannot grade this.", 10.0);
        assert_eq!(parsed.score, 0.0);
        assert_eq!(parsed.feedback, "解析失败");
        assert_eq!(parsed.method, ParseMethod::Degraded);
    }

    #[test]
    fn test_scores_are_clamped() {
        assert_eq!(parser().parse(r#"{"grade": 15, "comment": ""}"#, 10.0).score, 10.0);
        assert_eq!(parser().parse(r#"{"grade": -2, "comment": ""}"#, 10.0).score, 0.0);
        assert_eq!(parser().parse("grade = -4", 10.0).score, 0.0);
    }
}
