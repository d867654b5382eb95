//! 学生状态跟踪 - 业务能力层
//!
//! 被动接收页面上观察到的状态事件；引擎只读取快照，从不等待事件

use crate::models::{StatusEvent, StudentStatus};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// 学生状态跟踪器
///
/// 可以 clone 后交给事件回调；所有 clone 共享同一份状态。
/// 同一学生以最后一次事件为准。
#[derive(Debug, Clone, Default)]
pub struct StatusTracker {
    inner: Arc<RwLock<HashMap<String, StudentStatus>>>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一个事件
    pub fn record_event(&self, evt: StatusEvent) {
        debug!(
            "状态事件: 学生 {} 已提交={} 已评分={}",
            evt.student_id, evt.has_submission, evt.has_graded
        );
        match self.inner.write() {
            Ok(mut map) => {
                map.insert(evt.student_id.clone(), evt.into());
            }
            Err(poisoned) => {
                warn!("状态表锁已中毒，继续写入");
                poisoned.into_inner().insert(evt.student_id.clone(), evt.into());
            }
        }
    }

    /// 读取某个学生的状态快照
    pub fn get(&self, student_id: &str) -> Option<StudentStatus> {
        match self.inner.read() {
            Ok(map) => map.get(student_id).cloned(),
            Err(poisoned) => poisoned.into_inner().get(student_id).cloned(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 解析一个网络响应体并记录其中的全部事件，返回事件数
    pub fn record_payload(&self, payload: &JsonValue) -> usize {
        let events = events_from_payload(payload);
        let count = events.len();
        for evt in events {
            self.record_event(evt);
        }
        count
    }
}

/// 从网络响应 JSON 中提取状态事件
///
/// 识别带学生标识的对象：
/// - `workflow_state`: `unsubmitted` / `submitted` / `pending_review` / `graded`
/// - 或显式的 `hasSubmission` / `hasGraded` 布尔值
///
/// 数组和嵌套的 `submissions` / `submission` 字段会被递归遍历。
pub fn events_from_payload(payload: &JsonValue) -> Vec<StatusEvent> {
    let mut events = Vec::new();
    collect_events(payload, &mut events);
    events
}

fn collect_events(value: &JsonValue, out: &mut Vec<StatusEvent>) {
    match value {
        JsonValue::Array(items) => {
            for item in items {
                collect_events(item, out);
            }
        }
        JsonValue::Object(map) => {
            if let Some(evt) = event_from_object(value) {
                out.push(evt);
            }
            for key in ["submissions", "submission", "data"] {
                if let Some(nested) = map.get(key) {
                    collect_events(nested, out);
                }
            }
        }
        _ => {}
    }
}

fn event_from_object(value: &JsonValue) -> Option<StatusEvent> {
    let student_id = ["studentId", "student_id", "user_id", "userId"]
        .iter()
        .find_map(|k| value.get(*k))
        .and_then(|v| match v {
            JsonValue::String(s) => Some(s.clone()),
            JsonValue::Number(n) => Some(n.to_string()),
            _ => None,
        })?;

    let explicit_submission = value
        .get("hasSubmission")
        .or_else(|| value.get("has_submission"))
        .and_then(|v| v.as_bool());
    let explicit_graded = value
        .get("hasGraded")
        .or_else(|| value.get("has_graded"))
        .and_then(|v| v.as_bool());

    if let (Some(has_submission), Some(has_graded)) = (explicit_submission, explicit_graded) {
        return Some(StatusEvent {
            student_id,
            has_submission,
            has_graded,
        });
    }

    let state = value.get("workflow_state").and_then(|v| v.as_str())?;
    let (has_submission, has_graded) = match state {
        "unsubmitted" => (false, false),
        "submitted" | "pending_review" => (true, false),
        "graded" => (true, true),
        _ => return None,
    };

    Some(StatusEvent {
        student_id,
        has_submission: explicit_submission.unwrap_or(has_submission),
        has_graded: explicit_graded.unwrap_or(has_graded),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn evt(id: &str, sub: bool, graded: bool) -> StatusEvent {
        StatusEvent {
            student_id: id.to_string(),
            has_submission: sub,
            has_graded: graded,
        }
    }

    #[test]
    fn test_last_write_wins() {
        let tracker = StatusTracker::new();
        tracker.record_event(evt("S1", false, false));
        tracker.record_event(evt("S1", true, true));

        let status = tracker.get("S1").unwrap();
        assert!(status.has_submission);
        assert!(status.has_graded);
        assert_eq!(tracker.len(), 1);
        assert!(tracker.get("S2").is_none());
    }

    #[test]
    fn test_clones_share_state() {
        let tracker = StatusTracker::new();
        let handler = tracker.clone();
        std::thread::spawn(move || handler.record_event(evt("S9", true, false)))
            .join()
            .unwrap();
        assert!(tracker.get("S9").is_some());
    }

    #[test]
    fn test_payload_decoding() {
        let payload = json!([
            {"user_id": 101, "workflow_state": "graded"},
            {"user_id": "102", "workflow_state": "unsubmitted"},
            {"user_id": "103", "workflow_state": "pending_review"},
            {"studentId": "104", "hasSubmission": true, "hasGraded": false},
            {"user": {"name": "no id"}},
            {"submissions": [{"user_id": "105", "workflow_state": "submitted"}]}
        ]);

        let events = events_from_payload(&payload);
        assert_eq!(
            events,
            vec![
                evt("101", true, true),
                evt("102", false, false),
                evt("103", true, false),
                evt("104", true, false),
                evt("105", true, false),
            ]
        );

        let tracker = StatusTracker::new();
        assert_eq!(tracker.record_payload(&payload), 5);
    }
}
