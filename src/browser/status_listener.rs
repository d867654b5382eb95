//! 网络响应监听
//!
//! 拦截评分页面自身发出的请求，把响应中的学生状态写入 [`StatusTracker`]。
//! 只写不读；引擎从不等待这里的事件。

use chromiumoxide::cdp::browser_protocol::network::{
    EventLoadingFailed, EventLoadingFinished, EventResponseReceived, GetResponseBodyParams,
};
use chromiumoxide::Page;
use futures::StreamExt;
use std::collections::HashMap;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::AppResult;
use crate::services::StatusTracker;

/// 启动后台监听任务
///
/// `url_fragment`: 只处理地址中包含该片段的 JSON 响应。
pub async fn spawn_status_listener(
    page: Page,
    url_fragment: String,
    tracker: StatusTracker,
) -> AppResult<JoinHandle<()>> {
    let mut responses = page.event_listener::<EventResponseReceived>().await?;
    let mut finished = page.event_listener::<EventLoadingFinished>().await?;
    let mut failed = page.event_listener::<EventLoadingFailed>().await?;

    let handle = tokio::spawn(async move {
        let mut pending = PendingResponses::new(url_fragment);

        loop {
            tokio::select! {
                Some(event) = responses.next() => {
                    pending.track(
                        event.request_id.inner(),
                        &event.response.url,
                        &event.response.mime_type,
                    );
                }
                Some(event) = failed.next() => {
                    if let Some(url) = pending.take(event.request_id.inner()) {
                        debug!("状态请求失败 {}: {}", url, event.error_text);
                    }
                }
                Some(event) = finished.next() => {
                    let Some(url) = pending.take(event.request_id.inner()) else {
                        continue;
                    };
                    let body = match page
                        .execute(GetResponseBodyParams::new(event.request_id.clone()))
                        .await
                    {
                        Ok(resp) if !resp.result.base64_encoded => resp.result.body.clone(),
                        Ok(_) => continue,
                        Err(e) => {
                            debug!("读取响应体失败 {}: {}", url, e);
                            continue;
                        }
                    };
                    match serde_json::from_str::<serde_json::Value>(strip_json_guard(&body)) {
                        Ok(payload) => {
                            let count = tracker.record_payload(&payload);
                            debug!("从 {} 记录了 {} 个状态事件", url, count);
                        }
                        Err(e) => warn!("状态响应不是合法 JSON ({}): {}", url, e),
                    }
                }
                else => break,
            }
        }
        debug!("状态监听结束 (未完成请求 {} 个)", pending.len());
    });

    Ok(handle)
}

/// 已收到响应头、等待响应体的状态请求
///
/// 请求结束（完成或失败）时移除。
#[derive(Debug, Default)]
struct PendingResponses {
    url_fragment: String,
    by_request: HashMap<String, String>,
}

impl PendingResponses {
    fn new(url_fragment: String) -> Self {
        Self {
            url_fragment,
            by_request: HashMap::new(),
        }
    }

    /// 只记录地址匹配的 JSON 响应
    fn track(&mut self, request_id: &str, url: &str, mime_type: &str) {
        if url.contains(&self.url_fragment) && mime_type.contains("json") {
            self.by_request.insert(request_id.to_string(), url.to_string());
        }
    }

    fn take(&mut self, request_id: &str) -> Option<String> {
        self.by_request.remove(request_id)
    }

    fn len(&self) -> usize {
        self.by_request.len()
    }
}

/// 去掉部分站点加在 JSON 前面的防劫持前缀 `while(1);`
fn strip_json_guard(body: &str) -> &str {
    body.trim_start()
        .strip_prefix("while(1);")
        .unwrap_or(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_json_guard() {
        assert_eq!(strip_json_guard("while(1);[1,2]"), "[1,2]");
        assert_eq!(strip_json_guard("[1,2]"), "[1,2]");
    }

    #[test]
    fn test_pending_tracks_matching_json_and_drops_ended_requests() {
        let mut pending = PendingResponses::new("/submissions".to_string());
        pending.track("1", "https://lms.example/api/v1/courses/9/submissions?x=1", "application/json");
        pending.track("2", "https://lms.example/api/v1/courses/9/submissions", "application/json");
        pending.track("3", "https://lms.example/api/v1/users/self", "application/json");
        pending.track("4", "https://lms.example/courses/9/submissions", "text/html");
        assert_eq!(pending.len(), 2);

        // 请求 1 正常完成，请求 2 加载失败，两者都不应残留
        assert!(pending.take("1").is_some());
        assert!(pending.take("2").is_some());
        assert!(pending.take("2").is_none());
        assert_eq!(pending.len(), 0);
    }
}
