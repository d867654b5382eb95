//! 基于浏览器的评分页面驱动
//!
//! 把 [`Surface`] 定位路径翻译成 JS 表达式，通过 [`JsExecutor`] 执行

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::browser::status_listener::spawn_status_listener;
use crate::error::{AppError, AppResult};
use crate::infrastructure::{ControlHandle, JsExecutor, Scope, Surface, SurfaceDriver};
use crate::services::StatusTracker;

const SIGNAL_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// 浏览器页面驱动
pub struct BrowserSurface {
    executor: JsExecutor,
    /// 状态响应的地址特征
    status_url_fragment: String,
}

#[derive(Debug, Deserialize)]
struct RawControl {
    label: String,
    ident: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ActionOutcome {
    ok: bool,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TextOutcome {
    found: bool,
    text: String,
}

#[derive(Debug, Deserialize)]
struct FetchOutcome {
    ok: bool,
    status: u16,
    #[serde(default)]
    text: String,
}

impl BrowserSurface {
    pub fn new(executor: JsExecutor, status_url_fragment: impl Into<String>) -> Self {
        Self {
            executor,
            status_url_fragment: status_url_fragment.into(),
        }
    }

    async fn run_action(&self, action: &str, js_code: String) -> AppResult<()> {
        let outcome: ActionOutcome = self.executor.eval_as(js_code).await?;
        if outcome.ok {
            Ok(())
        } else {
            Err(AppError::action_rejected(
                action,
                outcome.reason.unwrap_or_else(|| "未知原因".to_string()),
            ))
        }
    }
}

/// JS 字符串字面量
fn js_str(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

/// 区域根节点的 JS 表达式，可能为 null
pub fn root_expr(surface: &Surface) -> String {
    let mut expr = "document".to_string();
    for scope in surface.path() {
        expr = match scope {
            Scope::Frame(selector) => format!(
                "((r) => {{ const f = r && r.querySelector({}); return f ? f.contentDocument : null; }})({})",
                js_str(selector),
                expr
            ),
            Scope::Element { selector, index } => format!(
                "((r) => r ? (r.querySelectorAll({})[{}] || null) : null)({})",
                js_str(selector),
                index,
                expr
            ),
        };
    }
    expr
}

/// 控件本身的 JS 表达式，可能为 null
pub fn element_expr(handle: &ControlHandle) -> String {
    format!(
        "((r) => r ? (r.querySelectorAll({})[{}] || null) : null)({})",
        js_str(&handle.selector),
        handle.index,
        root_expr(&handle.surface)
    )
}

#[async_trait]
impl SurfaceDriver for BrowserSurface {
    async fn navigate(&self, target: &str) -> AppResult<Surface> {
        debug!("导航到: {}", target);
        self.executor.goto(target).await?;
        Ok(Surface::top())
    }

    async fn enter_sub_surface(&self, parent: &Surface, selector: &str) -> AppResult<Option<Surface>> {
        let child = parent.frame(selector);
        let js_code = format!("(() => {{ const d = {}; return !!(d && d.body); }})()", root_expr(&child));
        let present: bool = self.executor.eval_as(js_code).await?;
        Ok(present.then_some(child))
    }

    async fn probe_capability(&self, surface: &Surface, selector: &str) -> AppResult<bool> {
        let js_code = format!(
            r#"(() => {{
                const r = {root};
                if (!r) return false;
                if (r.matches && r.matches({sel})) return true;
                return !!r.querySelector({sel});
            }})()"#,
            root = root_expr(surface),
            sel = js_str(selector)
        );
        self.executor.eval_as(js_code).await
    }

    async fn query(&self, surface: &Surface, selector: &str) -> AppResult<Vec<ControlHandle>> {
        let js_code = format!(
            r#"(() => {{
                const r = {root};
                if (!r) return [];
                return Array.from(r.querySelectorAll({sel})).map(el => ({{
                    label: (el.innerText || el.textContent || el.value || '').trim(),
                    ident: el.getAttribute('value') || el.href || (el.dataset && el.dataset.id) || el.id || null,
                }}));
            }})()"#,
            root = root_expr(surface),
            sel = js_str(selector)
        );
        let raw: Vec<RawControl> = self.executor.eval_as(js_code).await?;
        Ok(raw
            .into_iter()
            .enumerate()
            .map(|(index, c)| ControlHandle {
                surface: surface.clone(),
                selector: selector.to_string(),
                index,
                label: c.label,
                ident: c.ident.filter(|s| !s.is_empty()),
            })
            .collect())
    }

    async fn read_text(&self, handle: &ControlHandle) -> AppResult<String> {
        let js_code = format!(
            r#"(() => {{
                const el = {el};
                if (!el) return {{ found: false, text: '' }};
                const editable = ['INPUT', 'TEXTAREA', 'SELECT'].includes(el.tagName);
                return {{ found: true, text: editable ? el.value : (el.innerText || el.textContent || '') }};
            }})()"#,
            el = element_expr(handle)
        );
        let outcome: TextOutcome = self.executor.eval_as(js_code).await?;
        if outcome.found {
            Ok(outcome.text)
        } else {
            Err(AppError::control_not_found(&handle.selector))
        }
    }

    async fn set_value(&self, handle: &ControlHandle, value: &str) -> AppResult<()> {
        let js_code = format!(
            r#"(() => {{
                const el = {el};
                const v = {value};
                if (!el) return {{ ok: false, reason: 'not found' }};
                if (el.disabled || el.readOnly) return {{ ok: false, reason: 'disabled' }};
                el.focus();
                const win = el.ownerDocument.defaultView;
                if (el.tagName === 'SELECT') {{
                    const opt = Array.from(el.options).find(o =>
                        o.value === v || o.text.trim().toLowerCase() === v.toLowerCase());
                    if (!opt) return {{ ok: false, reason: 'option not found: ' + v }};
                    el.value = opt.value;
                }} else {{
                    const proto = el.tagName === 'TEXTAREA'
                        ? win.HTMLTextAreaElement.prototype
                        : win.HTMLInputElement.prototype;
                    Object.getOwnPropertyDescriptor(proto, 'value').set.call(el, v);
                }}
                el.dispatchEvent(new win.Event('input', {{ bubbles: true }}));
                el.dispatchEvent(new win.Event('change', {{ bubbles: true }}));
                el.blur();
                return {{ ok: true }};
            }})()"#,
            el = element_expr(handle),
            value = js_str(value)
        );
        self.run_action(&format!("设置 {}", handle.selector), js_code).await
    }

    async fn click(&self, handle: &ControlHandle) -> AppResult<()> {
        let js_code = format!(
            r#"(() => {{
                const el = {el};
                if (!el) return {{ ok: false, reason: 'not found' }};
                if (el.disabled) return {{ ok: false, reason: 'disabled' }};
                el.scrollIntoView({{ block: 'center' }});
                el.click();
                return {{ ok: true }};
            }})()"#,
            el = element_expr(handle)
        );
        self.run_action(&format!("点击 {}", handle.selector), js_code).await
    }

    async fn wait_for_signal(&self, surface: &Surface, signal: &str, timeout: Duration) -> AppResult<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.probe_capability(surface, signal).await? {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            sleep(SIGNAL_POLL_INTERVAL).await;
        }
    }

    async fn fetch_text(&self, url: &str) -> AppResult<String> {
        let js_code = format!(
            r#"
            (async () => {{
                try {{
                    const response = await fetch({url}, {{ credentials: 'include' }});
                    const text = await response.text();
                    return {{ ok: response.ok, status: response.status, text }};
                }} catch (error) {{
                    return {{ ok: false, status: 0, text: String(error && error.message) }};
                }}
            }})()
            "#,
            url = js_str(url)
        );
        let outcome: FetchOutcome = self.executor.eval_as(js_code).await?;
        if outcome.ok {
            Ok(outcome.text)
        } else {
            Err(AppError::action_rejected(
                format!("下载 {}", url),
                format!("HTTP {}: {}", outcome.status, crate::utils::logging::truncate_text(&outcome.text, 80)),
            ))
        }
    }

    async fn subscribe_status_events(&self, tracker: StatusTracker) -> AppResult<()> {
        spawn_status_listener(
            self.executor.page().clone(),
            self.status_url_fragment.clone(),
            tracker,
        )
        .await?;
        info!("👂 已开始监听学生状态 (地址特征: {})", self.status_url_fragment);
        Ok(())
    }
}
