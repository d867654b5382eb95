//! 评分页面抽象 - 基础设施层
//!
//! 只描述"能对页面做什么"，不认识学生和成绩。
//! 内嵌页面（iframe）和页面中的某个区域都用 [`Surface`] 值表示，
//! 沿调用链显式传递，不存在隐式的"当前页面"。

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

use crate::error::AppResult;
use crate::services::StatusTracker;

/// 定位路径中的一段
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// 进入内嵌页面
    Frame(String),
    /// 进入第 `index` 个匹配 `selector` 的元素
    Element { selector: String, index: usize },
}

/// 一个可操作的页面区域：从顶层文档出发的定位路径
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Surface {
    path: Vec<Scope>,
}

impl Surface {
    /// 顶层文档
    pub fn top() -> Self {
        Self::default()
    }

    pub fn path(&self) -> &[Scope] {
        &self.path
    }

    /// 进入内嵌页面
    pub fn frame(&self, selector: impl Into<String>) -> Self {
        let mut path = self.path.clone();
        path.push(Scope::Frame(selector.into()));
        Self { path }
    }

    /// 以某个控件为根的区域
    pub fn within(handle: &ControlHandle) -> Self {
        let mut path = handle.surface.path.clone();
        path.push(Scope::Element {
            selector: handle.selector.clone(),
            index: handle.index,
        });
        Self { path }
    }
}

impl fmt::Display for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "top")?;
        for scope in &self.path {
            match scope {
                Scope::Frame(sel) => write!(f, " > frame({})", sel)?,
                Scope::Element { selector, index } => write!(f, " > {}[{}]", selector, index)?,
            }
        }
        Ok(())
    }
}

/// 页面上的一个控件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlHandle {
    pub surface: Surface,
    pub selector: String,
    /// 在 `surface` 内匹配 `selector` 的第几个
    pub index: usize,
    /// 可见文字
    pub label: String,
    /// `value` / `href` / `data-id` / `id` 中第一个非空的
    pub ident: Option<String>,
}

/// 评分页面驱动
///
/// 由浏览器实现，测试中可以用内存实现替代。
#[async_trait]
pub trait SurfaceDriver: Send + Sync {
    /// 导航到目标地址，返回顶层区域
    async fn navigate(&self, target: &str) -> AppResult<Surface>;

    /// 进入内嵌页面，不存在时返回 `None`
    async fn enter_sub_surface(&self, parent: &Surface, selector: &str) -> AppResult<Option<Surface>>;

    /// 区域本身或其内部是否匹配 `selector`
    async fn probe_capability(&self, surface: &Surface, selector: &str) -> AppResult<bool>;

    /// 区域内匹配 `selector` 的全部控件，按文档顺序
    async fn query(&self, surface: &Surface, selector: &str) -> AppResult<Vec<ControlHandle>>;

    async fn read_text(&self, handle: &ControlHandle) -> AppResult<String>;

    async fn set_value(&self, handle: &ControlHandle, value: &str) -> AppResult<()>;

    async fn click(&self, handle: &ControlHandle) -> AppResult<()>;

    /// 等待 `signal` 出现，超时返回 `false`
    async fn wait_for_signal(&self, surface: &Surface, signal: &str, timeout: Duration) -> AppResult<bool>;

    /// 用当前会话下载文本内容
    async fn fetch_text(&self, url: &str) -> AppResult<String>;

    /// 订阅页面上的学生状态事件，写入 `tracker`
    async fn subscribe_status_events(&self, tracker: StatusTracker) -> AppResult<()>;
}
