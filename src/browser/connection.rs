use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::error::{AppError, AppResult, SurfaceError};

/// 连接到已登录的浏览器并获取页面
///
/// 登录由用户事先在浏览器中完成；这里只复用已有会话。
/// 优先复用地址中包含 `url_hint` 的页面，找不到时新建页面并导航到 `start_url`。
pub async fn connect_to_browser_and_page(
    port: u16,
    start_url: Option<&str>,
    url_hint: Option<&str>,
) -> AppResult<(Browser, Page)> {
    let browser_url = format!("http://localhost:{}", port);
    info!("正在连接到浏览器: {}", browser_url);
    debug!("起始 URL: {:?}, 页面地址特征: {:?}", start_url, url_hint);

    let (browser, mut handler) = Browser::connect(&browser_url).await.map_err(|e| {
        error!("连接浏览器失败: {}", e);
        AppError::Surface(SurfaceError::ConnectionFailed {
            port,
            reason: e.to_string(),
        })
    })?;
    debug!("浏览器连接成功");

    // 在后台处理浏览器事件
    tokio::spawn(async move {
        while let Some(h) = handler.next().await {
            if h.is_err() {
                break;
            }
        }
    });

    // 添加短暂延迟以等待浏览器状态同步
    sleep(tokio::time::Duration::from_millis(300)).await;

    let pages = browser.pages().await?;
    debug!("获取到 {} 个页面", pages.len());

    if let Some(hint) = url_hint {
        for p in pages.iter() {
            if let Ok(Some(url)) = p.url().await {
                debug!("检查页面地址: {}", url);
                if url.contains(hint) {
                    info!("✓ 复用已打开的页面: {}", url);
                    return Ok((browser, p.clone()));
                }
            }
        }
        debug!("未找到匹配的页面，将创建新页面");
    }

    let page = browser.new_page("about:blank").await.map_err(|e| {
        error!("创建新页面失败: {}", e);
        e
    })?;

    if let Some(url) = start_url {
        page.goto(url).await.map_err(|e| {
            error!("导航到 {} 失败: {}", url, e);
            AppError::Surface(SurfaceError::NavigationFailed {
                target: url.to_string(),
                reason: e.to_string(),
            })
        })?;
        info!("已导航到: {}", url);
    }

    Ok((browser, page))
}
