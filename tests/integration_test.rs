use grade_submit::browser::{connect_to_browser_and_page, BrowserSurface};
use grade_submit::config::Config;
use grade_submit::infrastructure::{JsExecutor, SurfaceDriver};
use grade_submit::services::{GradingPage, GradingRequest, OpenAiOracle, OracleClient};
use grade_submit::utils::logging;
use std::sync::Arc;

#[tokio::test]
#[ignore] // 默认忽略，需要手动运行：cargo test -- --ignored
async fn test_browser_connection_and_roster() {
    // 初始化日志
    logging::init(true);

    // 加载配置
    let config = Config::from_env();
    let selectors = config.load_selectors().expect("加载选择器失败");

    // 连接浏览器
    let roster_url = config.grading_url_for("");
    let (_browser, page) =
        connect_to_browser_and_page(config.browser_debug_port, Some(&roster_url), None)
            .await
            .expect("连接浏览器失败");

    let driver = BrowserSurface::new(JsExecutor::new(page), &selectors.status_url_fragment);
    let grading_page = GradingPage::new(&config, selectors).expect("选择器配置无效");

    let top = driver.navigate(&roster_url).await.expect("打开评分页面失败");
    let roster = grading_page
        .roster(&driver, &top)
        .await
        .expect("读取名单失败");

    assert!(!roster.is_empty(), "名单不应为空");
}

#[tokio::test]
#[ignore]
async fn test_real_oracle_returns_parsable_grade() {
    // 初始化日志
    logging::init(true);

    // 加载配置
    let config = Config::from_env();

    let client = OracleClient::new(
        Arc::new(OpenAiOracle::new(&config)),
        &config.comments.parse_failure,
    )
    .expect("创建评分客户端失败");

    let request = GradingRequest {
        student_id: "123456".to_string(),
        question_id: "000001".to_string(),
        content: "def add(a, b):\n    return a + b\n".to_string(),
        question_text: "实现两个数相加的函数".to_string(),
        rubric: "满分 10 分：函数正确得 10 分".to_string(),
        max_points: 10.0,
    };

    let result = client.grade(&request).await;
    assert!((0.0..=10.0).contains(&result.score));
    assert_ne!(result.feedback, config.comments.parse_failure);
}
